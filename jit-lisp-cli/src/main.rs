// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Command-line wrapper for the jit-lisp template compiler.
//!
//! Loads the opcode and operator catalog descriptions, drives the
//! file driver over the template source and emits the computed
//! tables as JSON. The textual layout is owned by the downstream
//! emitter; this wrapper only fixes the values.

#![forbid(unsafe_code)]

use clap::Parser;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

use jit_lisp::catalog::{OpcodeCatalog, OperatorCatalog};
use jit_lisp::compile::Slot;
use jit_lisp::driver::{Driver, Output};
use jit_lisp::selftest;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "jit-lisp",
    about = "Compile JIT expression templates into flat lowering tables",
    version
)]
struct Cli {
    /// Template source file (defaults to stdin)
    input: Option<PathBuf>,
    /// Opcode catalog description file
    #[arg(long)]
    opcodes: Option<PathBuf>,
    /// Expression operator catalog description file
    #[arg(long)]
    operators: Option<PathBuf>,
    /// Prefix prepended to emitted operator and bareword constants
    #[arg(long, default_value = "MVM_JIT_")]
    prefix: String,
    /// Output path (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Allow include: directives in template files
    #[arg(long, default_value_t = false)]
    include: bool,
    /// Run the built-in self-tests and exit
    #[arg(long, default_value_t = false)]
    test: bool,
    /// Log level (trace|debug|info|warn|error)
    #[arg(
        long,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"],
    )]
    log_level: String,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("compile error: {0}")]
    Compile(#[from] jit_lisp::Error),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("io error: {source}: {path}")]
    IoPath {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl CliError {
    fn code(&self) -> i32 {
        match self {
            CliError::InvalidInput(_) => 2,
            CliError::Compile(_) => 3,
            CliError::Io(_) | CliError::IoPath { .. } => 5,
        }
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|e| CliError::IoPath {
        source: e,
        path: path.to_path_buf(),
    })
}

fn try_main(cli: &Cli) -> Result<(), CliError> {
    if cli.test {
        selftest::run()?;
        println!("self-test: ok");

        return Ok(());
    }

    let (Some(opcodes_path), Some(operators_path)) = (&cli.opcodes, &cli.operators) else {
        return Err(CliError::InvalidInput(
            "--opcodes and --operators are required".into(),
        ));
    };

    let opcodes = OpcodeCatalog::parse_str(&read_file(opcodes_path)?)?;
    let operators = OperatorCatalog::parse_str(&read_file(operators_path)?)?;

    let mut driver = Driver::new(&opcodes, &operators, &cli.prefix, cli.include);

    match &cli.input {
        Some(path) => driver.run_file(path)?,
        None => {
            let mut src = String::new();
            std::io::stdin().read_to_string(&mut src)?;

            driver.run_str(&src, Path::new("."))?;
        }
    }

    let out = driver.finish();
    let rendered = render(&out);

    match &cli.output {
        Some(path) => fs::write(path, rendered).map_err(|e| CliError::IoPath {
            source: e,
            path: path.clone(),
        })?,
        None => println!("{rendered}"),
    }

    Ok(())
}

fn render(out: &Output) -> String {
    let templates: Vec<serde_json::Value> = out.templates.iter().map(slot_json).collect();

    let mut info = serde_json::Map::new();
    for (name, rec) in &out.info {
        let row = match rec {
            Some(r) => serde_json::json!({
                "offset": r.offset,
                "desc": r.desc,
                "len": r.len,
                "root": r.root,
                "destructive": r.destructive,
            }),
            None => serde_json::Value::Null,
        };

        info.insert(name.clone(), row);
    }

    serde_json::json!({
        "templates": templates,
        "template_info": info,
        "constants": out.constants,
    })
    .to_string()
}

fn slot_json(slot: &Slot) -> serde_json::Value {
    match slot {
        Slot::Int(v) => serde_json::json!(v),
        Slot::Sym(s) => serde_json::json!(s),
    }
}

// Batch tool: one subscriber for the process, --log-level wins over
// RUST_LOG.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(e) = try_main(&cli) {
        eprintln!("error: {e}");

        // No stale artifact survives a failed run.
        if let Some(path) = &cli.output {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }

        std::process::exit(e.code());
    }
}
