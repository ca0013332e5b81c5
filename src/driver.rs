// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! File driver.
//!
//! Processes `macro:`, `template:` and `include:` forms in order,
//! runs the per-template pipeline (link, expand, type check,
//! compile) and accumulates the compilation unit: the concatenated
//! template slots, one record per opcode and the shared constant
//! table. All state lives here; nothing is process-global.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::catalog::{value_type, Direction, OpcodeCatalog, OperatorCatalog};
use crate::compile::{ConstTable, Slot, TemplateCompiler};
use crate::expand::{expand, register_macro, MacroTable};
use crate::link::link;
use crate::metrics::CompilerMetrics;
use crate::tree::{is_quoted, macro_name, macro_param, ExprArena};
use crate::types::{ty_eq, ExprType, TypeCheck};
use crate::{Error, Sexp};

/// Per-opcode compiled record. `offset` locates the template inside
/// the unit's flat slot array; `root` and links stay template-local.
#[derive(Clone, Debug)]
pub struct TemplateInfo {
    pub offset: usize,
    pub desc: String,
    pub len: usize,
    pub root: usize,
    pub destructive: bool,
}

/// Everything the emitter needs, in catalog order.
#[derive(Debug)]
pub struct Output {
    pub templates: Vec<Slot>,
    pub info: Vec<(String, Option<TemplateInfo>)>,
    pub constants: Vec<String>,
    pub metrics: CompilerMetrics,
}

pub struct Driver<'a> {
    opcodes: &'a OpcodeCatalog,
    operators: &'a OperatorCatalog,
    prefix: String,
    allow_includes: bool,

    arena: ExprArena,
    macros: MacroTable,
    slots: Vec<Slot>,
    records: BTreeMap<String, TemplateInfo>,
    consts: ConstTable,
    seen: BTreeSet<PathBuf>,
    active: Vec<PathBuf>,
    metrics: CompilerMetrics,
}

impl<'a> Driver<'a> {
    pub fn new(
        opcodes: &'a OpcodeCatalog,
        operators: &'a OperatorCatalog,
        prefix: &str,
        allow_includes: bool,
    ) -> Self {
        Self {
            opcodes,
            operators,
            prefix: prefix.to_string(),
            allow_includes,
            arena: ExprArena::new(),
            macros: MacroTable::new(),
            slots: Vec::new(),
            records: BTreeMap::new(),
            consts: ConstTable::new(),
            seen: BTreeSet::new(),
            active: Vec::new(),
            metrics: CompilerMetrics::default(),
        }
    }

    /// Process a top-level file; `include:` forms recurse through
    /// here with cycle and duplicate bookkeeping.
    #[instrument(level = "debug", skip(self))]
    pub fn run_file(&mut self, path: &Path) -> Result<(), Error> {
        let canon = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        if self.active.contains(&canon) {
            return Err(Error::IncludeCycle(path.display().to_string()));
        }

        if !self.seen.insert(canon.clone()) {
            warn!(path = %path.display(), "duplicate include skipped");
            return Ok(());
        }

        let src = fs::read_to_string(path).map_err(|e| Error::IncludeMissing {
            path: path.display().to_string(),
            source: e,
        })?;

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        self.active.push(canon);
        let res = self.run_src(&src, &dir);
        self.active.pop();

        res
    }

    /// Process source text directly (stdin, tests). Relative include
    /// paths resolve against `dir`.
    pub fn run_str(&mut self, src: &str, dir: &Path) -> Result<(), Error> {
        self.run_src(src, dir)
    }

    fn run_src(&mut self, src: &str, dir: &Path) -> Result<(), Error> {
        let forms = crate::parse_str(src)?;
        debug!(forms = forms.len(), "parsed");

        for form in &forms {
            self.form(form, dir)?;
        }

        Ok(())
    }

    fn form(&mut self, form: &Sexp, dir: &Path) -> Result<(), Error> {
        let items = form
            .list()
            .ok_or_else(|| Error::Form("top-level form must be a list".into()))?;

        match items.first().and_then(Sexp::atom) {
            Some("macro:") => self.form_macro(items),
            Some("template:") => self.form_template(items),
            Some("include:") => self.form_include(items, dir),
            Some(kw) => Err(Error::UnknownKeyword(kw.to_string())),
            None => Err(Error::Form("top-level form must start with a keyword".into())),
        }
    }

    fn form_macro(&mut self, items: &[Sexp]) -> Result<(), Error> {
        let (name_tok, params, body) = match items {
            [_, Sexp::Atom(name), Sexp::List(params), body] => {
                (name.as_str(), params.as_slice(), body)
            }
            _ => {
                return Err(Error::Form(
                    "macro: needs a name, a parameter list and a body".into(),
                ))
            }
        };

        let Some(name) = macro_name(name_tok) else {
            return Err(Error::Form("macro: name must start with '^'".into()));
        };

        let mut param_names = Vec::with_capacity(params.len());
        for p in params {
            let Some(p) = p.atom().and_then(macro_param) else {
                return Err(Error::Form(format!(
                    "macro '^{name}': parameters must be ,name atoms"
                )));
            };

            param_names.push(p.to_string());
        }

        let body = self
            .arena
            .intern(body)
            .node()
            .ok_or_else(|| Error::Form(format!("macro '^{name}': body must be a list")))?;

        register_macro(
            &mut self.arena,
            &mut self.macros,
            self.operators,
            name,
            param_names,
            body,
            &mut self.metrics,
        )?;
        debug!(name, "macro registered");

        Ok(())
    }

    fn form_template(&mut self, items: &[Sexp]) -> Result<(), Error> {
        let (name_tok, expr) = match items {
            [_, Sexp::Atom(name), expr] => (name.as_str(), expr),
            _ => {
                return Err(Error::Form(
                    "template: needs an opcode and one expression".into(),
                ))
            }
        };

        let (opcode, destructive) = match name_tok.strip_suffix('!') {
            Some(base) => (base, true),
            None => (name_tok, false),
        };

        let Some(descs) = self.opcodes.get(opcode) else {
            return Err(Error::UnknownOpcode(opcode.to_string()));
        };

        if self.records.contains_key(opcode) {
            return Err(Error::RedefinedOpcode(opcode.to_string()));
        }

        let env: Vec<ExprType> = descs.iter().map(|d| value_type(&d.type_tag)).collect();
        let write = descs.iter().find(|d| d.direction == Direction::Write);

        if destructive && write.is_none() {
            return Err(Error::DestructiveWithoutWrite(opcode.to_string()));
        }

        // The template must produce what the opcode promises: void
        // when destructive or writeless, the write operand's mapped
        // type otherwise.
        let expected = match write {
            Some(w) if !destructive => value_type(&w.type_tag),
            _ => ExprType::Void,
        };

        let root = self
            .arena
            .intern(expr)
            .node()
            .ok_or_else(|| Error::Form("template: expression must be a list".into()))?;

        link(
            &mut self.arena,
            root,
            self.operators,
            &env,
            &mut self.metrics,
        )?;
        expand(&mut self.arena, root, &self.macros, &mut self.metrics)?;

        let mut tc = TypeCheck::strict(&self.arena, self.operators, &env, opcode);
        let got = tc.node_type(root)?;
        if !ty_eq(got, expected) {
            return Err(Error::TypeMismatch {
                op: opcode.to_string(),
                pos: 0,
                got,
                want: expected,
            });
        }

        let tpl = TemplateCompiler::new(
            &self.arena,
            self.operators,
            opcode,
            descs,
            &self.prefix,
            &mut self.consts,
        )
        .compile(root)?;

        let offset = self.slots.len();
        let len = tpl.slots.len();
        debug!(opcode, offset, len, root = tpl.root, "template compiled");

        self.slots.extend(tpl.slots);
        self.records.insert(
            opcode.to_string(),
            TemplateInfo {
                offset,
                desc: tpl.desc,
                len,
                root: tpl.root,
                destructive,
            },
        );
        self.metrics.inc_templates();

        Ok(())
    }

    fn form_include(&mut self, items: &[Sexp], dir: &Path) -> Result<(), Error> {
        if !self.allow_includes {
            return Err(Error::Form("include: directives are disabled".into()));
        }

        let path_tok = match items {
            [_, Sexp::Atom(p)] => p.as_str(),
            _ => return Err(Error::Form("include: needs a quoted path".into())),
        };

        if !is_quoted(path_tok) {
            return Err(Error::Form("include: path must be a quoted string".into()));
        }

        let rel = &path_tok[1..path_tok.len() - 1];
        self.run_file(&dir.join(rel))
    }

    pub fn finish(mut self) -> Output {
        self.metrics.set_constants(self.consts.len() as u32);
        debug!(
            templates = self.metrics.templates,
            macros = self.metrics.macros,
            constants = self.metrics.constants,
            "compilation unit finished"
        );

        let info: Vec<(String, Option<TemplateInfo>)> = self
            .opcodes
            .names()
            .map(|n| (n.to_string(), self.records.remove(n)))
            .collect();

        Output {
            templates: self.slots,
            info,
            constants: self.consts.into_values(),
            metrics: self.metrics,
        }
    }
}
