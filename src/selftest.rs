// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Built-in self-tests behind the CLI `--test` flag.
//!
//! The checks drive the full pipeline over a handful of fixed
//! scenarios against small fixture catalogs. The fixtures are also
//! what the test suite uses, so the shipped binary and `cargo test`
//! exercise the same tables.

use std::path::Path;

use crate::catalog::{OpcodeCatalog, OperatorCatalog};
use crate::compile::Slot;
use crate::driver::Driver;
use crate::expand::expand;
use crate::link::link;
use crate::metrics::CompilerMetrics;
use crate::tree::{ExprArena, Item, NodeId};
use crate::types::ExprType;
use crate::Error;

/// A small opcode catalog in the shape the VM description supplies.
pub fn fixture_opcodes() -> OpcodeCatalog {
    OpcodeCatalog::parse_str(
        r"
(opcode: add_i (w reg) (r reg) (r reg))
(opcode: inc_i (w reg))
(opcode: dec_i (w reg))
(opcode: sp_deref (w num64) (r reg))
(opcode: store_frame (r reg) (r reg))
",
    )
    .expect("fixture opcode catalog is well-formed")
}

/// Expression operators with their operand and parameter counts;
/// negative operand counts mark variadic entries.
pub fn fixture_operators() -> OperatorCatalog {
    OperatorCatalog::parse_str(
        r"
(operator: load 1 1)
(operator: load_num 1 1)
(operator: store 2 1)
(operator: store_num 2 1)
(operator: addr 1 1)
(operator: idx 2 1)
(operator: copy 1 0)
(operator: discard 1 0)
(operator: add 2 0)
(operator: sub 2 0)
(operator: mul 2 0)
(operator: const 0 2)
(operator: const_num 0 2)
(operator: const_ptr 1 0)
(operator: const_large 1 1)
(operator: cast 1 3)
(operator: do -1 0)
(operator: dov -1 0)
(operator: if 3 0)
(operator: ifv 3 0)
(operator: when 2 0)
(operator: branch 1 0)
(operator: label 0 1)
(operator: mark 0 1)
(operator: eq 2 0)
(operator: ne 2 0)
(operator: lt 2 0)
(operator: le 2 0)
(operator: gt 2 0)
(operator: ge 2 0)
(operator: nz 1 0)
(operator: zr 1 0)
(operator: all -1 0)
(operator: any -1 0)
(operator: call 2 1)
(operator: callv 2 1)
(operator: calln 2 1)
(operator: arglist -1 0)
(operator: carg 1 0)
(operator: guard 1 2)
(operator: pargs 0 0)
(operator: tc 0 0)
(operator: cu 0 0)
(operator: frame 0 0)
",
    )
    .expect("fixture operator catalog is well-formed")
}

/// Run every built-in scenario; the first failure aborts.
pub fn run() -> Result<(), Error> {
    scenario_link_sharing()?;
    scenario_nested_let()?;
    scenario_macro_hygiene()?;
    scenario_template_shape()?;
    scenario_constant_dedup()?;
    scenario_redefined_opcode()?;
    scenario_type_mismatch()?;

    Ok(())
}

fn ensure(cond: bool, what: &str) -> Result<(), Error> {
    if cond {
        Ok(())
    } else {
        Err(Error::Form(format!("self-test failed: {what}")))
    }
}

fn first_form(src: &str, arena: &mut ExprArena) -> Result<NodeId, Error> {
    let forms = crate::parse_str(src)?;
    let first = forms
        .first()
        .ok_or_else(|| Error::Form("self-test: empty input".into()))?;

    arena
        .intern(first)
        .node()
        .ok_or_else(|| Error::Form("self-test: expected a list form".into()))
}

fn node_at(arena: &ExprArena, id: NodeId, i: usize) -> Result<NodeId, Error> {
    arena
        .items(id)
        .get(i)
        .and_then(Item::node)
        .ok_or_else(|| Error::Form("self-test: expected a node element".into()))
}

/// A linked definition is the same node as its use site.
fn scenario_link_sharing() -> Result<(), Error> {
    let operators = fixture_operators();
    let env = [ExprType::Reg, ExprType::Reg];

    let mut arena = ExprArena::new();
    let root = first_form("(let: (($foo (copy $1))) (load $foo 8))", &mut arena)?;

    let mut metrics = CompilerMetrics::default();
    link(&mut arena, root, &operators, &env, &mut metrics)?;

    ensure(arena.head(root) == Some("do"), "let: head rewritten to do")?;

    let discard = node_at(&arena, root, 1)?;
    ensure(
        arena.head(discard) == Some("discard"),
        "definition spliced in discard-wrapped",
    )?;
    let def = node_at(&arena, discard, 1)?;

    let body = node_at(&arena, root, 2)?;
    ensure(arena.head(body) == Some("load"), "body preserved")?;
    ensure(
        arena.items(body)[1].node() == Some(def),
        "use site shares the defining node",
    )?;

    // Re-linking is a no-op.
    let before = arena.items(root).to_vec();
    link(&mut arena, root, &operators, &env, &mut metrics)?;
    ensure(arena.items(root) == before.as_slice(), "re-linking is idempotent")
}

/// Nested scopes: shadowing, sharing through two levels.
fn scenario_nested_let() -> Result<(), Error> {
    let operators = fixture_operators();
    let env = [ExprType::Reg, ExprType::Reg];

    let mut arena = ExprArena::new();
    let root = first_form(
        "(let: (($foo (const 1 1)) ($bar (add $foo $foo)))
           (let: (($foo (sub $bar (const 1 1)))) (copy $foo)))",
        &mut arena,
    )?;

    let mut metrics = CompilerMetrics::default();
    link(&mut arena, root, &operators, &env, &mut metrics)?;

    ensure(arena.head(root) == Some("do"), "outer let: rewritten")?;

    let const_node = node_at(&arena, node_at(&arena, root, 1)?, 1)?;
    let add_node = node_at(&arena, node_at(&arena, root, 2)?, 1)?;
    ensure(arena.head(add_node) == Some("add"), "second binding is the add")?;

    let add_items = arena.items(add_node);
    ensure(
        add_items[1].node() == Some(const_node) && add_items[2].node() == Some(const_node),
        "both add operands share the const node",
    )?;

    let inner = node_at(&arena, root, 3)?;
    ensure(arena.head(inner) == Some("do"), "inner let: rewritten")?;

    let sub_node = node_at(&arena, node_at(&arena, inner, 1)?, 1)?;
    ensure(arena.head(sub_node) == Some("sub"), "inner binding is the sub")?;
    ensure(
        arena.items(sub_node)[1].node() == Some(add_node),
        "sub's first operand is the outer add",
    )?;

    let copy_node = node_at(&arena, inner, 2)?;
    ensure(
        arena.items(copy_node)[1].node() == Some(sub_node),
        "copy sees the shadowing definition",
    )
}

/// Macro expansion cannot capture caller names and keeps its body DAG.
fn scenario_macro_hygiene() -> Result<(), Error> {
    let operators = fixture_operators();
    let env = [ExprType::Reg, ExprType::Reg];

    let mut arena = ExprArena::new();
    let mut macros = crate::expand::MacroTable::new();
    let mut metrics = CompilerMetrics::default();

    let body = first_form("(let: (($obj (addr ,foo 8))) (add ,foo $obj))", &mut arena)?;
    crate::expand::register_macro(
        &mut arena,
        &mut macros,
        &operators,
        "foo",
        vec!["foo".to_string()],
        body,
        &mut metrics,
    )?;

    let root = first_form("(let: (($obj (load $1 8))) (^foo $obj))", &mut arena)?;
    link(&mut arena, root, &operators, &env, &mut metrics)?;
    expand(&mut arena, root, &macros, &mut metrics)?;

    let load_node = node_at(&arena, node_at(&arena, root, 1)?, 1)?;
    ensure(arena.head(load_node) == Some("load"), "outer binding is the load")?;

    // The call site was replaced by the macro body instance.
    let instance = node_at(&arena, root, 2)?;
    ensure(arena.head(instance) == Some("do"), "instance keeps the linked body shape")?;

    let addr_node = node_at(&arena, node_at(&arena, instance, 1)?, 1)?;
    ensure(arena.head(addr_node) == Some("addr"), "macro-local addr node")?;
    ensure(
        arena.items(addr_node)[1].node() == Some(load_node),
        ",foo resolves to the caller's load node",
    )?;

    let add_node = node_at(&arena, instance, 2)?;
    let add_items = arena.items(add_node);
    ensure(
        add_items[1].node() == Some(load_node),
        "second ,foo use shares the same load node",
    )?;
    ensure(
        add_items[2].node() == Some(addr_node),
        "macro-local $obj stays local; no capture",
    )
}

/// Full pipeline shape of one template, plus the flat-form laws.
fn scenario_template_shape() -> Result<(), Error> {
    let opcodes = fixture_opcodes();
    let operators = fixture_operators();

    let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", false);
    driver.run_str(
        "(template: add_i (load (addr (pargs) $1) 8))",
        Path::new("."),
    )?;
    let out = driver.finish();

    let rec = out
        .info
        .iter()
        .find(|(n, _)| n == "add_i")
        .and_then(|(_, r)| r.as_ref())
        .ok_or_else(|| Error::Form("self-test: add_i record missing".into()))?;

    ensure(rec.desc == "nsnslinsl.", "descriptor shape")?;
    ensure(rec.root == 6, "root indexes the top-level load")?;
    ensure(rec.len == rec.desc.len(), "descriptor parallels the slots")?;

    let slots = &out.templates[rec.offset..rec.offset + rec.len];
    for (p, tag) in rec.desc.char_indices() {
        ensure("nsli.cf".contains(tag), "descriptor alphabet")?;

        if tag == 'l' {
            let Slot::Int(v) = &slots[p] else {
                return Err(Error::Form("self-test: link slot must be an int".into()));
            };
            ensure((*v as usize) < p, "links point strictly backwards")?;
        }

        if tag == 'n' {
            ensure(
                rec.desc.as_bytes().get(p + 1) == Some(&b's'),
                "every operator slot is followed by its operand count",
            )?;
        }
    }

    ensure(
        rec.desc.as_bytes()[rec.root] == b'n',
        "root is an operator slot",
    )
}

/// Registering the same constant twice yields the same index.
fn scenario_constant_dedup() -> Result<(), Error> {
    let opcodes = fixture_opcodes();
    let operators = fixture_operators();

    let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", false);
    driver.run_str(
        "(template: add_i (load (const_large 281474976710655 8) 8))
         (template: inc_i (add $0 (const_large 281474976710655 8)))",
        Path::new("."),
    )?;
    let out = driver.finish();

    ensure(out.constants.len() == 1, "constant table dedups by value")?;
    ensure(
        out.constants[0] == "281474976710655",
        "constant value preserved",
    )
}

fn scenario_redefined_opcode() -> Result<(), Error> {
    let opcodes = fixture_opcodes();
    let operators = fixture_operators();

    let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", false);
    let err = driver
        .run_str(
            "(template: add_i (copy $1)) (template: add_i (copy $2))",
            Path::new("."),
        )
        .err();

    ensure(
        matches!(err, Some(Error::RedefinedOpcode(ref n)) if n == "add_i"),
        "re-declaring an opcode is fatal",
    )
}

fn scenario_type_mismatch() -> Result<(), Error> {
    let opcodes = fixture_opcodes();
    let operators = fixture_operators();

    // sp_deref's write operand maps to num; a reg-typed template
    // body must be rejected.
    let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", false);
    let err = driver
        .run_str("(template: sp_deref (copy $1))", Path::new("."))
        .err();

    ensure(
        matches!(
            err,
            Some(Error::TypeMismatch {
                got: ExprType::Reg,
                want: ExprType::Num,
                ..
            })
        ),
        "template result type must match the opcode's output type",
    )
}
