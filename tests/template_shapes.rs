// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

use std::path::Path;

use jit_lisp::compile::Slot;
use jit_lisp::driver::{Driver, Output, TemplateInfo};
use jit_lisp::selftest::{fixture_opcodes, fixture_operators};

fn compile(src: &str) -> Output {
    let opcodes = fixture_opcodes();
    let operators = fixture_operators();

    let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", false);
    driver.run_str(src, Path::new(".")).unwrap();

    driver.finish()
}

fn record<'a>(out: &'a Output, opcode: &str) -> &'a TemplateInfo {
    out.info
        .iter()
        .find(|(n, _)| n == opcode)
        .and_then(|(_, r)| r.as_ref())
        .unwrap()
}

fn check_invariants(out: &Output, rec: &TemplateInfo) {
    assert_eq!(rec.len, rec.desc.len());

    let slots = &out.templates[rec.offset..rec.offset + rec.len];
    let desc = rec.desc.as_bytes();

    for (p, &tag) in desc.iter().enumerate() {
        assert!(
            matches!(tag, b'n' | b's' | b'l' | b'i' | b'.' | b'c' | b'f'),
            "descriptor alphabet violated at {p}: {}",
            tag as char
        );

        match tag {
            b'n' => assert_eq!(desc.get(p + 1), Some(&b's'), "n at {p} not followed by s"),
            b'l' => {
                let Slot::Int(v) = &slots[p] else {
                    panic!("link slot {p} is not an int");
                };
                assert!((*v as usize) < p, "link at {p} points forward to {v}");
            }
            _ => {}
        }
    }

    assert_eq!(desc[rec.root], b'n', "root does not index an operator slot");
}

#[test]
fn seeded_template_shape() {
    let out = compile("(template: add_i (load (addr (pargs) $1) 8))");
    let rec = record(&out, "add_i");

    assert_eq!(rec.desc, "nsnslinsl.");
    assert_eq!(rec.root, 6);
    assert!(!rec.destructive);
    check_invariants(&out, rec);

    let slots = &out.templates[rec.offset..rec.offset + rec.len];
    assert_eq!(slots[0], Slot::Sym("MVM_JIT_PARGS".to_string()));
    assert_eq!(slots[6], Slot::Sym("MVM_JIT_LOAD".to_string()));
    assert_eq!(slots[7], Slot::Int(1));
    assert_eq!(slots[9], Slot::Int(8));
}

#[test]
fn bareword_operand_compiles_to_parameter() {
    // The same template with pargs written as a bareword: it turns
    // into a prefixed literal parameter instead of a nullary node.
    let out = compile("(template: add_i (load (addr pargs $1) 8))");
    let rec = record(&out, "add_i");

    assert_eq!(rec.desc, "ns.insl.");
    check_invariants(&out, rec);

    let slots = &out.templates[rec.offset..rec.offset + rec.len];
    assert_eq!(slots[2], Slot::Sym("MVM_JIT_PARGS".to_string()));
}

#[test]
fn shared_subtrees_compile_once_with_equal_links() {
    let out = compile("(template: add_i (let: (($x (load $1 8))) (add $x $x)))");
    let rec = record(&out, "add_i");
    check_invariants(&out, rec);

    let slots = &out.templates[rec.offset..rec.offset + rec.len];
    let desc = rec.desc.as_bytes();

    // The add node carries two links with the same target.
    let add_pos = slots
        .iter()
        .position(|s| *s == Slot::Sym("MVM_JIT_ADD".to_string()))
        .unwrap();
    assert_eq!(desc[add_pos + 2], b'l');
    assert_eq!(desc[add_pos + 3], b'l');
    assert_eq!(slots[add_pos + 2], slots[add_pos + 3]);

    // Only one load was emitted.
    let loads = slots
        .iter()
        .filter(|s| **s == Slot::Sym("MVM_JIT_LOAD".to_string()))
        .count();
    assert_eq!(loads, 1);
}

#[test]
fn destructive_template_is_flagged_and_void() {
    let out = compile(r"(template: add_i! (store \$0 $1 8))");
    let rec = record(&out, "add_i");

    assert!(rec.destructive);
    check_invariants(&out, rec);

    let slots = &out.templates[rec.offset..rec.offset + rec.len];
    assert_eq!(rec.desc, "nsii.");
    assert_eq!(slots[0], Slot::Sym("MVM_JIT_STORE".to_string()));
    assert_eq!(slots[2], Slot::Int(0));
    assert_eq!(slots[3], Slot::Int(1));
}

#[test]
fn constants_dedup_across_templates() {
    let out = compile(
        "(template: add_i (load (const_large 281474976710655 8) 8))
         (template: inc_i (add $0 (const_large 281474976710655 8)))",
    );

    assert_eq!(out.constants, vec!["281474976710655".to_string()]);

    // Both templates reference constant index 0.
    for opcode in ["add_i", "inc_i"] {
        let rec = record(&out, opcode);
        check_invariants(&out, rec);

        let slots = &out.templates[rec.offset..rec.offset + rec.len];
        let cpos = rec.desc.find('c').unwrap();
        assert_eq!(slots[cpos], Slot::Int(0));
    }
}

#[test]
fn templates_concatenate_with_offsets() {
    let out = compile(
        "(template: add_i (copy $1))
         (template: inc_i (add $0 (const 1 1)))",
    );

    let first = record(&out, "add_i");
    let second = record(&out, "inc_i");

    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, first.len);
    assert_eq!(out.templates.len(), first.len + second.len);
}

#[test]
fn macro_call_parameters_emit_textually() {
    let out = compile("(template: add_i (load $1 (&offsetof MVMArray body)))");
    let rec = record(&out, "add_i");
    check_invariants(&out, rec);

    let slots = &out.templates[rec.offset..rec.offset + rec.len];
    assert_eq!(rec.desc, "nsi.");
    assert_eq!(
        slots[3],
        Slot::Sym("offsetof(MVMArray, body)".to_string())
    );
}

#[test]
fn polymorphic_template_satisfies_concrete_output() {
    // copy is ?-typed over its operand; $1 is reg for add_i.
    let out = compile("(template: add_i (copy $1))");
    let rec = record(&out, "add_i");

    assert_eq!(rec.desc, "nsi");
    assert_eq!(rec.root, 0);
}
