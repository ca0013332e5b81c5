// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

use std::fs;
use std::path::Path;

use jit_lisp::driver::Driver;
use jit_lisp::selftest::{fixture_opcodes, fixture_operators};
use jit_lisp::types::ExprType;
use jit_lisp::Error;

fn run(src: &str) -> Result<(), Error> {
    let opcodes = fixture_opcodes();
    let operators = fixture_operators();
    let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", false);

    driver.run_str(src, Path::new("."))
}

#[test]
fn redefined_opcode_is_fatal() {
    let err = run("(template: add_i (copy $1)) (template: add_i (copy $2))").unwrap_err();
    assert!(matches!(err, Error::RedefinedOpcode(n) if n == "add_i"));
}

#[test]
fn destructive_suffix_counts_as_the_same_opcode() {
    let err = run(r"(template: add_i (copy $1)) (template: add_i! (store \$0 $1 8))").unwrap_err();
    assert!(matches!(err, Error::RedefinedOpcode(n) if n == "add_i"));
}

#[test]
fn unknown_opcode_is_fatal() {
    let err = run("(template: no_such (copy $1))").unwrap_err();
    assert!(matches!(err, Error::UnknownOpcode(n) if n == "no_such"));
}

#[test]
fn unknown_keyword_is_fatal() {
    let err = run("(templat: add_i (copy $1))").unwrap_err();
    assert!(matches!(err, Error::UnknownKeyword(k) if k == "templat:"));
}

#[test]
fn template_result_must_match_opcode_output() {
    // sp_deref's write operand maps to num.
    let err = run("(template: sp_deref (copy $1))").unwrap_err();
    assert!(
        matches!(
            err,
            Error::TypeMismatch {
                ref op,
                got: ExprType::Reg,
                want: ExprType::Num,
                ..
            } if op == "sp_deref"
        ),
        "{err}"
    );
}

#[test]
fn writeless_opcode_expects_void() {
    let err = run("(template: store_frame (copy $1))").unwrap_err();
    assert!(matches!(
        err,
        Error::TypeMismatch {
            want: ExprType::Void,
            ..
        }
    ));

    run(r"(template: store_frame (store $0 $1 8))").unwrap();
}

#[test]
fn destructive_without_write_is_fatal() {
    let err = run(r"(template: store_frame! (store $0 $1 8))").unwrap_err();
    assert!(matches!(err, Error::DestructiveWithoutWrite(n) if n == "store_frame"));
}

#[test]
fn redefined_macro_is_fatal() {
    let err = run("(macro: ^m (,a) (copy ,a)) (macro: ^m (,a) (copy ,a))").unwrap_err();
    assert!(matches!(err, Error::RedefinedMacro(n) if n == "m"));
}

#[test]
fn unknown_operator_is_fatal() {
    let err = run("(template: add_i (frobnicate $1))").unwrap_err();
    assert!(matches!(err, Error::UnknownOperator(n) if n == "frobnicate"));
}

#[test]
fn macro_form_shape_checked() {
    let err = run("(macro: ^m (a) (copy a))").unwrap_err();
    assert!(err.to_string().contains(",name"));
}

mod includes {
    use super::*;

    fn driver_src(dir: &Path, src: &str) -> Result<(), Error> {
        let opcodes = fixture_opcodes();
        let operators = fixture_operators();
        let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", true);

        driver.run_str(src, dir)
    }

    #[test]
    fn include_merges_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("more.expr"),
            "(template: inc_i (add $0 (const 1 1)))",
        )
        .unwrap();

        let opcodes = fixture_opcodes();
        let operators = fixture_operators();
        let mut driver = Driver::new(&opcodes, &operators, "MVM_JIT_", true);

        driver
            .run_str(
                "(template: add_i (copy $1)) (include: \"more.expr\")",
                dir.path(),
            )
            .unwrap();

        let out = driver.finish();
        let add = out
            .info
            .iter()
            .find(|(n, _)| n == "add_i")
            .and_then(|(_, r)| r.as_ref())
            .unwrap();
        let inc = out
            .info
            .iter()
            .find(|(n, _)| n == "inc_i")
            .and_then(|(_, r)| r.as_ref())
            .unwrap();

        assert_eq!(add.offset, 0);
        assert_eq!(inc.offset, add.len);
        assert_eq!(out.templates.len(), add.len + inc.len);
    }

    #[test]
    fn included_macros_are_visible_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("macros.expr"), "(macro: ^id (,v) (copy ,v))").unwrap();

        driver_src(
            dir.path(),
            "(include: \"macros.expr\") (template: add_i (^id $1))",
        )
        .unwrap();
    }

    #[test]
    fn duplicate_include_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("more.expr"),
            "(template: inc_i (add $0 (const 1 1)))",
        )
        .unwrap();

        // A second inclusion would re-declare inc_i if it ran.
        driver_src(
            dir.path(),
            "(include: \"more.expr\") (include: \"more.expr\")",
        )
        .unwrap();
    }

    #[test]
    fn include_cycle_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.expr"), "(include: \"b.expr\")").unwrap();
        fs::write(dir.path().join("b.expr"), "(include: \"a.expr\")").unwrap();

        let err = driver_src(dir.path(), "(include: \"a.expr\")").unwrap_err();
        assert!(matches!(err, Error::IncludeCycle(_)), "{err}");
    }

    #[test]
    fn missing_include_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = driver_src(dir.path(), "(include: \"nope.expr\")").unwrap_err();
        assert!(matches!(err, Error::IncludeMissing { .. }), "{err}");
    }

    #[test]
    fn opcode_collision_across_includes_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("more.expr"), "(template: add_i (copy $2))").unwrap();

        let err = driver_src(
            dir.path(),
            "(template: add_i (copy $1)) (include: \"more.expr\")",
        )
        .unwrap_err();
        assert!(matches!(err, Error::RedefinedOpcode(n) if n == "add_i"));
    }
}
