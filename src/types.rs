// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Expression type domain and the tree type checker.
//!
//! Operator result and operand types are fixed compiler tables; the
//! operator catalog only contributes arities. The checker memoizes
//! per node id, so a shared subtree is typed exactly once.
//!
//! The checker runs in two modes. While linking, macros are still
//! unexpanded and macro parameters unresolved, so the *lenient* mode
//! types those holes as `?` and enforces nothing. After expansion the
//! *strict* mode resolves every atom and checks arities and operand
//! types for real.

use std::collections::HashMap;
use std::fmt;

use crate::catalog::OperatorCatalog;
use crate::tree::{
    macro_call_name, macro_name, macro_param, name_ref, parse_number, parse_operand_ref, ExprArena,
    Item, NodeId,
};
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExprType {
    Reg,
    Num,
    Flag,
    Void,
    /// Polymorphic over `reg`/`num`.
    Any,
    Arglist,
    Carg,
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExprType::Reg => "reg",
            ExprType::Num => "num",
            ExprType::Flag => "flag",
            ExprType::Void => "void",
            ExprType::Any => "?",
            ExprType::Arglist => "arglist",
            ExprType::Carg => "carg",
        };

        f.write_str(s)
    }
}

/// Type equivalence: identity, or `?` against a concrete `reg`/`num`.
pub fn ty_eq(a: ExprType, b: ExprType) -> bool {
    a == b
        || (a == ExprType::Any && matches!(b, ExprType::Reg | ExprType::Num))
        || (b == ExprType::Any && matches!(a, ExprType::Reg | ExprType::Num))
}

/// Join of two branch types; a concrete `reg`/`num` dominates `?`.
fn join(a: ExprType, b: ExprType) -> Option<ExprType> {
    if a == b {
        return Some(a);
    }
    if a == ExprType::Any && matches!(b, ExprType::Reg | ExprType::Num) {
        return Some(b);
    }
    if b == ExprType::Any && matches!(a, ExprType::Reg | ExprType::Num) {
        return Some(a);
    }

    None
}

/// Fixed result type per operator; everything unlisted yields `reg`.
pub fn result_type(op: &str) -> ExprType {
    match op {
        "store" | "store_num" | "discard" | "dov" | "ifv" | "when" | "branch" | "mark"
        | "callv" | "guard" => ExprType::Void,
        "lt" | "le" | "eq" | "ne" | "ge" | "gt" | "nz" | "zr" | "all" | "any" => ExprType::Flag,
        "const_num" | "load_num" | "calln" => ExprType::Num,
        "if" | "copy" | "do" | "add" | "sub" | "mul" => ExprType::Any,
        "arglist" => ExprType::Arglist,
        "carg" => ExprType::Carg,
        _ => ExprType::Reg,
    }
}

/// Expected operand types per operator. Unlisted operators expect
/// `reg` everywhere.
fn operand_types(op: &str) -> Option<&'static [ExprType]> {
    use ExprType::*;

    Some(match op {
        "when" => &[Flag, Void],
        "all" | "any" => &[Flag],
        "nz" | "zr" => &[Any],
        "lt" | "le" | "eq" | "ne" | "ge" | "gt" => &[Any],
        "call" | "callv" | "calln" => &[Reg, Arglist],
        "store" => &[Reg, Any],
        "store_num" => &[Reg, Num],
        "const_ptr" | "const_large" => &[Any],
        "discard" => &[Any],
        "guard" => &[Void],
        "arglist" => &[Carg],
        "carg" => &[Any],
        _ => return None,
    })
}

/// Fill rule: an exact list is used as-is; a two-entry list repeats
/// its first entry for all but the last operand; otherwise the final
/// entry repeats.
fn expected_at(types: &'static [ExprType], argc: usize, i: usize) -> ExprType {
    if types.len() >= argc {
        types[i]
    } else if types.len() == 2 {
        if i + 1 == argc {
            types[1]
        } else {
            types[0]
        }
    } else {
        types[i.min(types.len() - 1)]
    }
}

pub struct TypeCheck<'a> {
    arena: &'a ExprArena,
    operators: &'a OperatorCatalog,
    /// Expression types of the enclosing opcode's operand vector.
    operands: &'a [ExprType],
    /// Opcode name, for diagnostics only.
    opcode: &'a str,
    lenient: bool,
    memo: HashMap<NodeId, ExprType>,
}

impl<'a> TypeCheck<'a> {
    pub fn strict(
        arena: &'a ExprArena,
        operators: &'a OperatorCatalog,
        operands: &'a [ExprType],
        opcode: &'a str,
    ) -> Self {
        Self {
            arena,
            operators,
            operands,
            opcode,
            lenient: false,
            memo: HashMap::new(),
        }
    }

    pub fn lenient(
        arena: &'a ExprArena,
        operators: &'a OperatorCatalog,
        operands: &'a [ExprType],
    ) -> Self {
        Self {
            arena,
            operators,
            operands,
            opcode: "",
            lenient: true,
            memo: HashMap::new(),
        }
    }

    pub fn node_type(&mut self, id: NodeId) -> Result<ExprType, Error> {
        if let Some(&t) = self.memo.get(&id) {
            return Ok(t);
        }

        let items = self.arena.items(id).to_vec();
        let head = match items.first() {
            Some(Item::Atom(s)) => s.clone(),
            _ => return Err(Error::Form("expression operator must be an atom".into())),
        };

        let t = self.list_type(&head, &items[1..])?;
        self.memo.insert(id, t);

        Ok(t)
    }

    pub fn item_type(&mut self, item: &Item) -> Result<ExprType, Error> {
        match item {
            Item::Node(id) => self.node_type(*id),
            Item::Atom(a) => self.atom_type(a),
        }
    }

    fn atom_type(&self, a: &str) -> Result<ExprType, Error> {
        if let Some(r) = parse_operand_ref(a) {
            if r.write {
                return Ok(ExprType::Reg);
            }

            return match self.operands.get(r.index) {
                Some(&t) => Ok(t),
                None if self.lenient => Ok(ExprType::Any),
                None => Err(Error::OperandRefOutOfRange {
                    opcode: self.opcode.to_string(),
                    pos: r.index,
                }),
            };
        }

        if let Some(name) = name_ref(a) {
            return if self.lenient {
                Ok(ExprType::Any)
            } else {
                Err(Error::UnboundName(name.to_string()))
            };
        }

        if let Some(p) = macro_param(a) {
            return if self.lenient {
                Ok(ExprType::Any)
            } else {
                Err(Error::UnmatchedMacroParam(p.to_string()))
            };
        }

        if parse_number(a).is_some() {
            return Ok(ExprType::Num);
        }

        // Barewords and quoted strings are parameter material.
        Ok(ExprType::Any)
    }

    fn list_type(&mut self, op: &str, elems: &[Item]) -> Result<ExprType, Error> {
        if let Some(name) = macro_name(op) {
            return if self.lenient {
                Ok(ExprType::Any)
            } else {
                Err(Error::UnknownMacro(name.to_string()))
            };
        }

        if macro_call_name(op).is_some() {
            // Macro-call parameters are textual; never typed.
            return Ok(ExprType::Any);
        }

        // Operand count to type-check; parameters are not typed.
        let argc = if self.lenient {
            elems.len()
        } else {
            let entry = self
                .operators
                .get(op)
                .ok_or_else(|| Error::UnknownOperator(op.to_string()))?;

            if entry.variadic {
                // Trailing declared parameters are still parameters,
                // however many operands precede them.
                if elems.len() < entry.params {
                    return Err(Error::OperatorArity {
                        op: op.to_string(),
                        want: entry.params,
                        got: elems.len(),
                    });
                }

                elems.len() - entry.params
            } else {
                let want = entry.operands + entry.params;
                if elems.len() != want {
                    return Err(Error::OperatorArity {
                        op: op.to_string(),
                        want,
                        got: elems.len(),
                    });
                }

                entry.operands
            }
        };

        match op {
            "if" | "ifv" => self.cond_type(op, elems),
            "do" | "dov" => self.seq_type(op, elems),
            "copy" => {
                if elems.is_empty() {
                    return Ok(ExprType::Any);
                }

                self.item_type(&elems[0])
            }
            "add" | "sub" | "mul" => self.homogeneous_type(op, elems),
            _ => {
                if !self.lenient {
                    for (i, elem) in elems.iter().take(argc).enumerate() {
                        let want = match operand_types(op) {
                            Some(types) => expected_at(types, argc, i),
                            None => ExprType::Reg,
                        };

                        let got = self.item_type(elem)?;
                        if !ty_eq(want, got) {
                            return Err(Error::TypeMismatch {
                                op: op.to_string(),
                                pos: i + 1,
                                got,
                                want,
                            });
                        }
                    }
                }

                Ok(result_type(op))
            }
        }
    }

    /// `if`/`ifv`: flag condition, equivalent branches.
    fn cond_type(&mut self, op: &str, elems: &[Item]) -> Result<ExprType, Error> {
        let void = op == "ifv";

        if elems.len() < 3 {
            // Lenient mode only; arity is enforced before dispatch.
            return Ok(if void { ExprType::Void } else { ExprType::Any });
        }

        let cond = self.item_type(&elems[0])?;
        if !self.lenient && cond != ExprType::Flag {
            return Err(Error::TypeMismatch {
                op: op.to_string(),
                pos: 1,
                got: cond,
                want: ExprType::Flag,
            });
        }

        let then = self.item_type(&elems[1])?;
        let alt = self.item_type(&elems[2])?;

        let Some(joined) = join(then, alt) else {
            if self.lenient {
                return Ok(if void { ExprType::Void } else { ExprType::Any });
            }

            return Err(Error::TypeMismatch {
                op: op.to_string(),
                pos: 3,
                got: alt,
                want: then,
            });
        };

        Ok(if void { ExprType::Void } else { joined })
    }

    /// `do`/`dov`: earlier operands are statements, the last one is
    /// the value (ignored by `dov`).
    fn seq_type(&mut self, op: &str, elems: &[Item]) -> Result<ExprType, Error> {
        let void = op == "dov";

        let Some((last, init)) = elems.split_last() else {
            if self.lenient {
                return Ok(if void { ExprType::Void } else { ExprType::Any });
            }

            return Err(Error::OperatorArity {
                op: op.to_string(),
                want: 1,
                got: 0,
            });
        };

        for (i, elem) in init.iter().enumerate() {
            let got = self.item_type(elem)?;
            if !self.lenient && got != ExprType::Void {
                return Err(Error::TypeMismatch {
                    op: op.to_string(),
                    pos: i + 1,
                    got,
                    want: ExprType::Void,
                });
            }
        }

        let last_ty = self.item_type(last)?;
        if void {
            if !self.lenient && last_ty != ExprType::Void {
                return Err(Error::TypeMismatch {
                    op: op.to_string(),
                    pos: elems.len(),
                    got: last_ty,
                    want: ExprType::Void,
                });
            }

            return Ok(ExprType::Void);
        }

        Ok(last_ty)
    }

    /// `add`/`sub`/`mul`: the first operand fixes the type.
    fn homogeneous_type(&mut self, op: &str, elems: &[Item]) -> Result<ExprType, Error> {
        let Some(first) = elems.first() else {
            return Ok(ExprType::Any);
        };

        let t0 = self.item_type(first)?;
        if !self.lenient {
            for (i, elem) in elems.iter().enumerate().skip(1) {
                let got = self.item_type(elem)?;
                if !ty_eq(t0, got) {
                    return Err(Error::TypeMismatch {
                        op: op.to_string(),
                        pos: i + 1,
                        got,
                        want: t0,
                    });
                }
            }
        }

        Ok(t0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_str;

    fn operators() -> OperatorCatalog {
        let mut cat = OperatorCatalog::new();
        cat.insert("copy", 1, 0).unwrap();
        cat.insert("add", 2, 0).unwrap();
        cat.insert("load", 1, 1).unwrap();
        cat.insert("store", 2, 1).unwrap();
        cat.insert("nz", 1, 0).unwrap();
        cat.insert("if", 3, 0).unwrap();
        cat.insert("do", -1, 0).unwrap();
        cat.insert("discard", 1, 0).unwrap();
        cat.insert("const_num", 0, 2).unwrap();
        cat
    }

    fn node(src: &str, arena: &mut ExprArena) -> NodeId {
        let forms = parse_str(src).unwrap();
        arena.intern(&forms[0]).node().unwrap()
    }

    #[test]
    fn result_table() {
        assert_eq!(result_type("store"), ExprType::Void);
        assert_eq!(result_type("eq"), ExprType::Flag);
        assert_eq!(result_type("load_num"), ExprType::Num);
        assert_eq!(result_type("if"), ExprType::Any);
        assert_eq!(result_type("arglist"), ExprType::Arglist);
        assert_eq!(result_type("addr"), ExprType::Reg);
    }

    #[test]
    fn equivalence_and_join() {
        assert!(ty_eq(ExprType::Any, ExprType::Reg));
        assert!(ty_eq(ExprType::Num, ExprType::Any));
        assert!(!ty_eq(ExprType::Any, ExprType::Void));
        assert!(!ty_eq(ExprType::Reg, ExprType::Num));

        assert_eq!(join(ExprType::Any, ExprType::Num), Some(ExprType::Num));
        assert_eq!(join(ExprType::Reg, ExprType::Num), None);
    }

    #[test]
    fn operand_ref_takes_opcode_type() {
        let ops = operators();
        let mut arena = ExprArena::new();
        let n = node("(copy $1)", &mut arena);

        let env = [ExprType::Reg, ExprType::Num];
        let mut tc = TypeCheck::strict(&arena, &ops, &env, "t");
        assert_eq!(tc.node_type(n).unwrap(), ExprType::Num);
    }

    #[test]
    fn if_requires_flag_condition() {
        let ops = operators();
        let mut arena = ExprArena::new();
        let n = node("(if (copy $0) $0 $0)", &mut arena);

        let env = [ExprType::Reg];
        let mut tc = TypeCheck::strict(&arena, &ops, &env, "t");
        let err = tc.node_type(n).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { pos: 1, .. }), "{err}");
    }

    #[test]
    fn if_joins_branches() {
        let ops = operators();
        let mut arena = ExprArena::new();
        let n = node("(if (nz $0) (const_num 1 8) $1)", &mut arena);

        let env = [ExprType::Reg, ExprType::Num];
        let mut tc = TypeCheck::strict(&arena, &ops, &env, "t");
        assert_eq!(tc.node_type(n).unwrap(), ExprType::Num);
    }

    #[test]
    fn do_takes_last_and_wants_void_before() {
        let ops = operators();
        let mut arena = ExprArena::new();

        let good = node("(do (discard $0) (copy $0))", &mut arena);
        let env = [ExprType::Reg];
        let mut tc = TypeCheck::strict(&arena, &ops, &env, "t");
        assert_eq!(tc.node_type(good).unwrap(), ExprType::Reg);

        let bad = node("(do (copy $0) (copy $0))", &mut arena);
        let mut tc = TypeCheck::strict(&arena, &ops, &env, "t");
        let err = tc.node_type(bad).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");
    }

    #[test]
    fn arity_checked_against_catalog() {
        let ops = operators();
        let mut arena = ExprArena::new();
        let n = node("(load $0)", &mut arena);

        let env = [ExprType::Reg];
        let mut tc = TypeCheck::strict(&arena, &ops, &env, "t");
        let err = tc.node_type(n).unwrap_err();
        assert!(matches!(err, Error::OperatorArity { want: 2, got: 1, .. }), "{err}");
    }

    #[test]
    fn variadic_params_stay_untyped() {
        // Variadic with one trailing parameter: only the leading
        // elements are operands.
        let mut cat = OperatorCatalog::new();
        cat.insert("pack", -1, 1).unwrap();

        let mut arena = ExprArena::new();
        let n = node("(pack $0 $0 8)", &mut arena);

        let env = [ExprType::Reg];
        let mut tc = TypeCheck::strict(&arena, &cat, &env, "t");
        assert_eq!(tc.node_type(n).unwrap(), ExprType::Reg);

        let short = node("(pack)", &mut arena);
        let mut tc = TypeCheck::strict(&arena, &cat, &env, "t");
        let err = tc.node_type(short).unwrap_err();
        assert!(matches!(err, Error::OperatorArity { want: 1, got: 0, .. }), "{err}");
    }

    #[test]
    fn lenient_mode_accepts_holes() {
        let ops = operators();
        let mut arena = ExprArena::new();
        let n = node("(^mac ,arg $name)", &mut arena);

        let mut tc = TypeCheck::lenient(&arena, &ops, &[]);
        assert_eq!(tc.node_type(n).unwrap(), ExprType::Any);
    }
}
