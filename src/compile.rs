// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Tree compiler.
//!
//! Flattens a linked, expanded and type-checked DAG into the flat
//! slot stream and parallel descriptor string the JIT consumes.
//! Children are emitted before parents, so every `l` link points
//! strictly backwards; a per-template memo keyed by node identity
//! makes each shared subtree emit exactly once.
//!
//! Descriptor alphabet: `n` operator, `s` operand count, `l` link,
//! `i` operand-index reference, `.` literal parameter, `c` constant
//! table index. `f` is reserved.

use std::collections::HashMap;

use crate::catalog::{Direction, OperandDesc, OperatorCatalog};
use crate::tree::{
    is_quoted, is_size_bareword, macro_call_name, macro_name, macro_param, name_ref, parse_number,
    parse_operand_ref, ExprArena, Item, NodeId, OperandRef,
};
use crate::Error;

/// One template slot: a plain integer, or a symbolic token the C
/// emitter resolves (prefixed operator/bareword constants and
/// textual macro-call parameters).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Int(i64),
    Sym(String),
}

#[derive(Clone, Debug)]
pub struct Template {
    pub slots: Vec<Slot>,
    pub desc: String,
    pub root: usize,
}

/// Compilation-unit-wide constant table: insertion-ordered, keyed
/// and deduplicated by textual value. A value's index is stable for
/// the whole unit.
#[derive(Debug, Default)]
pub struct ConstTable {
    values: Vec<String>,
    index: HashMap<String, usize>,
}

impl ConstTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &str) -> usize {
        if let Some(&i) = self.index.get(value) {
            return i;
        }

        let i = self.values.len();
        self.values.push(value.to_string());
        self.index.insert(value.to_string(), i);

        i
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }
}

/// Operators that designate one element position as a size.
fn size_param_pos(op: &str) -> Option<usize> {
    match op {
        "load" | "load_num" | "const" | "cast" => Some(1),
        "store" | "store_num" | "call" => Some(2),
        _ => None,
    }
}

pub struct TemplateCompiler<'a> {
    arena: &'a ExprArena,
    operators: &'a OperatorCatalog,
    opcode: &'a str,
    opcode_operands: &'a [OperandDesc],
    prefix: &'a str,
    consts: &'a mut ConstTable,
    memo: HashMap<NodeId, usize>,
    slots: Vec<Slot>,
    desc: String,
}

impl<'a> TemplateCompiler<'a> {
    pub fn new(
        arena: &'a ExprArena,
        operators: &'a OperatorCatalog,
        opcode: &'a str,
        opcode_operands: &'a [OperandDesc],
        prefix: &'a str,
        consts: &'a mut ConstTable,
    ) -> Self {
        Self {
            arena,
            operators,
            opcode,
            opcode_operands,
            prefix,
            consts,
            memo: HashMap::new(),
            slots: Vec::new(),
            desc: String::new(),
        }
    }

    pub fn compile(mut self, root: NodeId) -> Result<Template, Error> {
        let root = self.emit_node(root)?;

        Ok(Template {
            slots: self.slots,
            desc: self.desc,
            root,
        })
    }

    fn push(&mut self, slot: Slot, tag: char) {
        self.slots.push(slot);
        self.desc.push(tag);
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name.to_uppercase())
    }

    fn emit_node(&mut self, id: NodeId) -> Result<usize, Error> {
        if let Some(&idx) = self.memo.get(&id) {
            return Ok(idx);
        }

        let items = self.arena.items(id).to_vec();
        let op = match items.first() {
            Some(Item::Atom(s)) => s.clone(),
            _ => return Err(Error::Form("expression operator must be an atom".into())),
        };

        if let Some(name) = macro_name(&op) {
            return Err(Error::UnknownMacro(name.to_string()));
        }

        let elems = &items[1..];

        let entry = self
            .operators
            .get(&op)
            .ok_or_else(|| Error::UnknownOperator(op.clone()))?;

        let argc = if entry.variadic {
            // Declared parameters stay parameters even for variadic
            // entries; only the leading elements are operands.
            if elems.len() < entry.params {
                return Err(Error::OperatorArity {
                    op: op.clone(),
                    want: entry.params,
                    got: elems.len(),
                });
            }

            elems.len() - entry.params
        } else {
            let want = entry.operands + entry.params;
            if elems.len() != want {
                return Err(Error::OperatorArity {
                    op: op.clone(),
                    want,
                    got: elems.len(),
                });
            }

            entry.operands
        };

        if let Some(pos) = size_param_pos(&op) {
            if let Some(el) = elems.get(pos) {
                if !self.size_ok(el) {
                    return Err(Error::SizeParamBad(op.clone()));
                }
            }
        }

        // Pointer and large constants divert the value into the
        // constant table instead of emitting a subtree.
        let const_value = if matches!(op.as_str(), "const_ptr" | "const_large") {
            let Some(Item::Atom(v)) = elems.first() else {
                return Err(Error::Form(format!("'{op}' value must be an atom")));
            };

            Some(self.consts.intern(v))
        } else {
            None
        };

        // Children before parents; macro-call parameter lists are
        // textual and never emitted as nodes.
        let skip = usize::from(const_value.is_some());
        for el in elems.iter().skip(skip) {
            if let Item::Node(n) = el {
                if self.arena.head(*n).and_then(macro_call_name).is_none() {
                    self.emit_node(*n)?;
                }
            }
        }

        let at = self.slots.len();
        let sym = self.prefixed(&op);
        self.push(Slot::Sym(sym), 'n');
        self.push(Slot::Int(argc as i64), 's');

        if let Some(cidx) = const_value {
            self.push(Slot::Int(cidx as i64), 'c');

            for el in &elems[1..] {
                self.emit_element(el)?;
            }
        } else {
            for el in elems {
                self.emit_element(el)?;
            }
        }

        self.memo.insert(id, at);

        Ok(at)
    }

    fn emit_element(&mut self, el: &Item) -> Result<(), Error> {
        match el {
            Item::Node(n) => {
                if self.arena.head(*n).and_then(macro_call_name).is_some() {
                    let text = self.macro_call_text(*n)?;
                    self.push(Slot::Sym(text), '.');
                } else {
                    let idx = self
                        .memo
                        .get(n)
                        .copied()
                        .expect("children are emitted before parents");
                    self.push(Slot::Int(idx as i64), 'l');
                }
            }
            Item::Atom(a) => {
                if let Some(r) = parse_operand_ref(a) {
                    self.check_operand_ref(&r)?;
                    self.push(Slot::Int(r.index as i64), 'i');
                } else if let Some(v) = parse_number(a) {
                    self.push(Slot::Int(v), '.');
                } else if let Some(name) = name_ref(a) {
                    return Err(Error::UnboundName(name.to_string()));
                } else if let Some(p) = macro_param(a) {
                    return Err(Error::UnmatchedMacroParam(p.to_string()));
                } else if is_quoted(a) {
                    self.push(Slot::Sym(a.clone()), '.');
                } else {
                    let sym = self.prefixed(a);
                    self.push(Slot::Sym(sym), '.');
                }
            }
        }

        Ok(())
    }

    fn check_operand_ref(&self, r: &OperandRef) -> Result<(), Error> {
        // inc_i/dec_i/inc_u/dec_u carry an implicit doubled operand
        // vector; $0 and $1 are always accepted for them.
        if matches!(self.opcode, "inc_i" | "dec_i" | "inc_u" | "dec_u") && r.index <= 1 {
            return Ok(());
        }

        let Some(desc) = self.opcode_operands.get(r.index) else {
            return Err(Error::OperandRefOutOfRange {
                opcode: self.opcode.to_string(),
                pos: r.index,
            });
        };

        let is_write = desc.direction == Direction::Write;
        if is_write && !r.write {
            return Err(Error::WriteRefMissing(r.index, self.opcode.to_string()));
        }
        if !is_write && r.write {
            return Err(Error::WriteRefForbidden(r.index, self.opcode.to_string()));
        }

        Ok(())
    }

    fn size_ok(&self, el: &Item) -> bool {
        match el {
            Item::Node(n) => self.arena.head(*n).and_then(macro_call_name).is_some(),
            Item::Atom(a) => parse_number(a).is_some() || is_size_bareword(a),
        }
    }

    fn macro_call_text(&self, id: NodeId) -> Result<String, Error> {
        let items = self.arena.items(id);
        let name = items
            .first()
            .and_then(Item::atom)
            .and_then(macro_call_name)
            .expect("caller checked the head");

        let mut args = Vec::with_capacity(items.len().saturating_sub(1));
        for it in &items[1..] {
            let Some(a) = it.atom() else {
                return Err(Error::Form(format!(
                    "macro-call parameter '&{name}' takes atoms only"
                )));
            };

            args.push(a);
        }

        Ok(format!("{}({})", name, args.join(", ")))
    }
}
