// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Arena-backed expression trees.
//!
//! Every list node lives in an [`ExprArena`] and is addressed by a
//! [`NodeId`]; two elements holding the same id ARE the same node,
//! which is what lets the linker and the macro expander build a DAG
//! and the tree compiler emit each shared subtree exactly once.

use crate::Sexp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(i: usize) -> Self {
        NodeId(i as u32)
    }
}

/// One element of a list node: an atom or an edge to another node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Atom(String),
    Node(NodeId),
}

impl Item {
    pub fn atom(&self) -> Option<&str> {
        match self {
            Item::Atom(s) => Some(s.as_str()),
            Item::Node(_) => None,
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        match self {
            Item::Node(id) => Some(*id),
            Item::Atom(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<Vec<Item>>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, items: Vec<Item>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(items);

        id
    }

    pub fn items(&self, id: NodeId) -> &[Item] {
        &self.nodes[id.index()]
    }

    /// Rewrite a node in place. Edges held elsewhere keep pointing at
    /// the same identity; only the node's contents change.
    pub fn set_items(&mut self, id: NodeId, items: Vec<Item>) {
        self.nodes[id.index()] = items;
    }

    /// Head atom of a node, if its first element is an atom.
    pub fn head(&self, id: NodeId) -> Option<&str> {
        self.items(id).first().and_then(Item::atom)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy a reader tree into the arena. Each source list becomes a
    /// fresh node; atoms are carried over as-is.
    pub fn intern(&mut self, sexp: &Sexp) -> Item {
        match sexp {
            Sexp::Atom(s) => Item::Atom(s.clone()),
            Sexp::List(items) => {
                let interned: Vec<Item> = items.iter().map(|s| self.intern(s)).collect();
                Item::Node(self.alloc(interned))
            }
        }
    }
}

/// Parsed `$N` / `\$N` operand reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperandRef {
    pub index: usize,
    pub write: bool,
}

/// `$3` or `\$0`. Returns `None` for `$name` references.
pub fn parse_operand_ref(atom: &str) -> Option<OperandRef> {
    let (write, rest) = match atom.strip_prefix('\\') {
        Some(rest) => (true, rest),
        None => (false, atom),
    };

    let digits = rest.strip_prefix('$')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let index = digits.parse::<usize>().ok()?;

    Some(OperandRef { index, write })
}

/// `$name` with a non-numeric name; this is what the linker erases.
pub fn name_ref(atom: &str) -> Option<&str> {
    let name = atom.strip_prefix('$')?;
    if name.is_empty() || name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(name)
}

/// `,name` macro body parameter.
pub fn macro_param(atom: &str) -> Option<&str> {
    let name = atom.strip_prefix(',')?;
    if name.is_empty() {
        return None;
    }

    Some(name)
}

/// `^name` macro invocation head.
pub fn macro_name(atom: &str) -> Option<&str> {
    let name = atom.strip_prefix('^')?;
    if name.is_empty() {
        return None;
    }

    Some(name)
}

/// `&name` macro-call parameter head.
pub fn macro_call_name(atom: &str) -> Option<&str> {
    let name = atom.strip_prefix('&')?;
    if name.is_empty() {
        return None;
    }

    Some(name)
}

pub fn parse_number(atom: &str) -> Option<i64> {
    let rest = atom.strip_prefix('-').unwrap_or(atom);
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    atom.parse::<i64>().ok()
}

pub fn is_quoted(atom: &str) -> bool {
    atom.len() >= 2 && atom.starts_with('"') && atom.ends_with('"')
}

/// Size-parameter bareword convention; textual, not a typed check.
pub fn is_size_bareword(atom: &str) -> bool {
    atom.ends_with("_sz")
}
