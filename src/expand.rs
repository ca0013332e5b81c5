// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Hygienic macro expander.
//!
//! Macros are registered with an already-linked, already-expanded
//! body, so an instance never contains a further macro call. During
//! expansion every `,name` atom is substituted by the corresponding
//! argument and every sub-list is copied through a per-expansion
//! memo keyed by source-node identity. The memo is what preserves
//! the DAG the author wrote: a body sub-list referenced twice yields
//! one shared copy in the instance, and an argument used twice stays
//! one node.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::catalog::OperatorCatalog;
use crate::metrics::CompilerMetrics;
use crate::tree::{macro_name, macro_param, ExprArena, Item, NodeId};
use crate::Error;

#[derive(Debug)]
pub struct Macro {
    pub params: Vec<String>,
    pub body: NodeId,
}

/// Registered macros, keyed by name without the `^` sigil. Lives for
/// the lifetime of the file driver.
#[derive(Debug, Default)]
pub struct MacroTable {
    map: BTreeMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Link, pre-expand and store a macro body.
pub fn register_macro(
    arena: &mut ExprArena,
    macros: &mut MacroTable,
    operators: &OperatorCatalog,
    name: &str,
    params: Vec<String>,
    body: NodeId,
    metrics: &mut CompilerMetrics,
) -> Result<(), Error> {
    if macros.contains(name) {
        return Err(Error::RedefinedMacro(name.to_string()));
    }

    // Bodies are linked with no environment and expanded against the
    // currently-registered macro set before being stored.
    crate::link::link(arena, body, operators, &[], metrics)?;
    expand(arena, body, macros, metrics)?;

    macros.map.insert(name.to_string(), Macro { params, body });
    metrics.inc_macros();

    Ok(())
}

/// Expand every macro invocation under `root`, in place.
pub fn expand(
    arena: &mut ExprArena,
    root: NodeId,
    macros: &MacroTable,
    metrics: &mut CompilerMetrics,
) -> Result<(), Error> {
    let mut pass = ExpandPass {
        arena,
        macros,
        metrics,
        visited: HashSet::new(),
    };

    pass.walk(root)
}

struct ExpandPass<'a> {
    arena: &'a mut ExprArena,
    macros: &'a MacroTable,
    metrics: &'a mut CompilerMetrics,
    visited: HashSet<NodeId>,
}

impl ExpandPass<'_> {
    fn walk(&mut self, id: NodeId) -> Result<(), Error> {
        if !self.visited.insert(id) {
            return Ok(());
        }

        let items = self.arena.items(id).to_vec();
        let head = match items.first() {
            Some(Item::Atom(s)) => s.clone(),
            _ => return Err(Error::Form("expression operator must be an atom".into())),
        };

        // Depth-first: arguments are fully expanded before the call
        // site itself is replaced.
        for item in &items[1..] {
            if let Item::Node(n) = item {
                self.walk(*n)?;
            }
        }

        let Some(name) = macro_name(&head) else {
            return Ok(());
        };

        let mac = self
            .macros
            .get(name)
            .ok_or_else(|| Error::UnknownMacro(name.to_string()))?;

        let args = &items[1..];
        if args.len() != mac.params.len() {
            return Err(Error::MacroArity {
                name: name.to_string(),
                want: mac.params.len(),
                got: args.len(),
            });
        }

        let subst: BTreeMap<String, Item> = mac
            .params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();

        let body = mac.body;
        let body_items = self.arena.items(body).to_vec();

        let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
        let mut instance = Vec::with_capacity(body_items.len());
        for item in &body_items {
            instance.push(self.copy_item(item, &subst, &mut memo)?);
        }

        self.arena.set_items(id, instance);
        self.metrics.inc_expansions();

        Ok(())
    }

    fn copy_item(
        &mut self,
        item: &Item,
        subst: &BTreeMap<String, Item>,
        memo: &mut HashMap<NodeId, NodeId>,
    ) -> Result<Item, Error> {
        match item {
            Item::Atom(a) => {
                if let Some(p) = macro_param(a) {
                    return subst
                        .get(p)
                        .cloned()
                        .ok_or_else(|| Error::UnmatchedMacroParam(p.to_string()));
                }

                Ok(Item::Atom(a.clone()))
            }
            Item::Node(n) => {
                if let Some(&copy) = memo.get(n) {
                    return Ok(Item::Node(copy));
                }

                let copy = self.arena.alloc(Vec::new());
                memo.insert(*n, copy);

                let src = self.arena.items(*n).to_vec();
                let mut out = Vec::with_capacity(src.len());
                for it in &src {
                    out.push(self.copy_item(it, subst, memo)?);
                }

                self.arena.set_items(copy, out);

                Ok(Item::Node(copy))
            }
        }
    }
}
