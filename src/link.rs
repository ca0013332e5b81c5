// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Declaration linker.
//!
//! Eliminates every user-visible name before macro expansion: `let:`
//! scopes are rewritten in place into `do`/`dov` sequences whose
//! definitions are spliced in `discard`-wrapped, and each `$name`
//! atom is replaced by a direct edge to its defining node. Replacing
//! the atom with the definition's id is what turns the tree into a
//! DAG. With no names left, later macro expansion cannot capture or
//! be captured.

use std::collections::{BTreeMap, HashSet};

use crate::catalog::OperatorCatalog;
use crate::metrics::CompilerMetrics;
use crate::tree::{name_ref, ExprArena, Item, NodeId};
use crate::types::{ExprType, TypeCheck};
use crate::Error;

pub fn link(
    arena: &mut ExprArena,
    root: NodeId,
    operators: &OperatorCatalog,
    operands: &[ExprType],
    metrics: &mut CompilerMetrics,
) -> Result<(), Error> {
    let mut pass = LinkPass {
        arena,
        operators,
        operands,
        metrics,
        scope: BTreeMap::new(),
        visited: HashSet::new(),
    };

    pass.walk(root)
}

struct LinkPass<'a> {
    arena: &'a mut ExprArena,
    operators: &'a OperatorCatalog,
    operands: &'a [ExprType],
    metrics: &'a mut CompilerMetrics,
    // name -> defining item; save/restore on scope exit
    scope: BTreeMap<String, Item>,
    visited: HashSet<NodeId>,
}

impl LinkPass<'_> {
    fn walk(&mut self, id: NodeId) -> Result<(), Error> {
        if !self.visited.insert(id) {
            return Ok(());
        }

        let items = self.arena.items(id).to_vec();
        let head = match items.first() {
            Some(Item::Atom(s)) => s.clone(),
            _ => return Err(Error::Form("expression operator must be an atom".into())),
        };

        if head == "let:" {
            return self.link_let(id, &items);
        }

        let mut items = items;
        let mut changed = false;

        for item in items.iter_mut().skip(1) {
            let replacement = match item {
                Item::Atom(a) if name_ref(a).is_some() => Some(self.resolve_name(a)?),
                Item::Node(n) => {
                    self.walk(*n)?;
                    None
                }
                Item::Atom(_) => None,
            };

            if let Some(r) = replacement {
                *item = r;
                changed = true;
            }
        }

        if changed {
            self.arena.set_items(id, items);
        }

        Ok(())
    }

    fn resolve_name(&mut self, atom: &str) -> Result<Item, Error> {
        let name = name_ref(atom).expect("caller checked");
        let bound = self
            .scope
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnboundName(name.to_string()))?;

        self.metrics.inc_names_linked();

        Ok(bound)
    }

    fn resolve(&mut self, item: Item) -> Result<Item, Error> {
        match item {
            Item::Atom(a) => {
                if name_ref(&a).is_some() {
                    self.resolve_name(&a)
                } else {
                    Ok(Item::Atom(a))
                }
            }
            Item::Node(n) => {
                self.walk(n)?;
                Ok(Item::Node(n))
            }
        }
    }

    fn lenient_type(&self, item: &Item) -> Result<ExprType, Error> {
        let mut tc = TypeCheck::lenient(&*self.arena, self.operators, self.operands);
        tc.item_type(item)
    }

    fn link_let(&mut self, id: NodeId, items: &[Item]) -> Result<(), Error> {
        if items.len() < 3 {
            return Err(Error::Form("let: needs bindings and at least one body".into()));
        }

        let decls = items[1]
            .node()
            .ok_or_else(|| Error::Form("let: bindings must be a list".into()))?;
        let decl_items = self.arena.items(decls).to_vec();

        let mut saved: Vec<(String, Option<Item>)> = Vec::new();
        let mut discards: Vec<Item> = Vec::new();

        for (i, decl) in decl_items.iter().enumerate() {
            let pair = decl
                .node()
                .ok_or_else(|| Error::Form("let: binding must be a (name expr) pair".into()))?;
            let pair = self.arena.items(pair).to_vec();

            let (name, def) = match pair.as_slice() {
                [Item::Atom(n), def] => (name_ref(n), def.clone()),
                _ => (None, Item::Atom(String::new())),
            };

            let Some(name) = name.map(str::to_string) else {
                return Err(Error::Form("let: binding name must be a $name".into()));
            };

            // Definitions see earlier pairs of this let: and all
            // enclosing scopes, never later pairs.
            let def = self.resolve(def)?;

            let t = self.lenient_type(&def)?;
            if !matches!(t, ExprType::Reg | ExprType::Num | ExprType::Any) {
                return Err(Error::TypeMismatch {
                    op: "let:".to_string(),
                    pos: i + 1,
                    got: t,
                    want: ExprType::Reg,
                });
            }

            let discard = self
                .arena
                .alloc(vec![Item::Atom("discard".to_string()), def.clone()]);
            discards.push(Item::Node(discard));

            saved.push((name.clone(), self.scope.insert(name, def)));
        }

        let mut bodies = Vec::with_capacity(items.len() - 2);
        for body in &items[2..] {
            bodies.push(self.resolve(body.clone())?);
        }

        let last_ty = self.lenient_type(bodies.last().expect("checked above"))?;
        let head = if last_ty == ExprType::Void { "dov" } else { "do" };

        let mut new_items = Vec::with_capacity(1 + discards.len() + bodies.len());
        new_items.push(Item::Atom(head.to_string()));
        new_items.extend(discards);
        new_items.extend(bodies);

        self.arena.set_items(id, new_items);

        for (name, prior) in saved.into_iter().rev() {
            match prior {
                Some(p) => {
                    self.scope.insert(name, p);
                }
                None => {
                    self.scope.remove(&name);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_str;
    use crate::selftest::fixture_operators;

    fn linked(src: &str) -> (ExprArena, NodeId) {
        let forms = parse_str(src).unwrap();
        let mut arena = ExprArena::new();
        let root = arena.intern(&forms[0]).node().unwrap();

        let ops = fixture_operators();
        let env = [ExprType::Reg, ExprType::Reg];
        let mut metrics = CompilerMetrics::default();
        link(&mut arena, root, &ops, &env, &mut metrics).unwrap();

        (arena, root)
    }

    #[test]
    fn let_rewrites_to_do_and_shares_definition() {
        let (arena, root) = linked("(let: (($foo (copy $1))) (load $foo 8))");

        let items = arena.items(root);
        assert_eq!(items[0].atom(), Some("do"));

        // (discard def) then the body
        let discard = arena.items(items[1].node().unwrap());
        assert_eq!(discard[0].atom(), Some("discard"));
        let def = discard[1].node().unwrap();

        let body = arena.items(items[2].node().unwrap());
        assert_eq!(body[0].atom(), Some("load"));
        assert_eq!(body[1].node(), Some(def));
    }

    #[test]
    fn unbound_name_errors() {
        let forms = parse_str("(load $foo 8)").unwrap();
        let mut arena = ExprArena::new();
        let root = arena.intern(&forms[0]).node().unwrap();

        let ops = fixture_operators();
        let mut metrics = CompilerMetrics::default();
        let err = link(&mut arena, root, &ops, &[], &mut metrics).unwrap_err();

        assert!(matches!(err, Error::UnboundName(n) if n == "foo"));
    }

    #[test]
    fn forward_reference_within_let_errors() {
        let forms = parse_str("(let: (($a (copy $b)) ($b (copy $1))) (add $a $b))").unwrap();
        let mut arena = ExprArena::new();
        let root = arena.intern(&forms[0]).node().unwrap();

        let ops = fixture_operators();
        let env = [ExprType::Reg, ExprType::Reg];
        let mut metrics = CompilerMetrics::default();
        let err = link(&mut arena, root, &ops, &env, &mut metrics).unwrap_err();

        assert!(matches!(err, Error::UnboundName(n) if n == "b"));
    }

    #[test]
    fn void_definition_rejected() {
        let forms = parse_str("(let: (($a (store $0 $1 8))) (copy $a))").unwrap();
        let mut arena = ExprArena::new();
        let root = arena.intern(&forms[0]).node().unwrap();

        let ops = fixture_operators();
        let env = [ExprType::Reg, ExprType::Reg];
        let mut metrics = CompilerMetrics::default();
        let err = link(&mut arena, root, &ops, &env, &mut metrics).unwrap_err();

        assert!(matches!(err, Error::TypeMismatch { op, .. } if op == "let:"));
    }
}
