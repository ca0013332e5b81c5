// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Opcode and expression-operator catalogs.
//!
//! Both tables are supplied by external collaborators; this module
//! fixes the abstract shape the compiler consumes and provides a
//! reader-based parser for their S-expression description files.
//! Entries are read once at startup and never change afterwards.

use std::collections::BTreeMap;

use crate::types::ExprType;
use crate::{Error, Sexp};

/// Operand direction of a VM opcode operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
    Literal,
}

#[derive(Clone, Debug)]
pub struct OperandDesc {
    pub direction: Direction,
    pub type_tag: String,
}

/// Mapping from opcode operand type-tags to expression types.
pub fn value_type(tag: &str) -> ExprType {
    match tag {
        "num32" | "num64" => ExprType::Num,
        "`1" => ExprType::Any,
        _ => ExprType::Reg,
    }
}

/// Per-opcode operand vectors, in catalog order. The order defines
/// the row order of the emitted template_info table.
#[derive(Debug, Default)]
pub struct OpcodeCatalog {
    entries: Vec<(String, Vec<OperandDesc>)>,
    index: BTreeMap<String, usize>,
}

impl OpcodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, operands: Vec<OperandDesc>) -> Result<(), Error> {
        if self.index.contains_key(name) {
            return Err(Error::Form(format!("duplicate opcode catalog entry '{name}'")));
        }

        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), operands));

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[OperandDesc]> {
        self.index
            .get(name)
            .map(|&i| self.entries[i].1.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `(opcode: name (dir tag) ...)` entries.
    pub fn parse_str(src: &str) -> Result<Self, Error> {
        let mut cat = Self::new();

        for form in crate::parse_str(src)? {
            let items = form
                .list()
                .ok_or_else(|| Error::Form("opcode catalog entry must be a list".into()))?;

            match items.first().and_then(Sexp::atom) {
                Some("opcode:") => {}
                Some(other) => return Err(Error::UnknownKeyword(other.to_string())),
                None => return Err(Error::Form("opcode catalog entry must be a list".into())),
            }

            let name = items
                .get(1)
                .and_then(Sexp::atom)
                .ok_or_else(|| Error::Form("opcode: entry needs a name".into()))?;

            let mut operands = Vec::new();
            for od in &items[2..] {
                let pair = od
                    .list()
                    .ok_or_else(|| Error::Form(format!("opcode '{name}': operand must be a (dir tag) pair")))?;

                let (dir, tag) = match pair {
                    [d, t] => (d.atom(), t.atom()),
                    _ => (None, None),
                };

                let (Some(dir), Some(tag)) = (dir, tag) else {
                    return Err(Error::Form(format!(
                        "opcode '{name}': operand must be a (dir tag) pair"
                    )));
                };

                let direction = match dir {
                    "r" | "read" => Direction::Read,
                    "w" | "write" => Direction::Write,
                    "l" | "literal" => Direction::Literal,
                    other => {
                        return Err(Error::Form(format!(
                            "opcode '{name}': unknown operand direction '{other}'"
                        )))
                    }
                };

                operands.push(OperandDesc {
                    direction,
                    type_tag: tag.to_string(),
                });
            }

            cat.insert(name, operands)?;
        }

        Ok(cat)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperatorEntry {
    pub operands: usize,
    pub params: usize,
    pub variadic: bool,
}

/// Expression operators with their operand and parameter counts.
#[derive(Debug, Default)]
pub struct OperatorCatalog {
    map: BTreeMap<String, OperatorEntry>,
}

impl OperatorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A negative operand count is the external contract's variadic
    /// sentinel; it is normalized to the explicit flag here and never
    /// consulted again.
    pub fn insert(&mut self, name: &str, operands: i32, params: usize) -> Result<(), Error> {
        if self.map.contains_key(name) {
            return Err(Error::Form(format!(
                "duplicate operator catalog entry '{name}'"
            )));
        }

        let variadic = operands < 0;
        self.map.insert(
            name.to_string(),
            OperatorEntry {
                operands: if variadic { 0 } else { operands as usize },
                params,
                variadic,
            },
        );

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<OperatorEntry> {
        self.map.get(name).copied()
    }

    /// Parse `(operator: name operands params)` entries.
    pub fn parse_str(src: &str) -> Result<Self, Error> {
        let mut cat = Self::new();

        for form in crate::parse_str(src)? {
            let items = form
                .list()
                .ok_or_else(|| Error::Form("operator catalog entry must be a list".into()))?;

            match items.first().and_then(Sexp::atom) {
                Some("operator:") => {}
                Some(other) => return Err(Error::UnknownKeyword(other.to_string())),
                None => return Err(Error::Form("operator catalog entry must be a list".into())),
            }

            let (name, operands, params) = match items {
                [_, n, o, p] => (n.atom(), o.atom(), p.atom()),
                _ => (None, None, None),
            };

            let (Some(name), Some(operands), Some(params)) = (name, operands, params) else {
                return Err(Error::Form(
                    "operator: entry needs a name and two counts".into(),
                ));
            };

            let operands: i32 = operands
                .parse()
                .map_err(|_| Error::Form(format!("operator '{name}': bad operand count")))?;
            let params: usize = params
                .parse()
                .map_err(|_| Error::Form(format!("operator '{name}': bad parameter count")))?;

            cat.insert(name, operands, params)?;
        }

        Ok(cat)
    }
}
