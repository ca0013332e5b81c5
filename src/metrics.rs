// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Lightweight metrics collected during compilation.
//!
//! [`CompilerMetrics`] counts pipeline work so tooling can inspect
//! compilation cost without depending on internal state.

#[derive(Clone, Debug, Default)]
pub struct CompilerMetrics {
    pub templates: u32,
    pub macros: u32,
    pub expansions: u32,
    pub names_linked: u32,
    pub constants: u32,
}

impl CompilerMetrics {
    pub(crate) fn inc_templates(&mut self) {
        self.templates += 1;
    }

    pub(crate) fn inc_macros(&mut self) {
        self.macros += 1;
    }

    pub(crate) fn inc_expansions(&mut self) {
        self.expansions += 1;
    }

    pub(crate) fn inc_names_linked(&mut self) {
        self.names_linked += 1;
    }

    pub(crate) fn set_constants(&mut self, n: u32) {
        self.constants = n;
    }
}
