// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of jit-lisp.
// Copyright (C) 2025  Andrei Kochergin <zeek@tuta.com>

//! Template compiler for the MVM JIT expression DSL.
//!
//! This crate reads S-expression template declarations, links `let:`
//! scopes into a shared DAG, expands user macros, type-checks the
//! result and flattens it into the positionally-encoded tables a JIT
//! back-end consults when lowering an opcode. It intentionally knows
//! nothing about machine code or the C emitter so it can be reused
//! from any wrapper.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod compile;
pub mod driver;
pub mod expand;
pub mod link;
pub mod metrics;
pub mod selftest;
pub mod tree;
pub mod types;

pub use metrics::CompilerMetrics;

use std::collections::VecDeque;
use thiserror::Error;

use crate::types::ExprType;

const MAX_TOKENS: usize = 200_000;
const MAX_PARSE_DEPTH: usize = 1_024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("read: invalid char '{0}' at offset {1}")]
    Read(char, usize),
    #[error("read: unexpected EOF")]
    Eof,
    #[error("read: unmatched ')'")]
    Unmatched,
    #[error("limit: {0}")]
    Limit(&'static str),
    #[error("form: {0}")]
    Form(String),
    #[error("unknown top-level keyword '{0}'")]
    UnknownKeyword(String),
    #[error("template: unknown opcode '{0}'")]
    UnknownOpcode(String),
    #[error("template: opcode '{0}' already has a template")]
    RedefinedOpcode(String),
    #[error("macro: '^{0}' already defined")]
    RedefinedMacro(String),
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("operator '{op}' expects {want} elements (got {got})")]
    OperatorArity { op: String, want: usize, got: usize },
    #[error("expand: unknown macro '^{0}'")]
    UnknownMacro(String),
    #[error("expand: macro '^{name}' expects {want} arguments (got {got})")]
    MacroArity {
        name: String,
        want: usize,
        got: usize,
    },
    #[error("link: unbound name '${0}'")]
    UnboundName(String),
    #[error("expand: macro parameter ',{0}' has no matching argument")]
    UnmatchedMacroParam(String),
    #[error("compile: operand reference ${pos} out of range for opcode '{opcode}'")]
    OperandRefOutOfRange { opcode: String, pos: usize },
    #[error("compile: operand ${0} of '{1}' is a write operand and requires a \\$ reference")]
    WriteRefMissing(usize, String),
    #[error("compile: operand ${0} of '{1}' is not a write operand")]
    WriteRefForbidden(usize, String),
    #[error("compile: size parameter of '{0}' must be a number, macro call or *_sz name")]
    SizeParamBad(String),
    #[error("type: mismatch in '{op}' at position {pos}: got {got}, expected {want}")]
    TypeMismatch {
        op: String,
        pos: usize,
        got: ExprType,
        want: ExprType,
    },
    #[error("template: '{0}!' is destructive but the opcode has no write operand")]
    DestructiveWithoutWrite(String),
    #[error("include: cannot open '{path}'")]
    IncludeMissing {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("include: cycle through '{0}'")]
    IncludeCycle(String),
}

/// One S-expression as produced by the reader. Numbers stay
/// string-shaped; quoted strings keep their quotes in the atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(s) => Some(s.as_str()),
            Sexp::List(_) => None,
        }
    }

    pub fn list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            Sexp::Atom(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    LParen,
    RParen,
    Atom(String),
    Eof,
}

// Lexer
pub fn lex(src: &str) -> Result<Vec<Tok>, Error> {
    let mut out = Vec::new();
    let mut it = src.chars().peekable();
    let mut i = 0usize;

    while let Some(&ch) = it.peek() {
        match ch {
            '(' => {
                out.push(Tok::LParen);
                it.next();
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                it.next();
                i += 1;
            }
            '#' => {
                // Line comment; skip until end of line.
                it.next();
                i += 1;

                while let Some(&c2) = it.peek() {
                    if c2 == '\n' {
                        break;
                    }

                    it.next();
                    i += 1;
                }
            }
            '"' => {
                // Quoted string; the quotes stay part of the atom
                // and escape sequences are carried through verbatim.
                it.next();
                i += 1;

                let mut s = String::from("\"");
                loop {
                    let Some(&c2) = it.peek() else {
                        return Err(Error::Eof);
                    };

                    match c2 {
                        '"' => {
                            s.push('"');
                            it.next();
                            i += 1;

                            break;
                        }
                        '\\' => {
                            s.push('\\');
                            it.next();
                            i += 1;

                            let Some(&e) = it.peek() else {
                                return Err(Error::Eof);
                            };

                            s.push(e);
                            it.next();
                            i += 1;
                        }
                        c => {
                            s.push(c);
                            it.next();
                            i += 1;
                        }
                    }
                }

                out.push(Tok::Atom(s));
            }
            ' ' | '\n' | '\r' | '\t' => {
                it.next();
                i += 1;
            }
            _ => {
                let mut s = String::new();
                while let Some(&c2) = it.peek() {
                    if matches!(c2, '(' | ')' | '#' | '"' | ' ' | '\n' | '\r' | '\t') {
                        break;
                    }

                    s.push(c2);
                    it.next();
                    i += 1;
                }

                if s.is_empty() {
                    return Err(Error::Read(ch, i));
                }

                out.push(Tok::Atom(s));
            }
        }
    }

    if out.len() > MAX_TOKENS {
        return Err(Error::Limit("too many tokens"));
    }

    out.push(Tok::Eof);

    Ok(out)
}

// Parser: file := forms*
pub fn parse(tokens: &[Tok]) -> Result<Vec<Sexp>, Error> {
    let mut q: VecDeque<Tok> = tokens.to_vec().into();
    let mut forms = Vec::new();

    while let Some(t) = q.front() {
        match t {
            Tok::Eof => break,
            _ => forms.push(parse_one_limited(&mut q, 0)?),
        }
    }

    Ok(forms)
}

pub fn parse_str(src: &str) -> Result<Vec<Sexp>, Error> {
    let toks = lex(src)?;
    parse(&toks)
}

fn parse_one_limited(q: &mut VecDeque<Tok>, depth: usize) -> Result<Sexp, Error> {
    if depth > MAX_PARSE_DEPTH {
        return Err(Error::Limit("parse depth exceeded"));
    }

    let t = q.pop_front().ok_or(Error::Eof)?;
    match t {
        Tok::LParen => {
            let mut items = Vec::new();
            loop {
                match q.front() {
                    Some(Tok::RParen) => {
                        q.pop_front();
                        break;
                    }
                    Some(Tok::Eof) => return Err(Error::Eof),
                    _ => items.push(parse_one_limited(q, depth + 1)?),
                }
            }

            Ok(Sexp::List(items))
        }
        Tok::RParen => Err(Error::Unmatched),
        Tok::Atom(s) => Ok(Sexp::Atom(s)),
        Tok::Eof => Err(Error::Eof),
    }
}
