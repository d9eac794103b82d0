// Copyright (C) 2025 The loom authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use pest::Parser;
use pest::iterators::Pair;

use crate::locks::{BoolOp, LockCall, LockEntry, LockError, LockExpr, LockSet, LockTerm};

pub mod grammar {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "src/locks/locks.pest"]
    pub struct LockParser;
}

use grammar::{LockParser, Rule};

/// Parse a full lock string (`access:expr;access:expr`).
pub fn parse_lockstring(input: &str) -> Result<LockSet, LockError> {
    let mut pairs = LockParser::parse(Rule::lockstring, input)
        .map_err(|e| LockError::ParseError(e.to_string()))?;
    let lockstring = pairs.next().expect("grammar yields one lockstring");

    let mut set = LockSet::empty();
    for pair in lockstring.into_inner() {
        if pair.as_rule() != Rule::entry {
            continue; // EOI
        }
        let entry = transform_entry(pair)?;
        set.push_unchecked(entry);
    }
    Ok(set)
}

/// Parse a single `access:expr` entry.
pub fn parse_entry(input: &str) -> Result<LockEntry, LockError> {
    let set = parse_lockstring(input)?;
    let entries = set.entries();
    if entries.len() != 1 {
        return Err(LockError::ParseError(format!(
            "expected a single lock entry, got {}",
            entries.len()
        )));
    }
    Ok(entries[0].clone())
}

impl LockSet {
    /// Used by the parser, which has no registry in hand; validation happens
    /// at add-time.
    pub(crate) fn push_unchecked(&mut self, entry: LockEntry) {
        self.entries.retain(|e| e.access_type != entry.access_type);
        self.entries.push(entry);
    }
}

fn transform_entry(pair: Pair<Rule>) -> Result<LockEntry, LockError> {
    let mut inner = pair.into_inner();
    let access_type = inner.next().expect("entry has access_type").as_str();
    let expr = inner.next().expect("entry has expr");
    Ok(LockEntry {
        access_type: access_type.to_lowercase(),
        expr: transform_expr(expr)?,
    })
}

fn transform_expr(pair: Pair<Rule>) -> Result<LockExpr, LockError> {
    let mut inner = pair.into_inner();
    let first = transform_term(inner.next().expect("expr has a first term"))?;
    let mut rest = vec![];
    while let Some(op_pair) = inner.next() {
        let op = match op_pair.into_inner().next().expect("bool_op wraps a keyword").as_rule() {
            Rule::and_kw => BoolOp::And,
            Rule::or_kw => BoolOp::Or,
            rule => {
                return Err(LockError::ParseError(format!(
                    "unexpected operator rule {rule:?}"
                )));
            }
        };
        let term = transform_term(inner.next().expect("operator is followed by a term"))?;
        rest.push((op, term));
    }
    Ok(LockExpr { first, rest })
}

fn transform_term(pair: Pair<Rule>) -> Result<LockTerm, LockError> {
    let mut negate = false;
    let mut call = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::not_kw => negate = true,
            Rule::call => call = Some(transform_call(p)?),
            rule => {
                return Err(LockError::ParseError(format!(
                    "unexpected term rule {rule:?}"
                )));
            }
        }
    }
    Ok(LockTerm {
        negate,
        call: call.expect("term has a call"),
    })
}

fn transform_call(pair: Pair<Rule>) -> Result<LockCall, LockError> {
    let mut inner = pair.into_inner();
    let func = inner.next().expect("call has funcname").as_str().to_string();
    let mut args = vec![];
    let mut kwargs = vec![];
    if let Some(arglist) = inner.next() {
        for arg in arglist.into_inner() {
            let arg = arg.into_inner().next().expect("arg wraps kwarg or value");
            match arg.as_rule() {
                Rule::kwarg => {
                    let mut kv = arg.into_inner();
                    let k = kv.next().expect("kwarg key").as_str().to_string();
                    let v = kv.next().expect("kwarg value").as_str().to_string();
                    kwargs.push((k, v));
                }
                Rule::value => args.push(arg.as_str().to_string()),
                rule => {
                    return Err(LockError::ParseError(format!(
                        "unexpected arg rule {rule:?}"
                    )));
                }
            }
        }
    }
    Ok(LockCall { func, args, kwargs })
}
