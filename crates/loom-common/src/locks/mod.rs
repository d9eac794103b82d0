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

//! Centralized, declarative access control. Every access decision in the core
//! (`edit`, `delete`, `get`, `traverse`, `puppet`, `cmd`, ...) is a lock
//! lookup by access type on the target object.

use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::locks::eval::{LockCtx, check_lock, eval_expr};
pub use crate::locks::parse::{parse_entry, parse_lockstring};
pub use crate::locks::registry::{LockFn, LockFuncRegistry};

mod eval;
mod parse;
mod registry;

#[derive(Debug, Error, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub enum LockError {
    #[error("Failed to parse lock string: {0}")]
    ParseError(String),
    #[error("Unknown lock function: {0}")]
    UnknownLockFunc(String),
    #[error("Bad argument to lock function {0}: {1}")]
    BadLockArg(String, String),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

/// One lock-function invocation, as parsed: positional args and `key=value`
/// pairs are both kept as strings; the lock function coerces.
#[derive(Debug, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct LockCall {
    pub func: String,
    pub args: Vec<String>,
    pub kwargs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct LockTerm {
    pub negate: bool,
    pub call: LockCall,
}

/// A boolean expression over lock terms, kept flat: evaluation is
/// short-circuit left-to-right with no precedence between AND and OR.
#[derive(Debug, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct LockExpr {
    pub first: LockTerm,
    pub rest: Vec<(BoolOp, LockTerm)>,
}

#[derive(Debug, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct LockEntry {
    pub access_type: String,
    pub expr: LockExpr,
}

/// The parsed lock set of one object. Mutations go through [`LockSet::add`]
/// so unknown functions are rejected before anything is stored; the canonical
/// text form ([`LockSet::to_storage_string`]) is what lands in
/// `lock_storage`.
#[derive(Debug, Clone, Eq, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct LockSet {
    entries: Vec<LockEntry>,
}

impl LockSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a full `lock_storage` string. An empty string is an empty set.
    pub fn from_storage(storage: &str) -> Result<Self, LockError> {
        if storage.trim().is_empty() {
            return Ok(Self::empty());
        }
        parse_lockstring(storage)
    }

    /// Parse and validate a single `access:expr` entry and install it,
    /// replacing any prior entry for the same access type. On any error the
    /// set is left untouched; a lock string is never half-applied.
    pub fn add(&mut self, entry_str: &str, registry: &LockFuncRegistry) -> Result<(), LockError> {
        let entry = parse_entry(entry_str)?;
        self.validate_entry(&entry, registry)?;
        self.entries.retain(|e| e.access_type != entry.access_type);
        self.entries.push(entry);
        Ok(())
    }

    /// Remove the entry for an access type. Returns whether one was present.
    pub fn remove(&mut self, access_type: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.access_type != access_type);
        before != self.entries.len()
    }

    pub fn entry(&self, access_type: &str) -> Option<&LockEntry> {
        self.entries.iter().find(|e| e.access_type == access_type)
    }

    pub fn entries(&self) -> &[LockEntry] {
        &self.entries
    }

    /// Every function named in the entry must exist in the registry.
    fn validate_entry(
        &self,
        entry: &LockEntry,
        registry: &LockFuncRegistry,
    ) -> Result<(), LockError> {
        let mut terms = vec![&entry.expr.first];
        terms.extend(entry.expr.rest.iter().map(|(_, t)| t));
        for term in terms {
            if !registry.contains(&term.call.func) {
                return Err(LockError::UnknownLockFunc(term.call.func.clone()));
            }
        }
        Ok(())
    }

    /// The canonical text form, suitable for `lock_storage`.
    pub fn to_storage_string(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl Display for LockEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.access_type, self.expr)
    }
}

impl Display for LockExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.first)?;
        for (op, term) in &self.rest {
            let op = match op {
                BoolOp::And => "AND",
                BoolOp::Or => "OR",
            };
            write!(f, " {op} {term}")?;
        }
        Ok(())
    }
}

impl Display for LockTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.negate {
            f.write_str("NOT ")?;
        }
        write!(f, "{}", self.call)
    }
}

impl Display for LockCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.func)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(arg)?;
            first = false;
        }
        for (k, v) in &self.kwargs {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_storage_round_trip() {
        let registry = LockFuncRegistry::core();
        let mut locks = LockSet::empty();
        locks
            .add("traverse:perm(Builder) OR id(#12)", &registry)
            .unwrap();
        locks.add("edit:NOT holds(cursed_ring)", &registry).unwrap();

        let stored = locks.to_storage_string();
        let reloaded = LockSet::from_storage(&stored).unwrap();
        assert_eq!(locks, reloaded);
    }

    #[test]
    fn test_add_replaces_same_access_type() {
        let registry = LockFuncRegistry::core();
        let mut locks = LockSet::empty();
        locks.add("get:all()", &registry).unwrap();
        locks.add("get:none()", &registry).unwrap();
        assert_eq!(locks.entries().len(), 1);
        assert_eq!(locks.entry("get").unwrap().expr.first.call.func, "none");
    }

    #[test]
    fn test_unknown_func_rejected_without_partial_application() {
        let registry = LockFuncRegistry::core();
        let mut locks = LockSet::empty();
        locks.add("get:all()", &registry).unwrap();
        let before = locks.clone();
        let err = locks
            .add("edit:all() AND frobnicate(7)", &registry)
            .unwrap_err();
        assert_eq!(err, LockError::UnknownLockFunc("frobnicate".to_string()));
        assert_eq!(locks, before);
    }

    #[test]
    fn test_malformed_strings_rejected() {
        for bad in [
            "no_colon_here",
            ":all()",
            "get:all(",
            "get:all() AND",
            "get:",
            "get:AND all()",
        ] {
            assert!(
                LockSet::from_storage(bad).is_err(),
                "expected parse failure for {bad:?}"
            );
        }
    }

    #[test]
    fn test_remove() {
        let registry = LockFuncRegistry::core();
        let mut locks = LockSet::empty();
        locks.add("get:all()", &registry).unwrap();
        assert!(locks.remove("get"));
        assert!(!locks.remove("get"));
        assert!(locks.entries().is_empty());
    }
}
