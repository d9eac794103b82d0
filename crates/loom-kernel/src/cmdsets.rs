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

//! The per-object command-set stack and the registry that rebuilds it from
//! stored keys at load time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use loom_common::cmdset::CmdSet;

/// Key of the stand-in occupying slot 0 when an object stores no default set.
const PLACEHOLDER_KEY: &str = "_empty";

type CmdSetFactory = Arc<dyn Fn() -> CmdSet + Send + Sync>;

/// Maps stored cmdset keys to factories. Constructed explicitly at startup
/// and passed wherever stacks are rebuilt; never a process-global cache.
pub struct CmdSetRegistry {
    factories: HashMap<String, CmdSetFactory>,
}

impl CmdSetRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: &str, factory: impl Fn() -> CmdSet + Send + Sync + 'static) {
        self.factories.insert(key.to_string(), Arc::new(factory));
    }

    pub fn build(&self, key: &str) -> Option<CmdSet> {
        self.factories.get(key).map(|f| f())
    }
}

impl Default for CmdSetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered stack of command sets. Slot 0 is always the default set (or a
/// placeholder); the sets above it fold left-to-right by their own merge type
/// into the cached current set.
pub struct CmdSetStack {
    stack: Vec<CmdSet>,
    current: CmdSet,
}

impl CmdSetStack {
    pub fn new() -> Self {
        let mut stack = Self {
            stack: vec![CmdSet::empty(PLACEHOLDER_KEY)],
            current: CmdSet::empty(PLACEHOLDER_KEY),
        };
        stack.rebuild();
        stack
    }

    /// Rebuild a stack from an object's `cmdset_storage`. The first stored
    /// key becomes the default slot; a missing or unknown key leaves the
    /// placeholder there.
    pub fn from_storage(storage: &[String], registry: &CmdSetRegistry) -> Self {
        let mut stack = Self::new();
        let mut keys = storage.iter();
        if let Some(default_key) = keys.next() {
            match registry.build(default_key) {
                Some(set) => stack.stack[0] = set,
                None => warn!(key = %default_key, "stored default cmdset has no factory"),
            }
        }
        for key in keys {
            match registry.build(key) {
                Some(set) => stack.stack.push(set),
                None => warn!(key = %key, "stored cmdset has no factory"),
            }
        }
        stack.rebuild();
        stack
    }

    pub fn add(&mut self, set: CmdSet) {
        self.stack.push(set);
        self.rebuild();
    }

    /// Replace the default slot.
    pub fn add_default(&mut self, set: CmdSet) {
        self.stack[0] = set;
        self.rebuild();
    }

    /// Remove the topmost set with the given key. The default slot is not
    /// reachable this way; use [`CmdSetStack::delete_default`].
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(idx) = self.stack[1..]
            .iter()
            .rposition(|s| s.key.eq_ignore_ascii_case(key))
        else {
            return false;
        };
        self.stack.remove(idx + 1);
        self.rebuild();
        true
    }

    pub fn delete_default(&mut self) {
        self.stack[0] = CmdSet::empty(PLACEHOLDER_KEY);
        self.rebuild();
    }

    pub fn has_cmdset(&self, key: &str) -> bool {
        self.stack.iter().any(|s| s.key.eq_ignore_ascii_case(key))
    }

    /// Drop every non-permanent set above the default slot and rebuild the
    /// merged view. This is stronger than a cache refresh: the merged cache
    /// is rebuilt eagerly on every stack mutation anyway, so `reset` exists
    /// for the reset restart mode, where ephemeral sets must not survive.
    pub fn reset(&mut self) {
        let default = self.stack.remove(0);
        self.stack.retain(|s| s.permanent);
        self.stack.insert(0, default);
        self.rebuild();
    }

    /// Keys of permanent sets in stack order, the default slot included, for
    /// writing back to `cmdset_storage`.
    pub fn storage_keys(&self) -> Vec<String> {
        let mut keys = vec![self.stack[0].key.clone()];
        keys.extend(
            self.stack[1..]
                .iter()
                .filter(|s| s.permanent)
                .map(|s| s.key.clone()),
        );
        keys
    }

    /// The merged view the dispatcher matches against.
    pub fn current(&self) -> &CmdSet {
        &self.current
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        // Slot 0 always exists; empty means nothing merged in.
        self.stack.len() == 1 && self.stack[0].is_empty()
    }

    fn rebuild(&mut self) {
        let mut current = self.stack[0].clone();
        for set in &self.stack[1..] {
            current = CmdSet::merge(&current, set);
        }
        self.current = current;
    }
}

impl Default for CmdSetStack {
    fn default() -> Self {
        Self::new()
    }
}
