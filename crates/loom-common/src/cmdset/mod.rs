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

//! Command sets and the algebra by which they merge into the current set a
//! session sees.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

pub use crate::cmdset::command::{
    Command, CommandCtx, CommandError, ParsedArgs, parse_mux_command,
};

mod command;

// Reserved keys in the command-set namespace. The dispatcher routes to these
// when no ordinary match is possible; games may provide their own
// implementations under the same keys.
pub const CMD_NOINPUT: &str = "__cmd_noinput";
pub const CMD_NOMATCH: &str = "__cmd_nomatch";
pub const CMD_MULTIMATCH: &str = "__cmd_multimatch";
pub const CMD_NOPERM: &str = "__cmd_noperm";
pub const CMD_CHANNEL: &str = "__cmd_channel";
pub const CMD_EXIT: &str = "__cmd_exit";
pub const CMD_LOGINSTART: &str = "__cmd_loginstart";

/// How a set combines with the one below it in the stack when `b` is merged
/// onto `a`.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize, Default,
)]
pub enum MergeType {
    /// Both sides present; on collision the higher-priority side wins, ties
    /// to `b`.
    #[default]
    Union,
    /// Only commands appearing in both sides; the winner by priority
    /// contributes the implementation.
    Intersect,
    /// `b` completely replaces `a`; priorities irrelevant.
    Replace,
    /// `b`'s commands are removed from `a`; `b` contributes nothing of its
    /// own.
    Remove,
}

/// A named collection of commands with a merge priority and merge type.
#[derive(Clone)]
pub struct CmdSet {
    pub key: String,
    pub priority: i32,
    pub mergetype: MergeType,
    /// Re-attached on restart via `cmdset_storage` when true.
    pub permanent: bool,
    /// The rule that actually produced this set, when it is a merge result.
    pub actual_mergetype: Option<MergeType>,
    commands: Vec<Arc<dyn Command>>,
}

impl Debug for CmdSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdSet")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("mergetype", &self.mergetype)
            .field("permanent", &self.permanent)
            .field("actual_mergetype", &self.actual_mergetype)
            .field(
                "commands",
                &self.commands.iter().map(|c| c.key()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CmdSet {
    pub fn new(key: &str, priority: i32, mergetype: MergeType) -> Self {
        Self {
            key: key.to_string(),
            priority,
            mergetype,
            permanent: false,
            actual_mergetype: None,
            commands: vec![],
        }
    }

    pub fn empty(key: &str) -> Self {
        Self::new(key, 0, MergeType::Union)
    }

    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// Add a command, displacing any existing command it collides with.
    pub fn add(&mut self, command: Arc<dyn Command>) {
        self.commands.retain(|c| !collides(c.as_ref(), command.as_ref()));
        self.commands.push(command);
    }

    pub fn with(mut self, command: Arc<dyn Command>) -> Self {
        self.add(command);
        self
    }

    pub fn commands(&self) -> &[Arc<dyn Command>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// All commands matching `name` (already lowercased) by key or alias.
    /// More than one hit is a multi-match for the dispatcher to surface.
    pub fn matching(&self, name: &str) -> Vec<Arc<dyn Command>> {
        self.commands
            .iter()
            .filter(|c| c.matches_name(name))
            .cloned()
            .collect()
    }

    /// Look up a command by its exact key, sentinels included.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Command>> {
        self.commands
            .iter()
            .find(|c| c.key().eq_ignore_ascii_case(key))
            .cloned()
    }

    /// The sorted command keys, for byte-equal comparison of merge results.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.commands.iter().map(|c| c.key().to_string()).collect();
        keys.sort();
        keys
    }

    /// Merge `b` onto `a` (`a + b`), applying `b`'s merge type. The result
    /// carries `b`'s key, priority and merge type, with `actual_mergetype`
    /// recording the rule applied.
    pub fn merge(a: &CmdSet, b: &CmdSet) -> CmdSet {
        let b_wins = b.priority >= a.priority;
        let commands = match b.mergetype {
            MergeType::Union => {
                let mut commands: Vec<Arc<dyn Command>> = vec![];
                for ca in &a.commands {
                    let collision = b.commands.iter().any(|cb| collides(ca.as_ref(), cb.as_ref()));
                    if !collision || !b_wins {
                        commands.push(ca.clone());
                    }
                }
                for cb in &b.commands {
                    let collision = commands
                        .iter()
                        .any(|c| collides(c.as_ref(), cb.as_ref()));
                    if !collision {
                        commands.push(cb.clone());
                    }
                }
                commands
            }
            MergeType::Intersect => {
                let mut commands: Vec<Arc<dyn Command>> = vec![];
                for ca in &a.commands {
                    let matched = b
                        .commands
                        .iter()
                        .find(|cb| collides(ca.as_ref(), cb.as_ref()));
                    if let Some(cb) = matched {
                        commands.push(if b_wins { cb.clone() } else { ca.clone() });
                    }
                }
                commands
            }
            MergeType::Replace => b.commands.clone(),
            MergeType::Remove => a
                .commands
                .iter()
                .filter(|ca| {
                    !b.commands
                        .iter()
                        .any(|cb| collides(ca.as_ref(), cb.as_ref()))
                })
                .cloned()
                .collect(),
        };
        CmdSet {
            key: b.key.clone(),
            priority: b.priority,
            mergetype: b.mergetype,
            permanent: false,
            actual_mergetype: Some(b.mergetype),
            commands,
        }
    }
}

/// Commands collide when their key-or-alias name sets intersect,
/// case-insensitively.
fn collides(a: &dyn Command, b: &dyn Command) -> bool {
    let names = |c: &dyn Command| -> Vec<String> {
        let mut names = vec![c.key().to_lowercase()];
        names.extend(c.aliases().iter().map(|s| s.to_lowercase()));
        names
    };
    let a_names = names(a);
    names(b).iter().any(|n| a_names.contains(n))
}
