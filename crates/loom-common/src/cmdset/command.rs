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

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Dbref, PlayerId, WorldState, WorldStateError};
use crate::sessions::{Session, SessionError, SessionId};

/// The decomposition of a mux-style command line:
///
/// ```text
/// cmd/switch1/switch2 lhs1,lhs2 = rhs1,rhs2
/// ```
///
/// This is a contract, not an implementation detail: commands compose by
/// calling one another and rely on these fields being populated before
/// `func` runs.
#[derive(Debug, Clone, Eq, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct ParsedArgs {
    /// The command word as matched, without switches.
    pub cmdname: String,
    /// Switches extracted from `cmd/switch1/switch2`.
    pub switches: Vec<String>,
    /// Everything after the command word, verbatim.
    pub args: String,
    /// Left of the first `=` (or all of `args` when there is none), trimmed.
    pub lhs: String,
    /// Right of the first `=`, trimmed; `None` when there is no `=`.
    pub rhs: Option<String>,
    pub lhslist: Vec<String>,
    pub rhslist: Vec<String>,
}

/// Decompose `cmdstring` (which may carry `/switches`) and the raw args
/// according to the mux grammar.
pub fn parse_mux_command(cmdstring: &str, args: &str) -> ParsedArgs {
    let mut parts = cmdstring.split('/');
    let cmdname = parts.next().unwrap_or_default().to_lowercase();
    let switches: Vec<String> = parts
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect();

    let (lhs, rhs) = match args.split_once('=') {
        Some((l, r)) => (l.trim().to_string(), Some(r.trim().to_string())),
        None => (args.trim().to_string(), None),
    };
    let split_list = |s: &str| -> Vec<String> {
        if s.is_empty() {
            return vec![];
        }
        s.split(',').map(|p| p.trim().to_string()).collect()
    };
    let lhslist = split_list(&lhs);
    let rhslist = rhs.as_deref().map(split_list).unwrap_or_default();

    ParsedArgs {
        cmdname,
        switches,
        args: args.to_string(),
        lhs,
        rhs,
        lhslist,
        rhslist,
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Could not parse command arguments: {0}")]
    CouldNotParse(String),
    #[error("Permission denied")]
    PermissionDenied,
    /// An object search found more than one candidate. The dispatcher routes
    /// this through the multi-match sentinel with the names listed.
    #[error("Multiple matches: {}", .0.join(", "))]
    MultiMatch(Vec<String>),
    #[error("World state error during command: {0}")]
    WorldState(#[from] WorldStateError),
    #[error("Session error during command: {0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Failed(String),
}

/// Everything a command implementation gets to work with: the session layer
/// for output, a world-state transaction for reads and writes, and who is
/// acting.
pub struct CommandCtx<'a> {
    pub session: &'a dyn Session,
    pub sessid: SessionId,
    /// The acting character, if the session is puppeting one.
    pub caller: Option<Dbref>,
    /// The authenticated account, if any.
    pub player: Option<PlayerId>,
    pub state: &'a mut dyn WorldState,
    pub parsed: ParsedArgs,
}

impl CommandCtx<'_> {
    /// Emit text back to the invoking session.
    pub fn msg(&self, text: &str) -> Result<(), SessionError> {
        self.session.send_to_session(self.sessid, text)
    }
}

/// A command is a callable entity, never a bare function: the dispatcher
/// needs the key, aliases, help text, and lock string, and the split
/// `parse`/`func` phases are part of the composition contract (§`ParsedArgs`).
pub trait Command: Send + Sync {
    fn key(&self) -> &str;

    fn aliases(&self) -> &[String] {
        &[]
    }

    /// Access control for this command; checked under the `cmd` access type.
    fn lock_string(&self) -> &str {
        "cmd:all()"
    }

    fn help_category(&self) -> &str {
        "general"
    }

    fn help_text(&self) -> &str {
        ""
    }

    /// Pre-decompose the raw input. The default is the mux grammar; commands
    /// with exotic syntax override this.
    fn parse(&self, cmdstring: &str, args: &str) -> ParsedArgs {
        parse_mux_command(cmdstring, args)
    }

    /// The behavior. Emits output through the context, mutates world state,
    /// or both. Unhandled errors are caught by the dispatcher.
    fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError>;

    /// Whether `name` (already lowercased) is this command's key or an alias.
    fn matches_name(&self, name: &str) -> bool {
        if self.key().to_lowercase() == name {
            return true;
        }
        self.aliases().iter().any(|a| a.to_lowercase() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_full_form() {
        let parsed = parse_mux_command("open/long/key", "north,n = #5,#6");
        assert_eq!(parsed.cmdname, "open");
        assert_eq!(parsed.switches, vec!["long", "key"]);
        assert_eq!(parsed.lhs, "north,n");
        assert_eq!(parsed.rhs, Some("#5,#6".to_string()));
        assert_eq!(parsed.lhslist, vec!["north", "n"]);
        assert_eq!(parsed.rhslist, vec!["#5", "#6"]);
    }

    #[test]
    fn test_mux_no_equals() {
        let parsed = parse_mux_command("look", "  at the box ");
        assert_eq!(parsed.cmdname, "look");
        assert!(parsed.switches.is_empty());
        assert_eq!(parsed.args, "  at the box ");
        assert_eq!(parsed.lhs, "at the box");
        assert_eq!(parsed.rhs, None);
        assert!(parsed.rhslist.is_empty());
    }

    #[test]
    fn test_mux_empty_args() {
        let parsed = parse_mux_command("quit", "");
        assert_eq!(parsed.cmdname, "quit");
        assert!(parsed.lhslist.is_empty());
        assert_eq!(parsed.lhs, "");
    }

    #[test]
    fn test_mux_empty_rhs() {
        let parsed = parse_mux_command("desc", "me =");
        assert_eq!(parsed.lhs, "me");
        assert_eq!(parsed.rhs, Some(String::new()));
        assert!(parsed.rhslist.is_empty());
    }
}
