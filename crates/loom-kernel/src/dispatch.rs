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

//! The command dispatcher: one raw input line in, zero or more text emissions
//! out. No error escapes this module to the session layer; everything routes
//! through a sentinel or an apology.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, warn};

use loom_common::cmdset::{
    CmdSet, Command, CommandCtx, CommandError, CMD_CHANNEL, CMD_EXIT, CMD_LOGINSTART,
    CMD_MULTIMATCH, CMD_NOINPUT, CMD_NOMATCH, CMD_NOPERM,
};
use loom_common::locks::{check_lock, LockCtx, LockFuncRegistry, LockSet};
use loom_common::matching::{match_keyed, MatchResult};
use loom_common::model::{Dbref, ObjectRecord, PlayerRecord};
use loom_common::sessions::{Session, SessionRecord};
use loom_common::util::split_command_line;
use loom_common::WorldState;

use crate::channels::ChannelRegistry;
use crate::cmdsets::{CmdSetRegistry, CmdSetStack};
use crate::typeclass::TypeclassRegistry;
use crate::world::World;

const NOMATCH_MSG: &str = "Huh?";
const NOPERM_MSG: &str = "You are not allowed to do that.";
const EXIT_LOCKED_MSG: &str = "You cannot enter.";
const APOLOGY_MSG: &str = "Something went wrong. The error has been logged.";

/// Everything dispatch needs that outlives a single line. World state and the
/// session sink are borrowed per call.
pub struct Dispatcher {
    pub typeclasses: Arc<TypeclassRegistry>,
    pub cmdsets: Arc<CmdSetRegistry>,
    pub locks: LockFuncRegistry,
    /// Process-wide alias table, checked after the hardcoded prefix pre-pass.
    pub aliases: HashMap<String, String>,
    pub channels: ChannelRegistry,
    pub perm_hierarchy: Vec<String>,
    pub default_home: Option<Dbref>,
    /// The set every session carries regardless of puppet; for an
    /// unauthenticated session it is the whole world.
    pub session_cmdset: CmdSet,
}

impl Dispatcher {
    /// Run one input line through the full pipeline.
    pub fn dispatch(
        &self,
        rec: &mut SessionRecord,
        state: &mut dyn WorldState,
        session: &dyn Session,
        line: &str,
    ) {
        let line = line.trim();

        // Step 1: the empty line. Hardcoded fallback is silence.
        if line.is_empty() {
            let current = self.effective_cmdset(rec, &*state);
            self.run_sentinel(CMD_NOINPUT, "", rec, state, session, &current);
            return;
        }

        // Step 3a (before tokenization, character-level): prefix shortcuts.
        let rewritten = match line.chars().next() {
            Some('"') => Some(format!("say {}", &line[1..])),
            Some(':') => Some(format!("pose {}", &line[1..])),
            Some(';') => Some(format!("pose/nospace {}", &line[1..])),
            _ => None,
        };
        let line = rewritten.as_deref().unwrap_or(line);

        // Step 2: the command word folds to lowercase, args keep their
        // spelling and internal spacing.
        let (mut cmdstring, args) = split_command_line(line);
        let args = args.as_str();

        // `idle` keeps the connection alive without counting as activity.
        if cmdstring == "idle" {
            rec.touch(false);
            return;
        }
        rec.touch(true);

        // Step 3b: the process alias table.
        if let Some(expansion) = self.aliases.get(&cmdstring) {
            cmdstring = expansion.to_lowercase();
        }

        // Step 4: effective cmdset, assembled fresh per line.
        let current = self.effective_cmdset(rec, &*state);

        // Step 5: match by key or alias, switches stripped.
        let base = cmdstring.split('/').next().unwrap_or(&cmdstring);
        let matches = current.matching(base);
        let cmd = match matches.len() {
            1 => matches.into_iter().next().expect("len checked"),
            0 => {
                self.no_match(rec, state, session, &current, base, args, line);
                return;
            }
            _ => {
                let names: Vec<String> =
                    matches.iter().map(|c| c.key().to_string()).collect();
                self.multi_match(rec, state, session, &current, &names);
                return;
            }
        };

        // Step 6: the cmd lock.
        if !self.command_access(cmd.as_ref(), rec, &*state) {
            self.no_perm(rec, state, session, &current, cmd.key());
            return;
        }

        // Steps 7 and 8: parse, then func. Unhandled errors stop here.
        let parsed = cmd.parse(&cmdstring, args);
        let outcome = {
            let mut ctx = CommandCtx {
                session,
                sessid: rec.sessid,
                caller: rec.puppet,
                player: rec.uid,
                state: &mut *state,
                parsed,
            };
            cmd.func(&mut ctx)
        };
        match outcome {
            Ok(()) => {}
            Err(CommandError::PermissionDenied) => {
                self.no_perm(rec, state, session, &current, cmd.key());
            }
            Err(CommandError::MultiMatch(names)) => {
                self.multi_match(rec, state, session, &current, &names);
            }
            Err(e) => {
                error!(cmd = cmd.key(), sessid = rec.sessid, error = %e, "command failed");
                let _ = session.send_to_session(rec.sessid, APOLOGY_MSG);
            }
        }
    }

    fn no_perm(
        &self,
        rec: &SessionRecord,
        state: &mut dyn WorldState,
        session: &dyn Session,
        current: &CmdSet,
        cmd_key: &str,
    ) {
        if !self.run_sentinel(CMD_NOPERM, cmd_key, rec, state, session, current) {
            let _ = session.send_to_session(rec.sessid, NOPERM_MSG);
        }
    }

    /// The merged set for this session right now: the session's own set, the
    /// puppet's stack, the location's stack, and the stacks of everything in
    /// the location, in container order.
    fn effective_cmdset(&self, rec: &SessionRecord, state: &dyn WorldState) -> CmdSet {
        let mut current = self.session_cmdset.clone();
        let Some(puppet) = rec.puppet else {
            return current;
        };
        let mut merge_storage = |current: CmdSet, storage: &[String]| {
            if storage.is_empty() {
                return current;
            }
            let stack = CmdSetStack::from_storage(storage, &self.cmdsets);
            CmdSet::merge(&current, stack.current())
        };
        let Ok(puppet_rec) = state.object(puppet) else {
            return current;
        };
        current = merge_storage(current, &puppet_rec.cmdset_storage);
        if let Some(location) = puppet_rec.location {
            if let Ok(loc_rec) = state.object(location) {
                current = merge_storage(current, &loc_rec.cmdset_storage);
            }
            if let Ok(contents) = state.contents(location) {
                for obj in contents {
                    if obj == puppet {
                        continue;
                    }
                    if let Ok(obj_rec) = state.object(obj) {
                        if !obj_rec.going {
                            current = merge_storage(current, &obj_rec.cmdset_storage);
                        }
                    }
                }
            }
        }
        current
    }

    /// The sentinel pushed at a fresh connection, so games can replace the
    /// login screen.
    pub fn login_start(
        &self,
        rec: &SessionRecord,
        state: &mut dyn WorldState,
        session: &dyn Session,
    ) {
        let current = self.effective_cmdset(rec, &*state);
        if !self.run_sentinel(CMD_LOGINSTART, "", rec, state, session, &current) {
            let _ = session.send_to_session(rec.sessid, "Welcome. Please log in.");
        }
    }

    /// No command matched: try a channel rewrite, then an exit rewrite, then
    /// the no-match sentinel.
    #[allow(clippy::too_many_arguments)]
    fn no_match(
        &self,
        rec: &SessionRecord,
        state: &mut dyn WorldState,
        session: &dyn Session,
        current: &CmdSet,
        base: &str,
        args: &str,
        line: &str,
    ) {
        if self.channels.is_member(base, rec.sessid) {
            let channel_args = format!("{base} {args}");
            if !self.run_sentinel(CMD_CHANNEL, &channel_args, rec, state, session, current) {
                let speaker = rec_display_name(rec, &*state);
                self.channels
                    .broadcast(base, session, &format!("[{base}] {speaker}: {args}"));
            }
            return;
        }

        if let Some(matched) = self.matching_exit(rec, &*state, base) {
            match matched {
                MatchResult::Single(exit) => {
                    let exit_name = state
                        .object(exit)
                        .map(|r| r.key)
                        .unwrap_or_else(|_| base.to_string());
                    if !self.run_sentinel(CMD_EXIT, &exit_name, rec, state, session, current)
                    {
                        if let Err(e) = self.traverse_exit(rec, state, session, exit) {
                            error!(%exit, error = %e, "exit traversal failed");
                            let _ = session.send_to_session(rec.sessid, APOLOGY_MSG);
                        }
                    }
                    return;
                }
                MatchResult::Multiple(exits) => {
                    let names: Vec<String> = exits
                        .into_iter()
                        .filter_map(|e| state.object(e).ok())
                        .map(|r| r.key)
                        .collect();
                    self.multi_match(rec, state, session, current, &names);
                    return;
                }
                MatchResult::NoMatch => {}
            }
        }

        if !self.run_sentinel(CMD_NOMATCH, line, rec, state, session, current) {
            let _ = session.send_to_session(rec.sessid, NOMATCH_MSG);
        }
    }

    fn multi_match(
        &self,
        rec: &SessionRecord,
        state: &mut dyn WorldState,
        session: &dyn Session,
        current: &CmdSet,
        names: &[String],
    ) {
        let joined = names.join(", ");
        if !self.run_sentinel(CMD_MULTIMATCH, &joined, rec, state, session, current) {
            let _ =
                session.send_to_session(rec.sessid, &format!("More than one match: {joined}."));
        }
    }

    /// Resolve a sentinel through the cmdset like any other command. Returns
    /// false when no game has claimed the key, so the caller applies its
    /// hardcoded fallback.
    fn run_sentinel(
        &self,
        key: &str,
        args: &str,
        rec: &SessionRecord,
        state: &mut dyn WorldState,
        session: &dyn Session,
        current: &CmdSet,
    ) -> bool {
        let Some(cmd) = current.get(key) else {
            return false;
        };
        let parsed = cmd.parse(key, args);
        let mut ctx = CommandCtx {
            session,
            sessid: rec.sessid,
            caller: rec.puppet,
            player: rec.uid,
            state,
            parsed,
        };
        if let Err(e) = cmd.func(&mut ctx) {
            error!(sentinel = key, sessid = rec.sessid, error = %e, "sentinel failed");
            let _ = session.send_to_session(rec.sessid, APOLOGY_MSG);
        }
        true
    }

    /// Evaluate a command's `cmd` lock for this session. A session without a
    /// puppet is checked against a stand-in record so account-level locks
    /// (`all()`, `perm()`) still apply.
    fn command_access(
        &self,
        cmd: &dyn Command,
        rec: &SessionRecord,
        state: &dyn WorldState,
    ) -> bool {
        let locks = match LockSet::from_storage(cmd.lock_string()) {
            Ok(locks) => locks,
            Err(e) => {
                warn!(cmd = cmd.key(), error = %e, "bad command lock string, denying");
                return false;
            }
        };
        let puppet_rec = rec.puppet.and_then(|p| state.object(p).ok());
        let player_rec: Option<PlayerRecord> =
            rec.uid.and_then(|uid| state.player(uid).ok());
        // Commands are not objects; the accessed side of the check is a
        // stand-in.
        let accessed = match &puppet_rec {
            Some(p) => p.clone(),
            None => ObjectRecord::new(Dbref(-1), "session", ""),
        };
        let ctx = LockCtx {
            accessing_obj: puppet_rec.as_ref(),
            accessing_player: player_rec.as_ref(),
            accessed: &accessed,
            state,
            perm_hierarchy: &self.perm_hierarchy,
        };
        check_lock(&locks, "cmd", &ctx, &self.locks, true)
    }

    fn matching_exit(
        &self,
        rec: &SessionRecord,
        state: &dyn WorldState,
        base: &str,
    ) -> Option<MatchResult<Dbref>> {
        let puppet = rec.puppet?;
        let location = state.object(puppet).ok()?.location?;
        let exits = state.exits_of(location).ok()?;
        let mut candidates = Vec::new();
        for exit in exits {
            let Ok(exit_rec) = state.object(exit) else {
                continue;
            };
            if exit_rec.going {
                continue;
            }
            candidates.push((exit, exit_rec.key.clone(), exit_rec.aliases.clone()));
        }
        Some(match_keyed(base, &candidates))
    }

    /// The hardcoded exit behavior: check the traverse lock, then move the
    /// puppet to the destination.
    fn traverse_exit(
        &self,
        rec: &SessionRecord,
        state: &mut dyn WorldState,
        session: &dyn Session,
        exit: Dbref,
    ) -> Result<(), CommandError> {
        let Some(puppet) = rec.puppet else {
            return Ok(());
        };
        let exit_rec = state.object(exit)?;
        let Some(destination) = exit_rec.destination else {
            return Ok(());
        };
        let locks = LockSet::from_storage(&exit_rec.lock_storage)
            .unwrap_or_else(|_| LockSet::empty());
        let puppet_rec = state.object(puppet)?;
        let player_rec: Option<PlayerRecord> =
            rec.uid.and_then(|uid| state.player(uid).ok());
        let allowed = {
            let ctx = LockCtx {
                accessing_obj: Some(&puppet_rec),
                accessing_player: player_rec.as_ref(),
                accessed: &exit_rec,
                state: &*state,
                perm_hierarchy: &self.perm_hierarchy,
            };
            check_lock(&locks, "traverse", &ctx, &self.locks, true)
        };
        if !allowed {
            session.send_to_session(rec.sessid, EXIT_LOCKED_MSG)?;
            return Ok(());
        }
        let mut world = World {
            state,
            session,
            typeclasses: &self.typeclasses,
            default_home: self.default_home,
        };
        world.move_to(puppet, destination, false)?;
        Ok(())
    }
}

fn rec_display_name(rec: &SessionRecord, state: &dyn WorldState) -> String {
    rec.puppet
        .and_then(|p| state.object(p).ok())
        .map(|r| r.key)
        .unwrap_or_else(|| "Someone".to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use loom_common::cmdset::MergeType;
    use loom_common::model::{AttrValue, PlayerId};
    use loom_common::sessions::{MockEmission, MockSession};
    use loom_common::WorldStateSource;
    use loom_db::TransientStore;

    use super::*;

    struct SayCmd;

    impl Command for SayCmd {
        fn key(&self) -> &str {
            "say"
        }

        fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
            ctx.msg(&format!("You say, \"{}\"", ctx.parsed.args))?;
            Ok(())
        }
    }

    struct PoseCmd;

    impl Command for PoseCmd {
        fn key(&self) -> &str {
            "pose"
        }

        fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
            let sep = if ctx.parsed.switches.iter().any(|s| s == "nospace") {
                ""
            } else {
                " "
            };
            ctx.msg(&format!("Rider{sep}{}", ctx.parsed.args))?;
            Ok(())
        }
    }

    struct LookCmd;

    impl Command for LookCmd {
        fn key(&self) -> &str {
            "look"
        }

        fn aliases(&self) -> &[String] {
            static ALIASES: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
            ALIASES.get_or_init(|| vec!["l".to_string()])
        }

        fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
            ctx.msg("You look around.")?;
            Ok(())
        }
    }

    struct LockedCmd;

    impl Command for LockedCmd {
        fn key(&self) -> &str {
            "smite"
        }

        fn lock_string(&self) -> &str {
            "cmd:perm(Admin)"
        }

        fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
            ctx.msg("Smitten.")?;
            Ok(())
        }
    }

    struct FailingCmd;

    impl Command for FailingCmd {
        fn key(&self) -> &str {
            "crash"
        }

        fn func(&self, _ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
            Err(CommandError::Failed("boom".to_string()))
        }
    }

    struct GropeCmd;

    impl Command for GropeCmd {
        fn key(&self) -> &str {
            "grope"
        }

        fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
            ctx.msg("It is too dark to see.")?;
            Ok(())
        }
    }

    fn base_set() -> CmdSet {
        CmdSet::new("base", 0, MergeType::Union)
            .with(Arc::new(SayCmd))
            .with(Arc::new(PoseCmd))
            .with(Arc::new(LookCmd))
            .with(Arc::new(LockedCmd))
            .with(Arc::new(FailingCmd))
    }

    fn dispatcher() -> Dispatcher {
        let mut cmdsets = CmdSetRegistry::new();
        cmdsets.register("base", base_set);
        cmdsets.register("dark", || {
            CmdSet::new("dark", 1, MergeType::Replace).with(Arc::new(GropeCmd))
        });
        Dispatcher {
            typeclasses: Arc::new(TypeclassRegistry::new()),
            cmdsets: Arc::new(cmdsets),
            locks: LockFuncRegistry::core(),
            aliases: HashMap::from([("hail".to_string(), "say".to_string())]),
            channels: ChannelRegistry::new(),
            perm_hierarchy: vec![
                "Player".to_string(),
                "Builder".to_string(),
                "Admin".to_string(),
                "Developer".to_string(),
            ],
            default_home: None,
            session_cmdset: CmdSet::empty("session"),
        }
    }

    struct Fixture {
        state: Box<dyn WorldState>,
        session: MockSession,
        rec: SessionRecord,
        hall: Dbref,
        vault: Dbref,
        actor: Dbref,
    }

    fn fixture() -> Fixture {
        let store = TransientStore::new();
        let mut state = store.new_world_state().unwrap();
        let hall = state
            .create_object(ObjectRecord::new(Dbref(0), "Hall", "core.Room"))
            .unwrap();
        let vault = state
            .create_object(ObjectRecord::new(Dbref(0), "Vault", "core.Room"))
            .unwrap();
        let mut actor = ObjectRecord::new(Dbref(0), "Rider", "core.Character");
        actor.location = Some(hall);
        actor.cmdset_storage = vec!["base".to_string()];
        let actor = state.create_object(actor).unwrap();

        let mut rec = SessionRecord::new(1, "10.0.0.1:4321");
        rec.logged_in = true;
        rec.puppet = Some(actor);
        Fixture {
            state,
            session: MockSession::new(),
            rec,
            hall,
            vault,
            actor,
        }
    }

    #[test_case("\"hello there", "You say, \"hello there\"" ; "say prefix")]
    #[test_case(":grins", "Rider grins" ; "pose prefix")]
    #[test_case(";'s eyes glow", "Rider's eyes glow" ; "pose nospace prefix")]
    fn test_prefix_shortcuts(input: &str, expected: &str) {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, input);
        assert_eq!(fx.session.text_for_session(1), vec![expected.to_string()]);
        assert_eq!(fx.rec.cmd_total, 1);
    }

    #[test]
    fn test_alias_table_expansion() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "hail friends");
        assert_eq!(
            fx.session.text_for_session(1),
            vec!["You say, \"friends\""]
        );
    }

    #[test]
    fn test_command_word_case_and_spacing() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(
            &mut fx.rec,
            fx.state.as_mut(),
            &fx.session,
            "SAY   loud and  clear",
        );
        assert_eq!(
            fx.session.text_for_session(1),
            vec!["You say, \"loud and  clear\""]
        );
    }

    #[test]
    fn test_command_alias_matches() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "l");
        assert_eq!(fx.session.text_for_session(1), vec!["You look around."]);
    }

    #[test]
    fn test_empty_line_is_silent() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "   ");
        assert!(fx.session.emissions().is_empty());
        assert_eq!(fx.rec.cmd_total, 0);
    }

    #[test]
    fn test_nomatch_huh() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "frobnicate");
        assert_eq!(fx.session.text_for_session(1), vec!["Huh?"]);
    }

    #[test]
    fn test_idle_touches_quietly() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        let before_visible = fx.rec.cmd_last_visible;
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "idle");
        assert!(fx.session.emissions().is_empty());
        assert_eq!(fx.rec.cmd_total, 0);
        assert_eq!(fx.rec.cmd_last_visible, before_visible);
        assert!(fx.rec.cmd_last >= before_visible);
    }

    #[test]
    fn test_lock_denies_without_permission() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "smite");
        assert_eq!(
            fx.session.text_for_session(1),
            vec![NOPERM_MSG.to_string()]
        );
    }

    #[test]
    fn test_lock_passes_with_permission() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        let mut actor_rec = fx.state.object(fx.actor).unwrap();
        actor_rec.permissions = vec!["Developer".to_string()];
        fx.state.update_object(&actor_rec).unwrap();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "smite");
        assert_eq!(fx.session.text_for_session(1), vec!["Smitten."]);
    }

    #[test]
    fn test_unhandled_error_apologizes() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "crash now");
        assert_eq!(
            fx.session.text_for_session(1),
            vec![APOLOGY_MSG.to_string()]
        );
    }

    #[test]
    fn test_replace_cmdset_masks_base() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        let mut hall_rec = fx.state.object(fx.hall).unwrap();
        hall_rec.cmdset_storage = vec!["dark".to_string()];
        fx.state.update_object(&hall_rec).unwrap();

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "look");
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "grope");
        assert_eq!(
            fx.session.text_for_session(1),
            vec!["Huh?".to_string(), "It is too dark to see.".to_string()]
        );
    }

    #[test]
    fn test_exit_traversal() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        let mut door = ObjectRecord::new(Dbref(0), "north", "core.Exit");
        door.aliases = vec!["n".to_string()];
        door.location = Some(fx.hall);
        door.destination = Some(fx.vault);
        fx.state.create_object(door).unwrap();

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "n");
        assert_eq!(
            fx.state.object(fx.actor).unwrap().location,
            Some(fx.vault)
        );
        assert!(fx
            .session
            .emissions()
            .contains(&MockEmission::ToRoom(
                fx.vault,
                "Rider arrives.".to_string(),
                vec![fx.actor]
            )));
    }

    #[test]
    fn test_exit_traverse_lock() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        let mut door = ObjectRecord::new(Dbref(0), "north", "core.Exit");
        door.location = Some(fx.hall);
        door.destination = Some(fx.vault);
        door.lock_storage = "traverse:perm(Admin)".to_string();
        fx.state.create_object(door).unwrap();

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "north");
        assert_eq!(
            fx.session.text_for_session(1),
            vec![EXIT_LOCKED_MSG.to_string()]
        );
        assert_eq!(fx.state.object(fx.actor).unwrap().location, Some(fx.hall));
    }

    #[test]
    fn test_channel_rewrite_broadcasts() {
        let mut dispatcher = dispatcher();
        dispatcher.channels.join("public", 1);
        dispatcher.channels.join("public", 2);
        let mut fx = fixture();

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "public hail all");
        let expected = "[public] Rider: hail all".to_string();
        assert_eq!(
            fx.session.emissions(),
            vec![
                MockEmission::ToSession(1, expected.clone()),
                MockEmission::ToSession(2, expected),
            ]
        );
    }

    #[test]
    fn test_channel_requires_membership() {
        let mut dispatcher = dispatcher();
        dispatcher.channels.create("public");
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "public hail");
        assert_eq!(fx.session.text_for_session(1), vec!["Huh?"]);
    }

    #[test]
    fn test_multimatch_lists_candidates() {
        struct EchoA;
        impl Command for EchoA {
            fn key(&self) -> &str {
                "echo"
            }
            fn func(&self, _ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
                Ok(())
            }
        }
        struct EchoB;
        impl Command for EchoB {
            fn key(&self) -> &str {
                "echo2"
            }
            fn aliases(&self) -> &[String] {
                static ALIASES: std::sync::OnceLock<Vec<String>> =
                    std::sync::OnceLock::new();
                ALIASES.get_or_init(|| vec!["echo".to_string()])
            }
            fn func(&self, _ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
                Ok(())
            }
        }

        let mut dispatcher = dispatcher();
        dispatcher.session_cmdset = CmdSet::empty("session")
            .with(Arc::new(EchoA))
            .with(Arc::new(EchoB));
        let mut fx = fixture();
        fx.rec.puppet = None;

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "echo hi");
        assert_eq!(
            fx.session.text_for_session(1),
            vec!["More than one match: echo, echo2.".to_string()]
        );
    }

    #[test]
    fn test_unauthenticated_session_sees_only_session_set() {
        struct ConnectCmd;
        impl Command for ConnectCmd {
            fn key(&self) -> &str {
                "connect"
            }
            fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
                ctx.msg("Connecting...")?;
                Ok(())
            }
        }

        let mut dispatcher = dispatcher();
        dispatcher.session_cmdset = CmdSet::empty("login").with(Arc::new(ConnectCmd));
        let mut fx = fixture();
        fx.rec.puppet = None;
        fx.rec.logged_in = false;
        fx.rec.uid = None;

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "look");
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "connect rider pw");
        assert_eq!(
            fx.session.text_for_session(1),
            vec!["Huh?".to_string(), "Connecting...".to_string()]
        );
    }

    #[test]
    fn test_noperm_routes_func_denials() {
        struct SelfDenying;
        impl Command for SelfDenying {
            fn key(&self) -> &str {
                "vanish"
            }
            fn func(&self, _ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
                Err(CommandError::PermissionDenied)
            }
        }

        let mut dispatcher = dispatcher();
        dispatcher.session_cmdset = CmdSet::empty("session").with(Arc::new(SelfDenying));
        let mut fx = fixture();

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "vanish");
        assert_eq!(
            fx.session.text_for_session(1),
            vec![NOPERM_MSG.to_string()]
        );
    }

    #[test]
    fn test_superuser_bypasses_command_lock() {
        let dispatcher = dispatcher();
        let mut fx = fixture();
        let mut player = PlayerRecord::new(PlayerId(0), "boss", "pw");
        player.superuser = true;
        let uid = fx.state.create_player(player).unwrap();
        fx.rec.uid = Some(uid);

        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "smite");
        assert_eq!(fx.session.text_for_session(1), vec!["Smitten."]);
    }

    #[test]
    fn test_attr_mutations_visible_to_later_commands() {
        struct SetSign;
        impl Command for SetSign {
            fn key(&self) -> &str {
                "inscribe"
            }
            fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
                let Some(caller) = ctx.caller else {
                    return Ok(());
                };
                ctx.state.set_attr(
                    caller,
                    "sign",
                    Some(AttrValue::Str(ctx.parsed.args.to_string())),
                )?;
                Ok(())
            }
        }

        let mut dispatcher = dispatcher();
        dispatcher.session_cmdset = CmdSet::empty("session").with(Arc::new(SetSign));
        let mut fx = fixture();
        dispatcher.dispatch(&mut fx.rec, fx.state.as_mut(), &fx.session, "inscribe beware");
        assert_eq!(
            fx.state.attr(fx.actor, "sign").unwrap(),
            Some(AttrValue::Str("beware".to_string()))
        );
    }
}
