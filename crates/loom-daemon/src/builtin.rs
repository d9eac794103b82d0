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

//! The session-level commands every connection carries: account creation,
//! login, and quit. Everything in-character comes from cmdsets stored on
//! world objects; these three are the bootstrap surface a bare connection
//! needs before it has a puppet.

use std::sync::Arc;

use tracing::info;

use loom_common::cmdset::{Command, CommandCtx, CommandError, MergeType, CmdSet};
use loom_common::locks::{check_lock, LockCtx, LockFuncRegistry, LockSet};
use loom_common::model::{Dbref, ObjectRecord, PlayerId, PlayerRecord};
use loom_common::sessions::SessionId;
use loom_common::util::parse_into_words;
use loom_kernel::typeclass::TypeclassRegistry;
use loom_kernel::world::World;

/// Deferred session-registry mutations requested by commands. Commands run
/// with the registry unlocked, so login cannot be applied in place; the RPC
/// server drains these after each dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    Login {
        sessid: SessionId,
        uid: PlayerId,
        puppet: Dbref,
    },
}

/// `connect <account> <password>`: authenticate and bind to the account's
/// first character.
pub struct ConnectCmd {
    auth_tx: flume::Sender<AuthEvent>,
    locks: Arc<LockFuncRegistry>,
    perm_hierarchy: Vec<String>,
}

impl Command for ConnectCmd {
    fn key(&self) -> &str {
        "connect"
    }

    fn aliases(&self) -> &[String] {
        static ALIASES: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
        ALIASES.get_or_init(|| vec!["con".to_string()])
    }

    fn help_category(&self) -> &str {
        "session"
    }

    fn help_text(&self) -> &str {
        "connect <account> <password> - log in to an existing account"
    }

    fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
        let (username, password) = split_credentials(&ctx.parsed.args)?;
        let Some(player) = ctx.state.player_by_name(&username)? else {
            ctx.msg("No such account, or bad password.")?;
            return Ok(());
        };
        if !player.check_password(&password) {
            ctx.msg("No such account, or bad password.")?;
            return Ok(());
        }
        let Some(&puppet) = player.characters.first() else {
            ctx.msg("That account has no character yet.")?;
            return Ok(());
        };
        let puppet_rec = ctx.state.object(puppet)?;
        if !self.puppet_allowed(&player, &puppet_rec, ctx) {
            return Err(CommandError::PermissionDenied);
        }
        self.auth_tx
            .send(AuthEvent::Login {
                sessid: ctx.sessid,
                uid: player.id,
                puppet,
            })
            .map_err(|e| CommandError::Failed(format!("auth channel closed: {e}")))?;
        ctx.msg(&format!("Connected as {}.", player.username))?;
        info!(sessid = ctx.sessid, account = %player.username, "login accepted");
        Ok(())
    }
}

impl ConnectCmd {
    /// The character's `puppet` lock gates the binding; absent a lock entry
    /// the owner may always puppet their own character.
    fn puppet_allowed(
        &self,
        player: &PlayerRecord,
        puppet_rec: &ObjectRecord,
        ctx: &CommandCtx<'_>,
    ) -> bool {
        let Ok(locks) = LockSet::from_storage(&puppet_rec.lock_storage) else {
            return false;
        };
        let lock_ctx = LockCtx {
            accessing_obj: None,
            accessing_player: Some(player),
            accessed: puppet_rec,
            state: &*ctx.state,
            perm_hierarchy: &self.perm_hierarchy,
        };
        check_lock(&locks, "puppet", &lock_ctx, &self.locks, true)
    }
}

/// `create <account> <password>`: make an account and a character for it,
/// homed at the default room.
pub struct CreateCmd {
    typeclasses: Arc<TypeclassRegistry>,
    default_home: Option<Dbref>,
}

impl Command for CreateCmd {
    fn key(&self) -> &str {
        "create"
    }

    fn help_category(&self) -> &str {
        "session"
    }

    fn help_text(&self) -> &str {
        "create <account> <password> - register a new account"
    }

    fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
        let (username, password) = split_credentials(&ctx.parsed.args)?;
        if ctx.state.player_by_name(&username)?.is_some() {
            ctx.msg("That account name is taken.")?;
            return Ok(());
        }
        if password.len() < 3 {
            ctx.msg("Password too short.")?;
            return Ok(());
        }
        let player_id = ctx.state.create_player(PlayerRecord::new(
            PlayerId(0),
            &username,
            &password,
        ))?;
        let mut player = ctx.state.player(player_id)?;

        let mut character = ObjectRecord::new(Dbref(0), &username, "base");
        character.location = self.default_home;
        character.home = self.default_home;
        character.player = Some(player.id);
        let puppet = {
            let mut world = World {
                state: &mut *ctx.state,
                session: ctx.session,
                typeclasses: &self.typeclasses,
                default_home: self.default_home,
            };
            world.create_object(character)?
        };
        player.characters.push(puppet);
        ctx.state.update_player(&player)?;

        info!(account = %player.username, %puppet, "account created");
        ctx.msg(&format!(
            "Account {} created. Log in with: connect {} <password>",
            player.username, player.username
        ))?;
        Ok(())
    }
}

/// `quit`: ask the portal to drop this session.
pub struct QuitCmd;

impl Command for QuitCmd {
    fn key(&self) -> &str {
        "quit"
    }

    fn help_category(&self) -> &str {
        "session"
    }

    fn func(&self, ctx: &mut CommandCtx<'_>) -> Result<(), CommandError> {
        ctx.msg("Goodbye.")?;
        ctx.session.disconnect(ctx.sessid, "Quit.")?;
        Ok(())
    }
}

/// Quote-aware credential split: `"mr rider" sekrit` logs in the account
/// named `mr rider`. An unquoted password with spaces collapses runs of
/// whitespace; quote it to keep them.
fn split_credentials(args: &str) -> Result<(String, String), CommandError> {
    let mut words = parse_into_words(args).into_iter();
    let (Some(username), Some(first)) = (words.next(), words.next()) else {
        return Err(CommandError::CouldNotParse(
            "expected <account> <password>".to_string(),
        ));
    };
    let password = std::iter::once(first)
        .chain(words)
        .collect::<Vec<_>>()
        .join(" ");
    Ok((username, password))
}

/// The set attached to every session regardless of login state.
pub fn session_cmdset(
    auth_tx: flume::Sender<AuthEvent>,
    typeclasses: Arc<TypeclassRegistry>,
    locks: Arc<LockFuncRegistry>,
    perm_hierarchy: Vec<String>,
    default_home: Option<Dbref>,
) -> CmdSet {
    CmdSet::new("session", 0, MergeType::Union)
        .with(Arc::new(ConnectCmd {
            auth_tx,
            locks,
            perm_hierarchy,
        }))
        .with(Arc::new(CreateCmd {
            typeclasses,
            default_home,
        }))
        .with(Arc::new(QuitCmd))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use loom_common::model::{WorldState, WorldStateSource};
    use loom_common::sessions::{MockEmission, MockSession};
    use loom_db::TransientStore;

    use super::*;

    fn run(
        cmd: &dyn Command,
        state: &mut dyn WorldState,
        session: &MockSession,
        sessid: SessionId,
        args: &str,
    ) -> Result<(), CommandError> {
        let parsed = cmd.parse(cmd.key(), args);
        let mut ctx = CommandCtx {
            session,
            sessid,
            caller: None,
            player: None,
            state,
            parsed,
        };
        cmd.func(&mut ctx)
    }

    #[test]
    fn test_create_then_connect() {
        let source = TransientStore::new();
        let mut state = source.new_world_state().unwrap();
        let session = MockSession::new();
        let (auth_tx, auth_rx) = flume::unbounded();

        let create = CreateCmd {
            typeclasses: Arc::new(TypeclassRegistry::new()),
            default_home: None,
        };
        run(&create, state.as_mut(), &session, 1, "rider sekrit").unwrap();
        let player = state.player_by_name("rider").unwrap().unwrap();
        assert_eq!(player.characters.len(), 1);

        let connect = ConnectCmd {
            auth_tx,
            locks: Arc::new(LockFuncRegistry::core()),
            perm_hierarchy: vec!["Player".to_string()],
        };
        run(&connect, state.as_mut(), &session, 1, "rider sekrit").unwrap();
        assert_eq!(
            auth_rx.try_recv().unwrap(),
            AuthEvent::Login {
                sessid: 1,
                uid: player.id,
                puppet: player.characters[0],
            }
        );
    }

    #[test]
    fn test_quoted_account_name() {
        let source = TransientStore::new();
        let mut state = source.new_world_state().unwrap();
        let session = MockSession::new();
        let (auth_tx, auth_rx) = flume::unbounded();

        let create = CreateCmd {
            typeclasses: Arc::new(TypeclassRegistry::new()),
            default_home: None,
        };
        run(&create, state.as_mut(), &session, 1, "\"mr rider\" sekrit").unwrap();
        let player = state.player_by_name("mr rider").unwrap().unwrap();

        let connect = ConnectCmd {
            auth_tx,
            locks: Arc::new(LockFuncRegistry::core()),
            perm_hierarchy: vec!["Player".to_string()],
        };
        run(&connect, state.as_mut(), &session, 1, "\"mr rider\" sekrit").unwrap();
        assert_eq!(
            auth_rx.try_recv().unwrap(),
            AuthEvent::Login {
                sessid: 1,
                uid: player.id,
                puppet: player.characters[0],
            }
        );
    }

    #[test]
    fn test_connect_bad_password() {
        let source = TransientStore::new();
        let mut state = source.new_world_state().unwrap();
        let session = MockSession::new();
        let (auth_tx, auth_rx) = flume::unbounded();

        let create = CreateCmd {
            typeclasses: Arc::new(TypeclassRegistry::new()),
            default_home: None,
        };
        run(&create, state.as_mut(), &session, 1, "rider sekrit").unwrap();

        let connect = ConnectCmd {
            auth_tx,
            locks: Arc::new(LockFuncRegistry::core()),
            perm_hierarchy: vec!["Player".to_string()],
        };
        run(&connect, state.as_mut(), &session, 1, "rider wrong").unwrap();
        assert!(auth_rx.try_recv().is_err());
        assert!(session
            .text_for_session(1)
            .iter()
            .any(|t| t.contains("bad password")));
    }

    #[test]
    fn test_quit_disconnects() {
        let source = TransientStore::new();
        let mut state = source.new_world_state().unwrap();
        let session = MockSession::new();
        run(&QuitCmd, state.as_mut(), &session, 9, "").unwrap();
        assert!(session
            .emissions()
            .contains(&MockEmission::Disconnect(9, "Quit.".to_string())));
    }
}
