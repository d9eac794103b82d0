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

//! Channel name registry and broadcast fan-out. This is the bare interface
//! the dispatcher needs for the channel rewrite; subscription management
//! beyond join/leave lives with the game, not here.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use loom_common::sessions::{Session, SessionId};

/// Channel names (case-folded) to subscribed sessions.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, BTreeSet<SessionId>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: &str) {
        self.channels.entry(name.to_lowercase()).or_default();
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.channels.remove(&name.to_lowercase()).is_some()
    }

    /// True when `name` names a channel; this is the dispatcher's rewrite
    /// test.
    pub fn exists(&self, name: &str) -> bool {
        self.channels.contains_key(&name.to_lowercase())
    }

    /// Join also creates the channel if it does not exist yet.
    pub fn join(&mut self, name: &str, sessid: SessionId) {
        self.channels
            .entry(name.to_lowercase())
            .or_default()
            .insert(sessid);
    }

    pub fn leave(&mut self, name: &str, sessid: SessionId) -> bool {
        match self.channels.get_mut(&name.to_lowercase()) {
            Some(members) => members.remove(&sessid),
            None => false,
        }
    }

    /// Drop a session from every channel, for disconnect cleanup.
    pub fn leave_all(&mut self, sessid: SessionId) {
        for members in self.channels.values_mut() {
            members.remove(&sessid);
        }
    }

    pub fn is_member(&self, name: &str, sessid: SessionId) -> bool {
        self.channels
            .get(&name.to_lowercase())
            .is_some_and(|m| m.contains(&sessid))
    }

    pub fn members(&self, name: &str) -> Vec<SessionId> {
        self.channels
            .get(&name.to_lowercase())
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Fan a line out to every subscriber. Delivery failures are logged per
    /// session and do not stop the fan-out.
    pub fn broadcast(&self, name: &str, session: &dyn Session, msg: &str) {
        let Some(members) = self.channels.get(&name.to_lowercase()) else {
            return;
        };
        for &sessid in members {
            if let Err(e) = session.send_to_session(sessid, msg) {
                warn!(channel = name, sessid, error = %e, "channel delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use loom_common::sessions::{MockEmission, MockSession};

    use super::*;

    #[test]
    fn test_join_creates_and_is_case_insensitive() {
        let mut channels = ChannelRegistry::new();
        channels.join("Public", 1);
        assert!(channels.exists("public"));
        assert!(channels.is_member("PUBLIC", 1));
        assert!(!channels.is_member("public", 2));
    }

    #[test]
    fn test_broadcast_reaches_all_members() {
        let mut channels = ChannelRegistry::new();
        channels.join("public", 1);
        channels.join("public", 2);
        channels.join("staff", 3);

        let session = MockSession::new();
        channels.broadcast("public", &session, "[public] Rider: hail");
        assert_eq!(
            session.emissions(),
            vec![
                MockEmission::ToSession(1, "[public] Rider: hail".to_string()),
                MockEmission::ToSession(2, "[public] Rider: hail".to_string()),
            ]
        );
    }

    #[test]
    fn test_leave_and_leave_all() {
        let mut channels = ChannelRegistry::new();
        channels.join("public", 1);
        channels.join("staff", 1);
        channels.join("public", 2);

        assert!(channels.leave("public", 1));
        assert!(!channels.leave("public", 1));
        channels.leave_all(2);
        assert_eq!(channels.members("public"), Vec::<SessionId>::new());
        assert!(channels.is_member("staff", 1));
    }
}
