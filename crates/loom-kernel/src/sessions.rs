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

//! Server-side session registry. The portal owns the sockets and the
//! authoritative session list; this registry is the server's view of it,
//! rebuilt from a sync message after a reload. Login and idle policy live
//! here; the lifecycle hooks around them are fired by the daemon glue.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use loom_common::model::{Dbref, PlayerId};
use loom_common::sessions::{Session, SessionId, SessionRecord};

const IDLE_REASON: &str = "Idle timeout exceeded, disconnecting.";
const MULTISESSION_REASON: &str = "Logged in from elsewhere. Disconnecting.";

pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionRecord>,
    /// `None` disables the idle sweep entirely.
    idle_timeout: Option<Duration>,
    /// When false, a fresh login to a puppet boots every prior session bound
    /// to it.
    allow_multisession: bool,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Option<Duration>, allow_multisession: bool) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout,
            allow_multisession,
        }
    }

    /// A new connection announced by the portal. The session starts
    /// unauthenticated; the caller pushes the login cmdset onto it.
    pub fn portal_connect(&mut self, sessid: SessionId, peer_addr: &str) -> &SessionRecord {
        info!(sessid, peer = peer_addr, "session connected");
        self.sessions
            .entry(sessid)
            .or_insert_with(|| SessionRecord::new(sessid, peer_addr))
    }

    pub fn portal_disconnect(&mut self, sessid: SessionId) -> Option<SessionRecord> {
        let rec = self.sessions.remove(&sessid);
        if rec.is_some() {
            info!(sessid, "session disconnected");
        }
        rec
    }

    /// Replace the whole registry with the portal's view. This is the reload
    /// path: the portal kept the sockets while the server restarted.
    pub fn portal_session_sync(&mut self, records: Vec<SessionRecord>) {
        info!(count = records.len(), "rebuilding session registry from portal");
        self.sessions = records.into_iter().map(|r| (r.sessid, r)).collect();
    }

    /// Bind a session to an authenticated account and puppet. Returns the
    /// sessions booted under the single-session policy, already disconnected
    /// through `session`.
    pub fn login(
        &mut self,
        sessid: SessionId,
        uid: PlayerId,
        puppet: Dbref,
        session: &dyn Session,
    ) -> Vec<SessionId> {
        let mut booted = Vec::new();
        if !self.allow_multisession {
            booted = self
                .sessions
                .values()
                .filter(|r| r.sessid != sessid && r.puppet == Some(puppet))
                .map(|r| r.sessid)
                .collect();
            for &old in &booted {
                if let Err(e) = session.disconnect(old, MULTISESSION_REASON) {
                    warn!(sessid = old, error = %e, "failed to boot prior session");
                }
                self.sessions.remove(&old);
            }
        }
        if let Some(rec) = self.sessions.get_mut(&sessid) {
            rec.logged_in = true;
            rec.uid = Some(uid);
            rec.puppet = Some(puppet);
            info!(sessid, %puppet, "session logged in");
        }
        booted
    }

    pub fn get(&self, sessid: SessionId) -> Option<&SessionRecord> {
        self.sessions.get(&sessid)
    }

    pub fn get_mut(&mut self, sessid: SessionId) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(&sessid)
    }

    pub fn sessions_for_obj(&self, obj: Dbref) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|r| r.puppet == Some(obj))
            .map(|r| r.sessid)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.sessions.values().cloned().collect()
    }

    /// Disconnect and drop every session whose last command is older than the
    /// idle timeout. The `idle` command bumps `cmd_last` and so defeats this
    /// sweep without counting as visible activity.
    pub fn idle_sweep(&mut self, now: SystemTime, session: &dyn Session) -> Vec<SessionId> {
        let Some(timeout) = self.idle_timeout else {
            return Vec::new();
        };
        let stale: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|r| {
                now.duration_since(r.cmd_last)
                    .map(|idle| idle > timeout)
                    .unwrap_or(false)
            })
            .map(|r| r.sessid)
            .collect();
        for &sessid in &stale {
            if let Err(e) = session.disconnect(sessid, IDLE_REASON) {
                warn!(sessid, error = %e, "idle disconnect failed");
            }
            self.sessions.remove(&sessid);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use loom_common::sessions::{MockEmission, MockSession};

    use super::*;

    #[test]
    fn test_connect_and_disconnect() {
        let mut registry = SessionRegistry::new(None, true);
        registry.portal_connect(1, "10.0.0.1:4321");
        assert_eq!(registry.count(), 1);
        assert!(!registry.get(1).unwrap().logged_in);
        assert!(registry.portal_disconnect(1).is_some());
        assert!(registry.portal_disconnect(1).is_none());
    }

    #[test]
    fn test_login_binds_account_and_puppet() {
        let mut registry = SessionRegistry::new(None, true);
        let session = MockSession::new();
        registry.portal_connect(1, "10.0.0.1:4321");
        let booted = registry.login(1, PlayerId(7), Dbref(42), &session);
        assert!(booted.is_empty());
        let rec = registry.get(1).unwrap();
        assert!(rec.logged_in);
        assert_eq!(rec.uid, Some(PlayerId(7)));
        assert_eq!(rec.puppet, Some(Dbref(42)));
    }

    #[test]
    fn test_single_session_policy_boots_prior() {
        let mut registry = SessionRegistry::new(None, false);
        let session = MockSession::new();
        registry.portal_connect(1, "10.0.0.1:4321");
        registry.portal_connect(2, "10.0.0.2:4321");
        registry.login(1, PlayerId(7), Dbref(42), &session);
        let booted = registry.login(2, PlayerId(7), Dbref(42), &session);

        assert_eq!(booted, vec![1]);
        assert!(registry.get(1).is_none());
        assert_eq!(registry.sessions_for_obj(Dbref(42)), vec![2]);
        assert_eq!(
            session.emissions(),
            vec![MockEmission::Disconnect(
                1,
                MULTISESSION_REASON.to_string()
            )]
        );
    }

    #[test]
    fn test_multisession_allows_both() {
        let mut registry = SessionRegistry::new(None, true);
        let session = MockSession::new();
        registry.portal_connect(1, "10.0.0.1:4321");
        registry.portal_connect(2, "10.0.0.2:4321");
        registry.login(1, PlayerId(7), Dbref(42), &session);
        registry.login(2, PlayerId(7), Dbref(42), &session);
        assert_eq!(registry.sessions_for_obj(Dbref(42)), vec![1, 2]);
    }

    #[test]
    fn test_idle_sweep() {
        let mut registry = SessionRegistry::new(Some(Duration::from_secs(600)), true);
        let session = MockSession::new();
        registry.portal_connect(1, "10.0.0.1:4321");
        registry.portal_connect(2, "10.0.0.2:4321");

        // Session 2 kept alive by recent (invisible) activity.
        let now = SystemTime::now() + Duration::from_secs(700);
        registry.get_mut(2).unwrap().cmd_last = now;

        let swept = registry.idle_sweep(now, &session);
        assert_eq!(swept, vec![1]);
        assert!(registry.get(1).is_none());
        assert!(registry.get(2).is_some());
        assert_eq!(
            session.emissions(),
            vec![MockEmission::Disconnect(1, IDLE_REASON.to_string())]
        );
    }

    #[test]
    fn test_sync_rebuilds_registry() {
        let mut registry = SessionRegistry::new(None, true);
        registry.portal_connect(1, "10.0.0.1:4321");

        let mut synced = SessionRecord::new(5, "10.0.0.5:4321");
        synced.logged_in = true;
        synced.puppet = Some(Dbref(9));
        registry.portal_session_sync(vec![synced]);

        assert!(registry.get(1).is_none());
        assert_eq!(registry.sessions_for_obj(Dbref(9)), vec![5]);
        assert_eq!(registry.count(), 1);
    }
}
