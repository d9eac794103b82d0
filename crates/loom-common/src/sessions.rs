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

//! The session output interface commands and hooks write through, and the
//! per-session bookkeeping record shared between the portal and the server.

use std::sync::Mutex;
use std::time::SystemTime;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Dbref, PlayerId};

/// Monotonic per-portal-lifetime session identifier.
pub type SessionId = u64;

/// Per-session state. The portal owns the authoritative copy; the server
/// rebuilds its view from portal sync messages after a reload.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sessid: SessionId,
    pub logged_in: bool,
    /// The authenticated account, once login succeeds.
    pub uid: Option<PlayerId>,
    /// The character this session is bound to (puppeting).
    pub puppet: Option<Dbref>,
    /// Last command of any kind; the idle sweep keys off this.
    pub cmd_last: SystemTime,
    /// Last command that counts as visible activity. The `idle` no-op command
    /// bumps `cmd_last` but not this.
    pub cmd_last_visible: SystemTime,
    pub cmd_total: u64,
    pub conn_time: SystemTime,
    /// Text codec applied at the protocol boundary.
    pub encoding: String,
    pub peer_addr: String,
}

impl SessionRecord {
    pub fn new(sessid: SessionId, peer_addr: &str) -> Self {
        let now = SystemTime::now();
        Self {
            sessid,
            logged_in: false,
            uid: None,
            puppet: None,
            cmd_last: now,
            cmd_last_visible: now,
            cmd_total: 0,
            conn_time: now,
            encoding: "utf-8".to_string(),
            peer_addr: peer_addr.to_string(),
        }
    }

    /// Record command activity. Visible activity bumps the activity counters;
    /// the `idle` command passes `visible = false` so clients can defeat NAT
    /// timeouts without polluting the metrics.
    pub fn touch(&mut self, visible: bool) {
        self.cmd_last = SystemTime::now();
        if visible {
            self.cmd_last_visible = self.cmd_last;
            self.cmd_total += 1;
        }
    }
}

/// The output half of the session layer, as seen from inside the engine.
/// Routing is by target: either a specific session, or every session puppeting
/// a given object. Implementations buffer or forward to the portal; the mock
/// just collects.
pub trait Session: Send + Sync {
    /// Emit a text block to one session.
    fn send_to_session(&self, sessid: SessionId, msg: &str) -> Result<(), SessionError>;

    /// Emit a text block to every session bound to the given object.
    fn send_to_obj(&self, obj: Dbref, msg: &str) -> Result<(), SessionError>;

    /// Emit to every session bound to an object located in `room`, except the
    /// listed objects. This is the bare broadcast interface room announcements
    /// and channels use.
    fn send_to_room(&self, room: Dbref, msg: &str, exclude: &[Dbref])
        -> Result<(), SessionError>;

    /// Disconnect one session, with a reason shown to the client.
    fn disconnect(&self, sessid: SessionId, reason: &str) -> Result<(), SessionError>;

    /// Disconnect every session bound to the given object. Used when the
    /// object is destroyed out from under its sessions.
    fn disconnect_by_obj(&self, obj: Dbref, reason: &str) -> Result<(), SessionError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No session {0}")]
    NoSuchSession(SessionId),
    #[error("No session for object {0}")]
    NoSessionForObject(Dbref),
    #[error("Could not deliver session message")]
    DeliveryError,
}

/// No-op session sink for paths that must run without a connected user
/// (server-start script fires, background validation).
pub struct NoopSession;

impl Session for NoopSession {
    fn send_to_session(&self, _sessid: SessionId, _msg: &str) -> Result<(), SessionError> {
        Ok(())
    }
    fn send_to_obj(&self, _obj: Dbref, _msg: &str) -> Result<(), SessionError> {
        Ok(())
    }
    fn send_to_room(
        &self,
        _room: Dbref,
        _msg: &str,
        _exclude: &[Dbref],
    ) -> Result<(), SessionError> {
        Ok(())
    }
    fn disconnect(&self, _sessid: SessionId, _reason: &str) -> Result<(), SessionError> {
        Ok(())
    }
    fn disconnect_by_obj(&self, _obj: Dbref, _reason: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Collects everything sent through it, for tests to assert on.
#[derive(Default)]
pub struct MockSession {
    sent: Mutex<Vec<MockEmission>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockEmission {
    ToSession(SessionId, String),
    ToObj(Dbref, String),
    ToRoom(Dbref, String, Vec<Dbref>),
    Disconnect(SessionId, String),
    DisconnectObj(Dbref, String),
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emissions(&self) -> Vec<MockEmission> {
        self.sent.lock().unwrap().clone()
    }

    /// All text delivered to the given object, in order.
    pub fn text_for_obj(&self, obj: Dbref) -> Vec<String> {
        self.emissions()
            .into_iter()
            .filter_map(|e| match e {
                MockEmission::ToObj(o, msg) if o == obj => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn text_for_session(&self, sessid: SessionId) -> Vec<String> {
        self.emissions()
            .into_iter()
            .filter_map(|e| match e {
                MockEmission::ToSession(s, msg) if s == sessid => Some(msg),
                _ => None,
            })
            .collect()
    }
}

impl Session for MockSession {
    fn send_to_session(&self, sessid: SessionId, msg: &str) -> Result<(), SessionError> {
        self.sent
            .lock()
            .unwrap()
            .push(MockEmission::ToSession(sessid, msg.to_string()));
        Ok(())
    }

    fn send_to_obj(&self, obj: Dbref, msg: &str) -> Result<(), SessionError> {
        self.sent
            .lock()
            .unwrap()
            .push(MockEmission::ToObj(obj, msg.to_string()));
        Ok(())
    }

    fn send_to_room(
        &self,
        room: Dbref,
        msg: &str,
        exclude: &[Dbref],
    ) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(MockEmission::ToRoom(
            room,
            msg.to_string(),
            exclude.to_vec(),
        ));
        Ok(())
    }

    fn disconnect(&self, sessid: SessionId, reason: &str) -> Result<(), SessionError> {
        self.sent
            .lock()
            .unwrap()
            .push(MockEmission::Disconnect(sessid, reason.to_string()));
        Ok(())
    }

    fn disconnect_by_obj(&self, obj: Dbref, reason: &str) -> Result<(), SessionError> {
        self.sent
            .lock()
            .unwrap()
            .push(MockEmission::DisconnectObj(obj, reason.to_string()));
        Ok(())
    }
}
