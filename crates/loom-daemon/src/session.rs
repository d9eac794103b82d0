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

use std::sync::{Arc, Mutex};

use tracing::warn;

use loom_common::model::{Dbref, WorldStateSource};
use loom_common::sessions::{Session, SessionError, SessionId};
use loom_kernel::sessions::SessionRegistry;
use rpc_common::{encode_msg, MsgServer2Portal, PORTAL_TOPIC};

/// The one [`Session`] implementation in the daemon: routes output through
/// the events PUB socket, resolving object and room targets through the
/// session registry and a fresh read snapshot.
///
/// Callers must not hold the registry lock while calling the send methods;
/// `disconnect`/`disconnect_by_obj` only publish, so they are safe under the
/// lock (the registry's own login/sweep paths rely on that).
pub struct DaemonSession {
    publish: Arc<Mutex<zmq::Socket>>,
    registry: Arc<Mutex<SessionRegistry>>,
    state_source: Arc<dyn WorldStateSource>,
}

impl DaemonSession {
    pub fn new(
        publish: Arc<Mutex<zmq::Socket>>,
        registry: Arc<Mutex<SessionRegistry>>,
        state_source: Arc<dyn WorldStateSource>,
    ) -> Self {
        Self {
            publish,
            registry,
            state_source,
        }
    }

    pub fn publish_event(&self, event: &MsgServer2Portal) -> Result<(), SessionError> {
        let payload = encode_msg(event).map_err(|e| {
            warn!(error = %e, "failed to encode portal event");
            SessionError::DeliveryError
        })?;
        let publish = self.publish.lock().unwrap();
        publish
            .send_multipart([PORTAL_TOPIC.to_vec(), payload], 0)
            .map_err(|e| {
                warn!(error = %e, "failed to publish portal event");
                SessionError::DeliveryError
            })
    }

    fn sessions_for_obj(&self, obj: Dbref) -> Vec<SessionId> {
        self.registry.lock().unwrap().sessions_for_obj(obj)
    }
}

impl Session for DaemonSession {
    fn send_to_session(&self, sessid: SessionId, msg: &str) -> Result<(), SessionError> {
        self.publish_event(&MsgServer2Portal::SText {
            sessid,
            text: msg.to_string(),
        })
    }

    fn send_to_obj(&self, obj: Dbref, msg: &str) -> Result<(), SessionError> {
        for sessid in self.sessions_for_obj(obj) {
            self.send_to_session(sessid, msg)?;
        }
        Ok(())
    }

    fn send_to_room(
        &self,
        room: Dbref,
        msg: &str,
        exclude: &[Dbref],
    ) -> Result<(), SessionError> {
        // Room membership comes from the last committed snapshot; an
        // in-flight transaction's moves are not visible here.
        let state = self.state_source.new_world_state().map_err(|e| {
            warn!(error = %e, "failed to open room broadcast snapshot");
            SessionError::DeliveryError
        })?;
        let contents = state.contents(room).map_err(|e| {
            warn!(%room, error = %e, "failed to read room contents");
            SessionError::DeliveryError
        })?;
        for obj in contents {
            if exclude.contains(&obj) {
                continue;
            }
            self.send_to_obj(obj, msg)?;
        }
        if let Err(e) = state.rollback() {
            warn!(error = %e, "failed to discard room broadcast snapshot");
        }
        Ok(())
    }

    fn disconnect(&self, sessid: SessionId, reason: &str) -> Result<(), SessionError> {
        self.publish_event(&MsgServer2Portal::SDisconn {
            sessid,
            reason: reason.to_string(),
        })
    }

    fn disconnect_by_obj(&self, obj: Dbref, reason: &str) -> Result<(), SessionError> {
        for sessid in self.sessions_for_obj(obj) {
            self.disconnect(sessid, reason)?;
        }
        Ok(())
    }
}
