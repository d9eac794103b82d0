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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use eyre::Context;
use tracing::{debug, error, info, trace, warn};

use loom_common::model::{AttrValue, CommitResult, Dbref, WorldState, WorldStateSource};
use loom_common::sessions::SessionId;
use loom_kernel::dispatch::Dispatcher;
use loom_kernel::sessions::SessionRegistry;
use loom_kernel::typeclass::{HookCtx, Typeclass, TypeclassRegistry};
use rpc_common::{
    decode_msg, encode_msg, MsgPortal2Server, MsgServer2Portal, ReplyServer2Portal,
    RpcRequestError,
};

use crate::builtin::AuthEvent;
use crate::session::DaemonSession;

/// Attribute marking that a character has completed a login before; gates
/// the first-login hook.
const FIRST_LOGIN_ATTR: &str = "_first_login_done";

/// The daemon's half of the portal protocol: one REP socket, one handler.
/// World writes are serialized through this loop, so each request gets its
/// own transaction and a clean commit.
pub struct RpcServer {
    zmq_context: zmq::Context,
    kill_switch: Arc<AtomicBool>,
    state_source: Arc<dyn WorldStateSource>,
    registry: Arc<Mutex<SessionRegistry>>,
    session: Arc<DaemonSession>,
    dispatcher: Dispatcher,
    typeclasses: Arc<TypeclassRegistry>,
    auth_rx: flume::Receiver<AuthEvent>,
    /// Channels every fresh login is joined to.
    auto_channels: Vec<String>,
}

impl RpcServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zmq_context: zmq::Context,
        kill_switch: Arc<AtomicBool>,
        state_source: Arc<dyn WorldStateSource>,
        registry: Arc<Mutex<SessionRegistry>>,
        session: Arc<DaemonSession>,
        dispatcher: Dispatcher,
        typeclasses: Arc<TypeclassRegistry>,
        auth_rx: flume::Receiver<AuthEvent>,
        auto_channels: Vec<String>,
    ) -> Self {
        Self {
            zmq_context,
            kill_switch,
            state_source,
            registry,
            session,
            dispatcher,
            typeclasses,
            auth_rx,
            auto_channels,
        }
    }

    /// Bind the REP socket and serve until the kill switch flips.
    pub fn request_loop(&mut self, rpc_endpoint: &str) -> eyre::Result<()> {
        let rpc_socket = self.zmq_context.socket(zmq::REP)?;
        rpc_socket.bind(rpc_endpoint)?;
        info!("0mq server listening on {rpc_endpoint}");

        loop {
            if self.kill_switch.load(Ordering::Relaxed) {
                info!("Kill switch activated, exiting");
                return Ok(());
            }
            let poll_result = rpc_socket
                .poll(zmq::POLLIN, 100)
                .with_context(|| "Error polling ZMQ socket. Bailing out.")?;
            if poll_result == 0 {
                continue;
            }
            let request = match rpc_socket.recv_multipart(0) {
                Ok(request) => request,
                Err(_) => {
                    info!("ZMQ socket closed, exiting");
                    return Ok(());
                }
            };
            let reply = self.process_request(request);
            let reply = match reply {
                Ok(()) => ReplyServer2Portal::Ack,
                Err(e) => {
                    warn!(error = %e, "request failed");
                    ReplyServer2Portal::Failure(e)
                }
            };
            // A REP socket must answer every request; an empty frame beats a
            // wedged socket if the reply itself will not encode.
            let payload = encode_msg(&reply).unwrap_or_default();
            rpc_socket.send_multipart([payload], 0)?;
        }
    }

    fn process_request(&mut self, request: Vec<Vec<u8>>) -> Result<(), RpcRequestError> {
        // One frame: the bincode'd portal message.
        if request.len() != 1 {
            return Err(RpcRequestError::InvalidRequest);
        }
        let msg: MsgPortal2Server =
            decode_msg(&request[0]).map_err(|_| RpcRequestError::InvalidRequest)?;
        match msg {
            MsgPortal2Server::PConn { record } => self.handle_connect(record),
            MsgPortal2Server::PDisconn { sessid, reason } => {
                self.handle_disconnect(sessid, &reason)
            }
            MsgPortal2Server::PLine { sessid, line } => self.handle_line(sessid, &line),
            MsgPortal2Server::PSync { records } => {
                info!(count = records.len(), "portal session sync");
                self.registry.lock().unwrap().portal_session_sync(records);
                Ok(())
            }
            MsgPortal2Server::PPong { timestamp } => {
                trace!(?timestamp, "portal pong");
                Ok(())
            }
        }
    }

    fn handle_connect(
        &mut self,
        record: loom_common::sessions::SessionRecord,
    ) -> Result<(), RpcRequestError> {
        let sessid = record.sessid;
        let rec = {
            let mut registry = self.registry.lock().unwrap();
            registry.portal_connect(sessid, &record.peer_addr).clone()
        };
        let mut state = self.open_state()?;
        self.dispatcher
            .login_start(&rec, state.as_mut(), self.session.as_ref());
        commit(state);
        Ok(())
    }

    fn handle_disconnect(&mut self, sessid: SessionId, reason: &str) -> Result<(), RpcRequestError> {
        let rec = self.registry.lock().unwrap().portal_disconnect(sessid);
        self.dispatcher.channels.leave_all(sessid);
        let Some(rec) = rec else {
            return Ok(());
        };
        debug!(sessid, reason, "portal disconnect");
        if let Some(puppet) = rec.puppet {
            let mut state = self.open_state()?;
            self.fire_puppet_hook(state.as_mut(), puppet, |class, ctx| {
                class.at_disconnect(ctx, puppet)
            });
            commit(state);
        }
        Ok(())
    }

    fn handle_line(&mut self, sessid: SessionId, line: &str) -> Result<(), RpcRequestError> {
        // The record is dispatched on a clone so no registry lock is held
        // while commands emit through the session layer.
        let mut rec = self
            .registry
            .lock()
            .unwrap()
            .get(sessid)
            .cloned()
            .ok_or(RpcRequestError::NoSuchSession(sessid))?;
        let mut state = self.open_state()?;
        self.dispatcher
            .dispatch(&mut rec, state.as_mut(), self.session.as_ref(), line);
        commit(state);
        {
            let mut registry = self.registry.lock().unwrap();
            // The session may have been swept or booted mid-flight; do not
            // resurrect it.
            if let Some(slot) = registry.get_mut(sessid) {
                *slot = rec;
            }
        }
        self.apply_auth_events();
        Ok(())
    }

    /// Apply login requests queued by the connect command: bind the session,
    /// enforce the multisession policy, sync the portal, fire login hooks.
    fn apply_auth_events(&mut self) {
        while let Ok(event) = self.auth_rx.try_recv() {
            let AuthEvent::Login { sessid, uid, puppet } = event;
            let updated = {
                let mut registry = self.registry.lock().unwrap();
                let booted = registry.login(sessid, uid, puppet, self.session.as_ref());
                if !booted.is_empty() {
                    info!(sessid, ?booted, "multisession policy booted prior sessions");
                }
                registry.get(sessid).cloned()
            };
            let Some(record) = updated else {
                warn!(sessid, "login event for a session that vanished");
                continue;
            };
            if let Err(e) = self.session.publish_event(&MsgServer2Portal::SLogin {
                sessid,
                record,
            }) {
                warn!(sessid, error = %e, "failed to sync login to portal");
            }
            for channel in &self.auto_channels {
                self.dispatcher.channels.join(channel, sessid);
            }
            self.fire_login_hooks(sessid, puppet);
        }
    }

    fn fire_login_hooks(&mut self, sessid: SessionId, puppet: Dbref) {
        let Ok(mut state) = self.open_state() else {
            return;
        };
        let first_login = state
            .attr(puppet, FIRST_LOGIN_ATTR)
            .ok()
            .flatten()
            .is_none();
        if first_login {
            if let Err(e) = state.set_attr(puppet, FIRST_LOGIN_ATTR, Some(AttrValue::Bool(true)))
            {
                warn!(%puppet, error = %e, "failed to mark first login");
            }
            self.fire_puppet_hook(state.as_mut(), puppet, |class, ctx| {
                class.at_first_login(ctx, puppet, sessid)
            });
        }
        self.fire_puppet_hook(state.as_mut(), puppet, |class, ctx| {
            class.at_post_login(ctx, puppet, sessid)
        });
        commit(state);
    }

    fn fire_puppet_hook(
        &self,
        state: &mut dyn WorldState,
        puppet: Dbref,
        hook: impl FnOnce(
            &dyn Typeclass,
            &mut HookCtx<'_>,
        ) -> Result<(), loom_common::cmdset::CommandError>,
    ) {
        let Ok(rec) = state.object(puppet) else {
            return;
        };
        let class = self.typeclasses.resolve_for(&rec);
        let mut ctx = HookCtx {
            state,
            session: self.session.as_ref(),
        };
        if let Err(e) = hook(class.as_ref(), &mut ctx) {
            error!(%puppet, error = %e, "login hook failed");
        }
    }

    fn open_state(&self) -> Result<Box<dyn WorldState>, RpcRequestError> {
        self.state_source
            .new_world_state()
            .map_err(|e| RpcRequestError::InternalError(e.to_string()))
    }
}

/// Commit, demoting conflicts to a warning: this loop is the only writer
/// outside the script scheduler, and both retry naturally on the next
/// request or fire.
fn commit(state: Box<dyn WorldState>) {
    match state.commit() {
        Ok(CommitResult::Success) => {}
        Ok(CommitResult::ConflictRetry) => {
            warn!("world transaction conflicted, dropped");
        }
        Err(e) => {
            error!(error = %e, "world transaction commit failed");
        }
    }
}
