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

//! The control protocol between the portal (which owns the client sockets) and
//! the server daemon (which owns the world). Requests flow portal-to-server
//! over a REQ/REP pair; server-to-portal traffic fans out over pub/sub.

use std::time::SystemTime;

use bincode::{Decode, Encode};
use thiserror::Error;

use loom_common::sessions::{SessionId, SessionRecord};

mod pubsub_client;
mod rpc_client;

pub use pubsub_client::portal_recv;
pub use rpc_client::RpcSendClient;

/// Topic the server publishes portal-bound messages under.
pub const PORTAL_TOPIC: &[u8; 6] = b"portal";

/// Errors at the RPC transport / encoding layer.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("could not send RPC request: {0}")]
    CouldNotSend(String),
    #[error("could not receive RPC response: {0}")]
    CouldNotReceive(String),
    #[error("could not decode RPC message: {0}")]
    CouldNotDecode(String),
}

/// Portal-to-server operations, sent on the REQ socket.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum MsgPortal2Server {
    /// A new connection, carrying its freshly-built session record.
    PConn { record: SessionRecord },
    /// The client side closed.
    PDisconn { sessid: SessionId, reason: String },
    /// One input line from a session.
    PLine { sessid: SessionId, line: String },
    /// The portal's full session view. Sent in answer to `SSync` so the
    /// server can rebuild its registry after a reload.
    PSync { records: Vec<SessionRecord> },
    /// Liveness answer to an `SPing`.
    PPong { timestamp: SystemTime },
}

/// Server-to-portal operations, published under [`PORTAL_TOPIC`].
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum MsgServer2Portal {
    /// A text block bound for one session.
    SText { sessid: SessionId, text: String },
    /// A session authenticated; the portal adopts the updated record.
    SLogin {
        sessid: SessionId,
        record: SessionRecord,
    },
    /// Close one session, with a reason shown to the client first.
    SDisconn { sessid: SessionId, reason: String },
    /// Close every session.
    SDisconnAll { reason: String },
    /// Ask the portal to send its session view back in a `PSync`.
    SSync,
    /// Liveness probe.
    SPing { timestamp: SystemTime },
}

/// The server's answer on the REQ/REP pair.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ReplyServer2Portal {
    Ack,
    Failure(RpcRequestError),
}

/// Errors at the call/request level, sent back over the wire.
#[derive(Debug, Clone, PartialEq, Error, Encode, Decode)]
pub enum RpcRequestError {
    #[error("Invalid request")]
    InvalidRequest,
    #[error("No session {0}")]
    NoSuchSession(SessionId),
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Encode a wire message with the bincode configuration both sides share.
pub fn encode_msg<T: Encode>(msg: &T) -> Result<Vec<u8>, RpcError> {
    bincode::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| RpcError::CouldNotSend(format!("unable to encode message: {e}")))
}

pub fn decode_msg<T: Decode<()>>(bytes: &[u8]) -> Result<T, RpcError> {
    let (msg, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| RpcError::CouldNotDecode(format!("unable to decode message: {e}")))?;
    Ok(msg)
}
