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

use tmq::request_reply::RequestSender;
use tmq::Multipart;
use tracing::error;

use crate::{decode_msg, encode_msg, MsgPortal2Server, ReplyServer2Portal, RpcError};

/// The portal's half of the REQ/REP pair. tmq consumes the `RequestSender` on
/// each send and yields it back after the reply, so the socket lives in an
/// `Option` that is taken and restored around each call.
pub struct RpcSendClient {
    rpc_request_sock: Option<RequestSender>,
}

impl RpcSendClient {
    pub fn new(request_sender: RequestSender) -> Self {
        Self {
            rpc_request_sock: Some(request_sender),
        }
    }

    /// Send one portal-to-server message and wait for the server's reply.
    pub async fn make_rpc_call(
        &mut self,
        rpc_msg: MsgPortal2Server,
    ) -> Result<ReplyServer2Portal, RpcError> {
        let payload = encode_msg(&rpc_msg)?;
        let message = Multipart::from(vec![payload]);
        let Some(rpc_request_sock) = self.rpc_request_sock.take() else {
            return Err(RpcError::CouldNotSend(
                "RPC request socket in use".to_string(),
            ));
        };
        let rpc_reply_sock = match rpc_request_sock.send(message).await {
            Ok(rpc_reply_sock) => rpc_reply_sock,
            Err(e) => {
                error!("Unable to send request to server: {}", e);
                return Err(RpcError::CouldNotSend(e.to_string()));
            }
        };

        let (msg, recv_sock) = match rpc_reply_sock.recv().await {
            Ok((msg, recv_sock)) => (msg, recv_sock),
            Err(e) => {
                error!("Unable to receive reply from server: {}", e);
                return Err(RpcError::CouldNotReceive(e.to_string()));
            }
        };

        let reply = decode_msg(&msg[0])?;
        self.rpc_request_sock = Some(recv_sock);
        Ok(reply)
    }
}
