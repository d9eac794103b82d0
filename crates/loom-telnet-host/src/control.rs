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

use std::time::SystemTime;

use tmq::{request, subscribe};
use tracing::{info, warn};

use rpc_common::{
    portal_recv, MsgPortal2Server, MsgServer2Portal, RpcSendClient, PORTAL_TOPIC,
};

use crate::connection::Connections;

/// Portal-wide control traffic: resync requests after a server reload, and
/// liveness pings. Runs for the life of the portal on its own RPC pair.
pub async fn control_loop(
    rpc_address: &str,
    events_address: &str,
    connections: Connections,
) -> Result<(), eyre::Error> {
    let zmq_ctx = tmq::Context::new();
    let rpc_request_sock = request(&zmq_ctx)
        .set_rcvtimeo(100)
        .set_sndtimeo(100)
        .connect(rpc_address)?;
    let mut rpc_client = RpcSendClient::new(rpc_request_sock);

    let mut events_sub = subscribe(&zmq_ctx)
        .connect(events_address)?
        .subscribe(PORTAL_TOPIC)?;

    loop {
        match portal_recv(&mut events_sub).await? {
            MsgServer2Portal::SSync => {
                let records: Vec<_> =
                    connections.lock().unwrap().values().cloned().collect();
                info!(count = records.len(), "server requested resync");
                if let Err(e) = rpc_client
                    .make_rpc_call(MsgPortal2Server::PSync { records })
                    .await
                {
                    warn!(error = %e, "resync failed");
                }
            }
            MsgServer2Portal::SPing { timestamp } => {
                let _ = timestamp;
                if let Err(e) = rpc_client
                    .make_rpc_call(MsgPortal2Server::PPong {
                        timestamp: SystemTime::now(),
                    })
                    .await
                {
                    warn!(error = %e, "pong failed");
                }
            }
            // Per-session traffic is handled by the connection tasks.
            _ => {}
        }
    }
}
