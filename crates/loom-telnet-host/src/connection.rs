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

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use eyre::bail;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tmq::subscribe::Subscribe;
use tmq::{request, subscribe};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use loom_common::sessions::{SessionId, SessionRecord};
use rpc_common::{
    portal_recv, MsgPortal2Server, MsgServer2Portal, ReplyServer2Portal, RpcSendClient,
    PORTAL_TOPIC,
};

use crate::codec::EncodedLinesCodec;

/// The portal's authoritative session view, shared with the control task so
/// it can answer server resync requests.
pub type Connections = Arc<Mutex<HashMap<SessionId, SessionRecord>>>;

pub struct TelnetConnection {
    sessid: SessionId,
    write: SplitSink<Framed<TcpStream, EncodedLinesCodec>, String>,
    read: SplitStream<Framed<TcpStream, EncodedLinesCodec>>,
    connections: Connections,
}

impl TelnetConnection {
    async fn run(
        &mut self,
        events_sub: &mut Subscribe,
        rpc_client: &mut RpcSendClient,
    ) -> Result<(), eyre::Error> {
        debug!(sessid = self.sessid, "Entering line loop");
        loop {
            select! {
                line = self.read.next() => {
                    let Some(line) = line else {
                        info!(sessid = self.sessid, "Connection closed by client");
                        return Ok(());
                    };
                    let line = line?;
                    let reply = rpc_client
                        .make_rpc_call(MsgPortal2Server::PLine {
                            sessid: self.sessid,
                            line,
                        })
                        .await?;
                    if let ReplyServer2Portal::Failure(e) = reply {
                        warn!(sessid = self.sessid, error = %e, "server rejected line");
                        bail!("server rejected session");
                    }
                }
                event = portal_recv(events_sub) => {
                    match event? {
                        MsgServer2Portal::SText { sessid, text } if sessid == self.sessid => {
                            self.write.send(text).await?;
                        }
                        MsgServer2Portal::SLogin { sessid, record } if sessid == self.sessid => {
                            self.connections
                                .lock()
                                .unwrap()
                                .insert(self.sessid, record);
                        }
                        MsgServer2Portal::SDisconn { sessid, reason } if sessid == self.sessid => {
                            let _ = self.write.send(reason).await;
                            let _ = self.write.close().await;
                            return Ok(());
                        }
                        MsgServer2Portal::SDisconnAll { reason } => {
                            let _ = self.write.send(reason).await;
                            let _ = self.write.close().await;
                            return Ok(());
                        }
                        // Resync and ping are the control task's business;
                        // everything else is someone else's session.
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Accept loop: one task per telnet connection, each with its own RPC pair
/// and topic subscription. The portal outlives server restarts; connections
/// notice nothing beyond a pause.
pub async fn listen_loop(
    telnet_sockaddr: SocketAddr,
    rpc_address: &str,
    events_address: &str,
    connections: Connections,
    next_session: Arc<AtomicU64>,
) -> Result<(), eyre::Error> {
    let listener = TcpListener::bind(telnet_sockaddr).await?;
    let zmq_ctx = tmq::Context::new();

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let zmq_ctx = zmq_ctx.clone();
        let rpc_address = rpc_address.to_string();
        let events_address = events_address.to_string();
        let connections = connections.clone();
        let sessid = next_session.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(
                zmq_ctx,
                stream,
                peer_addr,
                &rpc_address,
                &events_address,
                connections,
                sessid,
            )
            .await
            {
                error!(sessid, error = %e, "connection task failed");
            }
        });
    }
}

async fn handle_connection(
    zmq_ctx: tmq::Context,
    stream: TcpStream,
    peer_addr: SocketAddr,
    rpc_address: &str,
    events_address: &str,
    connections: Connections,
    sessid: SessionId,
) -> Result<(), eyre::Error> {
    info!(?peer_addr, sessid, "Accepted connection");

    let rpc_request_sock = request(&zmq_ctx)
        .set_rcvtimeo(100)
        .set_sndtimeo(100)
        .connect(rpc_address)?;
    let mut rpc_client = RpcSendClient::new(rpc_request_sock);

    // Subscribe before announcing ourselves so the login banner is not lost.
    let mut events_sub = subscribe(&zmq_ctx)
        .connect(events_address)?
        .subscribe(PORTAL_TOPIC)?;

    let record = SessionRecord::new(sessid, &peer_addr.to_string());
    connections.lock().unwrap().insert(sessid, record.clone());
    let encoding = record.encoding.clone();
    match rpc_client
        .make_rpc_call(MsgPortal2Server::PConn { record })
        .await?
    {
        ReplyServer2Portal::Ack => {}
        ReplyServer2Portal::Failure(e) => {
            connections.lock().unwrap().remove(&sessid);
            bail!("server refused connection: {e}");
        }
    }

    let framed_stream = Framed::new(stream, EncodedLinesCodec::for_label(&encoding));
    let (write, read) = framed_stream.split();
    let mut connection = TelnetConnection {
        sessid,
        write,
        read,
        connections: connections.clone(),
    };

    let result = connection.run(&mut events_sub, &mut rpc_client).await;

    connections.lock().unwrap().remove(&sessid);
    if let Err(e) = rpc_client
        .make_rpc_call(MsgPortal2Server::PDisconn {
            sessid,
            reason: "Connection closed.".to_string(),
        })
        .await
    {
        warn!(sessid, error = %e, "failed to announce disconnect");
    }
    result
}
