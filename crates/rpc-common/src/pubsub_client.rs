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

use futures_util::StreamExt;
use tmq::subscribe::Subscribe;
use tracing::trace;

use crate::{decode_msg, MsgServer2Portal, RpcError, PORTAL_TOPIC};

/// Receive the next server-to-portal event off the subscribe socket.
/// Messages are two frames: the topic, then the bincode payload.
pub async fn portal_recv(subscribe: &mut Subscribe) -> Result<MsgServer2Portal, RpcError> {
    let Some(Ok(mut inbound)) = subscribe.next().await else {
        return Err(RpcError::CouldNotReceive(
            "Unable to receive portal event".to_string(),
        ));
    };

    trace!(message = ?inbound, "portal_event");
    if inbound.len() != 2 {
        return Err(RpcError::CouldNotDecode(format!(
            "Unexpected message length: {}",
            inbound.len()
        )));
    }

    let Some(topic) = inbound.pop_front() else {
        return Err(RpcError::CouldNotDecode(
            "Unexpected message format".to_string(),
        ));
    };

    if &topic[..] != PORTAL_TOPIC {
        return Err(RpcError::CouldNotDecode(format!(
            "Unexpected topic: {:?}",
            topic
        )));
    }

    let Some(event) = inbound.pop_front() else {
        return Err(RpcError::CouldNotDecode(
            "Unexpected message format".to_string(),
        ));
    };

    decode_msg(event.as_ref())
}
