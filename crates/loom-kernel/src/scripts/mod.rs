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

//! The script/ticker engine. A dedicated thread owns the deadline heap and
//! all script mutation; everything else talks to it through a
//! [`SchedulerClient`] over a control channel.

use thiserror::Error;

use loom_common::model::ScriptId;
use loom_common::WorldStateError;

mod scheduler;
mod scheduler_client;

pub use scheduler::{RestartMode, Scheduler};
pub use scheduler_client::SchedulerClient;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler thread is gone or too busy to answer within the client
    /// timeout.
    #[error("Scheduler is not responding")]
    SchedulerNotResponding,
    #[error("World state failure in scheduler: {0}")]
    WorldState(#[from] WorldStateError),
}

/// Control messages from clients to the scheduler thread. Every request
/// carries a reply pipe; the thread is the only place script rows mutate.
pub(crate) enum SchedulerMsg {
    StartScript {
        id: ScriptId,
        force_restart: bool,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    StopScript {
        id: ScriptId,
        kill: bool,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Validate {
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Stop {
        mode: RestartMode,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
}
