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

use std::time::Duration;

use flume::Sender;

use loom_common::model::ScriptId;

use crate::scripts::scheduler::RestartMode;
use crate::scripts::{SchedulerError, SchedulerMsg};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A handle for talking to the scheduler thread from the outside world: the
/// daemon control loop, commands, tests. Cheap to clone.
#[derive(Clone)]
pub struct SchedulerClient {
    scheduler_sender: Sender<SchedulerMsg>,
}

impl SchedulerClient {
    pub(crate) fn new(scheduler_sender: Sender<SchedulerMsg>) -> Self {
        Self { scheduler_sender }
    }

    fn request(
        &self,
        msg: impl FnOnce(oneshot::Sender<Result<(), SchedulerError>>) -> SchedulerMsg,
    ) -> Result<(), SchedulerError> {
        let (reply, receive) = oneshot::channel();
        self.scheduler_sender
            .send(msg(reply))
            .map_err(|_| SchedulerError::SchedulerNotResponding)?;
        receive
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| SchedulerError::SchedulerNotResponding)?
    }

    /// Activate a script and begin its timer. Already-active scripts are left
    /// alone unless `force_restart`.
    pub fn start_script(&self, id: ScriptId, force_restart: bool) -> Result<(), SchedulerError> {
        self.request(|reply| SchedulerMsg::StartScript {
            id,
            force_restart,
            reply,
        })
    }

    /// Cancel a script's timer and delete its row. `kill` skips the `at_stop`
    /// hook.
    pub fn stop_script(&self, id: ScriptId, kill: bool) -> Result<(), SchedulerError> {
        self.request(|reply| SchedulerMsg::StopScript { id, kill, reply })
    }

    /// Run a validation pass now rather than waiting for the periodic one.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.request(|reply| SchedulerMsg::Validate { reply })
    }

    /// Wind the scheduler down. The thread applies the mode's row semantics
    /// and its `run` returns the mode.
    pub fn stop(&self, mode: RestartMode) -> Result<(), SchedulerError> {
        self.request(|reply| SchedulerMsg::Stop { mode, reply })
    }
}
