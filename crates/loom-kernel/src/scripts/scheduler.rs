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

//! The scheduler thread. Fires run to completion one at a time, never
//! interleaved; blocking work has no business in a script hook.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{error, info, warn};

use loom_common::model::ScriptId;
use loom_common::sessions::Session;
use loom_common::{CommitResult, WorldState, WorldStateError, WorldStateSource};

use crate::scripts::{SchedulerClient, SchedulerError, SchedulerMsg};
use crate::typeclass::{HookCtx, ScriptClassRegistry, ScriptFlow};

const VALIDATION_INTERVAL: Duration = Duration::from_secs(60);
/// Fires beyond this are logged, not killed.
const FIRE_BUDGET: Duration = Duration::from_millis(100);

/// How the server is going down, as seen by scripts and hooks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RestartMode {
    /// Server restarts under a live portal. Script rows are all preserved,
    /// paused; validation restarts them on the way back up.
    Reload,
    /// Full restart. Non-persistent scripts are deleted.
    Reset,
    /// Stop without relaunch. Same row semantics as reset.
    Shutdown,
}

#[derive(Eq, PartialEq, Ord, PartialOrd)]
struct FireEntry {
    when: Instant,
    id: ScriptId,
}

pub struct Scheduler {
    control_tx: Sender<SchedulerMsg>,
    control_rx: Receiver<SchedulerMsg>,
    state_source: Arc<dyn WorldStateSource>,
    scripts: Arc<ScriptClassRegistry>,
    session: Arc<dyn Session>,
    /// Min-heap of pending fires. Stale entries (row gone, script inactive)
    /// are discarded at pop time rather than hunted down on stop.
    heap: BinaryHeap<Reverse<FireEntry>>,
}

impl Scheduler {
    pub fn new(
        state_source: Arc<dyn WorldStateSource>,
        scripts: Arc<ScriptClassRegistry>,
        session: Arc<dyn Session>,
    ) -> Self {
        let (control_tx, control_rx) = flume::unbounded();
        Self {
            control_tx,
            control_rx,
            state_source,
            scripts,
            session,
            heap: BinaryHeap::new(),
        }
    }

    pub fn client(&self) -> SchedulerClient {
        SchedulerClient::new(self.control_tx.clone())
    }

    /// The scheduler loop. Owns the thread until a stop message (or the loss
    /// of every client handle) ends it; returns the restart mode for the
    /// daemon to act on.
    pub fn run(mut self) -> Result<RestartMode, SchedulerError> {
        if let Err(e) = self.validate_all() {
            error!(error = %e, "startup script validation failed");
        }
        let mut next_validation = Instant::now() + VALIDATION_INTERVAL;
        loop {
            let now = Instant::now();
            self.fire_due(now);
            if now >= next_validation {
                if let Err(e) = self.validate_all() {
                    error!(error = %e, "periodic script validation failed");
                }
                next_validation = now + VALIDATION_INTERVAL;
            }
            let mut deadline = next_validation;
            if let Some(Reverse(entry)) = self.heap.peek() {
                deadline = deadline.min(entry.when);
            }
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.control_rx.recv_timeout(timeout) {
                Ok(SchedulerMsg::StartScript {
                    id,
                    force_restart,
                    reply,
                }) => {
                    let result = self.do_start(id, force_restart);
                    if reply.send(result).is_err() {
                        warn!(%id, "start reply dropped");
                    }
                }
                Ok(SchedulerMsg::StopScript { id, kill, reply }) => {
                    let result = self.do_stop(id, kill);
                    if reply.send(result).is_err() {
                        warn!(%id, "stop reply dropped");
                    }
                }
                Ok(SchedulerMsg::Validate { reply }) => {
                    let result = self.validate_all();
                    let _ = reply.send(result);
                }
                Ok(SchedulerMsg::Stop { mode, reply }) => {
                    let result = self.apply_restart(mode);
                    let failed = result.is_err();
                    let _ = reply.send(result);
                    if !failed {
                        info!(?mode, "scheduler stopping");
                        return Ok(mode);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("all scheduler clients gone, shutting down");
                    return Ok(RestartMode::Shutdown);
                }
            }
        }
    }

    fn do_start(&mut self, id: ScriptId, force_restart: bool) -> Result<(), SchedulerError> {
        let mut state = self.state_source.new_world_state()?;
        let mut rec = state.script(id)?;
        if rec.is_active && !force_restart {
            state.rollback()?;
            return Ok(());
        }
        rec.is_active = true;
        state.update_script(&rec)?;
        let class = self.scripts.resolve(&rec.typeclass_path);
        {
            let mut ctx = HookCtx {
                state: state.as_mut(),
                session: self.session.as_ref(),
            };
            if let Err(e) = class.at_start(&mut ctx, &rec) {
                warn!(%id, error = %e, "at_start failed");
            }
        }
        commit(state)?;
        if rec.is_repeating() {
            let delay = if rec.start_delay {
                rec.interval
            } else {
                Duration::ZERO
            };
            self.heap.push(Reverse(FireEntry {
                when: Instant::now() + delay,
                id,
            }));
        }
        Ok(())
    }

    fn do_stop(&mut self, id: ScriptId, kill: bool) -> Result<(), SchedulerError> {
        let mut state = self.state_source.new_world_state()?;
        let rec = match state.script(id) {
            Ok(rec) => rec,
            Err(WorldStateError::ScriptNotFound(_)) => {
                state.rollback()?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !kill {
            let class = self.scripts.resolve(&rec.typeclass_path);
            let mut ctx = HookCtx {
                state: state.as_mut(),
                session: self.session.as_ref(),
            };
            if let Err(e) = class.at_stop(&mut ctx, &rec) {
                warn!(%id, error = %e, "at_stop failed");
            }
        }
        state.remove_script(id)?;
        commit(state)?;
        Ok(())
    }

    fn fire_due(&mut self, now: Instant) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.when > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if let Err(e) = self.fire(entry.id) {
                error!(id = %entry.id, error = %e, "script fire failed");
            }
        }
    }

    fn fire(&mut self, id: ScriptId) -> Result<(), SchedulerError> {
        let started = Instant::now();
        let mut state = self.state_source.new_world_state()?;
        let mut rec = match state.script(id) {
            Ok(rec) => rec,
            Err(WorldStateError::ScriptNotFound(_)) => {
                // Stale heap entry for a row stopped in the meantime.
                state.rollback()?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !rec.is_active {
            state.rollback()?;
            return Ok(());
        }
        let class = self.scripts.resolve(&rec.typeclass_path);
        if !class.is_valid(&*state, &rec) {
            state.rollback()?;
            return self.do_stop(id, false);
        }

        let mut stopping = false;
        {
            let mut ctx = HookCtx {
                state: state.as_mut(),
                session: self.session.as_ref(),
            };
            match class.at_repeat(&mut ctx, &rec) {
                Ok(ScriptFlow::Continue) => {}
                Ok(ScriptFlow::Stop) => stopping = true,
                // The script survives its own errors; only the stop sentinel
                // ends it.
                Err(e) => error!(%id, error = %e, "at_repeat failed"),
            }
        }
        if rec.repeats > 0 {
            rec.repeats -= 1;
            if rec.repeats == 0 {
                stopping = true;
            }
            state.update_script(&rec)?;
        }
        if stopping {
            if rec.is_active {
                let mut ctx = HookCtx {
                    state: state.as_mut(),
                    session: self.session.as_ref(),
                };
                if let Err(e) = class.at_stop(&mut ctx, &rec) {
                    warn!(%id, error = %e, "at_stop failed");
                }
            }
            state.remove_script(id)?;
        }
        commit(state)?;

        let elapsed = started.elapsed();
        if elapsed > FIRE_BUDGET {
            warn!(%id, ?elapsed, "script fire exceeded time budget");
        }
        if !stopping && rec.is_repeating() {
            self.heap.push(Reverse(FireEntry {
                when: Instant::now() + rec.interval,
                id,
            }));
        }
        Ok(())
    }

    /// Enumerate all scripts: start the valid-but-inactive, stop the
    /// invalid-but-active.
    fn validate_all(&mut self) -> Result<(), SchedulerError> {
        let state = self.state_source.new_world_state()?;
        let mut to_start = Vec::new();
        let mut to_stop = Vec::new();
        for rec in state.all_scripts()? {
            let class = self.scripts.resolve(&rec.typeclass_path);
            let valid = class.is_valid(&*state, &rec);
            if valid && !rec.is_active {
                to_start.push(rec.id);
            } else if !valid && rec.is_active {
                to_stop.push(rec.id);
            }
        }
        state.rollback()?;
        for id in to_start {
            if let Err(e) = self.do_start(id, false) {
                warn!(%id, error = %e, "validation start failed");
            }
        }
        for id in to_stop {
            if let Err(e) = self.do_stop(id, false) {
                warn!(%id, error = %e, "validation stop failed");
            }
        }
        Ok(())
    }

    /// Apply a restart mode's row semantics: reload pauses everything in
    /// place; reset and shutdown delete the non-persistent rows.
    fn apply_restart(&mut self, mode: RestartMode) -> Result<(), SchedulerError> {
        let mut state = self.state_source.new_world_state()?;
        for mut rec in state.all_scripts()? {
            match mode {
                RestartMode::Reload => {
                    if rec.is_active {
                        rec.is_active = false;
                        state.update_script(&rec)?;
                    }
                }
                RestartMode::Reset | RestartMode::Shutdown => {
                    if rec.persistent {
                        if rec.is_active {
                            rec.is_active = false;
                            state.update_script(&rec)?;
                        }
                    } else {
                        state.remove_script(rec.id)?;
                    }
                }
            }
        }
        commit(state)?;
        self.heap.clear();
        Ok(())
    }
}

fn commit(state: Box<dyn WorldState>) -> Result<(), SchedulerError> {
    match state.commit()? {
        CommitResult::Success => Ok(()),
        CommitResult::ConflictRetry => {
            // The next fire or validation pass observes the winner's state.
            warn!("scheduler commit lost a conflict, skipping");
            Ok(())
        }
    }
}
