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

//! Behavior decoration. An [`ObjectRecord`] is the identity; a [`Typeclass`]
//! is the per-process behavior fused onto it by `typeclass_path` through the
//! registry. Hooks have default implementations so a typeclass overrides only
//! what it cares about. Hook errors are logged by the callers and never
//! propagate.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use loom_common::cmdset::CommandError;
use loom_common::model::{Dbref, ObjectRecord, ScriptRecord};
use loom_common::sessions::{Session, SessionId};
use loom_common::WorldState;

pub type HookResult = Result<(), CommandError>;

/// What a hook wants done about the mutation it is guarding.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MoveFlow {
    Continue,
    Cancel,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeleteFlow {
    Continue,
    Cancel,
}

/// Returned from `at_repeat`; `Stop` is how a script fire requests its own
/// termination.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScriptFlow {
    Continue,
    Stop,
}

/// What hooks get to work with.
pub struct HookCtx<'a> {
    pub state: &'a mut dyn WorldState,
    pub session: &'a dyn Session,
}

/// Display name with a neutral fallback for broken references, so
/// announcement hooks never fail on a half-deleted neighbor.
pub fn display_name(state: &dyn WorldState, obj: Dbref) -> String {
    state
        .object(obj)
        .map(|rec| rec.key)
        .unwrap_or_else(|_| "something".to_string())
}

/// The fixed lifecycle hook set. Every hook has a no-op (or minimal) default.
#[allow(unused_variables)]
pub trait Typeclass: Send + Sync {
    /// Fired exactly once, right after the record is first stored.
    fn at_object_creation(&self, ctx: &mut HookCtx<'_>, obj: Dbref) -> HookResult {
        Ok(())
    }

    /// Fired whenever the record is decorated into a live object.
    fn at_init(&self, ctx: &mut HookCtx<'_>, obj: Dbref) -> HookResult {
        Ok(())
    }

    fn at_pre_login(&self, ctx: &mut HookCtx<'_>, obj: Dbref, sessid: SessionId) -> HookResult {
        Ok(())
    }

    fn at_first_login(&self, ctx: &mut HookCtx<'_>, obj: Dbref, sessid: SessionId) -> HookResult {
        Ok(())
    }

    fn at_post_login(&self, ctx: &mut HookCtx<'_>, obj: Dbref, sessid: SessionId) -> HookResult {
        Ok(())
    }

    fn at_disconnect(&self, ctx: &mut HookCtx<'_>, obj: Dbref) -> HookResult {
        Ok(())
    }

    /// May cancel the move; runs before any side effect.
    fn at_before_move(
        &self,
        ctx: &mut HookCtx<'_>,
        obj: Dbref,
        target: Dbref,
    ) -> Result<MoveFlow, CommandError> {
        Ok(MoveFlow::Continue)
    }

    /// Runs in the current location, before relocation.
    fn announce_move_from(&self, ctx: &mut HookCtx<'_>, obj: Dbref, target: Dbref) -> HookResult {
        let Some(source) = ctx.state.object(obj)?.location else {
            return Ok(());
        };
        let msg = format!("{} leaves.", display_name(ctx.state, obj));
        ctx.session.send_to_room(source, &msg, &[obj])?;
        Ok(())
    }

    /// Runs in the new location, after relocation.
    fn announce_move_to(
        &self,
        ctx: &mut HookCtx<'_>,
        obj: Dbref,
        source: Option<Dbref>,
    ) -> HookResult {
        let Some(target) = ctx.state.object(obj)?.location else {
            return Ok(());
        };
        let msg = format!("{} arrives.", display_name(ctx.state, obj));
        ctx.session.send_to_room(target, &msg, &[obj])?;
        Ok(())
    }

    fn at_after_move(&self, ctx: &mut HookCtx<'_>, obj: Dbref, source: Option<Dbref>) -> HookResult {
        Ok(())
    }

    /// Fired on the container an object is leaving.
    fn at_object_leave(&self, ctx: &mut HookCtx<'_>, container: Dbref, moved: Dbref) -> HookResult {
        Ok(())
    }

    /// Fired on the container an object just arrived in.
    fn at_object_receive(
        &self,
        ctx: &mut HookCtx<'_>,
        container: Dbref,
        moved: Dbref,
        source: Option<Dbref>,
    ) -> HookResult {
        Ok(())
    }

    /// May cancel the hard delete.
    fn at_object_delete(
        &self,
        ctx: &mut HookCtx<'_>,
        obj: Dbref,
    ) -> Result<DeleteFlow, CommandError> {
        Ok(DeleteFlow::Continue)
    }

    fn at_desc(&self, ctx: &mut HookCtx<'_>, obj: Dbref, looker: Dbref) -> HookResult {
        Ok(())
    }

    /// The text a looker sees. The default is the key, the `desc` attribute
    /// when present, and the visible contents.
    fn return_appearance(
        &self,
        ctx: &mut HookCtx<'_>,
        obj: Dbref,
        looker: Dbref,
    ) -> Result<String, CommandError> {
        let rec = ctx.state.object(obj)?;
        let mut out = rec.key.clone();
        if let Some(desc) = ctx.state.attr(obj, "desc")? {
            if let Some(text) = desc.as_str() {
                out.push('\n');
                out.push_str(text);
            }
        }
        let contents: Vec<String> = ctx
            .state
            .contents(obj)?
            .into_iter()
            .filter(|&c| c != looker)
            .filter_map(|c| ctx.state.object(c).ok())
            .filter(|rec| !rec.going && !rec.is_exit())
            .map(|rec| rec.key)
            .collect();
        if !contents.is_empty() {
            out.push_str("\nYou see: ");
            out.push_str(&contents.join(", "));
        }
        Ok(out)
    }

    fn at_server_reload(&self, ctx: &mut HookCtx<'_>, obj: Dbref) -> HookResult {
        Ok(())
    }

    fn at_server_shutdown(&self, ctx: &mut HookCtx<'_>, obj: Dbref) -> HookResult {
        Ok(())
    }
}

/// The plainest possible behavior; also the registry fallback.
pub struct BaseTypeclass;

impl Typeclass for BaseTypeclass {}

/// Maps `typeclass_path` to behavior. Explicitly constructed and passed in;
/// never process-global.
pub struct TypeclassRegistry {
    classes: HashMap<String, Arc<dyn Typeclass>>,
    fallback: Arc<dyn Typeclass>,
}

impl TypeclassRegistry {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
            fallback: Arc::new(BaseTypeclass),
        }
    }

    pub fn register(&mut self, path: &str, class: Arc<dyn Typeclass>) {
        self.classes.insert(path.to_string(), class);
    }

    /// Unknown paths decorate with the base class so a stale record still
    /// behaves.
    pub fn resolve(&self, path: &str) -> Arc<dyn Typeclass> {
        match self.classes.get(path) {
            Some(class) => class.clone(),
            None => {
                if !path.is_empty() {
                    warn!(typeclass = path, "unknown typeclass path, using base");
                }
                self.fallback.clone()
            }
        }
    }

    pub fn resolve_for(&self, rec: &ObjectRecord) -> Arc<dyn Typeclass> {
        self.resolve(&rec.typeclass_path)
    }
}

impl Default for TypeclassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Script-side hook set, decorating [`ScriptRecord`]s the same way.
#[allow(unused_variables)]
pub trait ScriptClass: Send + Sync {
    fn at_script_creation(&self, ctx: &mut HookCtx<'_>, script: &ScriptRecord) -> HookResult {
        Ok(())
    }

    fn at_start(&self, ctx: &mut HookCtx<'_>, script: &ScriptRecord) -> HookResult {
        Ok(())
    }

    fn at_repeat(
        &self,
        ctx: &mut HookCtx<'_>,
        script: &ScriptRecord,
    ) -> Result<ScriptFlow, CommandError> {
        Ok(ScriptFlow::Continue)
    }

    fn at_stop(&self, ctx: &mut HookCtx<'_>, script: &ScriptRecord) -> HookResult {
        Ok(())
    }

    /// Pre-fire gate; false stops the script. The default holds as long as
    /// the attached object is alive (and always, for global scripts).
    fn is_valid(&self, state: &dyn WorldState, script: &ScriptRecord) -> bool {
        match script.obj {
            Some(obj) => state
                .object(obj)
                .map(|rec| !rec.going)
                .unwrap_or(false),
            None => true,
        }
    }
}

pub struct BaseScriptClass;

impl ScriptClass for BaseScriptClass {}

pub struct ScriptClassRegistry {
    classes: HashMap<String, Arc<dyn ScriptClass>>,
    fallback: Arc<dyn ScriptClass>,
}

impl ScriptClassRegistry {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
            fallback: Arc::new(BaseScriptClass),
        }
    }

    pub fn register(&mut self, path: &str, class: Arc<dyn ScriptClass>) {
        self.classes.insert(path.to_string(), class);
    }

    pub fn resolve(&self, path: &str) -> Arc<dyn ScriptClass> {
        match self.classes.get(path) {
            Some(class) => class.clone(),
            None => self.fallback.clone(),
        }
    }
}

impl Default for ScriptClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
