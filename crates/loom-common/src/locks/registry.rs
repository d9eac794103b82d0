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

use crate::locks::eval::LockCtx;
use crate::locks::{LockCall, LockError};
use crate::model::{AttrValue, Dbref};

/// A lock function: (accessing entity, accessed object, call args) -> bool.
/// Errors are treated as `false` for the term at evaluation time; they never
/// abort the rest of the expression.
pub type LockFn = fn(&LockCtx<'_>, &LockCall) -> Result<bool, LockError>;

/// Explicit name -> function registry, passed in wherever locks are added or
/// checked. There is no process-global table.
pub struct LockFuncRegistry {
    funcs: HashMap<String, LockFn>,
}

impl LockFuncRegistry {
    pub fn empty() -> Self {
        Self {
            funcs: HashMap::new(),
        }
    }

    /// The built-in lock functions every deployment gets.
    pub fn core() -> Self {
        let mut registry = Self::empty();
        registry.register("all", lock_all);
        registry.register("none", lock_none);
        registry.register("true", lock_all);
        registry.register("false", lock_none);
        registry.register("id", lock_id);
        registry.register("perm", lock_perm);
        registry.register("pperm", lock_pperm);
        registry.register("holds", lock_holds);
        registry.register("attr", lock_attr);
        registry.register("superuser", lock_superuser);
        registry
    }

    pub fn register(&mut self, name: &str, f: LockFn) {
        self.funcs.insert(name.to_lowercase(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<LockFn> {
        self.funcs.get(&name.to_lowercase()).copied()
    }
}

fn lock_all(_ctx: &LockCtx<'_>, _call: &LockCall) -> Result<bool, LockError> {
    Ok(true)
}

fn lock_none(_ctx: &LockCtx<'_>, _call: &LockCall) -> Result<bool, LockError> {
    Ok(false)
}

/// `id(#N)`: the accessing object is exactly #N.
fn lock_id(ctx: &LockCtx<'_>, call: &LockCall) -> Result<bool, LockError> {
    let arg = one_arg(call)?;
    let target: Dbref = arg
        .parse()
        .map_err(|_| LockError::BadLockArg(call.func.clone(), arg.to_string()))?;
    Ok(ctx.accessing_obj.map(|o| o.dbref) == Some(target))
}

/// `perm(Token)`: the accessing entity carries the permission token, or a
/// higher one in the configured hierarchy. Object and account permissions
/// both count.
fn lock_perm(ctx: &LockCtx<'_>, call: &LockCall) -> Result<bool, LockError> {
    let token = one_arg(call)?;
    let mut held = vec![];
    if let Some(obj) = ctx.accessing_obj {
        held.extend(obj.permissions.iter().cloned());
    }
    if let Some(player) = ctx.accessing_player {
        held.extend(player.permissions.iter().cloned());
    }
    Ok(ctx.satisfies_perm(&held, token))
}

/// `pperm(Token)`: like `perm`, but only account-level permissions count.
fn lock_pperm(ctx: &LockCtx<'_>, call: &LockCall) -> Result<bool, LockError> {
    let token = one_arg(call)?;
    let Some(player) = ctx.accessing_player else {
        return Ok(false);
    };
    Ok(ctx.satisfies_perm(&player.permissions, token))
}

/// `holds(name)`: the accessing object carries an object matching `name`.
fn lock_holds(ctx: &LockCtx<'_>, call: &LockCall) -> Result<bool, LockError> {
    let name = one_arg(call)?;
    let Some(obj) = ctx.accessing_obj else {
        return Ok(false);
    };
    let contents = ctx
        .state
        .contents(obj.dbref)
        .map_err(|e| LockError::BadLockArg(call.func.clone(), e.to_string()))?;
    for dbref in contents {
        let Ok(record) = ctx.state.object(dbref) else {
            continue;
        };
        if record.name_matches(name) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `attr(key)` / `attr(key, value=x)`: the accessing object has the
/// attribute, optionally with the given (string-compared) value.
fn lock_attr(ctx: &LockCtx<'_>, call: &LockCall) -> Result<bool, LockError> {
    let key = one_arg(call)?;
    let Some(obj) = ctx.accessing_obj else {
        return Ok(false);
    };
    let value = ctx
        .state
        .attr(obj.dbref, key)
        .map_err(|e| LockError::BadLockArg(call.func.clone(), e.to_string()))?;
    let Some(value) = value else {
        return Ok(false);
    };
    let Some((_, expected)) = call.kwargs.iter().find(|(k, _)| k == "value") else {
        return Ok(true);
    };
    let actual = match value {
        AttrValue::Str(s) => s,
        AttrValue::Int(n) => n.to_string(),
        AttrValue::Float(n) => n.to_string(),
        AttrValue::Bool(b) => b.to_string(),
        AttrValue::Obj(dbref) => dbref.to_string(),
        other => format!("{other:?}"),
    };
    Ok(&actual == expected)
}

/// `superuser()`: the accessing account is a superuser. Where the normal
/// bypass is opted out with `no_superuser_bypass`, this still lets lock
/// strings grant superusers access explicitly.
fn lock_superuser(ctx: &LockCtx<'_>, _call: &LockCall) -> Result<bool, LockError> {
    Ok(ctx.accessing_player.map(|p| p.superuser).unwrap_or(false))
}

fn one_arg(call: &LockCall) -> Result<&str, LockError> {
    call.args
        .first()
        .map(|s| s.as_str())
        .ok_or_else(|| LockError::BadLockArg(call.func.clone(), "missing argument".to_string()))
}
