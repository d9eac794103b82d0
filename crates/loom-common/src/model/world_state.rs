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

use bincode::{Decode, Encode};
use serde::Serialize;
use thiserror::Error;

use crate::model::attrs::{AttrEntry, AttrValue};
use crate::model::objects::{Dbref, ObjectRecord};
use crate::model::player::{PlayerId, PlayerRecord};
use crate::model::scripts::{ScriptId, ScriptRecord};

/// The result code from a commit operation on the world's state.
#[derive(Debug, Eq, PartialEq)]
pub enum CommitResult {
    Success,
    /// Not committed due to conflict; caller should abort and retry.
    ConflictRetry,
}

#[derive(Debug, Error, Clone, PartialEq, Encode, Decode, Serialize)]
pub enum WorldStateError {
    #[error("Object not found: {0}")]
    ObjectNotFound(Dbref),
    #[error("Player not found: {0}")]
    PlayerNotFound(String),
    #[error("Script not found: {0}")]
    ScriptNotFound(ScriptId),
    #[error("Invalid move of {0} to {1}")]
    InvalidMove(Dbref, Dbref),
    #[error("Recursive move of {0} into {1}")]
    RecursiveMove(Dbref, Dbref),
    #[error("Duplicate player name: {0}")]
    DuplicatePlayerName(String),
    #[error("Failure in storage layer: {0}")]
    StorageError(String),
}

/// A transactional view onto the world: objects, their attributes, player
/// accounts, and script rows. Obtained from a [`WorldStateSource`]; every
/// batch of mutations either commits atomically or is rolled back whole, so a
/// failure mid-operation cannot leave the model invariants violated.
///
/// Implementations live in the db crate. The kernel's world facade wraps this
/// with the model-level operations (move, delete cascade, search) so hooks
/// fire deterministically.
pub trait WorldState: Send {
    // Objects.

    /// Allocate a dbref and insert the record with it. The caller's `dbref`
    /// field is ignored.
    fn create_object(&mut self, record: ObjectRecord) -> Result<Dbref, WorldStateError>;
    fn object(&self, obj: Dbref) -> Result<ObjectRecord, WorldStateError>;
    fn object_exists(&self, obj: Dbref) -> Result<bool, WorldStateError>;
    fn update_object(&mut self, record: &ObjectRecord) -> Result<(), WorldStateError>;
    /// Remove the row only; cascades are the world facade's business.
    fn remove_object(&mut self, obj: Dbref) -> Result<(), WorldStateError>;
    /// All objects whose `location` is `obj`.
    fn contents(&self, obj: Dbref) -> Result<Vec<Dbref>, WorldStateError>;
    /// Contents with a non-null destination.
    fn exits_of(&self, obj: Dbref) -> Result<Vec<Dbref>, WorldStateError>;
    /// All objects whose `destination` is `obj` (inbound exits, for the
    /// delete cascade).
    fn exits_to(&self, obj: Dbref) -> Result<Vec<Dbref>, WorldStateError>;
    fn all_objects(&self) -> Result<Vec<Dbref>, WorldStateError>;

    // Attributes. Keys are case-insensitive; the store holds them case-folded.

    fn attr(&self, obj: Dbref, key: &str) -> Result<Option<AttrValue>, WorldStateError>;
    fn attr_entry(&self, obj: Dbref, key: &str) -> Result<Option<AttrEntry>, WorldStateError>;
    /// `None` value deletes the row.
    fn set_attr(
        &mut self,
        obj: Dbref,
        key: &str,
        value: Option<AttrValue>,
    ) -> Result<(), WorldStateError>;
    fn set_attr_entry(&mut self, obj: Dbref, entry: AttrEntry) -> Result<(), WorldStateError>;
    fn has_attr(&self, obj: Dbref, key: &str) -> Result<bool, WorldStateError>;
    fn attr_entries(&self, obj: Dbref) -> Result<Vec<AttrEntry>, WorldStateError>;
    /// Cascade: removes every attribute row on the object.
    fn clear_attrs(&mut self, obj: Dbref) -> Result<(), WorldStateError>;

    // Players.

    fn create_player(&mut self, record: PlayerRecord) -> Result<PlayerId, WorldStateError>;
    fn player(&self, id: PlayerId) -> Result<PlayerRecord, WorldStateError>;
    fn player_by_name(&self, username: &str) -> Result<Option<PlayerRecord>, WorldStateError>;
    fn update_player(&mut self, record: &PlayerRecord) -> Result<(), WorldStateError>;

    // Scripts.

    fn create_script(&mut self, record: ScriptRecord) -> Result<ScriptId, WorldStateError>;
    fn script(&self, id: ScriptId) -> Result<ScriptRecord, WorldStateError>;
    fn update_script(&mut self, record: &ScriptRecord) -> Result<(), WorldStateError>;
    fn remove_script(&mut self, id: ScriptId) -> Result<(), WorldStateError>;
    fn all_scripts(&self) -> Result<Vec<ScriptRecord>, WorldStateError>;
    fn scripts_on(&self, obj: Dbref) -> Result<Vec<ScriptRecord>, WorldStateError>;

    // Transaction boundary.

    fn commit(self: Box<Self>) -> Result<CommitResult, WorldStateError>;
    fn rollback(self: Box<Self>) -> Result<(), WorldStateError>;
}

/// A factory for transactional world states, implemented by each storage
/// backend.
pub trait WorldStateSource: Send + Sync {
    fn new_world_state(&self) -> Result<Box<dyn WorldState>, WorldStateError>;
    /// Flush durable state. A no-op for transient stores.
    fn checkpoint(&self) -> Result<(), WorldStateError>;
}

/// A world state that panics on any access, for tests of code that takes a
/// `&dyn WorldState` but must never actually consult it.
#[cfg(test)]
pub(crate) struct PanicState;

#[cfg(test)]
impl WorldState for PanicState {
    fn create_object(&mut self, _: ObjectRecord) -> Result<Dbref, WorldStateError> {
        unimplemented!()
    }
    fn object(&self, _: Dbref) -> Result<ObjectRecord, WorldStateError> {
        unimplemented!()
    }
    fn object_exists(&self, _: Dbref) -> Result<bool, WorldStateError> {
        unimplemented!()
    }
    fn update_object(&mut self, _: &ObjectRecord) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn remove_object(&mut self, _: Dbref) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn contents(&self, _: Dbref) -> Result<Vec<Dbref>, WorldStateError> {
        unimplemented!()
    }
    fn exits_of(&self, _: Dbref) -> Result<Vec<Dbref>, WorldStateError> {
        unimplemented!()
    }
    fn exits_to(&self, _: Dbref) -> Result<Vec<Dbref>, WorldStateError> {
        unimplemented!()
    }
    fn all_objects(&self) -> Result<Vec<Dbref>, WorldStateError> {
        unimplemented!()
    }
    fn attr(&self, _: Dbref, _: &str) -> Result<Option<AttrValue>, WorldStateError> {
        unimplemented!()
    }
    fn attr_entry(&self, _: Dbref, _: &str) -> Result<Option<AttrEntry>, WorldStateError> {
        unimplemented!()
    }
    fn set_attr(
        &mut self,
        _: Dbref,
        _: &str,
        _: Option<AttrValue>,
    ) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn set_attr_entry(&mut self, _: Dbref, _: AttrEntry) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn has_attr(&self, _: Dbref, _: &str) -> Result<bool, WorldStateError> {
        unimplemented!()
    }
    fn attr_entries(&self, _: Dbref) -> Result<Vec<AttrEntry>, WorldStateError> {
        unimplemented!()
    }
    fn clear_attrs(&mut self, _: Dbref) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn create_player(&mut self, _: PlayerRecord) -> Result<PlayerId, WorldStateError> {
        unimplemented!()
    }
    fn player(&self, _: PlayerId) -> Result<PlayerRecord, WorldStateError> {
        unimplemented!()
    }
    fn player_by_name(&self, _: &str) -> Result<Option<PlayerRecord>, WorldStateError> {
        unimplemented!()
    }
    fn update_player(&mut self, _: &PlayerRecord) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn create_script(&mut self, _: ScriptRecord) -> Result<ScriptId, WorldStateError> {
        unimplemented!()
    }
    fn script(&self, _: ScriptId) -> Result<ScriptRecord, WorldStateError> {
        unimplemented!()
    }
    fn update_script(&mut self, _: &ScriptRecord) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn remove_script(&mut self, _: ScriptId) -> Result<(), WorldStateError> {
        unimplemented!()
    }
    fn all_scripts(&self) -> Result<Vec<ScriptRecord>, WorldStateError> {
        unimplemented!()
    }
    fn scripts_on(&self, _: Dbref) -> Result<Vec<ScriptRecord>, WorldStateError> {
        unimplemented!()
    }
    fn commit(self: Box<Self>) -> Result<CommitResult, WorldStateError> {
        unimplemented!()
    }
    fn rollback(self: Box<Self>) -> Result<(), WorldStateError> {
        unimplemented!()
    }
}
