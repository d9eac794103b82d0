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

use std::sync::{Arc, RwLock};

use loom_common::model::WorldStateError;
use loom_common::{WorldState, WorldStateSource};

use crate::world_tx::{NoopSink, WorldImage, WorldTx};

/// An in-memory world with no durability. Used by tests and by ephemeral
/// worlds that are rebuilt from scratch on every start.
pub struct TransientStore {
    image: Arc<RwLock<WorldImage>>,
}

impl TransientStore {
    pub fn new() -> Self {
        Self {
            image: Arc::new(RwLock::new(WorldImage::default())),
        }
    }
}

impl Default for TransientStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldStateSource for TransientStore {
    fn new_world_state(&self) -> Result<Box<dyn WorldState>, WorldStateError> {
        Ok(Box::new(WorldTx::begin(
            self.image.clone(),
            Arc::new(NoopSink),
        )?))
    }

    fn checkpoint(&self) -> Result<(), WorldStateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_common::model::{CommitResult, Dbref, ObjectRecord};

    #[test]
    fn test_source_transactions_share_one_world() {
        let source = TransientStore::new();
        let mut tx = source.new_world_state().unwrap();
        let obj = tx
            .create_object(ObjectRecord::new(Dbref(0), "room", "core.Room"))
            .unwrap();
        assert_eq!(tx.commit().unwrap(), CommitResult::Success);

        let tx = source.new_world_state().unwrap();
        assert!(tx.object_exists(obj).unwrap());
    }
}
