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

//! Durable world storage on a fjall keyspace. The full image is loaded at
//! open and kept in memory; committed transactions write their dirty rows
//! through to the partitions.

use std::path::Path;
use std::sync::{Arc, RwLock};

use bincode::config::Configuration;
use bincode::{Decode, Encode};
use fjall::{PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::info;

use loom_common::model::{
    AttrEntry, Dbref, ObjectRecord, PlayerId, PlayerRecord, ScriptId, ScriptRecord,
    WorldStateError,
};
use loom_common::{WorldState, WorldStateSource};

use crate::world_tx::{Dirty, DurableSink, WorldImage, WorldTx};

const ENCODING_CONFIG: Configuration = bincode::config::standard();

const COUNTERS_KEY: &[u8] = b"counters";

pub struct FjallStore {
    keyspace: fjall::Keyspace,
    image: Arc<RwLock<WorldImage>>,
    sink: Arc<FjallSink>,
}

struct FjallSink {
    objects: PartitionHandle,
    attrs: PartitionHandle,
    players: PartitionHandle,
    scripts: PartitionHandle,
    sequences: PartitionHandle,
}

fn storage_err(e: impl std::fmt::Display) -> WorldStateError {
    WorldStateError::StorageError(e.to_string())
}

fn encode_row<T: Encode>(row: &T) -> Result<Vec<u8>, WorldStateError> {
    bincode::encode_to_vec(row, ENCODING_CONFIG).map_err(storage_err)
}

fn decode_row<T: Decode<()>>(bytes: &[u8]) -> Result<T, WorldStateError> {
    let (row, _) = bincode::decode_from_slice(bytes, ENCODING_CONFIG).map_err(storage_err)?;
    Ok(row)
}

fn attr_row_key(obj: Dbref, key: &str) -> Vec<u8> {
    let mut row_key = Vec::with_capacity(8 + key.len());
    row_key.extend_from_slice(&obj.id().to_be_bytes());
    row_key.extend_from_slice(key.as_bytes());
    row_key
}

impl FjallStore {
    pub fn open(path: &Path) -> Result<Self, WorldStateError> {
        let keyspace = fjall::Config::new(path).open().map_err(storage_err)?;
        let partition = |name: &str| {
            keyspace
                .open_partition(name, PartitionCreateOptions::default())
                .map_err(storage_err)
        };
        let sink = FjallSink {
            objects: partition("objects")?,
            attrs: partition("attrs")?,
            players: partition("players")?,
            scripts: partition("scripts")?,
            sequences: partition("sequences")?,
        };
        let image = Self::load(&sink)?;
        info!(
            path = %path.display(),
            objects = image.objects.len(),
            players = image.players.len(),
            scripts = image.scripts.len(),
            "world database opened"
        );
        Ok(Self {
            keyspace,
            image: Arc::new(RwLock::new(image)),
            sink: Arc::new(sink),
        })
    }

    fn load(sink: &FjallSink) -> Result<WorldImage, WorldStateError> {
        let mut image = WorldImage::default();
        for entry in sink.objects.iter() {
            let (_, value) = entry.map_err(storage_err)?;
            let record: ObjectRecord = decode_row(&value)?;
            image.objects.insert(record.dbref, record);
        }
        for entry in sink.attrs.iter() {
            let (key, value) = entry.map_err(storage_err)?;
            if key.len() < 8 {
                return Err(WorldStateError::StorageError(
                    "truncated attribute row key".to_string(),
                ));
            }
            let obj = Dbref(i64::from_be_bytes(key[0..8].try_into().unwrap()));
            let entry: AttrEntry = decode_row(&value)?;
            image.attrs.insert((obj, entry.key.clone()), entry);
        }
        for entry in sink.players.iter() {
            let (_, value) = entry.map_err(storage_err)?;
            let record: PlayerRecord = decode_row(&value)?;
            image.players.insert(record.id, record);
        }
        for entry in sink.scripts.iter() {
            let (_, value) = entry.map_err(storage_err)?;
            let record: ScriptRecord = decode_row(&value)?;
            image.scripts.insert(record.id, record);
        }
        if let Some(counters) = sink.sequences.get(COUNTERS_KEY).map_err(storage_err)? {
            let (next_dbref, next_player, next_script): (i64, i64, u64) = decode_row(&counters)?;
            image.next_dbref = next_dbref;
            image.next_player = next_player;
            image.next_script = next_script;
        }
        // Counters lag the rows by one commit at most; never hand out a
        // dbref that is already taken.
        for dbref in image.objects.keys() {
            image.next_dbref = image.next_dbref.max(dbref.id() + 1);
        }
        for id in image.players.keys() {
            image.next_player = image.next_player.max(id.0 + 1);
        }
        for id in image.scripts.keys() {
            image.next_script = image.next_script.max(id.0 + 1);
        }
        Ok(image)
    }
}

impl DurableSink for FjallSink {
    fn apply(&self, dirty: &Dirty, image: &WorldImage) -> Result<(), WorldStateError> {
        for obj in &dirty.removed_objects {
            self.objects
                .remove(obj.id().to_be_bytes().to_vec())
                .map_err(storage_err)?;
        }
        for obj in &dirty.objects {
            // A row can be created and removed inside one transaction.
            if let Some(record) = image.objects.get(obj) {
                self.objects
                    .insert(obj.id().to_be_bytes().to_vec(), encode_row(record)?)
                    .map_err(storage_err)?;
            }
        }
        for (obj, key) in &dirty.removed_attrs {
            self.attrs
                .remove(attr_row_key(*obj, key))
                .map_err(storage_err)?;
        }
        for (obj, key) in &dirty.attrs {
            if let Some(entry) = image.attrs.get(&(*obj, key.clone())) {
                self.attrs
                    .insert(attr_row_key(*obj, key), encode_row(entry)?)
                    .map_err(storage_err)?;
            }
        }
        for id in &dirty.players {
            if let Some(record) = image.players.get(id) {
                self.players
                    .insert(id.0.to_be_bytes().to_vec(), encode_row(record)?)
                    .map_err(storage_err)?;
            }
        }
        for id in &dirty.removed_scripts {
            self.scripts
                .remove(id.0.to_be_bytes().to_vec())
                .map_err(storage_err)?;
        }
        for id in &dirty.scripts {
            if let Some(record) = image.scripts.get(id) {
                self.scripts
                    .insert(id.0.to_be_bytes().to_vec(), encode_row(record)?)
                    .map_err(storage_err)?;
            }
        }
        if dirty.sequences {
            let counters = (image.next_dbref, image.next_player, image.next_script);
            self.sequences
                .insert(COUNTERS_KEY, encode_row(&counters)?)
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

impl WorldStateSource for FjallStore {
    fn new_world_state(&self) -> Result<Box<dyn WorldState>, WorldStateError> {
        Ok(Box::new(WorldTx::begin(
            self.image.clone(),
            self.sink.clone(),
        )?))
    }

    fn checkpoint(&self) -> Result<(), WorldStateError> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_common::model::{AttrValue, CommitResult};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (obj, player) = {
            let store = FjallStore::open(dir.path()).unwrap();
            let mut tx = store.new_world_state().unwrap();
            let obj = tx
                .create_object(ObjectRecord::new(Dbref(0), "room", "core.Room"))
                .unwrap();
            tx.set_attr(obj, "desc", Some(AttrValue::Str("dusty".to_string())))
                .unwrap();
            let player = tx
                .create_player(PlayerRecord::new(PlayerId(0), "sam", "pw"))
                .unwrap();
            assert_eq!(tx.commit().unwrap(), CommitResult::Success);
            store.checkpoint().unwrap();
            (obj, player)
        };

        let store = FjallStore::open(dir.path()).unwrap();
        let tx = store.new_world_state().unwrap();
        assert_eq!(tx.object(obj).unwrap().key, "room");
        assert_eq!(
            tx.attr(obj, "desc").unwrap(),
            Some(AttrValue::Str("dusty".to_string()))
        );
        assert_eq!(tx.player(player).unwrap().username, "sam");
    }

    #[test]
    fn test_sequences_resume_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let store = FjallStore::open(dir.path()).unwrap();
            let mut tx = store.new_world_state().unwrap();
            let first = tx
                .create_object(ObjectRecord::new(Dbref(0), "a", "core.Object"))
                .unwrap();
            tx.commit().unwrap();
            store.checkpoint().unwrap();
            first
        };

        let store = FjallStore::open(dir.path()).unwrap();
        let mut tx = store.new_world_state().unwrap();
        let second = tx
            .create_object(ObjectRecord::new(Dbref(0), "b", "core.Object"))
            .unwrap();
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_removals_are_durable() {
        let dir = tempfile::tempdir().unwrap();
        let obj = {
            let store = FjallStore::open(dir.path()).unwrap();
            let mut tx = store.new_world_state().unwrap();
            let obj = tx
                .create_object(ObjectRecord::new(Dbref(0), "doomed", "core.Object"))
                .unwrap();
            tx.set_attr(obj, "desc", Some(AttrValue::Str("brief".to_string())))
                .unwrap();
            tx.commit().unwrap();

            let mut tx = store.new_world_state().unwrap();
            tx.clear_attrs(obj).unwrap();
            tx.remove_object(obj).unwrap();
            tx.commit().unwrap();
            store.checkpoint().unwrap();
            obj
        };

        let store = FjallStore::open(dir.path()).unwrap();
        let tx = store.new_world_state().unwrap();
        assert!(!tx.object_exists(obj).unwrap());
    }
}
