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

//! The snapshot transaction shared by both storage backends. A transaction
//! clones the world image, works on the clone, and swaps it back on commit if
//! no other writer got there first.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use loom_common::model::{
    AttrEntry, AttrValue, CommitResult, Dbref, ObjectRecord, PlayerId, PlayerRecord, ScriptId,
    ScriptRecord, WorldStateError, normalize_attr_key,
};
use loom_common::WorldState;

/// A complete image of the world. `version` counts committed transactions
/// since open, for first-writer-wins conflict detection.
#[derive(Clone, Default)]
pub(crate) struct WorldImage {
    pub version: u64,
    pub objects: HashMap<Dbref, ObjectRecord>,
    /// Keyed (owner, normalized key); the BTreeMap keeps per-object listings
    /// in key order.
    pub attrs: BTreeMap<(Dbref, String), AttrEntry>,
    pub players: HashMap<PlayerId, PlayerRecord>,
    pub scripts: HashMap<ScriptId, ScriptRecord>,
    pub next_dbref: i64,
    pub next_player: i64,
    pub next_script: u64,
}

/// What a committed transaction changed, keyed for the durable layer.
/// Removals carry the key that left; upserts are re-read from the image.
#[derive(Default)]
pub(crate) struct Dirty {
    pub objects: Vec<Dbref>,
    pub removed_objects: Vec<Dbref>,
    pub attrs: Vec<(Dbref, String)>,
    pub removed_attrs: Vec<(Dbref, String)>,
    pub players: Vec<PlayerId>,
    pub scripts: Vec<ScriptId>,
    pub removed_scripts: Vec<ScriptId>,
    pub sequences: bool,
}

/// Applied under the store's write lock after a successful swap. The
/// transient store plugs in a no-op.
pub(crate) trait DurableSink: Send + Sync {
    fn apply(&self, dirty: &Dirty, image: &WorldImage) -> Result<(), WorldStateError>;
}

pub(crate) struct NoopSink;

impl DurableSink for NoopSink {
    fn apply(&self, _dirty: &Dirty, _image: &WorldImage) -> Result<(), WorldStateError> {
        Ok(())
    }
}

pub(crate) struct WorldTx {
    store: Arc<RwLock<WorldImage>>,
    sink: Arc<dyn DurableSink>,
    base_version: u64,
    working: WorldImage,
    dirty: Dirty,
}

impl WorldTx {
    pub fn begin(
        store: Arc<RwLock<WorldImage>>,
        sink: Arc<dyn DurableSink>,
    ) -> Result<Self, WorldStateError> {
        let working = store
            .read()
            .map_err(|_| WorldStateError::StorageError("store lock poisoned".to_string()))?
            .clone();
        Ok(Self {
            base_version: working.version,
            store,
            sink,
            working,
            dirty: Dirty::default(),
        })
    }

    fn object_ref(&self, obj: Dbref) -> Result<&ObjectRecord, WorldStateError> {
        self.working
            .objects
            .get(&obj)
            .ok_or(WorldStateError::ObjectNotFound(obj))
    }

    fn require_object(&self, obj: Dbref) -> Result<(), WorldStateError> {
        self.object_ref(obj).map(|_| ())
    }
}

impl WorldState for WorldTx {
    fn create_object(&mut self, mut record: ObjectRecord) -> Result<Dbref, WorldStateError> {
        let dbref = Dbref(self.working.next_dbref);
        self.working.next_dbref += 1;
        record.dbref = dbref;
        self.working.objects.insert(dbref, record);
        self.dirty.objects.push(dbref);
        self.dirty.sequences = true;
        Ok(dbref)
    }

    fn object(&self, obj: Dbref) -> Result<ObjectRecord, WorldStateError> {
        self.object_ref(obj).cloned()
    }

    fn object_exists(&self, obj: Dbref) -> Result<bool, WorldStateError> {
        Ok(self.working.objects.contains_key(&obj))
    }

    fn update_object(&mut self, record: &ObjectRecord) -> Result<(), WorldStateError> {
        self.require_object(record.dbref)?;
        self.working.objects.insert(record.dbref, record.clone());
        self.dirty.objects.push(record.dbref);
        Ok(())
    }

    fn remove_object(&mut self, obj: Dbref) -> Result<(), WorldStateError> {
        if self.working.objects.remove(&obj).is_none() {
            return Err(WorldStateError::ObjectNotFound(obj));
        }
        self.dirty.removed_objects.push(obj);
        Ok(())
    }

    fn contents(&self, obj: Dbref) -> Result<Vec<Dbref>, WorldStateError> {
        self.require_object(obj)?;
        let mut contents: Vec<Dbref> = self
            .working
            .objects
            .values()
            .filter(|rec| rec.location == Some(obj))
            .map(|rec| rec.dbref)
            .collect();
        // Dbref order makes ordinal selection stable across calls.
        contents.sort();
        Ok(contents)
    }

    fn exits_of(&self, obj: Dbref) -> Result<Vec<Dbref>, WorldStateError> {
        let contents = self.contents(obj)?;
        Ok(contents
            .into_iter()
            .filter(|dbref| {
                self.working
                    .objects
                    .get(dbref)
                    .is_some_and(|rec| rec.is_exit())
            })
            .collect())
    }

    fn exits_to(&self, obj: Dbref) -> Result<Vec<Dbref>, WorldStateError> {
        let mut exits: Vec<Dbref> = self
            .working
            .objects
            .values()
            .filter(|rec| rec.destination == Some(obj))
            .map(|rec| rec.dbref)
            .collect();
        exits.sort();
        Ok(exits)
    }

    fn all_objects(&self) -> Result<Vec<Dbref>, WorldStateError> {
        let mut all: Vec<Dbref> = self.working.objects.keys().copied().collect();
        all.sort();
        Ok(all)
    }

    fn attr(&self, obj: Dbref, key: &str) -> Result<Option<AttrValue>, WorldStateError> {
        Ok(self.attr_entry(obj, key)?.map(|entry| entry.value))
    }

    fn attr_entry(&self, obj: Dbref, key: &str) -> Result<Option<AttrEntry>, WorldStateError> {
        self.require_object(obj)?;
        Ok(self
            .working
            .attrs
            .get(&(obj, normalize_attr_key(key)))
            .cloned())
    }

    fn set_attr(
        &mut self,
        obj: Dbref,
        key: &str,
        value: Option<AttrValue>,
    ) -> Result<(), WorldStateError> {
        self.require_object(obj)?;
        let key = normalize_attr_key(key);
        match value {
            Some(value) => {
                // Preserve flags across a value overwrite.
                let entry = match self.working.attrs.get(&(obj, key.clone())) {
                    Some(existing) => AttrEntry {
                        key: key.clone(),
                        value,
                        flags: existing.flags.clone(),
                    },
                    None => AttrEntry::new(&key, value),
                };
                self.working.attrs.insert((obj, key.clone()), entry);
                self.dirty.attrs.push((obj, key));
            }
            None => {
                if self.working.attrs.remove(&(obj, key.clone())).is_some() {
                    self.dirty.removed_attrs.push((obj, key));
                }
            }
        }
        Ok(())
    }

    fn set_attr_entry(&mut self, obj: Dbref, entry: AttrEntry) -> Result<(), WorldStateError> {
        self.require_object(obj)?;
        let key = normalize_attr_key(&entry.key);
        self.working.attrs.insert((obj, key.clone()), entry);
        self.dirty.attrs.push((obj, key));
        Ok(())
    }

    fn has_attr(&self, obj: Dbref, key: &str) -> Result<bool, WorldStateError> {
        self.require_object(obj)?;
        Ok(self
            .working
            .attrs
            .contains_key(&(obj, normalize_attr_key(key))))
    }

    fn attr_entries(&self, obj: Dbref) -> Result<Vec<AttrEntry>, WorldStateError> {
        self.require_object(obj)?;
        Ok(self
            .working
            .attrs
            .range((obj, String::new())..)
            .take_while(|((owner, _), _)| *owner == obj)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn clear_attrs(&mut self, obj: Dbref) -> Result<(), WorldStateError> {
        let keys: Vec<(Dbref, String)> = self
            .working
            .attrs
            .range((obj, String::new())..)
            .take_while(|((owner, _), _)| *owner == obj)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            self.working.attrs.remove(&key);
            self.dirty.removed_attrs.push(key);
        }
        Ok(())
    }

    fn create_player(&mut self, mut record: PlayerRecord) -> Result<PlayerId, WorldStateError> {
        let taken = self
            .working
            .players
            .values()
            .any(|p| p.username.eq_ignore_ascii_case(&record.username));
        if taken {
            return Err(WorldStateError::DuplicatePlayerName(record.username));
        }
        let id = PlayerId(self.working.next_player);
        self.working.next_player += 1;
        record.id = id;
        self.working.players.insert(id, record);
        self.dirty.players.push(id);
        self.dirty.sequences = true;
        Ok(id)
    }

    fn player(&self, id: PlayerId) -> Result<PlayerRecord, WorldStateError> {
        self.working
            .players
            .get(&id)
            .cloned()
            .ok_or_else(|| WorldStateError::PlayerNotFound(id.to_string()))
    }

    fn player_by_name(&self, username: &str) -> Result<Option<PlayerRecord>, WorldStateError> {
        Ok(self
            .working
            .players
            .values()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    fn update_player(&mut self, record: &PlayerRecord) -> Result<(), WorldStateError> {
        if !self.working.players.contains_key(&record.id) {
            return Err(WorldStateError::PlayerNotFound(record.id.to_string()));
        }
        self.working.players.insert(record.id, record.clone());
        self.dirty.players.push(record.id);
        Ok(())
    }

    fn create_script(&mut self, mut record: ScriptRecord) -> Result<ScriptId, WorldStateError> {
        if let Some(obj) = record.obj {
            self.require_object(obj)?;
        }
        let id = ScriptId(self.working.next_script);
        self.working.next_script += 1;
        record.id = id;
        self.working.scripts.insert(id, record);
        self.dirty.scripts.push(id);
        self.dirty.sequences = true;
        Ok(id)
    }

    fn script(&self, id: ScriptId) -> Result<ScriptRecord, WorldStateError> {
        self.working
            .scripts
            .get(&id)
            .cloned()
            .ok_or(WorldStateError::ScriptNotFound(id))
    }

    fn update_script(&mut self, record: &ScriptRecord) -> Result<(), WorldStateError> {
        if !self.working.scripts.contains_key(&record.id) {
            return Err(WorldStateError::ScriptNotFound(record.id));
        }
        self.working.scripts.insert(record.id, record.clone());
        self.dirty.scripts.push(record.id);
        Ok(())
    }

    fn remove_script(&mut self, id: ScriptId) -> Result<(), WorldStateError> {
        if self.working.scripts.remove(&id).is_none() {
            return Err(WorldStateError::ScriptNotFound(id));
        }
        self.dirty.removed_scripts.push(id);
        Ok(())
    }

    fn all_scripts(&self) -> Result<Vec<ScriptRecord>, WorldStateError> {
        let mut scripts: Vec<ScriptRecord> = self.working.scripts.values().cloned().collect();
        scripts.sort_by_key(|s| s.id);
        Ok(scripts)
    }

    fn scripts_on(&self, obj: Dbref) -> Result<Vec<ScriptRecord>, WorldStateError> {
        let mut scripts: Vec<ScriptRecord> = self
            .working
            .scripts
            .values()
            .filter(|s| s.obj == Some(obj))
            .cloned()
            .collect();
        scripts.sort_by_key(|s| s.id);
        Ok(scripts)
    }

    fn commit(mut self: Box<Self>) -> Result<CommitResult, WorldStateError> {
        let mut inner = self
            .store
            .write()
            .map_err(|_| WorldStateError::StorageError("store lock poisoned".to_string()))?;
        if inner.version != self.base_version {
            return Ok(CommitResult::ConflictRetry);
        }
        self.working.version = self.base_version + 1;
        self.sink.apply(&self.dirty, &self.working)?;
        *inner = self.working;
        Ok(CommitResult::Success)
    }

    fn rollback(self: Box<Self>) -> Result<(), WorldStateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_common::model::AttrFlag;
    use pretty_assertions::assert_eq;

    fn store() -> Arc<RwLock<WorldImage>> {
        Arc::new(RwLock::new(WorldImage::default()))
    }

    fn begin(store: &Arc<RwLock<WorldImage>>) -> Box<WorldTx> {
        Box::new(WorldTx::begin(store.clone(), Arc::new(NoopSink)).unwrap())
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let store = store();
        let mut tx = begin(&store);
        let obj = tx
            .create_object(ObjectRecord::new(Dbref(0), "room", "core.Room"))
            .unwrap();
        assert_eq!(tx.commit().unwrap(), CommitResult::Success);

        let tx = begin(&store);
        assert_eq!(tx.object(obj).unwrap().key, "room");
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = store();
        let mut tx = begin(&store);
        let obj = tx
            .create_object(ObjectRecord::new(Dbref(0), "room", "core.Room"))
            .unwrap();
        tx.rollback().unwrap();

        let tx = begin(&store);
        assert!(!tx.object_exists(obj).unwrap());
    }

    #[test]
    fn test_conflicting_writer_gets_retry() {
        let store = store();
        let mut tx1 = begin(&store);
        let mut tx2 = begin(&store);
        tx1.create_object(ObjectRecord::new(Dbref(0), "a", "core.Object"))
            .unwrap();
        tx2.create_object(ObjectRecord::new(Dbref(0), "b", "core.Object"))
            .unwrap();
        assert_eq!(tx1.commit().unwrap(), CommitResult::Success);
        assert_eq!(tx2.commit().unwrap(), CommitResult::ConflictRetry);
    }

    #[test]
    fn test_dbrefs_allocate_sequentially_across_commits() {
        let store = store();
        let mut tx = begin(&store);
        let a = tx
            .create_object(ObjectRecord::new(Dbref(99), "a", "core.Object"))
            .unwrap();
        tx.commit().unwrap();
        let mut tx = begin(&store);
        let b = tx
            .create_object(ObjectRecord::new(Dbref(99), "b", "core.Object"))
            .unwrap();
        assert_eq!(b.id(), a.id() + 1);
    }

    #[test]
    fn test_contents_and_exits() {
        let store = store();
        let mut tx = begin(&store);
        let room = tx
            .create_object(ObjectRecord::new(Dbref(0), "room", "core.Room"))
            .unwrap();
        let other = tx
            .create_object(ObjectRecord::new(Dbref(0), "hall", "core.Room"))
            .unwrap();
        let mut thing = ObjectRecord::new(Dbref(0), "thing", "core.Object");
        thing.location = Some(room);
        let thing = tx.create_object(thing).unwrap();
        let mut exit = ObjectRecord::new(Dbref(0), "north", "core.Exit");
        exit.location = Some(room);
        exit.destination = Some(other);
        let exit = tx.create_object(exit).unwrap();

        assert_eq!(tx.contents(room).unwrap(), vec![thing, exit]);
        assert_eq!(tx.exits_of(room).unwrap(), vec![exit]);
        assert_eq!(tx.exits_to(other).unwrap(), vec![exit]);
        assert_eq!(tx.contents(other).unwrap(), vec![]);
    }

    #[test]
    fn test_attr_case_insensitive_and_flag_preserving() {
        let store = store();
        let mut tx = begin(&store);
        let obj = tx
            .create_object(ObjectRecord::new(Dbref(0), "thing", "core.Object"))
            .unwrap();
        tx.set_attr_entry(
            obj,
            AttrEntry {
                key: "Desc".to_string(),
                value: AttrValue::Str("dusty".to_string()),
                flags: vec![AttrFlag::NoSet],
            },
        )
        .unwrap();

        // Lookup is case-insensitive.
        assert_eq!(
            tx.attr(obj, "DESC").unwrap(),
            Some(AttrValue::Str("dusty".to_string()))
        );
        // Overwriting the value keeps the flags.
        tx.set_attr(obj, "desc", Some(AttrValue::Str("clean".to_string())))
            .unwrap();
        let entry = tx.attr_entry(obj, "desc").unwrap().unwrap();
        assert!(entry.has_flag(AttrFlag::NoSet));
        assert_eq!(entry.value, AttrValue::Str("clean".to_string()));
    }

    #[test]
    fn test_attr_delete_and_clear() {
        let store = store();
        let mut tx = begin(&store);
        let obj = tx
            .create_object(ObjectRecord::new(Dbref(0), "thing", "core.Object"))
            .unwrap();
        tx.set_attr(obj, "a", Some(AttrValue::Int(1))).unwrap();
        tx.set_attr(obj, "b", Some(AttrValue::Int(2))).unwrap();
        tx.set_attr(obj, "a", None).unwrap();
        assert!(!tx.has_attr(obj, "a").unwrap());
        assert!(tx.has_attr(obj, "b").unwrap());
        tx.clear_attrs(obj).unwrap();
        assert_eq!(tx.attr_entries(obj).unwrap(), vec![]);
    }

    #[test]
    fn test_attr_entries_scoped_to_object() {
        let store = store();
        let mut tx = begin(&store);
        let a = tx
            .create_object(ObjectRecord::new(Dbref(0), "a", "core.Object"))
            .unwrap();
        let b = tx
            .create_object(ObjectRecord::new(Dbref(0), "b", "core.Object"))
            .unwrap();
        tx.set_attr(a, "x", Some(AttrValue::Int(1))).unwrap();
        tx.set_attr(b, "y", Some(AttrValue::Int(2))).unwrap();
        let entries = tx.attr_entries(a).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "x");
    }

    #[test]
    fn test_duplicate_player_name_rejected() {
        let store = store();
        let mut tx = begin(&store);
        tx.create_player(PlayerRecord::new(PlayerId(0), "Sam", "pw"))
            .unwrap();
        let err = tx
            .create_player(PlayerRecord::new(PlayerId(0), "sam", "pw"))
            .unwrap_err();
        assert_eq!(
            err,
            WorldStateError::DuplicatePlayerName("sam".to_string())
        );
    }

    #[test]
    fn test_player_lookup_case_insensitive() {
        let store = store();
        let mut tx = begin(&store);
        let id = tx
            .create_player(PlayerRecord::new(PlayerId(0), "Sam", "pw"))
            .unwrap();
        assert_eq!(tx.player_by_name("SAM").unwrap().unwrap().id, id);
        assert!(tx.player_by_name("pat").unwrap().is_none());
    }

    #[test]
    fn test_scripts_on_object() {
        let store = store();
        let mut tx = begin(&store);
        let obj = tx
            .create_object(ObjectRecord::new(Dbref(0), "clock", "core.Object"))
            .unwrap();
        let mut tick = ScriptRecord::new(ScriptId(0), "tick", "core.TickScript");
        tick.obj = Some(obj);
        let sid = tx.create_script(tick).unwrap();
        tx.create_script(ScriptRecord::new(ScriptId(0), "global", "core.TickScript"))
            .unwrap();
        let on_obj = tx.scripts_on(obj).unwrap();
        assert_eq!(on_obj.len(), 1);
        assert_eq!(on_obj[0].id, sid);
        assert_eq!(tx.all_scripts().unwrap().len(), 2);
    }
}
