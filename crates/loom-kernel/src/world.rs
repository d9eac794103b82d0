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

//! The model-level operations over a raw world-state transaction: creation,
//! the five-phase move, soft and hard delete, and object search. This is the
//! only place lifecycle hooks fire, so every caller gets the same ordering.

use tracing::warn;

use loom_common::cmdset::CommandError;
use loom_common::matching::{match_keyed, MatchResult};
use loom_common::model::{
    wildcard_to_regex, AttrEntry, AttrFlag, AttrValue, Dbref, ObjectRecord, ObjectRef,
    SYSTEM_ATTR_PREFIX,
};
use loom_common::sessions::Session;
use loom_common::{WorldState, WorldStateError};

use crate::typeclass::{DeleteFlow, HookCtx, MoveFlow, TypeclassRegistry};

/// The outcome of [`World::search`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SearchOutcome {
    NoMatch,
    One(Dbref),
    /// The display names of all candidates, for the multi-match message.
    Multiple(Vec<String>),
}

/// A borrow of everything one operation needs. Constructed fresh per command
/// or script fire; holds no state of its own.
pub struct World<'a> {
    pub state: &'a mut dyn WorldState,
    pub session: &'a dyn Session,
    pub typeclasses: &'a TypeclassRegistry,
    /// Where orphaned contents go when their own home is gone too.
    pub default_home: Option<Dbref>,
}

impl World<'_> {
    fn hook_ctx(&mut self) -> HookCtx<'_> {
        HookCtx {
            state: &mut *self.state,
            session: self.session,
        }
    }

    /// Run a hook whose failure must not abort the surrounding operation.
    fn fire(&mut self, hook: &str, obj: Dbref, f: impl FnOnce(&mut HookCtx<'_>) -> Result<(), CommandError>) {
        let mut ctx = self.hook_ctx();
        if let Err(e) = f(&mut ctx) {
            warn!(%obj, hook, error = %e, "lifecycle hook failed");
        }
    }

    /// Store the record and fire `at_object_creation` then `at_init`.
    pub fn create_object(&mut self, record: ObjectRecord) -> Result<Dbref, CommandError> {
        let class = self.typeclasses.resolve(&record.typeclass_path);
        let obj = self.state.create_object(record)?;
        self.fire("at_object_creation", obj, |ctx| {
            class.at_object_creation(ctx, obj)
        });
        self.fire("at_init", obj, |ctx| class.at_init(ctx, obj));
        Ok(obj)
    }

    /// Relocate `obj` into `target`, firing the full hook sequence. Returns
    /// `Ok(false)` when `at_before_move` cancels. `quiet` suppresses the
    /// announcement hooks but nothing else.
    pub fn move_to(
        &mut self,
        obj: Dbref,
        target: Dbref,
        quiet: bool,
    ) -> Result<bool, CommandError> {
        let mut rec = self.state.object(obj)?;
        let target_rec = self.state.object(target)?;
        if obj == target || target_rec.going || target_rec.is_exit() {
            return Err(WorldStateError::InvalidMove(obj, target).into());
        }
        // Walk the target's containment chain; finding obj there would make
        // the location graph cyclic.
        let mut cursor = Some(target);
        while let Some(at) = cursor {
            if at == obj {
                return Err(WorldStateError::RecursiveMove(obj, target).into());
            }
            cursor = self.state.object(at)?.location;
        }

        let class = self.typeclasses.resolve(&rec.typeclass_path);
        let source = rec.location;

        // Phase 1: the veto point. This one is allowed to abort.
        let mut ctx = self.hook_ctx();
        match class.at_before_move(&mut ctx, obj, target)? {
            MoveFlow::Continue => {}
            MoveFlow::Cancel => return Ok(false),
        }

        // Phase 2: departure side.
        if !quiet {
            let class = class.clone();
            self.fire("announce_move_from", obj, |ctx| {
                class.announce_move_from(ctx, obj, target)
            });
        }
        if let Some(source) = source {
            let src_class = self.typeclasses.resolve_for(&self.state.object(source)?);
            self.fire("at_object_leave", source, |ctx| {
                src_class.at_object_leave(ctx, source, obj)
            });
        }

        // Phase 3: the actual relocation.
        rec.location = Some(target);
        self.state.update_object(&rec)?;

        // Phase 4: arrival side.
        if !quiet {
            let class = class.clone();
            self.fire("announce_move_to", obj, |ctx| {
                class.announce_move_to(ctx, obj, source)
            });
        }
        let tgt_class = self.typeclasses.resolve_for(&target_rec);
        self.fire("at_object_receive", target, |ctx| {
            tgt_class.at_object_receive(ctx, target, obj, source)
        });

        // Phase 5: the mover's own followup.
        self.fire("at_after_move", obj, |ctx| {
            class.at_after_move(ctx, obj, source)
        });
        Ok(true)
    }

    /// Soft delete: mark the object going and boot any sessions puppeting it.
    /// The row and its attributes survive until [`World::delete`].
    pub fn destroy(&mut self, obj: Dbref) -> Result<(), CommandError> {
        let mut rec = self.state.object(obj)?;
        if rec.going {
            return Ok(());
        }
        rec.going = true;
        self.state.update_object(&rec)?;
        self.session
            .disconnect_by_obj(obj, "The object you were controlling no longer exists.")?;
        Ok(())
    }

    /// Hard delete with cascade. Returns `Ok(false)` when `at_object_delete`
    /// cancels. Cascade order: inbound exits are deleted, contents are sent
    /// home (or to the configured fallback, or nowhere), attributes are
    /// cleared, then the row goes.
    pub fn delete(&mut self, obj: Dbref) -> Result<bool, CommandError> {
        let rec = self.state.object(obj)?;
        let class = self.typeclasses.resolve(&rec.typeclass_path);
        let mut ctx = self.hook_ctx();
        match class.at_object_delete(&mut ctx, obj)? {
            DeleteFlow::Continue => {}
            DeleteFlow::Cancel => return Ok(false),
        }

        for exit in self.state.exits_to(obj)? {
            if exit == obj {
                continue;
            }
            self.state.clear_attrs(exit)?;
            self.state.remove_object(exit)?;
        }

        for inner in self.state.contents(obj)? {
            let mut inner_rec = self.state.object(inner)?;
            let dest = inner_rec
                .home
                .filter(|&h| h != obj)
                .or(self.default_home)
                .filter(|&h| h != obj);
            match dest {
                Some(dest) if self.state.object_exists(dest)? => {
                    // Evicted quietly; the container is vanishing under it.
                    if !self.move_to(inner, dest, true)? {
                        inner_rec.location = None;
                        self.state.update_object(&inner_rec)?;
                    }
                }
                _ => {
                    inner_rec.location = None;
                    self.state.update_object(&inner_rec)?;
                }
            }
        }

        self.state.clear_attrs(obj)?;
        self.state.remove_object(obj)?;
        Ok(true)
    }

    /// Wildcard search over `obj`'s attribute keys, `*` and `?` shell-style.
    /// Entries marked `Hidden` never appear. System keys (`__`-prefixed) only
    /// appear when the pattern itself starts with the prefix. Rows come back
    /// sorted by key.
    pub fn attribute_namesearch(
        &self,
        obj: Dbref,
        pattern: &str,
    ) -> Result<Vec<AttrEntry>, CommandError> {
        let re = wildcard_to_regex(pattern).map_err(|e| {
            CommandError::CouldNotParse(format!("bad attribute pattern {pattern:?}: {e}"))
        })?;
        let want_system = pattern.starts_with(SYSTEM_ATTR_PREFIX);
        let mut rows: Vec<AttrEntry> = self
            .state
            .attr_entries(obj)?
            .into_iter()
            .filter(|entry| !entry.has_flag(AttrFlag::Hidden))
            .filter(|entry| want_system || !entry.is_system())
            .filter(|entry| re.is_match(&entry.key))
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    /// The user-facing attribute write. An existing entry marked `NoSet`
    /// refuses both overwrite and delete; engine code that owns such an entry
    /// writes through the raw state instead.
    pub fn set_attr(
        &mut self,
        obj: Dbref,
        key: &str,
        value: Option<AttrValue>,
    ) -> Result<(), CommandError> {
        if let Some(entry) = self.state.attr_entry(obj, key)? {
            if entry.has_flag(AttrFlag::NoSet) {
                return Err(CommandError::PermissionDenied);
            }
        }
        self.state.set_attr(obj, key, value)?;
        Ok(())
    }

    /// Resolve a user-typed object reference from `searcher`'s point of view.
    /// Name matches search the searcher's own contents and the contents of
    /// its location, skipping going objects.
    pub fn search(&self, searcher: Dbref, query: &str) -> Result<SearchOutcome, CommandError> {
        let rec = self.state.object(searcher)?;
        match ObjectRef::parse(query) {
            ObjectRef::Here => Ok(match rec.location {
                Some(loc) => SearchOutcome::One(loc),
                None => SearchOutcome::NoMatch,
            }),
            ObjectRef::Me => Ok(SearchOutcome::One(searcher)),
            ObjectRef::Id(dbref) => {
                if self.state.object_exists(dbref)? && !self.state.object(dbref)?.going {
                    Ok(SearchOutcome::One(dbref))
                } else {
                    Ok(SearchOutcome::NoMatch)
                }
            }
            ObjectRef::Player(name) => {
                let Some(player) = self.state.player_by_name(&name)? else {
                    return Ok(SearchOutcome::NoMatch);
                };
                match player.characters.first() {
                    Some(&c) if self.state.object_exists(c)? => Ok(SearchOutcome::One(c)),
                    _ => Ok(SearchOutcome::NoMatch),
                }
            }
            ObjectRef::Match(phrase) => self.search_surroundings(&rec, &phrase),
        }
    }

    fn search_surroundings(
        &self,
        searcher: &ObjectRecord,
        phrase: &str,
    ) -> Result<SearchOutcome, CommandError> {
        let mut pool = self.state.contents(searcher.dbref)?;
        if let Some(loc) = searcher.location {
            pool.push(loc);
            pool.extend(self.state.contents(loc)?);
        }
        let mut candidates = Vec::new();
        for dbref in pool {
            if dbref == searcher.dbref {
                continue;
            }
            let rec = self.state.object(dbref)?;
            if rec.going {
                continue;
            }
            candidates.push((dbref, rec.key.clone(), rec.aliases.clone()));
        }
        Ok(match match_keyed(phrase, &candidates) {
            MatchResult::NoMatch => SearchOutcome::NoMatch,
            MatchResult::Single(dbref) => SearchOutcome::One(dbref),
            MatchResult::Multiple(refs) => {
                let mut names = Vec::new();
                for dbref in refs {
                    names.push(self.state.object(dbref)?.key);
                }
                SearchOutcome::Multiple(names)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use loom_common::model::{AttrValue, PlayerRecord};
    use loom_common::sessions::{MockEmission, MockSession};
    use loom_common::WorldStateSource;
    use loom_db::TransientStore;

    use super::*;
    use crate::typeclass::Typeclass;

    fn setup() -> (Box<dyn WorldState>, MockSession, TypeclassRegistry) {
        let store = TransientStore::new();
        let state = store.new_world_state().unwrap();
        (state, MockSession::new(), TypeclassRegistry::new())
    }

    fn room(world: &mut World<'_>, key: &str) -> Dbref {
        world
            .create_object(ObjectRecord::new(Dbref(0), key, "core.Room"))
            .unwrap()
    }

    fn thing_in(world: &mut World<'_>, key: &str, loc: Dbref) -> Dbref {
        let mut rec = ObjectRecord::new(Dbref(0), key, "core.Object");
        rec.location = Some(loc);
        world.create_object(rec).unwrap()
    }

    #[test]
    fn test_move_announces_both_rooms() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let vault = room(&mut world, "Vault");
        let actor = thing_in(&mut world, "Rider", hall);

        assert!(world.move_to(actor, vault, false).unwrap());
        assert_eq!(world.state.object(actor).unwrap().location, Some(vault));
        let emissions = session.emissions();
        assert!(emissions.contains(&MockEmission::ToRoom(
            hall,
            "Rider leaves.".to_string(),
            vec![actor]
        )));
        assert!(emissions.contains(&MockEmission::ToRoom(
            vault,
            "Rider arrives.".to_string(),
            vec![actor]
        )));
    }

    #[test]
    fn test_quiet_move_stays_silent() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let vault = room(&mut world, "Vault");
        let actor = thing_in(&mut world, "Rider", hall);

        assert!(world.move_to(actor, vault, true).unwrap());
        assert!(session.emissions().is_empty());
    }

    #[test]
    fn test_move_rejects_self_and_cycles() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let chest = room(&mut world, "Chest");
        let pouch = thing_in(&mut world, "Pouch", chest);

        let err = world.move_to(chest, chest, true).unwrap_err();
        assert!(matches!(
            err,
            CommandError::WorldState(WorldStateError::InvalidMove(_, _))
        ));
        let err = world.move_to(chest, pouch, true).unwrap_err();
        assert!(matches!(
            err,
            CommandError::WorldState(WorldStateError::RecursiveMove(_, _))
        ));
    }

    struct Homebody;

    impl Typeclass for Homebody {
        fn at_before_move(
            &self,
            _ctx: &mut HookCtx<'_>,
            _obj: Dbref,
            _target: Dbref,
        ) -> Result<MoveFlow, CommandError> {
            Ok(MoveFlow::Cancel)
        }
    }

    #[test]
    fn test_before_move_cancels_without_side_effects() {
        let (mut state, session, mut typeclasses) = setup();
        typeclasses.register("test.Homebody", Arc::new(Homebody));
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let vault = room(&mut world, "Vault");
        let mut rec = ObjectRecord::new(Dbref(0), "Statue", "test.Homebody");
        rec.location = Some(hall);
        let statue = world.create_object(rec).unwrap();

        assert!(!world.move_to(statue, vault, false).unwrap());
        assert_eq!(world.state.object(statue).unwrap().location, Some(hall));
        assert!(session.emissions().is_empty());
    }

    #[test]
    fn test_destroy_marks_going_and_boots_sessions() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let actor = thing_in(&mut world, "Rider", hall);

        world.destroy(actor).unwrap();
        assert!(world.state.object(actor).unwrap().going);
        assert!(matches!(
            session.emissions().as_slice(),
            [MockEmission::DisconnectObj(obj, _)] if *obj == actor
        ));
    }

    #[test]
    fn test_delete_cascade() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let vault = room(&mut world, "Vault");
        let coin = thing_in(&mut world, "Coin", vault);
        let mut coin_rec = world.state.object(coin).unwrap();
        coin_rec.home = Some(hall);
        world.state.update_object(&coin_rec).unwrap();
        let mut door = ObjectRecord::new(Dbref(0), "door", "core.Exit");
        door.location = Some(hall);
        door.destination = Some(vault);
        let door = world.create_object(door).unwrap();
        world
            .state
            .set_attr(vault, "desc", Some(AttrValue::Str("Dusty.".to_string())))
            .unwrap();

        assert!(world.delete(vault).unwrap());
        assert!(!world.state.object_exists(vault).unwrap());
        assert!(!world.state.object_exists(door).unwrap());
        assert_eq!(world.state.object(coin).unwrap().location, Some(hall));
    }

    #[test]
    fn test_delete_orphans_contents_without_home() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let vault = room(&mut world, "Vault");
        let coin = thing_in(&mut world, "Coin", vault);

        assert!(world.delete(vault).unwrap());
        assert_eq!(world.state.object(coin).unwrap().location, None);
    }

    struct Anchored;

    impl Typeclass for Anchored {
        fn at_object_delete(
            &self,
            _ctx: &mut HookCtx<'_>,
            _obj: Dbref,
        ) -> Result<DeleteFlow, CommandError> {
            Ok(DeleteFlow::Cancel)
        }
    }

    #[test]
    fn test_delete_hook_can_cancel() {
        let (mut state, session, mut typeclasses) = setup();
        typeclasses.register("test.Anchored", Arc::new(Anchored));
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let keep = world
            .create_object(ObjectRecord::new(Dbref(0), "Keep", "test.Anchored"))
            .unwrap();
        assert!(!world.delete(keep).unwrap());
        assert!(world.state.object_exists(keep).unwrap());
    }

    #[test]
    fn test_search_tokens() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let actor = thing_in(&mut world, "Rider", hall);
        let box_a = thing_in(&mut world, "wooden box", hall);
        let _box_b = thing_in(&mut world, "iron box", hall);

        assert_eq!(world.search(actor, "me").unwrap(), SearchOutcome::One(actor));
        assert_eq!(world.search(actor, "here").unwrap(), SearchOutcome::One(hall));
        assert_eq!(
            world.search(actor, &box_a.to_string()).unwrap(),
            SearchOutcome::One(box_a)
        );
        assert_eq!(
            world.search(actor, "wooden box").unwrap(),
            SearchOutcome::One(box_a)
        );
        assert_eq!(
            world.search(actor, "box").unwrap(),
            SearchOutcome::Multiple(vec![
                "wooden box".to_string(),
                "iron box".to_string()
            ])
        );
        assert_eq!(
            world.search(actor, "2-box").unwrap(),
            SearchOutcome::One(_box_b)
        );
        assert_eq!(
            world.search(actor, "chandelier").unwrap(),
            SearchOutcome::NoMatch
        );
    }

    #[test]
    fn test_search_skips_going_objects() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let actor = thing_in(&mut world, "Rider", hall);
        let ghost = thing_in(&mut world, "lantern", hall);
        world.destroy(ghost).unwrap();

        assert_eq!(
            world.search(actor, "lantern").unwrap(),
            SearchOutcome::NoMatch
        );
    }

    #[test]
    fn test_search_star_player() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let hall = room(&mut world, "Hall");
        let actor = thing_in(&mut world, "Rider", hall);
        let pc = thing_in(&mut world, "Teller", hall);
        let mut player = PlayerRecord::new(loom_common::model::PlayerId(0), "teller", "pw");
        player.characters.push(pc);
        world.state.create_player(player).unwrap();

        assert_eq!(
            world.search(actor, "*teller").unwrap(),
            SearchOutcome::One(pc)
        );
        assert_eq!(
            world.search(actor, "*nobody").unwrap(),
            SearchOutcome::NoMatch
        );
    }

    #[test]
    fn test_attribute_namesearch_wildcards() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let chest = room(&mut world, "Chest");
        for (key, value) in [("desc", "Oak."), ("desc_night", "Shadowed."), ("color", "brown")] {
            world
                .state
                .set_attr(chest, key, Some(AttrValue::Str(value.to_string())))
                .unwrap();
        }

        let rows = world.attribute_namesearch(chest, "desc*").unwrap();
        let keys: Vec<&str> = rows.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["desc", "desc_night"]);

        let rows = world.attribute_namesearch(chest, "c?lor").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, AttrValue::Str("brown".to_string()));

        assert!(world.attribute_namesearch(chest, "lock*").unwrap().is_empty());
    }

    #[test]
    fn test_attribute_namesearch_honors_markers() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let chest = room(&mut world, "Chest");
        world
            .state
            .set_attr(chest, "desc", Some(AttrValue::Str("Oak.".to_string())))
            .unwrap();
        world
            .state
            .set_attr(chest, "__command_table__", Some(AttrValue::Int(0)))
            .unwrap();
        let mut secret = AttrEntry::new("secret", AttrValue::Str("hoard".to_string()));
        secret.flags.push(AttrFlag::Hidden);
        world.state.set_attr_entry(chest, secret).unwrap();

        // Hidden and system rows stay out of the ordinary listing.
        let rows = world.attribute_namesearch(chest, "*").unwrap();
        let keys: Vec<&str> = rows.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["desc"]);

        // Asking for the system prefix brings system rows in, hidden stays out.
        let rows = world.attribute_namesearch(chest, "__*").unwrap();
        let keys: Vec<&str> = rows.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["__command_table__"]);
    }

    #[test]
    fn test_noset_attr_refuses_user_write() {
        let (mut state, session, typeclasses) = setup();
        let mut world = World {
            state: state.as_mut(),
            session: &session,
            typeclasses: &typeclasses,
            default_home: None,
        };
        let chest = room(&mut world, "Chest");
        let mut entry = AttrEntry::new("engine_key", AttrValue::Str("locked".to_string()));
        entry.flags.push(AttrFlag::NoSet);
        world.state.set_attr_entry(chest, entry).unwrap();

        let err = world
            .set_attr(chest, "engine_key", Some(AttrValue::Int(1)))
            .unwrap_err();
        assert!(matches!(err, CommandError::PermissionDenied));
        // Deletion counts as a write too, and keys stay case-insensitive.
        let err = world.set_attr(chest, "Engine_Key", None).unwrap_err();
        assert!(matches!(err, CommandError::PermissionDenied));
        assert_eq!(
            world.state.attr(chest, "engine_key").unwrap(),
            Some(AttrValue::Str("locked".to_string()))
        );

        // Unflagged keys write through normally.
        world
            .set_attr(chest, "desc", Some(AttrValue::Str("Oak.".to_string())))
            .unwrap();
        assert_eq!(
            world.state.attr(chest, "desc").unwrap(),
            Some(AttrValue::Str("Oak.".to_string()))
        );
    }
}
