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

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::model::player::PlayerId;

/// The immutable integer identity of a persistent world entity, allocated by
/// the store. All references between entities are by dbref; the core never
/// dereferences by name internally.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub struct Dbref(pub i64);

impl Dbref {
    pub fn id(&self) -> i64 {
        self.0
    }
}

impl Display for Dbref {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("not a dbref")]
pub struct DbrefParseError;

impl FromStr for Dbref {
    type Err = DbrefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(num) = s.strip_prefix('#') else {
            return Err(DbrefParseError);
        };
        let id: i64 = num.parse().map_err(|_| DbrefParseError)?;
        Ok(Dbref(id))
    }
}

/// A textual reference to an object, as typed by a user. Resolution order is
/// fixed: the literal `here`/`me` tokens, a `#N` dbref, a `*name` player
/// lookup, and finally a name match against the searcher's surroundings.
#[derive(Debug, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub enum ObjectRef {
    /// The searcher's current location.
    Here,
    /// The searcher itself.
    Me,
    /// An absolute numeric reference, e.g. `#1234`.
    Id(Dbref),
    /// A `*playername` account lookup.
    Player(String),
    /// A phrase to match against names and aliases in the environment. An
    /// ordinal prefix (`2-box`) survives inside the phrase and is consumed by
    /// the matcher.
    Match(String),
}

impl ObjectRef {
    pub fn parse(s: &str) -> ObjectRef {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "here" => return ObjectRef::Here,
            "me" | "self" => return ObjectRef::Me,
            _ => {}
        }
        if let Ok(dbref) = s.parse::<Dbref>() {
            return ObjectRef::Id(dbref);
        }
        if let Some(name) = s.strip_prefix('*') {
            return ObjectRef::Player(name.to_string());
        }
        ObjectRef::Match(s.to_string())
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectRef::Here => f.write_str("here"),
            ObjectRef::Me => f.write_str("me"),
            ObjectRef::Id(dbref) => write!(f, "{dbref}"),
            ObjectRef::Player(name) => write!(f, "*{name}"),
            ObjectRef::Match(phrase) => f.write_str(phrase),
        }
    }
}

/// The persistent record of a world object. This is the identity; behavior is
/// a per-process decoration looked up through the typeclass registry by
/// `typeclass_path`.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub dbref: Dbref,
    /// Display name. Non-unique.
    pub key: String,
    /// Each alias resolves in name lookups alongside `key`.
    pub aliases: Vec<String>,
    /// Opaque identifier of the behavior class decorating this record.
    pub typeclass_path: String,
    /// The container, if any. Never self; the location graph is acyclic.
    pub location: Option<Dbref>,
    /// Where the object is relocated if its location disappears.
    pub home: Option<Dbref>,
    /// Non-null exactly when the object is an exit.
    pub destination: Option<Dbref>,
    /// Ordered permission tokens; the hierarchy between them is configured.
    pub permissions: Vec<String>,
    /// Compact text encoding of the lock set.
    pub lock_storage: String,
    /// Cmdset identifiers re-attached at load time; slot 0 is the default.
    pub cmdset_storage: Vec<String>,
    pub date_created: SystemTime,
    /// Back-reference to the owning player account, if this object is a
    /// playable character.
    pub player: Option<PlayerId>,
    /// Soft-delete marker; a going object is restorable until hard delete.
    pub going: bool,
    /// Opts this object out of the superuser lock bypass.
    pub no_superuser_bypass: bool,
}

impl ObjectRecord {
    pub fn new(dbref: Dbref, key: &str, typeclass_path: &str) -> Self {
        Self {
            dbref,
            key: key.to_string(),
            aliases: vec![],
            typeclass_path: typeclass_path.to_string(),
            location: None,
            home: None,
            destination: None,
            permissions: vec![],
            lock_storage: String::new(),
            cmdset_storage: vec![],
            date_created: SystemTime::now(),
            player: None,
            going: false,
            no_superuser_bypass: false,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.destination.is_some()
    }

    /// True if `name` matches the key (case-insensitive substring) or any
    /// alias (case-insensitive, exact).
    pub fn name_matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        if self.key.to_lowercase().contains(&name) {
            return true;
        }
        self.aliases.iter().any(|a| a.to_lowercase() == name)
    }
}
