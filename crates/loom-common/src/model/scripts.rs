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
use std::time::Duration;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::model::objects::Dbref;

/// Store-allocated identity of a script row.
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
pub struct ScriptId(pub u64);

impl Display for ScriptId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "script({})", self.0)
    }
}

/// A timer attached to an object (or global when `obj` is None). The behavior
/// attached to the row is looked up through the script registry by
/// `typeclass_path`, same decoration scheme as world objects.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub id: ScriptId,
    pub key: String,
    pub typeclass_path: String,
    pub obj: Option<Dbref>,
    /// Zero means non-repeating; the script fires once (after `interval` if
    /// `start_delay`, else immediately on start).
    pub interval: Duration,
    /// Skip the first immediate fire.
    pub start_delay: bool,
    /// 0 = infinite, else a countdown; reaching zero stops the script.
    pub repeats: u32,
    /// Survives restarts; non-persistent rows are deleted on shutdown.
    pub persistent: bool,
    pub is_active: bool,
}

impl ScriptRecord {
    pub fn new(id: ScriptId, key: &str, typeclass_path: &str) -> Self {
        Self {
            id,
            key: key.to_string(),
            typeclass_path: typeclass_path.to_string(),
            obj: None,
            interval: Duration::ZERO,
            start_delay: false,
            repeats: 0,
            persistent: false,
            is_active: false,
        }
    }

    pub fn is_repeating(&self) -> bool {
        !self.interval.is_zero()
    }
}
