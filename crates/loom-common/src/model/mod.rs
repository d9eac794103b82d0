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

pub use crate::model::attrs::{
    normalize_attr_key, wildcard_to_regex, AttrEntry, AttrFlag, AttrValue, SYSTEM_ATTR_PREFIX,
};
pub use crate::model::objects::{Dbref, ObjectRef, ObjectRecord};
pub use crate::model::player::{PlayerId, PlayerRecord};
pub use crate::model::scripts::{ScriptId, ScriptRecord};
pub use crate::model::world_state::{
    CommitResult, WorldState, WorldStateError, WorldStateSource,
};

mod attrs;
mod objects;
mod player;
mod scripts;
pub(crate) mod world_state;
