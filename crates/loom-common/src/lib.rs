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

//! The set of values and model entities used across the loom system: object
//! identity, attributes, locks, commands and command sets, the world-state
//! transaction traits, and the session output trait.

pub mod cmdset;
pub mod locks;
pub mod matching;
pub mod model;
pub mod sessions;
pub mod util;

pub use model::{CommitResult, WorldState, WorldStateError, WorldStateSource};
