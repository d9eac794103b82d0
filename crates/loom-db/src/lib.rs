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

//! Storage backends implementing the world-state transaction traits. The
//! transient store holds everything in memory and forgets it on drop; the
//! fjall store layers the same snapshot transaction model over durable
//! partitions.

mod fjall_store;
mod transient;
mod world_tx;

pub use fjall_store::FjallStore;
pub use transient::TransientStore;
