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

//! The engine proper: the world facade that makes hooks fire deterministically
//! around every structural mutation, the cmdset stack and dispatcher, the
//! script scheduler, and the server-side session registry.

pub mod channels;
pub mod cmdsets;
pub mod dispatch;
pub mod scripts;
pub mod sessions;
pub mod typeclass;
pub mod world;
