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
use std::time::SystemTime;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::model::objects::Dbref;

/// Identity of a player account. Accounts live in their own id space,
/// separate from world-object dbrefs.
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
pub struct PlayerId(pub i64);

impl Display for PlayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "player({})", self.0)
    }
}

/// An account: authentication data plus the out-of-character state that is
/// not part of the world graph. Owns zero or more characters by dbref.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub username: String,
    /// PHC-format argon2 hash; never the cleartext.
    pub password_hash: String,
    pub email: String,
    pub characters: Vec<Dbref>,
    pub permissions: Vec<String>,
    pub lock_storage: String,
    /// Key of the OOC-level cmdset applied while the account is connected.
    pub ooc_cmdset: Option<String>,
    pub superuser: bool,
    pub date_created: SystemTime,
}

impl PlayerRecord {
    pub fn new(id: PlayerId, username: &str, password: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            password_hash: hash_password(password),
            email: String::new(),
            characters: vec![],
            permissions: vec!["Player".to_string()],
            lock_storage: String::new(),
            ooc_cmdset: None,
            superuser: false,
            date_created: SystemTime::now(),
        }
    }

    pub fn check_password(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_hash = hash_password(password);
    }

    pub fn has_permission(&self, token: &str) -> bool {
        self.permissions.iter().any(|p| p.eq_ignore_ascii_case(token))
    }
}

fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .unwrap_or_default()
}
