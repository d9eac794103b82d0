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

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::model::objects::Dbref;

/// Prefix marking system-internal attributes (e.g. `__command_table__`).
/// These are excluded from wildcard searches unless the pattern asks for them.
pub const SYSTEM_ATTR_PREFIX: &str = "__";

/// A typed attribute value. Round-trips losslessly through the store.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<AttrValue>),
    Map(Vec<(String, AttrValue)>),
    Obj(Dbref),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<Dbref> {
        match self {
            AttrValue::Obj(dbref) => Some(*dbref),
            _ => None,
        }
    }
}

/// Markers attached to individual attributes.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize, Display,
    EnumIter,
)]
pub enum AttrFlag {
    /// Excluded from examine-style listings.
    Hidden,
    /// Refuses writes through the user-facing set command.
    NoSet,
}

/// A (key, value) row bound to a world object, with its markers.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct AttrEntry {
    /// Stored case-folded; lookups are case-insensitive.
    pub key: String,
    pub value: AttrValue,
    pub flags: Vec<AttrFlag>,
}

impl AttrEntry {
    pub fn new(key: &str, value: AttrValue) -> Self {
        Self {
            key: normalize_attr_key(key),
            value,
            flags: vec![],
        }
    }

    pub fn has_flag(&self, flag: AttrFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_system(&self) -> bool {
        self.key.starts_with(SYSTEM_ATTR_PREFIX)
    }
}

/// Attribute keys are case-insensitive; this is the canonical stored form.
pub fn normalize_attr_key(key: &str) -> String {
    key.to_lowercase()
}

/// Translate a shell-style wildcard pattern (`*`, `?`) into an anchored,
/// case-insensitive regex over attribute keys.
pub fn wildcard_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            c => translated.push_str(&regex::escape(&c.to_string())),
        }
    }
    translated.push('$');
    regex::Regex::new(&translated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_attr_key("Desc"), "desc");
        assert_eq!(normalize_attr_key("__COMMAND_TABLE__"), "__command_table__");
    }

    #[test]
    fn test_wildcard_star() {
        let re = wildcard_to_regex("de*").unwrap();
        assert!(re.is_match("desc"));
        assert!(re.is_match("DESTINY"));
        assert!(!re.is_match("redesc"));
    }

    #[test]
    fn test_wildcard_question_mark() {
        let re = wildcard_to_regex("k?y").unwrap();
        assert!(re.is_match("key"));
        assert!(!re.is_match("keey"));
    }

    #[test]
    fn test_wildcard_escapes_regex_metachars() {
        let re = wildcard_to_regex("a.b").unwrap();
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("axb"));
    }
}
