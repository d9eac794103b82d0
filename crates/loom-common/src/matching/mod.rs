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

//! Name matching with ordinal disambiguation, `2-box` meaning the second of
//! several boxes.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Failed to parse ordinal")]
pub struct OrdinalParseError;

/// Result of matching a token against a candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult<T> {
    NoMatch,
    Single(T),
    /// More than one candidate survived; the dispatcher surfaces these as a
    /// multi-match.
    Multiple(Vec<T>),
}

fn find_ordinal_value(word: &str) -> Option<usize> {
    match word.to_lowercase().as_str() {
        "first" => Some(1),
        "second" => Some(2),
        "third" => Some(3),
        "fourth" => Some(4),
        "fifth" => Some(5),
        "sixth" => Some(6),
        "seventh" => Some(7),
        "eighth" => Some(8),
        "ninth" => Some(9),
        "tenth" => Some(10),
        "eleventh" => Some(11),
        "twelfth" => Some(12),
        "thirteenth" => Some(13),
        "fourteenth" => Some(14),
        "fifteenth" => Some(15),
        "sixteenth" => Some(16),
        "seventeenth" => Some(17),
        "eighteenth" => Some(18),
        "nineteenth" => Some(19),
        "twentieth" => Some(20),
        _ => None,
    }
}

/// Parse a single ordinal word: `2`, `2nd`, or `second`.
pub fn parse_ordinal(word: &str) -> Result<usize, OrdinalParseError> {
    if let Ok(num) = word.parse::<usize>() {
        if num > 0 {
            return Ok(num);
        }
        return Err(OrdinalParseError);
    }
    if let Some(ordinal) = find_ordinal_value(word) {
        return Ok(ordinal);
    }
    // Numeric ordinals: "1st", "2nd", "3rd", "4th" and so on.
    if word.len() > 2 {
        let (num_part, suffix) = word.split_at(word.len() - 2);
        if matches!(suffix, "st" | "nd" | "rd" | "th") {
            if let Ok(num) = num_part.parse::<usize>() {
                if num > 0 {
                    return Ok(num);
                }
            }
        }
    }
    Err(OrdinalParseError)
}

/// Split an ordinal prefix off a search token. `2-box` becomes `(2, "box")`;
/// a token with no ordinal prefix comes back as `(0, token)`.
pub fn parse_input_token(token: &str) -> (usize, &str) {
    let Some((prefix, rest)) = token.split_once('-') else {
        return (0, token);
    };
    if rest.is_empty() {
        return (0, token);
    }
    match parse_ordinal(prefix) {
        Ok(ordinal) => (ordinal, rest),
        Err(_) => (0, token),
    }
}

/// Match `token` against candidates, each carrying a display key and a list
/// of aliases. Keys match on case-insensitive substring, aliases exactly.
/// An ordinal prefix selects the Nth survivor of the best tier.
pub fn match_keyed<T: Clone>(token: &str, candidates: &[(T, String, Vec<String>)]) -> MatchResult<T> {
    let (ordinal, subject) = parse_input_token(token);
    if subject.is_empty() {
        return MatchResult::NoMatch;
    }
    let subject_lower = subject.to_lowercase();

    let mut exact_matches = Vec::new();
    let mut alias_matches = Vec::new();
    let mut substring_matches = Vec::new();

    for (item, key, aliases) in candidates {
        let key_lower = key.to_lowercase();
        if key_lower == subject_lower {
            exact_matches.push(item.clone());
        } else if aliases.iter().any(|a| a.eq_ignore_ascii_case(subject)) {
            alias_matches.push(item.clone());
        } else if key_lower.contains(&subject_lower) {
            substring_matches.push(item.clone());
        }
    }

    // Identical names land in one tier; the ordinal counts within the best
    // non-empty tier so "2-box" is stable regardless of weaker matches.
    let tier = if !exact_matches.is_empty() {
        exact_matches
    } else if !alias_matches.is_empty() {
        alias_matches
    } else {
        substring_matches
    };

    if ordinal > 0 {
        return match tier.get(ordinal - 1) {
            Some(item) => MatchResult::Single(item.clone()),
            None => MatchResult::NoMatch,
        };
    }

    match tier.len() {
        0 => MatchResult::NoMatch,
        1 => MatchResult::Single(tier[0].clone()),
        _ => MatchResult::Multiple(tier),
    }
}
