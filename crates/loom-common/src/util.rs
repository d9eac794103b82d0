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

/// Split an input line into words, honoring double quotes and backslash
/// escapes. Quoted sequences become a single word, escapes pass the next
/// character through verbatim.
pub fn parse_into_words(input: &str) -> Vec<String> {
    let mut in_quotes = false;
    let mut escaped = false;

    let accumulate = |mut acc: Vec<String>, c| {
        if escaped {
            if let Some(last) = acc.last_mut() {
                last.push(c);
            } else {
                acc.push(c.to_string());
            }
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        } else if c.is_whitespace() && !in_quotes {
            if let Some(last) = acc.last() {
                if !last.is_empty() {
                    acc.push(String::new());
                }
            }
        } else if let Some(last) = acc.last_mut() {
            last.push(c);
        } else {
            acc.push(c.to_string());
        }
        acc
    };

    let words = input.chars().fold(vec![], accumulate);
    words.into_iter().filter(|w| !w.is_empty()).collect()
}

/// Split an input line at the first run of whitespace, yielding the command
/// word and the args remainder verbatim. The command word is lowercased for
/// matching; args keep their exact spelling and spacing.
pub fn split_command_line(input: &str) -> (String, String) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(ix) => (
            input[..ix].to_lowercase(),
            input[ix..].trim_start().to_string(),
        ),
        None => (input.to_lowercase(), String::new()),
    }
}
