// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-auth prompt extraction.
//!
//! The codex login subprocess prints a verification URL and a user code
//! somewhere in its (ANSI-colored) output. This is a small state machine
//! over stripped lines; it reports once when both pieces have been seen.

/// Remove ANSI escape sequences (CSI and OSC forms).
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            // CSI: ESC [ … final byte in @-~
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: ESC ] … BEL or ESC \
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            // Two-character escape
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

/// First `https://…` token on the line.
fn find_url(line: &str) -> Option<String> {
    let start = line.find("https://")?;
    let token: String = line[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '"' && *c != '\'')
        .collect();
    let trimmed = token.trim_end_matches(['.', ',', ')', ']']);
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A user code shaped `XXXX-XXXX`: two groups of 4–8 uppercase
/// alphanumerics joined by a dash.
fn find_code(line: &str) -> Option<String> {
    let is_code_char = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit();
    for (i, _) in line.match_indices('-') {
        let left: String =
            line[..i].chars().rev().take_while(|&c| is_code_char(c)).collect();
        let right: String = line[i + 1..].chars().take_while(|&c| is_code_char(c)).collect();
        if (4..=8).contains(&left.len()) && (4..=8).contains(&right.len()) {
            let left: String = left.chars().rev().collect();
            return Some(format!("{left}-{right}"));
        }
    }
    None
}

/// What the user must be shown to complete the login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthPrompt {
    pub url: String,
    pub code: String,
}

/// Feed subprocess output lines; yields the prompt exactly once.
#[derive(Debug, Default)]
pub struct DeviceAuthParser {
    url: Option<String>,
    code: Option<String>,
    reported: bool,
}

impl DeviceAuthParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw output line. Returns the prompt when both URL and
    /// code have been observed for the first time.
    pub fn feed(&mut self, raw_line: &str) -> Option<DeviceAuthPrompt> {
        if self.reported {
            return None;
        }
        let line = strip_ansi(raw_line);
        if self.url.is_none() {
            self.url = find_url(&line);
        }
        if self.code.is_none() {
            self.code = find_code(&line);
        }
        match (&self.url, &self.code) {
            (Some(url), Some(code)) => {
                self.reported = true;
                Some(DeviceAuthPrompt { url: url.clone(), code: code.clone() })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "device_auth_tests.rs"]
mod tests;
