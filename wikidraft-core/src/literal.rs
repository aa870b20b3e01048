//! Recovery of structured data from hand-written TypeScript literals.
//!
//! The site's data document declares its entries as
//! `export const NAME: Type = [ ... ];` using relaxed syntax: unquoted keys,
//! trailing commas, single/backtick quoted strings, comments and an
//! `as const` modifier. [`extract`] locates the bracketed literal with a
//! string- and comment-aware scanner, [`normalize`] rewrites it into strict
//! JSON and [`parse`] decodes it with `serde_json`.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::contract::ExistingEntries;
use crate::error::LiteralDecodeError;

/// Which bracket pair delimits the wanted literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Array,
    Object,
}

impl LiteralKind {
    fn brackets(self) -> (u8, u8) {
        match self {
            LiteralKind::Array => (b'[', b']'),
            LiteralKind::Object => (b'{', b'}'),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    LineComment,
    BlockComment,
    InString(u8),
}

/// Return the raw literal assigned to `export const <name>`, brackets included.
///
/// `None` when the declaration, the assignment or a balanced literal of the
/// requested kind cannot be found.
pub fn extract<'a>(source: &'a str, name: &str, kind: LiteralKind) -> Option<&'a str> {
    let start = find_declaration(source, name)?;
    let equals = start + source[start..].find('=')?;
    let (open, _) = kind.brackets();
    let literal_start = equals + source[equals..].bytes().position(|b| b == open)?;
    let literal_end = find_matching_bracket(source.as_bytes(), literal_start, kind)?;
    Some(&source[literal_start..=literal_end])
}

fn find_declaration(source: &str, name: &str) -> Option<usize> {
    let declaration = format!("export const {name}");
    let mut from = 0;
    while let Some(pos) = source[from..].find(&declaration) {
        let at = from + pos;
        let after = at + declaration.len();
        // PROJECTS_DATA must not match PROJECTS_DATA_V2
        let continues_identifier = source[after..]
            .chars()
            .next()
            .map(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
            .unwrap_or(false);
        if !continues_identifier {
            return Some(at);
        }
        from = after;
    }
    None
}

/// Index of the bracket closing the one at `start`, or `None` if the input
/// ends first (unbalanced brackets, unterminated string or comment).
fn find_matching_bracket(bytes: &[u8], start: usize, kind: LiteralKind) -> Option<usize> {
    let (open, close) = kind.brackets();
    let mut depth: usize = 0;
    let mut state = ScanState::Normal;
    let mut escaped = false;

    let mut i = start;
    while i < bytes.len() {
        let ch = bytes[i];
        let next = bytes.get(i + 1).copied();

        match state {
            ScanState::LineComment => {
                if ch == b'\n' {
                    state = ScanState::Normal;
                }
            }
            ScanState::BlockComment => {
                if ch == b'*' && next == Some(b'/') {
                    state = ScanState::Normal;
                    i += 1;
                }
            }
            ScanState::InString(quote) => {
                if escaped {
                    escaped = false;
                } else if ch == b'\\' {
                    escaped = true;
                } else if ch == quote {
                    state = ScanState::Normal;
                }
            }
            ScanState::Normal => {
                if ch == b'/' && next == Some(b'/') {
                    state = ScanState::LineComment;
                    i += 1;
                } else if ch == b'/' && next == Some(b'*') {
                    state = ScanState::BlockComment;
                    i += 1;
                } else if matches!(ch, b'"' | b'\'' | b'`') {
                    state = ScanState::InString(ch);
                } else if ch == open {
                    depth += 1;
                } else if ch == close {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(i);
                    }
                }
            }
        }
        i += 1;
    }
    None
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Rewrite a relaxed literal into strict JSON text.
///
/// Comments are dropped, `as const` is removed, bare keys are quoted,
/// single-quoted and backtick strings become double-quoted (template
/// interpolations stay literal text) and trailing commas are removed.
pub fn normalize(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + raw.len() / 8);
    let mut state = ScanState::Normal;
    let mut escaped = false;

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            ScanState::LineComment => {
                if ch == '\n' {
                    out.push('\n');
                    state = ScanState::Normal;
                }
                i += 1;
            }
            ScanState::BlockComment => {
                if ch == '*' && next == Some('/') {
                    // keep the tokens on either side apart
                    out.push(' ');
                    state = ScanState::Normal;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            ScanState::InString(quote) => {
                let quote = quote as char;
                if escaped {
                    escaped = false;
                    match ch {
                        // valid in JS, not in JSON
                        '\'' | '`' | '$' => out.push(ch),
                        '\n' => {}
                        _ => {
                            out.push('\\');
                            out.push(ch);
                        }
                    }
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == quote {
                    out.push('"');
                    state = ScanState::Normal;
                } else {
                    push_string_char(&mut out, ch);
                }
                i += 1;
            }
            ScanState::Normal => {
                if ch == '/' && next == Some('/') {
                    state = ScanState::LineComment;
                    i += 2;
                } else if ch == '/' && next == Some('*') {
                    state = ScanState::BlockComment;
                    i += 2;
                } else if matches!(ch, '"' | '\'' | '`') {
                    state = ScanState::InString(ch as u8);
                    out.push('"');
                    i += 1;
                } else if ch == ']' || ch == '}' {
                    drop_trailing_comma(&mut out);
                    out.push(ch);
                    i += 1;
                } else if is_ident_start(ch) {
                    let end = (i..chars.len())
                        .find(|&j| !is_ident_char(chars[j]))
                        .unwrap_or(chars.len());
                    let word: String = chars[i..end].iter().collect();
                    let after = skip_whitespace(&chars, end);

                    if word == "as" && starts_with_word(&chars, after, "const") {
                        i = after + "const".len();
                        continue;
                    }

                    let prev = out.trim_end().chars().last();
                    let is_key = matches!(prev, Some('{') | Some(','))
                        && chars.get(after) == Some(&':');
                    if is_key {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                    } else {
                        out.push_str(&word);
                    }
                    i = end;
                } else {
                    out.push(ch);
                    i += 1;
                }
            }
        }
    }
    out
}

fn push_string_char(out: &mut String, ch: char) {
    match ch {
        '"' => out.push_str("\\\""),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
        c => out.push(c),
    }
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.remove(trimmed_len - 1);
    }
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn starts_with_word(chars: &[char], at: usize, word: &str) -> bool {
    let len = word.chars().count();
    if at + len > chars.len() {
        return false;
    }
    let matches = chars[at..at + len].iter().copied().eq(word.chars());
    let bounded = chars.get(at + len).map_or(true, |&c| !is_ident_char(c));
    matches && bounded
}

/// Normalize and strictly decode a raw literal.
pub fn parse(raw: &str) -> Result<Value, LiteralDecodeError> {
    let normalized = normalize(raw);
    serde_json::from_str(&normalized).map_err(|e| {
        let snippet = snippet_at(&normalized, e.line(), e.column());
        LiteralDecodeError {
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
            snippet,
        }
    })
}

fn snippet_at(text: &str, line: usize, column: usize) -> String {
    let Some(line_text) = text.lines().nth(line.saturating_sub(1)) else {
        return String::new();
    };
    let chars: Vec<char> = line_text.chars().collect();
    let col = column.saturating_sub(1).min(chars.len());
    let from = col.saturating_sub(30);
    let to = (col + 30).min(chars.len());
    let window: String = chars[from..to].iter().collect();
    window.trim().to_string()
}

/// Declaration names of the two literals read from the data document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationNames {
    pub projects: String,
    pub tech_dives: String,
}

impl Default for DeclarationNames {
    fn default() -> Self {
        Self {
            projects: "PROJECTS_DATA".to_string(),
            tech_dives: "TECHNOLOGY_DEEP_DIVES".to_string(),
        }
    }
}

/// Parse the project entries and technology deep dives out of `source`.
///
/// Never fails: missing declarations and decode errors degrade to empty
/// collections with a warning.
pub fn parse_existing_entries(source: &str, names: &DeclarationNames) -> ExistingEntries {
    let mut entries = ExistingEntries::default();

    match extract(source, &names.projects, LiteralKind::Array).map(parse) {
        Some(Ok(Value::Array(projects))) => entries.projects = projects,
        Some(Ok(other)) => {
            warn!(
                declaration = %names.projects,
                kind = %json_kind(&other),
                "Expected an array literal, ignoring"
            );
        }
        Some(Err(e)) => {
            warn!(declaration = %names.projects, error = %e, "Could not parse project entries");
        }
        None => debug!(declaration = %names.projects, "Declaration not found"),
    }

    match extract(source, &names.tech_dives, LiteralKind::Object).map(parse) {
        Some(Ok(Value::Object(dives))) => entries.tech_dives = dives,
        Some(Ok(other)) => {
            warn!(
                declaration = %names.tech_dives,
                kind = %json_kind(&other),
                "Expected an object literal, ignoring"
            );
        }
        Some(Err(e)) => {
            warn!(
                declaration = %names.tech_dives,
                error = %e,
                "Could not parse technology deep dives"
            );
        }
        None => debug!(declaration = %names.tech_dives, "Declaration not found"),
    }

    entries
}

/// Read the data document at `path` once and parse its entries.
///
/// A missing or unreadable file yields empty entries.
pub fn load_existing_entries(path: &Path, names: &DeclarationNames) -> ExistingEntries {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Existing entries document not readable, starting fresh"
            );
            return ExistingEntries::default();
        }
    };
    let entries = parse_existing_entries(&content, names);
    info!(
        path = %path.display(),
        projects = entries.projects.len(),
        tech_dives = entries.tech_dives.len(),
        "Loaded existing entries"
    );
    entries
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
