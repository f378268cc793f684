//! GDB/MI value grammar
//!
//! MI replies carry a recursive grammar of quoted string constants,
//! `{...}` tuples and `[...]` lists. Both aggregate forms map onto one
//! [`MiValue::Composite`] of ordered entries; list elements simply have no
//! key. Lookups never fail: [`MiValue::locate`] on a missing key (or on an
//! atom) returns `None`, so call sites can chain lookups over replies of
//! unexpected shape.

use serde::{Deserialize, Serialize};

/// Error raised when MI value or record text does not follow the grammar.
///
/// Parse failures are local to the offending line; the session layer logs
/// them and keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MiError {
    #[error("malformed MI value at byte {at}")]
    Malformed { at: usize },
}

impl MiError {
    fn shift(self, base: usize) -> Self {
        match self {
            MiError::Malformed { at } => MiError::Malformed { at: at + base },
        }
    }
}

/// One entry of a composite: an optional key and a nested value.
///
/// Tuple entries and keyed list elements carry `Some(key)`; positional
/// list elements carry `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Option<String>,
    pub value: MiValue,
}

/// A parsed MI value: a decoded string constant or an ordered aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiValue {
    Atom(String),
    Composite(Vec<Entry>),
}

impl MiValue {
    /// Parse one value from the front of `input`, returning it along with
    /// the number of bytes consumed so the caller can continue with the
    /// sibling sequence.
    pub fn parse(input: &str) -> Result<(MiValue, usize), MiError> {
        match input.as_bytes().first().copied() {
            Some(b'"') => parse_atom(input),
            Some(b'{') | Some(b'[') => parse_composite(input),
            _ => Err(MiError::Malformed { at: 0 }),
        }
    }

    /// First entry of a composite whose key equals `key`.
    ///
    /// Duplicate keys resolve to the first match (source order). On an
    /// atom this is always `None`; shape mismatches degrade to an absent
    /// lookup instead of an error.
    pub fn locate(&self, key: &str) -> Option<&MiValue> {
        match self {
            MiValue::Composite(entries) => entries
                .iter()
                .find(|e| e.key.as_deref() == Some(key))
                .map(|e| &e.value),
            MiValue::Atom(_) => None,
        }
    }

    /// Decoded payload of an atom.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MiValue::Atom(s) => Some(s),
            MiValue::Composite(_) => None,
        }
    }

    /// Decoded payload, or `""` when the value is not an atom.
    ///
    /// The empty-string fallback lets `locate(..).map(MiValue::text)`
    /// chains read optional reply fields without case analysis.
    pub fn text(&self) -> &str {
        self.as_text().unwrap_or("")
    }

    /// Entries of a composite; empty for an atom.
    pub fn entries(&self) -> &[Entry] {
        match self {
            MiValue::Composite(entries) => entries,
            MiValue::Atom(_) => &[],
        }
    }
}

/// Decode a quoted string constant with C-style escapes.
///
/// Handles `\\ \a \b \f \n \r \t \' \"`, octal `\ddd` (1-3 digits) and hex
/// `\xHH` (1-2 digits). An unknown escape drops the backslash and keeps the
/// next character literal. Bytes accumulate raw and are decoded as UTF-8 at
/// the closing quote; the consumed length includes both quotes.
fn parse_atom(input: &str) -> Result<(MiValue, usize), MiError> {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::new();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let text = String::from_utf8_lossy(&out).into_owned();
                return Ok((MiValue::Atom(text), i + 1));
            }
            b'\\' => {
                i += 1;
                let Some(&esc) = bytes.get(i) else {
                    return Err(MiError::Malformed { at: i });
                };
                match esc {
                    b'\\' => {
                        out.push(b'\\');
                        i += 1;
                    }
                    b'a' => {
                        out.push(0x07);
                        i += 1;
                    }
                    b'b' => {
                        out.push(0x08);
                        i += 1;
                    }
                    b'f' => {
                        out.push(0x0c);
                        i += 1;
                    }
                    b'n' => {
                        out.push(b'\n');
                        i += 1;
                    }
                    b'r' => {
                        out.push(b'\r');
                        i += 1;
                    }
                    b't' => {
                        out.push(b'\t');
                        i += 1;
                    }
                    b'\'' => {
                        out.push(b'\'');
                        i += 1;
                    }
                    b'"' => {
                        out.push(b'"');
                        i += 1;
                    }
                    b'0'..=b'7' => {
                        let mut v: u32 = 0;
                        let mut n = 0;
                        while n < 3 && matches!(bytes.get(i), Some(&(b'0'..=b'7'))) {
                            v = (v << 3) | u32::from(bytes[i] - b'0');
                            i += 1;
                            n += 1;
                        }
                        out.push(v as u8);
                    }
                    b'x' => {
                        i += 1;
                        let mut v: u32 = 0;
                        let mut n = 0;
                        while n < 2 && bytes.get(i).is_some_and(|b| b.is_ascii_hexdigit()) {
                            v = (v << 4) | (bytes[i] as char).to_digit(16).unwrap_or(0);
                            i += 1;
                            n += 1;
                        }
                        out.push(v as u8);
                    }
                    // Unknown escape: leave the character for the next
                    // round, which pushes it literally.
                    _ => {}
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    // Ran off the end without a closing quote.
    Err(MiError::Malformed { at: bytes.len() })
}

/// Decode a `{...}` tuple or `[...]` list into a composite.
///
/// A list whose first element is itself a value (rather than `key=`) is
/// treated as wholly unkeyed; otherwise every element must be `key=value`.
fn parse_composite(input: &str) -> Result<(MiValue, usize), MiError> {
    let bytes = input.as_bytes();
    let is_list = bytes[0] == b'[';
    let term = if is_list { b']' } else { b'}' };
    let unkeyed = is_list && matches!(bytes.get(1).copied(), Some(b'"' | b'{' | b'['));

    let mut entries = Vec::new();
    let mut i = 1;
    loop {
        match bytes.get(i) {
            None => return Err(MiError::Malformed { at: i }),
            Some(&b) if b == term => return Ok((MiValue::Composite(entries), i + 1)),
            Some(_) => {}
        }
        let key = if unkeyed {
            None
        } else {
            let eq = input[i..].find('=').ok_or(MiError::Malformed { at: i })?;
            let key = input[i..i + eq].to_string();
            i += eq + 1;
            Some(key)
        };
        let (value, used) = MiValue::parse(&input[i..]).map_err(|e| e.shift(i))?;
        i += used;
        entries.push(Entry { key, value });
        if bytes.get(i) == Some(&b',') {
            i += 1;
        }
    }
}
