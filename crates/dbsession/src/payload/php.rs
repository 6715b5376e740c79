//! Decoder for PHP session payloads.
//!
//! Two layouts exist, selected on the host by `session.serialize_handler`:
//!
//! - `php`: `name|<value>name|<value>...`, one serialized value per
//!   session variable. A `!name|` entry marks an unset variable and has no
//!   value.
//! - `php_serialize`: the whole payload is a single serialized array.
//!
//! Values follow the `serialize()` grammar: `N;`, `b:1;`, `i:42;`,
//! `d:0.5;`, `s:3:"abc";`, `a:1:{...}`, `O:8:"stdClass":1:{...}`,
//! `C:3:"Foo":2:{..}`, `E:7:"Foo:Bar";` and the `r:`/`R:` back-references.
//! String lengths count bytes, not characters.

use std::collections::BTreeMap;

use super::{PayloadKey, PayloadValue};
use crate::error::PayloadError;

/// Deepest nesting of arrays/objects accepted before giving up.
const MAX_DEPTH: usize = 64;

type Result<T> = std::result::Result<T, PayloadError>;

/// Decode a `php` handler payload.
pub(crate) fn decode_session(input: &[u8]) -> Result<BTreeMap<String, PayloadValue>> {
    let mut parser = Parser::new(input);
    let mut fields = BTreeMap::new();

    while !parser.at_end() {
        let undefined = parser.eat(b'!');
        let name_start = parser.pos;
        let name = parser.take_until(b'|')?;
        if name.is_empty() {
            return Err(PayloadError::new(name_start, "empty variable name"));
        }
        let name = String::from_utf8_lossy(name).into_owned();
        if undefined {
            continue;
        }
        let value = parser.value(0)?;
        fields.insert(name, value);
    }

    Ok(fields)
}

/// Decode a `php_serialize` handler payload.
pub(crate) fn decode_serialized(input: &[u8]) -> Result<BTreeMap<String, PayloadValue>> {
    if input.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut parser = Parser::new(input);
    let value = parser.value(0)?;
    if !parser.at_end() {
        return Err(PayloadError::new(parser.pos, "trailing bytes after value"));
    }
    match value {
        PayloadValue::Array(entries) => Ok(entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()),
        _ => Err(PayloadError::new(0, "payload is not an array")),
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, reason: impl Into<String>) -> PayloadError {
        PayloadError::new(self.pos, reason)
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", byte as char)))
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end of payload"))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Bytes up to (not including) `delim`; consumes the delimiter.
    fn take_until(&mut self, delim: u8) -> Result<&'a [u8]> {
        let rest = &self.input[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == delim)
            .ok_or_else(|| self.error(format!("missing '{}'", delim as char)))?;
        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| self.error("length runs past end of payload"))?;
        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn int_until(&mut self, delim: u8) -> Result<i64> {
        let start = self.pos;
        let text = self.take_until(delim)?;
        std::str::from_utf8(text)
            .ok()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| PayloadError::new(start, "invalid integer"))
    }

    fn len_until(&mut self, delim: u8) -> Result<usize> {
        let start = self.pos;
        let n = self.int_until(delim)?;
        usize::try_from(n).map_err(|_| PayloadError::new(start, "negative length"))
    }

    /// `<len>:"<bytes>"`
    fn quoted(&mut self) -> Result<&'a [u8]> {
        let len = self.len_until(b':')?;
        self.expect(b'"')?;
        let bytes = self.take(len)?;
        self.expect(b'"')?;
        Ok(bytes)
    }

    fn value(&mut self, depth: usize) -> Result<PayloadValue> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        let tag = self.next_byte()?;
        if tag == b'N' {
            self.expect(b';')?;
            return Ok(PayloadValue::Null);
        }
        self.expect(b':')?;

        match tag {
            b'b' => {
                let flag = self.next_byte()?;
                self.expect(b';')?;
                match flag {
                    b'0' => Ok(PayloadValue::Bool(false)),
                    b'1' => Ok(PayloadValue::Bool(true)),
                    _ => Err(self.error("invalid boolean")),
                }
            }
            b'i' => Ok(PayloadValue::Int(self.int_until(b';')?)),
            b'd' => {
                let start = self.pos;
                let text = self.take_until(b';')?;
                parse_float(text)
                    .map(PayloadValue::Float)
                    .ok_or_else(|| PayloadError::new(start, "invalid float"))
            }
            b's' => {
                let bytes = self.quoted()?;
                self.expect(b';')?;
                Ok(PayloadValue::String(lossy(bytes)))
            }
            b'E' => {
                let bytes = self.quoted()?;
                self.expect(b';')?;
                Ok(PayloadValue::Enum(lossy(bytes)))
            }
            b'r' | b'R' => Ok(PayloadValue::Reference(self.int_until(b';')?)),
            b'a' => Ok(PayloadValue::Array(self.entries(depth)?)),
            b'O' => {
                let class = lossy(self.quoted()?);
                self.expect(b':')?;
                let fields = self.entries(depth)?;
                Ok(PayloadValue::Object { class, fields })
            }
            b'C' => {
                let class = lossy(self.quoted()?);
                self.expect(b':')?;
                let len = self.len_until(b':')?;
                self.expect(b'{')?;
                let data = self.take(len)?.to_vec();
                self.expect(b'}')?;
                Ok(PayloadValue::Custom { class, data })
            }
            other => Err(PayloadError::new(
                self.pos - 2,
                format!("unknown type tag '{}'", other as char),
            )),
        }
    }

    /// `<count>:{<key><value>...}`
    fn entries(&mut self, depth: usize) -> Result<Vec<(PayloadKey, PayloadValue)>> {
        let count = self.len_until(b':')?;
        self.expect(b'{')?;
        // Each entry needs at least four bytes; cap the preallocation.
        let mut entries = Vec::with_capacity(count.min(self.input.len() / 4));
        for _ in 0..count {
            let key = match self.value(depth + 1)? {
                PayloadValue::Int(i) => PayloadKey::Int(i),
                PayloadValue::String(s) => PayloadKey::Str(s),
                _ => return Err(self.error("array key must be an int or string")),
            };
            let value = self.value(depth + 1)?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        Ok(entries)
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_float(text: &[u8]) -> Option<f64> {
    match text {
        b"INF" => Some(f64::INFINITY),
        b"-INF" => Some(f64::NEG_INFINITY),
        b"NAN" => Some(f64::NAN),
        _ => std::str::from_utf8(text).ok()?.parse().ok(),
    }
}
