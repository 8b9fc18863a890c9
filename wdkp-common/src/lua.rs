//! Lua table-literal decoder for addon SavedVariables dumps
//!
//! Addons persist their state as a sequence of top-level assignments:
//!
//! ```text
//! MonDKP_DKPTable = {
//! {
//! ["player"] = "Thrall",
//! ["dkp"] = 120, -- [1]
//! },
//! }
//! ```
//!
//! Only literals are understood: strings, numbers, booleans, `nil` and nested
//! tables. There are no expressions, functions or metatables.
//!
//! # Tolerance
//! The input is split into one block per top-level assignment and every block
//! is decoded on its own. A block that fails to decode is dropped (and
//! logged), the remaining variables are still returned. Only when nothing at
//! all decodes does [`parse`] fail with [`ParseError::NoBlocks`].
//!
//! # Comments
//! `--` outside a string starts a comment that runs to the end of the line,
//! which covers the `-- [n]` index annotations the game client writes.
//! `--[[ ... ]]` long comments are skipped as a whole.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default bound on table nesting
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Decoded document: top-level variable name → value, in source order
pub type Document = IndexMap<String, Value>;

/// A decoded Lua literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Table with explicit, non-sequential keys (numeric keys kept as text)
    Map(IndexMap<String, Value>),
    /// Table whose keys are absent or exactly `1..n`
    Sequence(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of integers and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view; floats with no fractional part are accepted
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Value::Map(_) | Value::Sequence(_))
    }

    /// Field lookup on a map; sequences answer to their 1-based index text
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            Value::Sequence(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Table entries as `(key, value)` pairs; sequence keys are `"1"`, `"2"`, ...
    pub fn entries(&self) -> Vec<(String, &Value)> {
        match self {
            Value::Map(m) => m.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| ((i + 1).to_string(), v))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Table values in order regardless of table shape
    pub fn members(&self) -> Members<'_> {
        match self {
            Value::Map(m) => Members::Map(m.values()),
            Value::Sequence(items) => Members::Sequence(items.iter()),
            _ => Members::Empty,
        }
    }
}

/// Iterator over the values of a table
pub enum Members<'a> {
    Map(indexmap::map::Values<'a, String, Value>),
    Sequence(std::slice::Iter<'a, Value>),
    Empty,
}

impl<'a> Iterator for Members<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Members::Map(it) => it.next(),
            Members::Sequence(it) => it.next(),
            Members::Empty => None,
        }
    }
}

/// Parser errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Nothing in the input decoded
    #[error("no decodable assignment blocks in input")]
    NoBlocks,

    /// A block is syntactically broken or nested too deeply
    #[error("malformed input at line {line}: {message}")]
    MalformedInput { line: usize, message: String },
}

/// Parser tuning
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    /// Maximum table nesting before a block is rejected
    pub max_depth: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Parse a dump with default options
pub fn parse(text: &str) -> Result<Document, ParseError> {
    parse_with(text, &ParserOptions::default())
}

/// Parse a dump, decoding each top-level assignment independently
pub fn parse_with(text: &str, options: &ParserOptions) -> Result<Document, ParseError> {
    let mut document = Document::new();
    let mut dropped = 0usize;

    for block in split_blocks(text) {
        match decode_block(block.text, block.line, options) {
            Ok((name, Some(value))) => {
                document.insert(name, value);
            }
            Ok((name, None)) => {
                debug!(variable = %name, "Skipping nil top-level assignment");
            }
            Err(e) => {
                dropped += 1;
                warn!(variable = block.name, error = %e, "Dropping undecodable top-level block");
            }
        }
    }

    debug!(
        variables = document.len(),
        dropped = dropped,
        "Parsed addon dump"
    );

    if document.is_empty() {
        return Err(ParseError::NoBlocks);
    }
    Ok(document)
}

/// One `name = ...` region of the input
struct Block<'a> {
    name: &'a str,
    line: usize,
    text: &'a str,
}

/// Split input at every line that starts (column 0) with `identifier =`
fn split_blocks(text: &str) -> Vec<Block<'_>> {
    let mut starts: Vec<(usize, usize, &str)> = Vec::new();
    let mut offset = 0usize;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        if let Some(name) = assignment_name(line) {
            starts.push((offset, index + 1, name));
        }
        offset += line.len();
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &(start, line, name))| {
            let end = starts.get(i + 1).map(|s| s.0).unwrap_or(text.len());
            Block {
                name,
                line,
                text: &text[start..end],
            }
        })
        .collect()
}

/// Variable name if the line opens a top-level assignment
fn assignment_name(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    if !bytes.first().is_some_and(|b| is_ident_start(*b)) {
        return None;
    }
    let end = bytes
        .iter()
        .position(|b| !is_ident_continue(*b))
        .unwrap_or(bytes.len());
    let name = &line[..end];
    if is_keyword(name) {
        return None;
    }
    let rest = line[end..].trim_start_matches([' ', '\t']);
    if rest.starts_with('=') && !rest.starts_with("==") {
        Some(name)
    } else {
        None
    }
}

fn decode_block(
    text: &str,
    first_line: usize,
    options: &ParserOptions,
) -> Result<(String, Option<Value>), ParseError> {
    let mut decoder = Decoder::new(text, first_line, options.max_depth);
    decoder.skip_trivia()?;
    let name = decoder
        .identifier()
        .ok_or_else(|| decoder.error("expected variable name"))?;
    decoder.skip_trivia()?;
    decoder.expect(b'=')?;
    let value = decoder.value(0)?;
    decoder.skip_trivia()?;
    if !decoder.at_end() {
        return Err(decoder.error("unexpected content after value"));
    }
    Ok((name, value))
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_keyword(word: &str) -> bool {
    matches!(word, "true" | "false" | "nil")
}

/// Table key as written
enum Key {
    Positional,
    Integer(i64),
    Text(String),
}

/// Recursive-descent decoder over one block
struct Decoder<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    max_depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(text: &'a str, first_line: usize, max_depth: usize) -> Self {
        Self {
            src: text.as_bytes(),
            pos: 0,
            line: first_line,
            max_depth,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::MalformedInput {
            line: self.line,
            message: message.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn expect(&mut self, want: u8) -> Result<(), ParseError> {
        match self.bump() {
            Some(b) if b == want => Ok(()),
            Some(b) => Err(self.error(format!(
                "expected '{}', found '{}'",
                want as char, b as char
            ))),
            None => Err(self.error(format!("expected '{}', found end of input", want as char))),
        }
    }

    /// Skip whitespace and comments
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    if self.peek() == Some(b'[') && self.peek_at(1) == Some(b'[') {
                        self.skip_long_comment()?;
                    } else {
                        while let Some(b) = self.peek() {
                            if b == b'\n' {
                                break;
                            }
                            self.bump();
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_long_comment(&mut self) -> Result<(), ParseError> {
        self.pos += 2;
        loop {
            match self.bump() {
                Some(b']') if self.peek() == Some(b']') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.error("unterminated long comment")),
            }
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        if !self.peek().is_some_and(is_ident_start) {
            return None;
        }
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        Some(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    /// Decode one value; `None` stands for `nil`
    fn value(&mut self, depth: usize) -> Result<Option<Value>, ParseError> {
        self.skip_trivia()?;
        match self.peek() {
            Some(b'{') => {
                if depth >= self.max_depth {
                    return Err(self.error(format!(
                        "tables nested deeper than {} levels",
                        self.max_depth
                    )));
                }
                self.table(depth + 1).map(Some)
            }
            Some(b'"') | Some(b'\'') => self.string().map(|s| Some(Value::String(s))),
            Some(b) if b == b'-' || b == b'.' || b.is_ascii_digit() => self.number().map(Some),
            Some(b) if is_ident_start(b) => {
                let word = self.identifier().unwrap_or_default();
                match word.as_str() {
                    "true" => Ok(Some(Value::Boolean(true))),
                    "false" => Ok(Some(Value::Boolean(false))),
                    "nil" => Ok(None),
                    other => Err(self.error(format!("unsupported bare word '{}'", other))),
                }
            }
            Some(b) => Err(self.error(format!("unexpected character '{}'", b as char))),
            None => Err(self.error("expected value, found end of input")),
        }
    }

    fn table(&mut self, depth: usize) -> Result<Value, ParseError> {
        self.expect(b'{')?;
        let mut fields: Vec<(Key, Option<Value>)> = Vec::new();

        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some(b'}') => {
                    self.bump();
                    break;
                }
                None => return Err(self.error("unterminated table")),
                _ => {}
            }

            let key = self.key()?;
            let value = self.value(depth)?;
            fields.push((key, value));

            self.skip_trivia()?;
            match self.peek() {
                Some(b',') | Some(b';') => {
                    self.bump();
                }
                Some(b'}') => {}
                Some(b) => {
                    return Err(self.error(format!(
                        "expected ',' or '}}' after table field, found '{}'",
                        b as char
                    )))
                }
                None => return Err(self.error("unterminated table")),
            }
        }

        Ok(shape_table(fields))
    }

    /// Read an optional `[key] =` or `name =` prefix
    fn key(&mut self) -> Result<Key, ParseError> {
        match self.peek() {
            Some(b'[') => {
                self.bump();
                let key = match self.value(0)? {
                    Some(Value::String(s)) => Key::Text(s),
                    Some(Value::Integer(i)) => Key::Integer(i),
                    Some(Value::Float(f)) => Key::Text(f.to_string()),
                    Some(Value::Boolean(b)) => Key::Text(b.to_string()),
                    _ => return Err(self.error("unsupported table key")),
                };
                self.skip_trivia()?;
                self.expect(b']')?;
                self.skip_trivia()?;
                self.expect(b'=')?;
                Ok(key)
            }
            Some(b) if is_ident_start(b) => {
                let (saved_pos, saved_line) = (self.pos, self.line);
                let word = self.identifier().unwrap_or_default();
                self.skip_trivia()?;
                if !is_keyword(&word) && self.peek() == Some(b'=') && self.peek_at(1) != Some(b'=')
                {
                    self.bump();
                    Ok(Key::Text(word))
                } else {
                    self.pos = saved_pos;
                    self.line = saved_line;
                    Ok(Key::Positional)
                }
            }
            _ => Ok(Key::Positional),
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let quote = self.bump().unwrap_or(b'"');
        let mut out: Vec<u8> = Vec::new();

        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(b'\n') => return Err(self.error("newline in string")),
                Some(b) if b == quote => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b'a') => out.push(0x07),
                    Some(b'b') => out.push(0x08),
                    Some(b'f') => out.push(0x0c),
                    Some(b'v') => out.push(0x0b),
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'"') => out.push(b'"'),
                    Some(b'\'') => out.push(b'\''),
                    Some(b'\n') => out.push(b'\n'),
                    Some(b'x') => {
                        let hi = self.bump().and_then(hex_digit);
                        let lo = self.bump().and_then(hex_digit);
                        match (hi, lo) {
                            (Some(h), Some(l)) => out.push(h * 16 + l),
                            _ => return Err(self.error("invalid \\x escape")),
                        }
                    }
                    Some(d) if d.is_ascii_digit() => {
                        let mut code = u32::from(d - b'0');
                        for _ in 0..2 {
                            match self.peek() {
                                Some(n) if n.is_ascii_digit() => {
                                    code = code * 10 + u32::from(n - b'0');
                                    self.bump();
                                }
                                _ => break,
                            }
                        }
                        let byte =
                            u8::try_from(code).map_err(|_| self.error("decimal escape too large"))?;
                        out.push(byte);
                    }
                    Some(other) => {
                        return Err(self.error(format!("invalid escape '\\{}'", other as char)))
                    }
                    None => return Err(self.error("unterminated string")),
                },
                Some(b) => out.push(b),
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
        }

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap_or("");
            let magnitude =
                i64::from_str_radix(digits, 16).map_err(|_| self.error("invalid hex number"))?;
            return Ok(Value::Integer(if negative { -magnitude } else { magnitude }));
        }

        let mut is_float = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => self.pos += 1,
                b'.' => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }

        let literal = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        if !is_float {
            if let Ok(i) = literal.parse::<i64>() {
                return Ok(Value::Integer(i));
            }
        }
        let value = literal
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number '{}'", literal)))?;
        if value.is_finite() {
            Ok(Value::Float(value))
        } else {
            // Out of f64 range: keep the source text so the document stays serializable
            debug!(literal = %literal, "Float literal out of range, kept as text");
            Ok(Value::String(literal.to_string()))
        }
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Decide between sequence and map for a decoded table
fn shape_table(fields: Vec<(Key, Option<Value>)>) -> Value {
    let mut next_positional = 1i64;
    let mut keyed: Vec<(Result<i64, String>, Option<Value>)> = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        let key = match key {
            Key::Positional => {
                let k = next_positional;
                next_positional += 1;
                Ok(k)
            }
            Key::Integer(i) => Ok(i),
            Key::Text(s) => Err(s),
        };
        keyed.push((key, value));
    }

    let is_sequence = !keyed.is_empty()
        && keyed
            .iter()
            .enumerate()
            .all(|(i, (k, v))| v.is_some() && matches!(k, Ok(n) if *n == i as i64 + 1));

    if is_sequence {
        return Value::Sequence(keyed.into_iter().filter_map(|(_, v)| v).collect());
    }

    let mut map = IndexMap::with_capacity(keyed.len());
    for (key, value) in keyed {
        let key = match key {
            Ok(n) => n.to_string(),
            Err(s) => s,
        };
        match value {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.shift_remove(&key);
            }
        }
    }
    Value::Map(map)
}
