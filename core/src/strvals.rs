//! Parser for `--set` style value overrides.
//!
//! Accepts comma-separated `key=value` pairs where keys may be dotted paths
//! (`persistence.enabled=false`) or indexed lists (`hosts[0]=a`), and values
//! may be brace lists (`ports={80,443}`). A backslash escapes the next
//! character in both keys and values.

use serde_json::{Map, Value};

use crate::error::{Result, ScanError};

/// Largest list index accepted in an expression.
const MAX_INDEX: usize = 65536;

/// Parse a `--set` expression into a fresh map.
pub fn parse(expr: &str) -> Result<Map<String, Value>> {
    let mut values = Map::new();
    parse_into(expr, &mut values)?;
    Ok(values)
}

/// Parse a `--set` expression, merging the result into `dest`.
pub fn parse_into(expr: &str, dest: &mut Map<String, Value>) -> Result<()> {
    let mut parser = Parser::new(expr);
    while !parser.at_end() {
        parser.key(dest)?;
    }
    Ok(())
}

/// Convert a raw value to bool, null or integer where it reads as one.
///
/// Integers with a leading zero stay strings so that values such as
/// `0755` or zip codes survive untouched.
pub fn typed_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if raw == "0" {
        return Value::from(0i64);
    }
    if !raw.starts_with('0') {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::from(n);
        }
    }
    Value::String(raw.to_string())
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(expr: &str) -> Self {
        Self {
            chars: expr.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Read until one of `stops`, consuming the stop character.
    fn run_until(&mut self, stops: &[char]) -> (String, Option<char>) {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\\' {
                if let Some(escaped) = self.peek() {
                    self.pos += 1;
                    out.push(escaped);
                }
                continue;
            }
            if stops.contains(&c) {
                return (out, Some(c));
            }
            out.push(c);
        }
        (out, None)
    }

    fn key(&mut self, data: &mut Map<String, Value>) -> Result<()> {
        let (key, stop) = self.run_until(&['=', '[', ',', '.']);
        match stop {
            None if key.is_empty() => Ok(()),
            None | Some(',') => Err(ScanError::ValuesError(format!(
                "key \"{key}\" has no value"
            ))),
            Some('=') => {
                let value = self.value()?;
                data.insert(key, value);
                Ok(())
            }
            Some('.') => {
                let mut child = match data.remove(&key) {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                self.key(&mut child)?;
                data.insert(key, Value::Object(child));
                Ok(())
            }
            Some('[') => {
                let index = self.index()?;
                let list = match data.remove(&key) {
                    Some(Value::Array(list)) => list,
                    _ => Vec::new(),
                };
                let list = self.list_item(list, index)?;
                data.insert(key, Value::Array(list));
                Ok(())
            }
            Some(other) => Err(ScanError::ValuesError(format!(
                "unexpected character '{other}' after key \"{key}\""
            ))),
        }
    }

    /// Value after `=`: either a brace list or a scalar up to the next comma.
    fn value(&mut self) -> Result<Value> {
        if self.peek() == Some('{') {
            self.pos += 1;
            let items = self.brace_list()?;
            if self.peek() == Some(',') {
                self.pos += 1;
            }
            return Ok(Value::Array(items));
        }
        let (raw, _) = self.run_until(&[',']);
        Ok(typed_value(&raw))
    }

    fn brace_list(&mut self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            let (raw, stop) = self.run_until(&[',', '}']);
            match stop {
                Some(',') => items.push(typed_value(&raw)),
                Some('}') => {
                    if !(raw.is_empty() && items.is_empty()) {
                        items.push(typed_value(&raw));
                    }
                    return Ok(items);
                }
                _ => {
                    return Err(ScanError::ValuesError(
                        "list must terminate with '}'".to_string(),
                    ))
                }
            }
        }
    }

    fn index(&mut self) -> Result<usize> {
        let (raw, stop) = self.run_until(&[']']);
        if stop.is_none() {
            return Err(ScanError::ValuesError(format!(
                "unterminated index \"[{raw}\""
            )));
        }
        let index: usize = raw.trim().parse().map_err(|_| {
            ScanError::ValuesError(format!("invalid list index \"{raw}\""))
        })?;
        if index > MAX_INDEX {
            return Err(ScanError::ValuesError(format!(
                "list index {index} exceeds the limit of {MAX_INDEX}"
            )));
        }
        Ok(index)
    }

    fn list_item(&mut self, mut list: Vec<Value>, index: usize) -> Result<Vec<Value>> {
        if list.len() <= index {
            list.resize(index + 1, Value::Null);
        }
        match self.peek() {
            Some('=') => {
                self.pos += 1;
                list[index] = self.value()?;
            }
            Some('.') => {
                self.pos += 1;
                let mut child = match std::mem::take(&mut list[index]) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                self.key(&mut child)?;
                list[index] = Value::Object(child);
            }
            Some('[') => {
                self.pos += 1;
                let inner_index = self.index()?;
                let inner = match std::mem::take(&mut list[index]) {
                    Value::Array(inner) => inner,
                    _ => Vec::new(),
                };
                list[index] = Value::Array(self.list_item(inner, inner_index)?);
            }
            other => {
                return Err(ScanError::ValuesError(format!(
                    "unexpected {} after list index {index}",
                    other.map(|c| format!("'{c}'")).unwrap_or_else(|| "end of input".to_string())
                )))
            }
        }
        Ok(list)
    }
}
