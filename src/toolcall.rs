//! Restricted parser for tool-call parameter literals.
//!
//! Model output declares tool parameters as Python-like literals, either a
//! `key=value` list (`city='Paris', days=3`) or a dict literal
//! (`{'city': 'Paris'}`). The original runtime evaluated these with `eval`;
//! here a small recursive-descent grammar accepts strings, numbers, booleans,
//! `None`/`null`, lists and dicts, and nothing else. Anything outside the
//! grammar is a `MalformedToolCall`.

use serde_json::{Map, Number, Value};

use crate::error::ChatError;

/// Parse a parameter literal into a JSON object. Empty input parses to an
/// empty object.
pub fn parse_parameters(text: &str) -> Result<Value, ChatError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let mut parser = Parser::new(text);
    let value = if parser.peek() == Some('{') {
        parser.parse_value()?
    } else {
        parser.parse_kv_list()?
    };
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(malformed(format!(
            "trailing input at offset {}",
            parser.pos
        )));
    }
    match value {
        Value::Object(_) => Ok(value),
        other => Err(malformed(format!(
            "expected an object of parameters, got {other}"
        ))),
    }
}

fn malformed(message: impl Into<String>) -> ChatError {
    ChatError::MalformedToolCall(message.into())
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Parser {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), ChatError> {
        if self.bump() == Some(ch) {
            Ok(())
        } else {
            Err(malformed(format!(
                "expected '{ch}' at offset {}",
                self.pos.saturating_sub(1)
            )))
        }
    }

    /// Comma-separated `key=value` pairs.
    fn parse_kv_list(&mut self) -> Result<Value, ChatError> {
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            let key = self.parse_identifier()?;
            self.skip_whitespace();
            self.expect('=')?;
            self.skip_whitespace();
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_whitespace();
            if self.peek() == Some(',') {
                self.pos += 1;
            } else if !self.at_end() {
                return Err(malformed(format!(
                    "expected ',' between parameters at offset {}",
                    self.pos
                )));
            }
        }
        Ok(Value::Object(map))
    }

    fn parse_identifier(&mut self) -> Result<String, ChatError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(malformed(format!(
                "expected identifier at offset {start}"
            )));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_value(&mut self) -> Result<Value, ChatError> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') | Some('"') => self.parse_string().map(Value::String),
            Some('{') => self.parse_dict(),
            Some('[') => self.parse_list(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.parse_number(),
            Some(c) if c.is_alphabetic() => self.parse_word(),
            other => Err(malformed(format!("unexpected input: {other:?}"))),
        }
    }

    fn parse_string(&mut self) -> Result<String, ChatError> {
        let quote = self.bump().expect("peeked quote");
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(malformed("unterminated string literal")),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(malformed("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Value, ChatError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' || c == 'e' || c == 'E' {
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            let parsed: f64 = literal
                .parse()
                .map_err(|_| malformed(format!("bad number literal: {literal}")))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| malformed(format!("non-finite number: {literal}")))
        } else {
            let parsed: i64 = literal
                .parse()
                .map_err(|_| malformed(format!("bad number literal: {literal}")))?;
            Ok(Value::Number(parsed.into()))
        }
    }

    fn parse_word(&mut self) -> Result<Value, ChatError> {
        let word = self.parse_identifier()?;
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            other => Err(malformed(format!("unknown literal: {other}"))),
        }
    }

    fn parse_list(&mut self) -> Result<Value, ChatError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {}
                _ => return Err(malformed("expected ',' or ']' in list")),
            }
        }
    }

    fn parse_dict(&mut self) -> Result<Value, ChatError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => self.parse_string()?,
                _ => self.parse_identifier()?,
            };
            self.skip_whitespace();
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                _ => return Err(malformed("expected ',' or '}' in dict")),
            }
        }
    }
}
