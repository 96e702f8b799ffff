// puc-common/src/dependency/filter.rs
//! Service filters in the RFC 1960 (LDAP) syntax used by service registries,
//! e.g. `(&(osgi.jndi.service.name=orders)(service.ranking>=10))`.
//!
//! Attribute names match case-insensitively. A property holding a list
//! matches when any of its elements does.
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{PucError, Result};
use crate::model::Properties;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Approx(String, String),
    GreaterEq(String, String),
    LessEq(String, String),
    Present(String),
    /// Substring match; `None` segments stand for `*`.
    Substring(String, Vec<Option<String>>),
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self> {
        let mut cursor = Cursor::new(input);
        cursor.skip_whitespace();
        let filter = cursor.filter()?;
        cursor.skip_whitespace();
        if !cursor.at_end() {
            return Err(cursor.error("unexpected trailing characters"));
        }
        Ok(filter)
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            Filter::And(items) => items.iter().all(|f| f.matches(properties)),
            Filter::Or(items) => items.iter().any(|f| f.matches(properties)),
            Filter::Not(inner) => !inner.matches(properties),
            Filter::Present(attr) => {
                lookup(properties, attr).is_some_and(|value| !value.is_null())
            }
            Filter::Equal(attr, expected) => {
                any_value(properties, attr, |v| compare(v, expected, Op::Equal))
            }
            Filter::Approx(attr, expected) => {
                any_value(properties, attr, |v| compare(v, expected, Op::Approx))
            }
            Filter::GreaterEq(attr, expected) => {
                any_value(properties, attr, |v| compare(v, expected, Op::GreaterEq))
            }
            Filter::LessEq(attr, expected) => {
                any_value(properties, attr, |v| compare(v, expected, Op::LessEq))
            }
            Filter::Substring(attr, segments) => any_value(properties, attr, |v| match v {
                Value::String(s) => substring_matches(s, segments),
                _ => false,
            }),
        }
    }
}

impl FromStr for Filter {
    type Err = PucError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(items) => {
                f.write_str("(&")?;
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Filter::Or(items) => {
                f.write_str("(|")?;
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Equal(a, v) => write!(f, "({a}={})", escape(v)),
            Filter::Approx(a, v) => write!(f, "({a}~={})", escape(v)),
            Filter::GreaterEq(a, v) => write!(f, "({a}>={})", escape(v)),
            Filter::LessEq(a, v) => write!(f, "({a}<={})", escape(v)),
            Filter::Present(a) => write!(f, "({a}=*)"),
            Filter::Substring(a, segments) => {
                write!(f, "({a}=")?;
                for segment in segments {
                    match segment {
                        Some(text) => f.write_str(&escape(text))?,
                        None => f.write_str("*")?,
                    }
                }
                f.write_str(")")
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn lookup<'a>(properties: &'a Properties, attr: &str) -> Option<&'a Value> {
    properties
        .get(attr)
        .or_else(|| {
            properties
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(attr))
                .map(|(_, value)| value)
        })
}

fn any_value(properties: &Properties, attr: &str, test: impl Fn(&Value) -> bool) -> bool {
    match lookup(properties, attr) {
        Some(Value::Array(values)) => values.iter().any(test),
        Some(value) => test(value),
        None => false,
    }
}

#[derive(Clone, Copy)]
enum Op {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

fn compare(value: &Value, expected: &str, op: Op) -> bool {
    use std::cmp::Ordering;

    let ordering = match value {
        Value::String(s) => {
            if let Op::Approx = op {
                return normalise(s) == normalise(expected);
            }
            Some(s.as_str().cmp(expected))
        }
        Value::Number(n) => {
            let expected = expected.trim();
            if let (Some(lhs), Ok(rhs)) = (n.as_i64(), expected.parse::<i64>()) {
                Some(lhs.cmp(&rhs))
            } else {
                match (n.as_f64(), expected.parse::<f64>()) {
                    (Some(lhs), Ok(rhs)) => lhs.partial_cmp(&rhs),
                    _ => None,
                }
            }
        }
        Value::Bool(b) => match expected.trim().to_ascii_lowercase().as_str() {
            "true" => Some(b.cmp(&true)),
            "false" => Some(b.cmp(&false)),
            _ => None,
        },
        _ => None,
    };

    match (ordering, op) {
        (Some(o), Op::Equal | Op::Approx) => o == Ordering::Equal,
        (Some(o), Op::GreaterEq) => o != Ordering::Less,
        (Some(o), Op::LessEq) => o != Ordering::Greater,
        (None, _) => false,
    }
}

fn normalise(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_matches(text: &str, segments: &[Option<String>]) -> bool {
    let mut rest = text;
    let last = segments.len().saturating_sub(1);
    let mut after_star = false;

    for (index, segment) in segments.iter().enumerate() {
        match segment {
            None => after_star = true,
            Some(part) => {
                if !after_star {
                    if !rest.starts_with(part.as_str()) {
                        return false;
                    }
                    rest = &rest[part.len()..];
                } else if index == last {
                    return rest.ends_with(part.as_str());
                } else {
                    match rest.find(part.as_str()) {
                        Some(pos) => rest = &rest[pos + part.len()..],
                        None => return false,
                    }
                }
                after_star = false;
            }
        }
    }
    after_star || rest.is_empty()
}

struct Cursor<'input> {
    input: &'input str,
    offset: usize,
}

impl<'input> Cursor<'input> {
    fn new(input: &'input str) -> Self {
        Self { input, offset: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.offset..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.offset >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn expect(&mut self, wanted: char) -> Result<()> {
        match self.advance() {
            Some(c) if c == wanted => Ok(()),
            _ => Err(self.error(&format!("expected '{wanted}'"))),
        }
    }

    fn error(&self, message: &str) -> PucError {
        PucError::Parse(
            "service filter",
            format!("{message} at offset {} in '{}'", self.offset, self.input),
        )
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.advance();
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.advance();
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.advance();
                self.skip_whitespace();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut items = Vec::new();
        self.skip_whitespace();
        while self.peek() == Some('(') {
            items.push(self.filter()?);
            self.skip_whitespace();
        }
        if items.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.offset;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.advance();
        }
        let attr = self.input[start..self.offset].trim().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.advance() {
            Some('=') => '=',
            Some(c @ ('~' | '<' | '>')) => {
                self.expect('=')?;
                c
            }
            _ => return Err(self.error("expected a comparison operator")),
        };

        let segments = self.value()?;
        match op {
            '=' => Ok(match segments.as_slice() {
                [None] => Filter::Present(attr),
                [Some(value)] => Filter::Equal(attr, value.clone()),
                [] => Filter::Equal(attr, String::new()),
                _ => Filter::Substring(attr, segments),
            }),
            _ => {
                let value = match segments.as_slice() {
                    [Some(value)] => value.clone(),
                    [] => String::new(),
                    _ => return Err(self.error("wildcards only allowed with '='")),
                };
                Ok(match op {
                    '~' => Filter::Approx(attr, value),
                    '>' => Filter::GreaterEq(attr, value),
                    _ => Filter::LessEq(attr, value),
                })
            }
        }
    }

    /// Reads a value up to the closing parenthesis, splitting it at
    /// unescaped `*`.
    fn value(&mut self) -> Result<Vec<Option<String>>> {
        let mut segments = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('*') => {
                    self.advance();
                    if !current.is_empty() {
                        segments.push(Some(std::mem::take(&mut current)));
                    }
                    segments.push(None);
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some(c) => current.push(c),
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some(c) => {
                    self.advance();
                    current.push(c);
                }
            }
        }
        if !current.is_empty() {
            segments.push(Some(current));
        }
        Ok(segments)
    }
}
