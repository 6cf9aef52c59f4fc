//! Attribute filter expressions.
//!
//! Requirements carry a boolean filter over capability attributes, written
//! in a parenthesized prefix syntax:
//!
//! - `(package=util.log)` — equality (membership for list attributes)
//! - `(version>=1.2.0)` / `(version<=2.0.0)` — ordered comparison
//! - `(package=*)` — attribute presence
//! - `(&(a=1)(b=2))`, `(|(a=1)(a=2))`, `(!(a=1))` — boolean composition
//!
//! Comparisons are typed by the *attribute* side: version-valued attributes
//! compare as semver, integers numerically, everything else lexically.
//!
//! # Examples
//!
//! ```
//! use wiring_model::{Filter, Value};
//!
//! let filter = Filter::parse("(&(package=util.log)(version>=1.2.0))").unwrap();
//! let attrs = vec![
//!     ("package".to_string(), Value::from("util.log")),
//!     ("version".to_string(), Value::Version(semver::Version::new(1, 3, 0))),
//! ];
//! assert!(filter.matches(&attrs));
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::value::{Value, parse_version};

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Equality; membership when the attribute is a list.
    Eq(String, String),
    /// Greater-or-equal, typed by the attribute.
    Gte(String, String),
    /// Less-or-equal, typed by the attribute.
    Lte(String, String),
    /// Attribute presence (`(key=*)`).
    Present(String),
    /// Matches every capability; used for wildcard dynamic imports.
    Any,
}

impl Filter {
    /// Parse a filter expression string.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        };
        let filter = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.bytes.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Convenience constructor for the common single-attribute equality.
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq(key.into(), value.into())
    }

    /// Evaluate the filter against an ordered attribute list.
    pub fn matches(&self, attrs: &[(String, Value)]) -> bool {
        match self {
            Filter::And(fs) => fs.iter().all(|f| f.matches(attrs)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(attrs)),
            Filter::Not(f) => !f.matches(attrs),
            Filter::Eq(key, operand) => {
                lookup(attrs, key).is_some_and(|v| compare_eq(v, operand))
            }
            Filter::Gte(key, operand) => {
                lookup(attrs, key).is_some_and(|v| compare_ord(v, operand).is_some_and(|o| o.is_ge()))
            }
            Filter::Lte(key, operand) => {
                lookup(attrs, key).is_some_and(|v| compare_ord(v, operand).is_some_and(|o| o.is_le()))
            }
            Filter::Present(key) => lookup(attrs, key).is_some(),
            Filter::Any => true,
        }
    }
}

fn lookup<'a>(attrs: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn compare_eq(attr: &Value, operand: &str) -> bool {
    match attr {
        Value::Str(s) => s == operand,
        Value::Version(v) => parse_version(operand).map(|o| *v == o).unwrap_or(false),
        Value::Bool(b) => operand.parse::<bool>().map(|o| *b == o).unwrap_or(false),
        Value::Int(i) => operand.parse::<i64>().map(|o| *i == o).unwrap_or(false),
        Value::List(items) => items.iter().any(|item| item == operand),
    }
}

/// Ordered comparison of an attribute against a raw operand. Returns `None`
/// when the operand cannot be coerced to the attribute's type.
fn compare_ord(attr: &Value, operand: &str) -> Option<std::cmp::Ordering> {
    match attr {
        Value::Str(s) => Some(s.as_str().cmp(operand)),
        Value::Version(v) => parse_version(operand).ok().map(|o| v.cmp(&o)),
        Value::Int(i) => operand.parse::<i64>().ok().map(|o| i.cmp(&o)),
        Value::Bool(_) | Value::List(_) => None,
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(fs) => {
                write!(f, "(&")?;
                for sub in fs {
                    write!(f, "{sub}")?;
                }
                write!(f, ")")
            }
            Filter::Or(fs) => {
                write!(f, "(|")?;
                for sub in fs {
                    write!(f, "{sub}")?;
                }
                write!(f, ")")
            }
            Filter::Not(sub) => write!(f, "(!{sub})"),
            Filter::Eq(k, v) => write!(f, "({k}={v})"),
            Filter::Gte(k, v) => write!(f, "({k}>={v})"),
            Filter::Lte(k, v) => write!(f, "({k}<={v})"),
            Filter::Present(k) => write!(f, "({k}=*)"),
            Filter::Any => write!(f, "(*)"),
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> Error {
        Error::FilterParse {
            filter: self.input.to_string(),
            reason: format!("{} at byte {}", reason.into(), self.pos),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.pos < self.bytes.len() && self.bytes[self.pos] == b {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", b as char)))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        self.skip_whitespace();
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(b'*') => {
                self.pos += 1;
                Filter::Any
            }
            Some(_) => self.parse_comparison()?,
            None => return Err(self.error("unexpected end of input")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'(') => filters.push(self.parse_filter()?),
                _ => break,
            }
        }
        if filters.is_empty() {
            return Err(self.error("empty operand list"));
        }
        Ok(filters)
    }

    fn parse_comparison(&mut self) -> Result<Filter> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| !matches!(b, b'=' | b'>' | b'<' | b'(' | b')'))
        {
            self.pos += 1;
        }
        let key = self.input[start..self.pos].trim().to_string();
        if key.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                b'='
            }
            Some(b'>') => {
                self.pos += 1;
                self.expect(b'=')?;
                b'>'
            }
            Some(b'<') => {
                self.pos += 1;
                self.expect(b'=')?;
                b'<'
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let value_start = self.pos;
        while self.peek().is_some_and(|b| b != b')') {
            self.pos += 1;
        }
        let value = self.input[value_start..self.pos].trim().to_string();

        Ok(match op {
            b'=' if value == "*" => Filter::Present(key),
            b'=' => Filter::Eq(key, value),
            b'>' => Filter::Gte(key, value),
            _ => Filter::Lte(key, value),
        })
    }
}
