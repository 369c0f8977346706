//! LDAP search filters (RFC 4515) evaluated against attribute snapshots.
//!
//! Shards select their source objects with a filter string. The directory
//! server never sees these filters; they are matched locally against the
//! `old`/`new` snapshots of a change event. Value comparisons ignore case,
//! which is what the attributes shards are usually keyed on (`objectClass`,
//! `univentionObjectType`, DNs) use as their matching rule.

use crate::event::Attributes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality {
        attribute: String,
        value: String,
    },
    Present {
        attribute: String,
    },
    Substrings {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    GreaterOrEqual {
        attribute: String,
        value: String,
    },
    LessOrEqual {
        attribute: String,
        value: String,
    },
    Approx {
        attribute: String,
        value: String,
    },
}

/// Filter parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("at offset {position}: {reason}")]
pub struct FilterError {
    pub position: usize,
    pub reason: String,
}

impl Filter {
    /// Parse a filter string. A bare item without surrounding parentheses
    /// (`objectClass=posixGroup`) is accepted as well.
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let trimmed = source.trim();
        let wrapped;
        let text = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            wrapped.as_str()
        };

        let mut parser = Parser {
            input: text.as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Evaluate the filter against one object's attributes.
    pub fn matches(&self, attrs: &Attributes) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(attrs)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(attrs)),
            Filter::Not(filter) => !filter.matches(attrs),
            Filter::Present { attribute } => {
                attrs.get(attribute).is_some_and(|values| !values.is_empty())
            }
            Filter::Equality { attribute, value } => {
                let wanted = value.to_lowercase();
                any_value(attrs, attribute, |v| v == wanted)
            }
            Filter::Approx { attribute, value } => {
                let wanted = squash(value);
                any_value(attrs, attribute, |v| squash(&v) == wanted)
            }
            Filter::Substrings {
                attribute,
                initial,
                any,
                last,
            } => any_value(attrs, attribute, |v| {
                substring_match(&v, initial.as_deref(), any, last.as_deref())
            }),
            Filter::GreaterOrEqual { attribute, value } => {
                any_value(attrs, attribute, |v| compare(&v, value) != Ordering::Less)
            }
            Filter::LessOrEqual { attribute, value } => {
                any_value(attrs, attribute, |v| compare(&v, value) != Ordering::Greater)
            }
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                let op = if matches!(self, Filter::And(_)) { '&' } else { '|' };
                write!(f, "({op}")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                write!(f, ")")
            }
            Filter::Not(filter) => write!(f, "(!{filter})"),
            Filter::Present { attribute } => write!(f, "({attribute}=*)"),
            Filter::Equality { attribute, value } => {
                write!(f, "({attribute}={})", escape(value))
            }
            Filter::Approx { attribute, value } => write!(f, "({attribute}~={})", escape(value)),
            Filter::GreaterOrEqual { attribute, value } => {
                write!(f, "({attribute}>={})", escape(value))
            }
            Filter::LessOrEqual { attribute, value } => {
                write!(f, "({attribute}<={})", escape(value))
            }
            Filter::Substrings {
                attribute,
                initial,
                any,
                last,
            } => {
                write!(f, "({attribute}=")?;
                if let Some(initial) = initial {
                    write!(f, "{}", escape(initial))?;
                }
                write!(f, "*")?;
                for part in any {
                    write!(f, "{}*", escape(part))?;
                }
                if let Some(last) = last {
                    write!(f, "{}", escape(last))?;
                }
                write!(f, ")")
            }
        }
    }
}

fn any_value(attrs: &Attributes, attribute: &str, mut pred: impl FnMut(String) -> bool) -> bool {
    attrs.get(attribute).is_some_and(|values| {
        values
            .iter()
            .any(|raw| pred(String::from_utf8_lossy(raw).to_lowercase()))
    })
}

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn compare(value: &str, assertion: &str) -> Ordering {
    match (value.trim().parse::<i64>(), assertion.trim().parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => value.cmp(&assertion.to_lowercase()),
    }
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial.to_lowercase().as_str()) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last.to_lowercase().as_str()),
        None => true,
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// PARSER
// ============================================================================

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> FilterError {
        FilterError {
            position: self.pos,
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), FilterError> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.error(&format!("expected '{}'", byte as char))),
            None => Err(self.error(&format!("expected '{}', found end of input", byte as char))),
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of input")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.filter()?);
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b';' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected attribute description"));
        }
        let attribute = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();

        let op = match (self.peek(), self.input.get(self.pos + 1).copied()) {
            (Some(b'='), _) => {
                self.pos += 1;
                b'='
            }
            (Some(op @ (b'~' | b'>' | b'<')), Some(b'=')) => {
                self.pos += 2;
                op
            }
            (Some(b':'), _) => return Err(self.error("extensible match is not supported")),
            _ => return Err(self.error("expected filter operator")),
        };

        let value_start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b')' => break,
                b'(' => return Err(self.error("unescaped '(' in assertion value")),
                _ => self.pos += 1,
            }
        }
        let raw = &self.input[value_start..self.pos];

        match op {
            b'~' => Ok(Filter::Approx {
                attribute,
                value: self.unescape(raw, value_start)?,
            }),
            b'>' => Ok(Filter::GreaterOrEqual {
                attribute,
                value: self.unescape(raw, value_start)?,
            }),
            b'<' => Ok(Filter::LessOrEqual {
                attribute,
                value: self.unescape(raw, value_start)?,
            }),
            _ if raw == b"*" => Ok(Filter::Present { attribute }),
            _ if raw.contains(&b'*') => self.substrings(attribute, raw, value_start),
            _ => Ok(Filter::Equality {
                attribute,
                value: self.unescape(raw, value_start)?,
            }),
        }
    }

    fn substrings(
        &self,
        attribute: String,
        raw: &[u8],
        offset: usize,
    ) -> Result<Filter, FilterError> {
        let parts: Vec<&[u8]> = raw.split(|b| *b == b'*').collect();
        let last_idx = parts.len() - 1;
        let mut initial = None;
        let mut any = Vec::new();
        let mut last = None;
        for (idx, part) in parts.iter().enumerate() {
            if part.is_empty() {
                if idx != 0 && idx != last_idx {
                    return Err(FilterError {
                        position: offset,
                        reason: "consecutive '*' in substring assertion".to_string(),
                    });
                }
                continue;
            }
            let text = self.unescape(part, offset)?;
            if idx == 0 {
                initial = Some(text);
            } else if idx == last_idx {
                last = Some(text);
            } else {
                any.push(text);
            }
        }
        Ok(Filter::Substrings {
            attribute,
            initial,
            any,
            last,
        })
    }

    fn unescape(&self, raw: &[u8], offset: usize) -> Result<String, FilterError> {
        let mut bytes = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] != b'\\' {
                bytes.push(raw[i]);
                i += 1;
                continue;
            }
            let hex = raw
                .get(i + 1..i + 3)
                .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|s| u8::from_str_radix(s, 16).ok());
            match (hex, raw.get(i + 1)) {
                (Some(byte), _) => {
                    bytes.push(byte);
                    i += 3;
                }
                (None, Some(&literal)) => {
                    bytes.push(literal);
                    i += 2;
                }
                (None, None) => {
                    return Err(FilterError {
                        position: offset + i,
                        reason: "dangling escape".to_string(),
                    })
                }
            }
        }
        String::from_utf8(bytes).map_err(|_| FilterError {
            position: offset,
            reason: "assertion value is not UTF-8".to_string(),
        })
    }
}
