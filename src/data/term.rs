use std::fmt;

use crate::data::Element;
use crate::error::PanError;
use crate::ArcStr;

/// Largest index a list term may address.
pub const MAX_INDEX: i64 = i32::MAX as i64;

/// One component of a [`Path`](crate::data::Path).
///
/// Indices sort before keys, so ordered maps keyed by terms list the list
/// positions of a node first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Index(u32),
    Key(ArcStr),
}

impl Term {
    pub fn key(key: &str) -> Self {
        Term::Key(ArcStr::from(key))
    }

    pub fn index(index: u32) -> Self {
        Term::Index(index)
    }

    pub fn is_key(&self) -> bool {
        matches!(self, Term::Key(_))
    }

    /// Parses a textual path component. Anything starting with a digit must
    /// be a decimal or `0x` hexadecimal index.
    pub fn parse(term: &str) -> Result<Self, PanError> {
        let first = match term.chars().next() {
            Some(c) => c,
            None => return Err(PanError::evaluation("key cannot be empty string")),
        };

        if first.is_ascii_digit() {
            let value = parse_index(term).ok_or_else(|| {
                PanError::evaluation(format!("key cannot begin with a digit: '{term}'"))
            })?;
            return Self::from_long(value);
        }

        let valid = (first.is_ascii_alphabetic() || first == '_')
            && term
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.'));
        if valid {
            Ok(Term::key(term))
        } else {
            Err(PanError::evaluation(format!("invalid key: '{term}'")))
        }
    }

    pub fn from_long(index: i64) -> Result<Self, PanError> {
        if index < 0 {
            Err(PanError::evaluation(format!(
                "index cannot be negative: {index}"
            )))
        } else if index > MAX_INDEX {
            Err(PanError::evaluation(format!(
                "index ({index}) exceeds maximum value ({MAX_INDEX})"
            )))
        } else {
            Ok(Term::Index(index as u32))
        }
    }

    /// Converts the runtime value of a subscript into a term.
    pub fn from_element(element: &Element) -> Result<Self, PanError> {
        match element {
            Element::String(s) => Self::parse(s),
            Element::Long(v) => Self::from_long(*v),
            other => Err(PanError::evaluation(format!(
                "element of type {} cannot be used as a path term",
                other.type_name()
            ))),
        }
    }
}

fn parse_index(term: &str) -> Option<i64> {
    if let Some(hex) = term.strip_prefix("0x").or_else(|| term.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if term.len() > 1 && term.starts_with('0') {
        i64::from_str_radix(&term[1..], 8).ok()
    } else {
        term.parse().ok()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Index(i) => write!(f, "{i}"),
            Term::Key(k) => f.write_str(k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_terms() {
        assert_eq!(Term::parse("alpha").unwrap(), Term::key("alpha"));
        assert_eq!(Term::parse("a-b.c+d").unwrap(), Term::key("a-b.c+d"));
        assert_eq!(Term::parse("12").unwrap(), Term::index(12));
        assert_eq!(Term::parse("0x10").unwrap(), Term::index(16));
        assert!(Term::parse("").is_err());
        assert!(Term::parse("1abc").is_err());
        assert!(Term::parse("a b").is_err());
        assert!(Term::from_long(-1).is_err());
        assert!(Term::from_long(MAX_INDEX + 1).is_err());
    }

    #[test]
    fn test_indices_sort_first() {
        let mut terms = vec![Term::key("a"), Term::index(3), Term::key("0a"), Term::index(1)];
        terms.sort();
        assert_eq!(terms[0], Term::index(1));
        assert_eq!(terms[1], Term::index(3));
        assert!(terms[2].is_key());
    }
}
