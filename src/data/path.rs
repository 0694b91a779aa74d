use std::fmt;
use std::sync::Arc;

use crate::data::Term;
use crate::error::PanError;
use crate::source::is_valid_template_name;
use crate::ArcStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathKind {
    Relative,
    Absolute,
    External,
}

/// Address of an element in a configuration tree.
///
/// * `/a/0/b` is absolute and refers to the object being built.
/// * `a/b` is relative and only valid inside structure templates.
/// * `other:/a/b` (or the legacy `//other/a/b`) is external and refers to
///   the tree of another object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    kind: PathKind,
    authority: Option<ArcStr>,
    terms: Arc<[Term]>,
}

impl Path {
    pub fn root() -> Self {
        Path {
            kind: PathKind::Absolute,
            authority: None,
            terms: Arc::from(Vec::new()),
        }
    }

    pub fn parse(path: &str) -> Result<Self, PanError> {
        let path = unescape_braces(path)?;

        let (kind, authority, rest) = if let Some(stripped) = path.strip_prefix("//") {
            let (auth, rest) = match stripped.split_once('/') {
                Some((auth, rest)) => (auth, rest),
                None => (stripped, ""),
            };
            let valid = !auth.is_empty()
                && auth
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '.'));
            if !valid {
                return Err(invalid_authority(auth));
            }
            (PathKind::External, Some(ArcStr::from(auth)), rest)
        } else if let Some((auth, rest)) = path.split_once(':') {
            if !is_valid_template_name(auth) {
                return Err(invalid_authority(auth));
            }
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            (PathKind::External, Some(ArcStr::from(auth)), rest)
        } else if let Some(rest) = path.strip_prefix('/') {
            (PathKind::Absolute, None, rest)
        } else {
            (PathKind::Relative, None, path.as_str())
        };

        let terms = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/')
                .map(Term::parse)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| PanError::syntax(e.simple_message(), None))?
        };

        if kind == PathKind::Relative && terms.is_empty() {
            return Err(PanError::syntax("relative path must have at least one term", None));
        }
        if terms.first().is_some_and(|t| !t.is_key()) {
            return Err(PanError::syntax(
                format!("first term of path '{path}' must be a key"),
                None,
            ));
        }

        Ok(Path {
            kind,
            authority,
            terms: Arc::from(terms),
        })
    }

    pub fn from_terms(kind: PathKind, terms: Vec<Term>) -> Self {
        Path {
            kind,
            authority: None,
            terms: Arc::from(terms),
        }
    }

    /// Appends `extra` to this path. External paths cannot be extended.
    pub fn join(&self, extra: &[Term]) -> Result<Self, PanError> {
        if self.is_external() {
            return Err(PanError::syntax(
                "external path not allowed in this context",
                None,
            ));
        }
        let mut terms = self.terms.to_vec();
        terms.extend_from_slice(extra);
        Ok(Path {
            kind: self.kind,
            authority: None,
            terms: Arc::from(terms),
        })
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_absolute(&self) -> bool {
        self.kind == PathKind::Absolute
    }

    pub fn is_relative(&self) -> bool {
        self.kind == PathKind::Relative
    }

    pub fn is_external(&self) -> bool {
        self.kind == PathKind::External
    }
}

fn invalid_authority(auth: &str) -> PanError {
    PanError::syntax(format!("invalid authority in path: '{auth}'"), None)
}

/// Text inside `{...}` is escaped so that arbitrary strings can be used as
/// keys. Braces must be balanced and cannot nest.
fn unescape_braces(path: &str) -> Result<String, PanError> {
    let mut out = String::with_capacity(path.len());
    let mut escaped: Option<String> = None;

    for c in path.chars() {
        match (c, escaped.as_mut()) {
            ('{', None) => escaped = Some(String::new()),
            ('}', Some(inner)) => {
                out.push_str(&escape(inner));
                escaped = None;
            }
            ('{' | '}', _) => {
                return Err(PanError::syntax(
                    format!("path '{path}' contains unbalanced or nested braces"),
                    None,
                ));
            }
            (c, Some(inner)) => inner.push(c),
            (c, None) => out.push(c),
        }
    }

    if escaped.is_some() {
        return Err(PanError::syntax(
            format!("path '{path}' contains unbalanced or nested braces"),
            None,
        ));
    }
    Ok(out)
}

/// Replaces every character that is not valid in a key by `_` followed by
/// its hex code. A leading digit is escaped as well.
pub fn escape(s: &str) -> String {
    if s.is_empty() {
        return String::from("_");
    }
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_alphabetic() || (c.is_ascii_digit() && i > 0) {
            out.push(c);
        } else {
            for byte in c.to_string().bytes() {
                out.push_str(&format!("_{byte:02x}"));
            }
        }
    }
    out
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PathKind::External => {
                write!(f, "{}:", self.authority.as_deref().unwrap_or_default())?;
                f.write_str("/")?;
            }
            PathKind::Absolute => f.write_str("/")?,
            PathKind::Relative => {}
        }
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute() {
        let path = Path::parse("/a/0/b").unwrap();
        assert!(path.is_absolute());
        assert_eq!(path.terms(), &[Term::key("a"), Term::index(0), Term::key("b")]);
        assert_eq!(path.to_string(), "/a/0/b");
        assert_eq!(Path::parse("/").unwrap(), Path::root());
    }

    #[test]
    fn test_external_forms() {
        let new_form = Path::parse("other/node:/a/b").unwrap();
        assert!(new_form.is_external());
        assert_eq!(new_form.authority(), Some("other/node"));
        assert_eq!(new_form.to_string(), "other/node:/a/b");

        let old_form = Path::parse("//other/a/b").unwrap();
        assert_eq!(old_form.authority(), Some("other"));
        assert_eq!(old_form.terms().len(), 2);

        assert!(Path::parse("bad name:/a").is_err());
    }

    #[test]
    fn test_relative_and_first_term() {
        assert!(Path::parse("a/b").unwrap().is_relative());
        assert!(Path::parse("/0/a").is_err());
        assert!(Path::parse("").is_err());
    }

    #[test]
    fn test_braces_escape() {
        let path = Path::parse("/hosts/{my.host}").unwrap();
        assert_eq!(path.to_string(), "/hosts/my_2ehost");
        assert!(Path::parse("/a/{b").is_err());
        assert!(Path::parse("/a/{b{c}}").is_err());
    }

    #[test]
    fn test_join_rejects_external() {
        let base = Path::parse("/a").unwrap();
        let joined = base.join(&[Term::index(2)]).unwrap();
        assert_eq!(joined.to_string(), "/a/2");
        assert!(Path::parse("x:/a").unwrap().join(&[Term::index(0)]).is_err());
    }
}
