use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::data::Term;
use crate::error::PanError;
use crate::ArcStr;

pub type Dict = BTreeMap<ArcStr, Element>;

/// A value in a configuration tree.
///
/// Containers are shared through `Arc` and copied on first write, so handing
/// out a built tree to other tasks never copies it and cannot mutate it.
#[derive(Debug, Clone, Default)]
pub enum Element {
    #[default]
    Undef,
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(ArcStr),
    List(Arc<Vec<Element>>),
    Dict(Arc<Dict>),
}

impl Element {
    pub fn string(s: impl AsRef<str>) -> Self {
        Element::String(ArcStr::from(s.as_ref()))
    }

    pub fn empty_list() -> Self {
        Element::List(Arc::new(Vec::new()))
    }

    pub fn empty_dict() -> Self {
        Element::Dict(Arc::new(Dict::new()))
    }

    pub fn list(items: Vec<Element>) -> Self {
        Element::List(Arc::new(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Element::Undef => "undef",
            Element::Null => "null",
            Element::Boolean(_) => "boolean",
            Element::Long(_) => "long",
            Element::Double(_) => "double",
            Element::String(_) => "string",
            Element::List(_) => "list",
            Element::Dict(_) => "dict",
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Element::Undef)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Element::Null)
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Element::List(_) | Element::Dict(_))
    }

    pub fn is_property(&self) -> bool {
        matches!(
            self,
            Element::Boolean(_) | Element::Long(_) | Element::Double(_) | Element::String(_)
        )
    }

    /// Runtime identity of a container. Two clones of the same list share an
    /// identity until one of them is written to.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Element::List(list) => Some(Arc::as_ptr(list) as *const () as usize),
            Element::Dict(dict) => Some(Arc::as_ptr(dict) as *const () as usize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Element::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Element::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Element::List(list) => Some(list.len()),
            Element::Dict(dict) => Some(dict.len()),
            Element::String(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    /// Direct child lookup.
    pub fn child(&self, term: &Term) -> Result<Option<&Element>, PanError> {
        match (self, term) {
            (Element::Dict(dict), Term::Key(key)) => Ok(dict.get(key)),
            (Element::List(list), Term::Index(i)) => Ok(list.get(*i as usize)),
            (Element::Dict(_), Term::Index(i)) => Err(PanError::evaluation(format!(
                "cannot use index ({i}) to reference a child of a dict"
            ))),
            (Element::List(_), Term::Key(key)) => Err(PanError::evaluation(format!(
                "cannot use key ({key}) to reference a child of a list"
            ))),
            (other, term) => Err(PanError::evaluation(format!(
                "cannot dereference '{term}' on element of type {}",
                other.type_name()
            ))),
        }
    }

    /// Descends through `terms`. A missing child yields `None`; an invalid
    /// term yields an error unless `lookup_only` is set.
    pub fn rget(&self, terms: &[Term], lookup_only: bool) -> Result<Option<Element>, PanError> {
        let mut node = self;
        for term in terms {
            match node.child(term) {
                Ok(Some(next)) => node = next,
                Ok(None) => return Ok(None),
                Err(_) if lookup_only => return Ok(None),
                Err(err) => return Err(err),
            }
        }
        Ok(Some(node.clone()))
    }

    /// Stores `value` below this container, creating missing intermediate
    /// containers: a dict when the following term is a key, a list when it is
    /// an index. `None` removes the addressed child.
    pub fn rput(&mut self, terms: &[Term], value: Option<Element>) -> Result<(), PanError> {
        let Some((head, rest)) = terms.split_first() else {
            return Err(PanError::compiler("empty term list in element put"));
        };

        if rest.is_empty() {
            return self.put_child(head, value);
        }

        let next = &rest[0];
        let slot = self.child_slot(head)?;
        match slot {
            Element::Undef | Element::Null => *slot = container_for(next),
            Element::Dict(_) | Element::List(_) => {}
            other => {
                return Err(PanError::evaluation(format!(
                    "cannot create child '{next}' of element of type {}",
                    other.type_name()
                )));
            }
        }
        slot.rput(rest, value)
    }

    /// Mutable access to the child at `term`, inserting `undef` if absent.
    fn child_slot(&mut self, term: &Term) -> Result<&mut Element, PanError> {
        match (self, term) {
            (Element::Dict(dict), Term::Key(key)) => {
                Ok(Arc::make_mut(dict).entry(key.clone()).or_default())
            }
            (Element::List(list), Term::Index(i)) => {
                let list = Arc::make_mut(list);
                let i = *i as usize;
                if i >= list.len() {
                    list.resize(i + 1, Element::Undef);
                }
                Ok(&mut list[i])
            }
            (other, term) => Err(mismatch(other, term)),
        }
    }

    fn put_child(&mut self, term: &Term, value: Option<Element>) -> Result<(), PanError> {
        match (self, term, value) {
            (Element::Dict(dict), Term::Key(key), None) => {
                Arc::make_mut(dict).remove(key);
                Ok(())
            }
            (Element::List(list), Term::Index(i), None) => {
                let i = *i as usize;
                if i < list.len() {
                    Arc::make_mut(list).remove(i);
                }
                Ok(())
            }
            (this, term, Some(value)) if this.is_resource() => {
                let slot = this.child_slot(term)?;
                slot.check_valid_replacement(&value)?;
                *slot = value;
                Ok(())
            }
            (other, term, _) => Err(mismatch(other, term)),
        }
    }

    /// Undef and null may replace anything; lists only by lists, dicts only
    /// by dicts and properties only by properties of the same type.
    pub fn check_valid_replacement(&self, new: &Element) -> Result<(), PanError> {
        if new.is_undef() || new.is_null() || self.is_undef() || self.is_null() {
            return Ok(());
        }
        if std::mem::discriminant(self) == std::mem::discriminant(new) {
            return Ok(());
        }
        Err(PanError::evaluation(format!(
            "cannot replace {} with {}",
            self.type_name(),
            new.type_name()
        )))
    }

    /// Terms (relative to this element) leading to the first undefined
    /// value, in depth-first order.
    pub fn locate_undefined(&self) -> Option<Vec<Term>> {
        match self {
            Element::Undef => Some(Vec::new()),
            Element::Dict(dict) => dict.iter().find_map(|(key, child)| {
                child.locate_undefined().map(|mut rest| {
                    rest.insert(0, Term::Key(key.clone()));
                    rest
                })
            }),
            Element::List(list) => list.iter().enumerate().find_map(|(i, child)| {
                child.locate_undefined().map(|mut rest| {
                    rest.insert(0, Term::Index(i as u32));
                    rest
                })
            }),
            _ => None,
        }
    }
}

fn container_for(next: &Term) -> Element {
    if next.is_key() {
        Element::empty_dict()
    } else {
        Element::empty_list()
    }
}

fn mismatch(element: &Element, term: &Term) -> PanError {
    let which = if term.is_key() { "key" } else { "index" };
    PanError::evaluation(format!(
        "cannot use {which} '{term}' on element of type {}",
        element.type_name()
    ))
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Element::Undef, Element::Undef) | (Element::Null, Element::Null) => true,
            (Element::Boolean(a), Element::Boolean(b)) => a == b,
            (Element::Long(a), Element::Long(b)) => a == b,
            (Element::Double(a), Element::Double(b)) => a == b,
            (Element::Long(a), Element::Double(b)) | (Element::Double(b), Element::Long(a)) => {
                (*a as f64) == *b
            }
            (Element::String(a), Element::String(b)) => a == b,
            (Element::List(a), Element::List(b)) => Arc::ptr_eq(a, b) || a == b,
            (Element::Dict(a), Element::Dict(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl From<bool> for Element {
    fn from(value: bool) -> Self {
        Element::Boolean(value)
    }
}

impl From<i64> for Element {
    fn from(value: i64) -> Self {
        Element::Long(value)
    }
}

impl From<f64> for Element {
    fn from(value: f64) -> Self {
        Element::Double(value)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::string(value)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Undef => f.write_str("<undef>"),
            Element::Null => f.write_str("<null>"),
            Element::Boolean(b) => write!(f, "{b}"),
            Element::Long(v) => write!(f, "{v}"),
            Element::Double(v) => write!(f, "{v:?}"),
            Element::String(s) => f.write_str(s),
            Element::List(list) => {
                f.write_str("[ ")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(" ]")
            }
            Element::Dict(dict) => {
                f.write_str("{ ")?;
                for (i, (key, item)) in dict.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={item}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Element::Undef | Element::Null => serializer.serialize_unit(),
            Element::Boolean(b) => serializer.serialize_bool(*b),
            Element::Long(v) => serializer.serialize_i64(*v),
            Element::Double(v) => serializer.serialize_f64(*v),
            Element::String(s) => serializer.serialize_str(s),
            Element::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for item in list.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Element::Dict(dict) => {
                let mut map = serializer.serialize_map(Some(dict.len()))?;
                for (key, item) in dict.iter() {
                    map.serialize_entry(&**key, item)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Path;

    fn terms(path: &str) -> Vec<Term> {
        Path::parse(path).unwrap().terms().to_vec()
    }

    #[test]
    fn test_rput_creates_parents() {
        let mut root = Element::empty_dict();
        root.rput(&terms("/a/2/b"), Some(Element::Long(5))).unwrap();

        let list = root.rget(&terms("/a"), false).unwrap().unwrap();
        assert_eq!(list.type_name(), "list");
        assert_eq!(list.len(), Some(3));
        assert_eq!(
            root.rget(&terms("/a/2/b"), false).unwrap(),
            Some(Element::Long(5))
        );
        assert_eq!(root.locate_undefined(), Some(terms("/a/0")));
    }

    #[test]
    fn test_rput_shape_mismatch() {
        let mut root = Element::empty_dict();
        root.rput(&terms("/a/x"), Some(Element::Long(1))).unwrap();

        assert!(root.rput(&terms("/a/0"), Some(Element::Long(1))).is_err());
        assert!(root.rput(&terms("/a/x/y"), Some(Element::Long(1))).is_err());
        assert!(root.rput(&terms("/a/x"), Some(Element::string("s"))).is_err());
        assert!(root.rput(&terms("/a/x"), Some(Element::Null)).is_ok());
    }

    #[test]
    fn test_copy_on_write_keeps_snapshot() {
        let mut root = Element::empty_dict();
        root.rput(&terms("/a"), Some(Element::Long(1))).unwrap();
        let snapshot = root.clone();
        assert_eq!(snapshot.identity(), root.identity());

        root.rput(&terms("/a"), Some(Element::Long(2))).unwrap();
        assert_ne!(snapshot.identity(), root.identity());
        assert_eq!(snapshot.rget(&terms("/a"), false).unwrap(), Some(Element::Long(1)));
    }

    #[test]
    fn test_remove_child() {
        let mut root = Element::empty_dict();
        root.rput(&terms("/a/b"), Some(Element::Long(1))).unwrap();
        root.rput(&terms("/a/b"), None).unwrap();
        assert_eq!(root.rget(&terms("/a/b"), false).unwrap(), None);
    }

    #[test]
    fn test_lookup_only_swallows_bad_terms() {
        let mut root = Element::empty_dict();
        root.rput(&terms("/a"), Some(Element::Long(1))).unwrap();
        assert!(root.rget(&terms("/a/b"), false).is_err());
        assert_eq!(root.rget(&terms("/a/b"), true).unwrap(), None);
    }

    #[test]
    fn test_json_shape() {
        let mut root = Element::empty_dict();
        root.rput(&terms("/a/0"), Some(Element::Boolean(true))).unwrap();
        root.rput(&terms("/b"), Some(Element::string("x"))).unwrap();
        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(json, r#"{"a":[true],"b":"x"}"#);
    }
}
