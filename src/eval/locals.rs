use std::collections::HashMap;

use crate::ArcStr;
use crate::data::Element;
use crate::error::PanError;

/// Local variables of one DML block or function call.
#[derive(Debug, Default, Clone)]
pub struct LocalVariableMap {
    vars: HashMap<ArcStr, Element>,
}

impl LocalVariableMap {
    /// Fresh map; function calls pass their arguments, which become `ARGV`
    /// and `ARGC`.
    pub fn new(argv: Option<Vec<Element>>) -> Self {
        let mut vars = HashMap::new();
        if let Some(argv) = argv {
            vars.insert(ArcStr::from("ARGC"), Element::Long(argv.len() as i64));
            vars.insert(ArcStr::from("ARGV"), Element::list(argv));
        }
        LocalVariableMap { vars }
    }

    pub fn get(&self, name: &str) -> Option<&Element> {
        self.vars.get(name)
    }

    /// Stores or, with `None`, removes a variable. A value can only be
    /// replaced by one of a compatible kind.
    pub fn put(&mut self, name: &str, value: Option<Element>) -> Result<(), PanError> {
        match value {
            None => {
                self.vars.remove(name);
            }
            Some(value) => {
                if let Some(old) = self.vars.get(name) {
                    old.check_valid_replacement(&value).map_err(|_| {
                        PanError::evaluation(format!(
                            "cannot replace variable '{name}' of type {} with {}",
                            old.type_name(),
                            value.type_name()
                        ))
                    })?;
                }
                self.vars.insert(ArcStr::from(name), value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv() {
        let locals = LocalVariableMap::new(Some(vec![Element::Long(1), Element::string("x")]));
        assert_eq!(locals.get("ARGC"), Some(&Element::Long(2)));
        assert_eq!(locals.get("ARGV").and_then(Element::len), Some(2));
        assert!(LocalVariableMap::new(None).get("ARGV").is_none());
    }

    #[test]
    fn test_replacement_rules() {
        let mut locals = LocalVariableMap::default();
        locals.put("x", Some(Element::Long(1))).unwrap();
        locals.put("x", Some(Element::Long(2))).unwrap();
        assert!(locals.put("x", Some(Element::empty_list())).is_err());
        locals.put("x", Some(Element::Null)).unwrap();
        locals.put("x", Some(Element::empty_dict())).unwrap();

        locals.put("x", None).unwrap();
        assert!(locals.get("x").is_none());
    }
}
