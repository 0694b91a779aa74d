use std::collections::HashMap;
use std::sync::Arc;

use crate::ArcStr;
use crate::data::{Element, Path, PathKind, Term};
use crate::error::{PanError, ValidationError};
use crate::eval::Context;
use crate::template::{Expr, TypeShape, TypeSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Element,
    Property,
    Boolean,
    Long,
    Double,
    Number,
    String,
    Resource,
    List,
    Dict,
    Undef,
    Null,
}

impl Builtin {
    const ALL: [(&'static str, Builtin); 13] = [
        ("element", Builtin::Element),
        ("property", Builtin::Property),
        ("boolean", Builtin::Boolean),
        ("long", Builtin::Long),
        ("double", Builtin::Double),
        ("number", Builtin::Number),
        ("string", Builtin::String),
        ("resource", Builtin::Resource),
        ("list", Builtin::List),
        ("dict", Builtin::Dict),
        ("nlist", Builtin::Dict),
        ("undef", Builtin::Undef),
        ("null", Builtin::Null),
    ];

    pub fn accepts(self, element: &Element) -> bool {
        match self {
            Builtin::Element => true,
            Builtin::Property => element.is_property(),
            Builtin::Boolean => matches!(element, Element::Boolean(_)),
            Builtin::Long => matches!(element, Element::Long(_)),
            Builtin::Double => matches!(element, Element::Double(_)),
            Builtin::Number => matches!(element, Element::Long(_) | Element::Double(_)),
            Builtin::String => matches!(element, Element::String(_)),
            Builtin::Resource => element.is_resource(),
            Builtin::List => matches!(element, Element::List(_)),
            Builtin::Dict => matches!(element, Element::Dict(_)),
            Builtin::Undef => element.is_undef(),
            Builtin::Null => element.is_null(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypeDef {
    Builtin(Builtin),
    User {
        spec: TypeSpec,
        with: Option<Expr>,
        location: String,
    },
}

/// Named types visible to one build, seeded with the built-in types.
#[derive(Debug, Clone)]
pub struct TypeMap {
    types: HashMap<ArcStr, Arc<TypeDef>>,
}

impl Default for TypeMap {
    fn default() -> Self {
        let types = Builtin::ALL
            .iter()
            .map(|(name, builtin)| (ArcStr::from(*name), Arc::new(TypeDef::Builtin(*builtin))))
            .collect();
        TypeMap { types }
    }
}

impl TypeMap {
    pub fn get(&self, name: &str) -> Option<Arc<TypeDef>> {
        self.types.get(name).cloned()
    }

    pub fn define(&mut self, name: &str, def: TypeDef) -> Result<(), PanError> {
        if let Some(existing) = self.types.get(name) {
            let message = match &**existing {
                TypeDef::Builtin(_) => format!("cannot redefine built-in type '{name}'"),
                TypeDef::User { location, .. } => {
                    format!("type '{name}' is already defined in [{location}]")
                }
            };
            return Err(PanError::evaluation(message));
        }
        self.types.insert(ArcStr::from(name), Arc::new(def));
        Ok(())
    }
}

/// A `bind` statement recorded during the build.
#[derive(Debug, Clone)]
pub struct Binding {
    pub path: Path,
    pub spec: TypeSpec,
    pub location: String,
}

impl Context {
    /// Checks the finished tree: nothing may be left undefined and every
    /// bound path must satisfy its type.
    pub(crate) fn validate(&mut self) -> Result<(), PanError> {
        let root = self.root.clone();
        let object_file = self.object_template.source_path().map(|p| p.to_path_buf());

        if let Some(terms) = root.locate_undefined() {
            return Err(ValidationError::new("element value is undefined")
                .with_path(Path::from_terms(PathKind::Absolute, terms))
                .set_object_template(object_file.as_deref())
                .into());
        }

        for binding in self.definitions.bindings.clone() {
            let Some(element) = root.rget(binding.path.terms(), true)? else {
                continue;
            };
            self.validate_spec(&binding.spec, &element).map_err(|e| {
                e.map_validation(|v| {
                    v.set_path_type_and_object(
                        &binding.path,
                        &binding.spec.to_string(),
                        &binding.location,
                        object_file.as_deref(),
                    )
                })
            })?;
        }
        Ok(())
    }

    pub(crate) fn validate_spec(
        &mut self,
        spec: &TypeSpec,
        element: &Element,
    ) -> Result<(), PanError> {
        match (spec.shape, element) {
            (TypeShape::Plain, _) => self.validate_named(&spec.base, element),
            (TypeShape::List, Element::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    self.validate_named(&spec.base, item)
                        .map_err(|e| e.map_validation(|v| v.add_term(Term::Index(i as u32))))?;
                }
                Ok(())
            }
            (TypeShape::Dict, Element::Dict(items)) => {
                for (key, item) in items.iter() {
                    self.validate_named(&spec.base, item)
                        .map_err(|e| e.map_validation(|v| v.add_term(Term::Key(key.clone()))))?;
                }
                Ok(())
            }
            (TypeShape::List, other) | (TypeShape::Dict, other) => Err(ValidationError::new(
                format!("element of type {} does not match {spec}", other.type_name()),
            )
            .with_value(other)
            .into()),
        }
    }

    fn validate_named(&mut self, name: &str, element: &Element) -> Result<(), PanError> {
        let def = self
            .definitions
            .types
            .get(name)
            .ok_or_else(|| PanError::evaluation(format!("undefined type '{name}'")))?;

        match &*def {
            TypeDef::Builtin(builtin) if builtin.accepts(element) => Ok(()),
            TypeDef::Builtin(_) => Err(ValidationError::new(format!(
                "element of type {} is not a {name}",
                element.type_name()
            ))
            .with_value(element)
            .into()),
            TypeDef::User {
                spec,
                with,
                location,
            } => {
                let result = self.validate_spec(spec, element).and_then(|()| {
                    let passed = match with {
                        Some(code) => self.execute_validation_block(code, element)?,
                        None => true,
                    };
                    if passed {
                        Ok(())
                    } else {
                        Err(ValidationError::new("user-defined validation failed")
                            .with_value(element)
                            .into())
                    }
                });
                result.map_err(|e| e.map_validation(|v| v.add_type_to_stack(name, Some(location))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let types = TypeMap::default();
        for name in ["element", "number", "nlist", "resource", "undef"] {
            assert!(types.get(name).is_some(), "{name}");
        }
        assert!(Builtin::Number.accepts(&Element::Double(1.0)));
        assert!(!Builtin::Long.accepts(&Element::Double(1.0)));
        assert!(Builtin::Property.accepts(&Element::string("s")));
        assert!(!Builtin::Property.accepts(&Element::empty_list()));
    }

    #[test]
    fn test_redefinition() {
        let mut types = TypeMap::default();
        let user = TypeDef::User {
            spec: TypeSpec {
                base: ArcStr::from("long"),
                shape: TypeShape::Plain,
            },
            with: None,
            location: String::from("/t/types.pan:2.1-2.20"),
        };
        types.define("port", user.clone()).unwrap();

        let err = types.define("port", user.clone()).unwrap_err();
        assert!(err.to_string().contains("already defined in [/t/types.pan:2.1-2.20]"));
        assert!(types.define("long", user).is_err());
    }
}
