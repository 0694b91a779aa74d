use std::mem;
use std::sync::Arc;

use tracing::{info, warn};

use crate::compiler::DeprecationLevel;
use crate::data::{Dict, Element, Path, Term};
use crate::error::PanError;
use crate::eval::{Context, Function, LocalVariableMap, ResourceIterator};
use crate::template::{Expr, ExprKind, SourceRange, TemplateType};

const BUILTINS: &[&str] = &[
    "append",
    "create",
    "debug",
    "dict",
    "error",
    "exists",
    "file_contents",
    "first",
    "if_exists",
    "is_defined",
    "length",
    "list",
    "next",
    "nlist",
    "to_string",
    "traceback",
    "value",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

fn arity(name: &str, args: &[Expr], expected: usize) -> Result<(), PanError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(PanError::evaluation(format!(
            "{name}() takes {expected} argument(s), {} given",
            args.len()
        )))
    }
}

/// Name of a plain local variable passed by reference.
fn variable_name<'a>(function: &str, expr: &'a Expr) -> Result<&'a str, PanError> {
    match &expr.kind {
        ExprKind::Variable { name, subscripts } if subscripts.is_empty() => Ok(name),
        _ => Err(PanError::evaluation(format!(
            "{function}() requires a variable name as argument"
        ))),
    }
}

impl Context {
    pub(crate) fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        call_site: SourceRange,
    ) -> Result<Element, PanError> {
        if let Some(function) = self.definitions.functions.get(name).cloned() {
            return self.call_user(&function, args, call_site);
        }

        match name {
            "value" => {
                arity(name, args, 1)?;
                let path = Path::parse(&self.eval_string(&args[0])?)?;
                Ok(self.get_element(&path, true)?.unwrap_or_default())
            }
            "exists" => {
                arity(name, args, 1)?;
                self.exists(&args[0]).map(Element::Boolean)
            }
            "is_defined" => {
                arity(name, args, 1)?;
                let value = match &args[0].kind {
                    ExprKind::Variable { .. } if !self.exists(&args[0])? => Element::Undef,
                    _ => self.eval(&args[0])?,
                };
                Ok(Element::Boolean(!value.is_undef() && !value.is_null()))
            }
            "if_exists" => {
                arity(name, args, 1)?;
                let template = self.eval_string(&args[0])?;
                match self.global_load(&template, true)? {
                    Some(_) => Ok(Element::String(template)),
                    None => Ok(Element::Undef),
                }
            }
            "file_contents" => {
                arity(name, args, 1)?;
                let file = self.eval_string(&args[0])?;
                let path = self
                    .lookup_file(&file)?
                    .ok_or_else(|| PanError::evaluation(format!("cannot locate file: {file}")))?;
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| PanError::system("cannot read file", Some(&path), e))?;
                Ok(Element::string(text))
            }
            "create" => {
                let Some((template, pairs)) = args.split_first() else {
                    return Err(PanError::evaluation("create() requires a template name"));
                };
                let template = self.eval_string(template)?;
                self.create(&template, pairs, call_site)
            }
            "list" => {
                let items = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Element::list(items))
            }
            "dict" => self.dict(name, args),
            "nlist" => {
                match self.session.options.deprecation {
                    DeprecationLevel::Off => {}
                    DeprecationLevel::On => {
                        warn!("{}: nlist() is deprecated, use dict()", self.current.location(call_site));
                    }
                    DeprecationLevel::Fatal => {
                        return Err(PanError::evaluation("nlist() is deprecated, use dict()"));
                    }
                }
                self.dict(name, args)
            }
            "append" => match args {
                [value] => {
                    let value = self.eval(value)?;
                    let current = self.read_self()?.clone();
                    let appended = append_to(current, value)?;
                    self.write_self(appended.clone())?;
                    Ok(appended)
                }
                [list, value] => {
                    let list = self.eval(list)?;
                    let value = self.eval(value)?;
                    append_to(list, value)
                }
                _ => Err(PanError::evaluation("append() takes 1 or 2 arguments")),
            },
            "length" => {
                arity(name, args, 1)?;
                let value = self.eval(&args[0])?;
                let len = match &value {
                    Element::String(s) => s.chars().count(),
                    other => other.len().ok_or_else(|| {
                        PanError::evaluation(format!(
                            "length() requires a string, list or dict, not {}",
                            other.type_name()
                        ))
                    })?,
                };
                Ok(Element::Long(len as i64))
            }
            "to_string" => {
                arity(name, args, 1)?;
                match self.eval(&args[0])? {
                    s @ Element::String(_) => Ok(s),
                    other => Ok(Element::string(other.to_string())),
                }
            }
            "first" | "next" => {
                arity(name, args, 3)?;
                let key = variable_name(name, &args[1])?;
                let value = variable_name(name, &args[2])?;
                let collection = self.eval(&args[0])?;
                self.iterate(name == "first", collection, key, value)
                    .map(Element::Boolean)
            }
            "error" => {
                arity(name, args, 1)?;
                let message = self.eval_string(&args[0])?;
                Err(PanError::evaluation(message.to_string()))
            }
            "debug" => {
                arity(name, args, 1)?;
                let message = self.eval(&args[0])?;
                if self.debug_enabled() {
                    info!(template = self.current.name(), "{message}");
                }
                Ok(message)
            }
            "traceback" => {
                arity(name, args, 1)?;
                let message = self.eval(&args[0])?;
                info!("{message}\n{}", self.traceback(call_site));
                Ok(message)
            }
            _ => Err(PanError::evaluation(format!("undefined function: {name}"))),
        }
    }

    fn call_user(
        &mut self,
        function: &Function,
        args: &[Expr],
        call_site: SourceRange,
    ) -> Result<Element, PanError> {
        let argv = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;

        self.push_template(Arc::clone(&function.template), call_site)?;
        let saved_locals = mem::replace(&mut self.locals, LocalVariableMap::new(Some(argv)));
        let saved_iterators = mem::take(&mut self.iterators);

        let result = self.eval(&function.body);

        self.locals = saved_locals;
        self.iterators = saved_iterators;
        self.pop_template();
        result
    }

    /// `exists` takes either a variable, possibly subscripted, or a string
    /// naming a path or a template.
    fn exists(&mut self, arg: &Expr) -> Result<bool, PanError> {
        if let ExprKind::Variable { name, subscripts } = &arg.kind {
            let Some(mut base) = self.variable(name) else {
                return Ok(false);
            };
            for expr in subscripts {
                let term = Term::from_element(&self.eval(expr)?)?;
                base = match base.child(&term) {
                    Ok(Some(child)) => child.clone(),
                    _ => return Ok(false),
                };
            }
            return Ok(true);
        }

        let name = self.eval_string(arg)?;
        if name.starts_with('/') || name.contains(':') {
            let path = Path::parse(&name)?;
            Ok(self.get_element(&path, false)?.is_some())
        } else {
            Ok(self.global_load(&name, true)?.is_some())
        }
    }

    fn dict(&mut self, name: &str, args: &[Expr]) -> Result<Element, PanError> {
        if args.len() % 2 != 0 {
            return Err(PanError::evaluation(format!(
                "{name}() requires an even number of arguments"
            )));
        }
        let mut dict = Dict::new();
        for pair in args.chunks(2) {
            let key = self.eval_string(&pair[0])?;
            if !Term::parse(&key)?.is_key() {
                return Err(PanError::evaluation(format!("invalid dict key: {key}")));
            }
            let value = self.eval(&pair[1])?;
            if !value.is_null() {
                dict.insert(key, value);
            }
        }
        Ok(Element::Dict(Arc::new(dict)))
    }

    /// Executes a structure template against a fresh relative root, then
    /// applies the key/value overrides.
    fn create(
        &mut self,
        name: &str,
        pairs: &[Expr],
        call_site: SourceRange,
    ) -> Result<Element, PanError> {
        if pairs.len() % 2 != 0 {
            return Err(PanError::evaluation(
                "create() requires key/value pairs after the template name",
            ));
        }

        let template = self
            .global_load(name, false)?
            .ok_or_else(|| PanError::evaluation(format!("cannot locate template: {name}")))?;
        if template.template_type() != TemplateType::Structure {
            return Err(PanError::evaluation(format!(
                "create() requires a structure template, '{name}' is {}",
                template.template_type()
            )));
        }

        let saved_root = self.relative_root.replace(Element::empty_dict());
        let result = match self.push_template(Arc::clone(&template), call_site) {
            Ok(()) => {
                let result = self.execute_statements(&template);
                self.pop_template();
                result
            }
            Err(err) => Err(err),
        };
        let created = mem::replace(&mut self.relative_root, saved_root);
        result?;

        let mut created = created.unwrap_or_else(Element::empty_dict);
        for pair in pairs.chunks(2) {
            let key = self.eval_string(&pair[0])?;
            let term = Term::parse(&key)?;
            let value = self.eval(&pair[1])?;
            let value = if value.is_null() { None } else { Some(value) };
            created.rput(&[term], value)?;
        }
        Ok(created)
    }

    fn iterate(
        &mut self,
        restart: bool,
        collection: Element,
        key: &str,
        value: &str,
    ) -> Result<bool, PanError> {
        if restart || self.iterators.get_mut(&collection).is_none() {
            let iterator = ResourceIterator::new(collection.clone());
            self.iterators.put(&collection, Some(iterator))?;
        }

        let entry = self
            .iterators
            .get_mut(&collection)
            .and_then(ResourceIterator::advance);
        match entry {
            Some((k, v)) => {
                self.set_loop_variable(key, k)?;
                self.set_loop_variable(value, v)?;
                Ok(true)
            }
            None => {
                self.iterators.put(&collection, None)?;
                self.set_loop_variable(key, Element::Undef)?;
                self.set_loop_variable(value, Element::Undef)?;
                Ok(false)
            }
        }
    }
}

fn append_to(list: Element, value: Element) -> Result<Element, PanError> {
    let mut items = match list {
        Element::List(items) => items,
        Element::Undef | Element::Null => Arc::new(Vec::new()),
        other => {
            return Err(PanError::evaluation(format!(
                "append() requires a list, not {}",
                other.type_name()
            )));
        }
    };
    Arc::make_mut(&mut items).push(value);
    Ok(Element::List(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_copies_on_write() {
        let original = Element::list(vec![Element::Long(1)]);
        let appended = append_to(original.clone(), Element::Long(2)).unwrap();
        assert_eq!(original.len(), Some(1));
        assert_eq!(appended.len(), Some(2));
        assert!(append_to(Element::Long(1), Element::Long(2)).is_err());
    }

    #[test]
    fn test_builtin_names() {
        assert!(is_builtin("create"));
        assert!(is_builtin("nlist"));
        assert!(!is_builtin("my_function"));
    }
}
