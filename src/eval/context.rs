use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write;
use std::mem;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::debug;

use crate::ArcStr;
use crate::data::{Element, Path, PathKind, Term};
use crate::engine::Session;
use crate::error::{PanError, ValidationError};
use crate::eval::{Binding, FinalFlags, IteratorMap, LocalVariableMap, SelfHolder, SelfTarget, TypeMap};
use crate::source::SourceFile;
use crate::template::{Expr, SourceRange, Template};

#[derive(Debug, Clone)]
pub(crate) struct Global {
    pub(crate) value: Element,
    pub(crate) is_final: bool,
}

/// User function defined with a `function` statement.
#[derive(Debug)]
pub struct Function {
    pub name: ArcStr,
    pub body: Expr,
    pub template: Arc<Template>,
}

/// Types, functions and bindings collected during a build. Validation runs
/// against the same definitions.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    pub types: TypeMap,
    pub functions: HashMap<ArcStr, Arc<Function>>,
    pub bindings: Vec<Binding>,
}

/// Everything a build read.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    /// Templates executed, by name.
    pub templates: BTreeMap<ArcStr, SourceFile>,
    /// Text files read and lookups that found nothing.
    pub other: BTreeSet<SourceFile>,
    /// Other objects whose trees were referenced.
    pub objects: BTreeSet<ArcStr>,
}

/// State of one object build.
///
/// A context is owned by a single task and never shared, so nothing in here
/// is synchronized. Only the caches reached through the session are.
pub struct Context {
    pub(super) session: Arc<Session>,
    pub(super) object: ArcStr,
    pub(super) object_template: Arc<Template>,
    pub(super) current: Arc<Template>,
    pub(super) frames: Vec<(Arc<Template>, SourceRange)>,
    pub(super) root: Element,
    pub(super) relative_root: Option<Element>,
    pub(super) holders: Vec<SelfHolder>,
    pub(super) locals: LocalVariableMap,
    pub(super) iterators: IteratorMap,
    pub(super) globals: HashMap<ArcStr, Global>,
    pub(super) definitions: Definitions,
    pub(super) final_flags: FinalFlags,
    pub(super) dependencies: Dependencies,
    pub(super) included: HashSet<ArcStr>,
    pub(super) check_object_dependencies: bool,
    pub(super) call_depth_limit: Option<usize>,
    pub(super) iteration_limit: Option<u64>,
}

impl Context {
    pub(crate) fn new(session: Arc<Session>, object_template: Arc<Template>) -> Self {
        let call_depth_limit = session.options.max_recursion;
        let iteration_limit = session.options.max_iteration;
        Context {
            session,
            object: ArcStr::from(object_template.name()),
            current: Arc::clone(&object_template),
            object_template,
            frames: Vec::new(),
            root: Element::empty_dict(),
            relative_root: None,
            holders: Vec::new(),
            locals: LocalVariableMap::default(),
            iterators: IteratorMap::default(),
            globals: HashMap::new(),
            definitions: Definitions::default(),
            final_flags: FinalFlags::new(),
            dependencies: Dependencies::default(),
            included: HashSet::new(),
            check_object_dependencies: true,
            call_depth_limit,
            iteration_limit,
        }
    }

    /// Context for validating an already built tree. Other objects may be
    /// read freely at this point, their builds are complete.
    pub(crate) fn for_validation(
        session: Arc<Session>,
        template: Arc<Template>,
        root: Element,
        definitions: Definitions,
    ) -> Self {
        let mut context = Context::new(session, template);
        context.root = root;
        context.definitions = definitions;
        context.check_object_dependencies = false;
        context
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub(crate) fn into_parts(self) -> (Element, Definitions, Dependencies) {
        (self.root, self.definitions, self.dependencies)
    }

    pub(crate) fn turn_off_object_dependency_checking(&mut self) {
        self.check_object_dependencies = false;
    }

    pub(crate) fn set_object_and_loadpath(&mut self) -> Result<(), PanError> {
        let object = Element::String(self.object.clone());
        self.set_global_variable("OBJECT", Some(object), true)?;
        self.set_global_variable("LOADPATH", Some(Element::empty_list()), false)
    }

    /// Relative directories searched for templates: the entries of
    /// `LOADPATH` followed by the include directories themselves.
    fn loadpath(&self) -> Result<Vec<String>, PanError> {
        let mut loadpath = Vec::new();
        if let Some(Global {
            value: Element::List(entries),
            ..
        }) = self.globals.get("LOADPATH")
        {
            for entry in entries.iter() {
                match entry {
                    Element::String(s) => loadpath.push(s.to_string()),
                    other => {
                        return Err(PanError::evaluation(format!(
                            "LOADPATH entries must be strings, not {}",
                            other.type_name()
                        )));
                    }
                }
            }
        }
        if !loadpath.iter().any(String::is_empty) {
            loadpath.push(String::new());
        }
        Ok(loadpath)
    }

    /// Loads a template through the compile cache. Missing templates are an
    /// error unless `lookup_only` is set, in which case the failed lookup is
    /// recorded as a dependency.
    pub(crate) fn global_load(
        &mut self,
        name: &str,
        lookup_only: bool,
    ) -> Result<Option<Arc<Template>>, PanError> {
        let loadpath = self.loadpath()?;
        let source = self
            .session
            .repository
            .retrieve_pan_source_with(name, &loadpath);

        let Some(path) = source.path() else {
            if lookup_only {
                self.dependencies.other.insert(source);
                return Ok(None);
            }
            return Err(PanError::evaluation(format!(
                "cannot locate template: {name}"
            )));
        };

        let template = self.session.compiled.wait_for_result(path.as_str())?;
        template.verify_name(source.name())?;
        if !lookup_only {
            self.dependencies
                .templates
                .insert(ArcStr::from(source.name()), source.clone());
        }
        Ok(Some(template))
    }

    /// Finds a text file on the load path and records the lookup.
    pub(crate) fn lookup_file(&mut self, name: &str) -> Result<Option<Utf8PathBuf>, PanError> {
        let loadpath = self.loadpath()?;
        let source = self
            .session
            .repository
            .retrieve_txt_source_with(name, &loadpath);
        let path = source.path().map(|p| p.to_path_buf());
        self.dependencies.other.insert(source);
        Ok(path)
    }

    pub(crate) fn get_element(
        &mut self,
        path: &Path,
        error_if_missing: bool,
    ) -> Result<Option<Element>, PanError> {
        let found = match path.kind() {
            PathKind::Absolute => self.root.rget(path.terms(), false)?,
            PathKind::Relative => match &self.relative_root {
                Some(root) => root.rget(path.terms(), false)?,
                None => {
                    return Err(PanError::evaluation(format!(
                        "relative path '{path}' used outside of a structure template"
                    )));
                }
            },
            PathKind::External => {
                let other = path.authority().unwrap_or_default();
                if other == &*self.object {
                    self.root.rget(path.terms(), false)?
                } else {
                    self.external_root(other)?.rget(path.terms(), false)?
                }
            }
        };

        match found {
            None if error_if_missing => Err(PanError::evaluation(format!(
                "no value for path: {path}"
            ))),
            found => Ok(found),
        }
    }

    /// Root of another object, building it if needed. While this object is
    /// still being built the reference is registered for cycle detection.
    fn external_root(&mut self, other: &str) -> Result<Element, PanError> {
        let template = self
            .global_load(other, false)?
            .ok_or_else(|| PanError::evaluation(format!("cannot locate template: {other}")))?;
        if !template.is_object() {
            return Err(PanError::evaluation(format!(
                "'{other}' is not an object template"
            )));
        }

        self.dependencies.objects.insert(ArcStr::from(other));
        if self.check_object_dependencies {
            self.session.built.set_dependency(&self.object, other)?;
        }

        debug!(object = %self.object, other, "waiting for external object");
        Ok(self.session.built.wait_for_result(other)?.root)
    }

    pub(crate) fn put_element(&mut self, path: &Path, value: Option<Element>) -> Result<(), PanError> {
        match path.kind() {
            PathKind::External => Err(PanError::compiler(format!(
                "attempt to modify external path '{path}'"
            ))),
            PathKind::Absolute if path.terms().is_empty() => match value {
                Some(value @ Element::Dict(_)) => {
                    self.root = value;
                    Ok(())
                }
                other => Err(PanError::evaluation(format!(
                    "root element cannot be replaced by element of type {}",
                    other.as_ref().map_or("null", Element::type_name)
                ))),
            },
            PathKind::Absolute => self.root.rput(path.terms(), value),
            PathKind::Relative => match self.relative_root.as_mut() {
                Some(root) => root.rput(path.terms(), value),
                None => Err(PanError::compiler(format!(
                    "relative path '{path}' without a relative root"
                ))),
            },
        }
    }

    /// Makes SELF refer to the value at `path`, creating it as undef.
    pub(crate) fn initialize_self(&mut self, path: &Path) -> Result<Element, PanError> {
        let current = match self.get_element(path, false)? {
            Some(element) => element,
            None => {
                self.put_element(path, Some(Element::Undef))?;
                Element::Undef
            }
        };
        self.holders.push(SelfHolder::Path {
            path: path.clone(),
            element: current.clone(),
        });
        Ok(current)
    }

    pub(crate) fn read_self(&self) -> Result<&Element, PanError> {
        self.holders
            .last()
            .ok_or_else(|| PanError::evaluation("SELF is not defined here"))?
            .read()
    }

    pub(crate) fn write_self(&mut self, value: Element) -> Result<(), PanError> {
        let holder = self
            .holders
            .last_mut()
            .ok_or_else(|| PanError::evaluation("SELF is not defined here"))?;
        let stored = if value.is_null() { None } else { Some(value.clone()) };
        match holder.write(value)? {
            None => Ok(()),
            Some(SelfTarget::Path(path)) => self.put_element(&path, stored),
            Some(SelfTarget::Variable(name)) => self.set_global_variable(&name, stored, false),
        }
    }

    pub(crate) fn global_variable(&self, name: &str) -> Option<&Element> {
        self.globals.get(name).map(|g| &g.value)
    }

    pub(crate) fn set_global_variable(
        &mut self,
        name: &str,
        value: Option<Element>,
        is_final: bool,
    ) -> Result<(), PanError> {
        if self.globals.get(name).is_some_and(|g| g.is_final) {
            return Err(PanError::evaluation(format!(
                "attempt to modify final global variable named {name}"
            )));
        }
        match value {
            Some(value) => {
                self.globals
                    .insert(ArcStr::from(name), Global { value, is_final });
            }
            None => {
                self.globals.remove(name);
            }
        }
        Ok(())
    }

    /// Assigns a local variable, or a child of one when `terms` is not empty.
    /// Missing variables spring into existence as a dict or list, depending
    /// on the first term.
    pub(crate) fn set_local_variable(
        &mut self,
        name: &str,
        terms: &[Term],
        value: Element,
    ) -> Result<(), PanError> {
        if self.globals.contains_key(name) {
            return Err(PanError::evaluation(format!(
                "cannot modify global variable from DML: {name}"
            )));
        }

        let Some(first) = terms.first() else {
            return self.locals.put(name, Some(value));
        };

        let mut current = match self.locals.get(name) {
            Some(element) if !element.is_undef() && !element.is_null() => element.clone(),
            _ if first.is_key() => Element::empty_dict(),
            _ => Element::empty_list(),
        };
        let value = if value.is_null() { None } else { Some(value) };
        current.rput(terms, value)?;
        self.locals.put(name, Some(current))
    }

    /// Loop variables may change kind from one iteration to the next.
    pub(crate) fn set_loop_variable(&mut self, name: &str, value: Element) -> Result<(), PanError> {
        if self.globals.contains_key(name) {
            return Err(PanError::evaluation(format!(
                "cannot modify global variable from DML: {name}"
            )));
        }
        self.locals.put(name, None)?;
        self.locals.put(name, Some(value))
    }

    /// Local variable, falling back to a global of the same name.
    pub(crate) fn variable(&self, name: &str) -> Option<Element> {
        self.locals
            .get(name)
            .or_else(|| self.global_variable(name))
            .cloned()
    }

    /// Runs a DML expression with fresh local variables and iterators.
    pub(crate) fn execute_dml_block(&mut self, expr: &Expr) -> Result<Element, PanError> {
        let saved_locals = mem::take(&mut self.locals);
        let saved_iterators = mem::take(&mut self.iterators);
        let set_template = !self.globals.contains_key("TEMPLATE");
        if set_template {
            self.globals.insert(
                ArcStr::from("TEMPLATE"),
                Global {
                    value: Element::string(self.current.name()),
                    is_final: true,
                },
            );
        }

        let result = self.eval(expr);

        if set_template {
            self.globals.remove("TEMPLATE");
        }
        self.locals = saved_locals;
        self.iterators = saved_iterators;
        result
    }

    /// Runs validation code against `value`, which SELF refers to and which
    /// cannot be changed. The code must produce a boolean.
    pub(crate) fn execute_validation_block(
        &mut self,
        expr: &Expr,
        value: &Element,
    ) -> Result<bool, PanError> {
        self.holders.push(SelfHolder::ReadOnly(value.clone()));
        let result = self.execute_dml_block(expr);
        self.holders.pop();

        match result {
            Ok(Element::Boolean(passed)) => Ok(passed),
            Ok(other) => Err(ValidationError::new(format!(
                "validation code must return a boolean, not {}",
                other.type_name()
            ))
            .with_value(&other)
            .into()),
            Err(err) if err.is_validation() => Err(err),
            Err(err) => Err(ValidationError::new("error while evaluating validation code")
                .with_cause(&err)
                .into()),
        }
    }

    pub(crate) fn push_template(
        &mut self,
        template: Arc<Template>,
        call_site: SourceRange,
    ) -> Result<(), PanError> {
        let previous = mem::replace(&mut self.current, template);
        self.frames.push((previous, call_site));

        if let Some(limit) = self.call_depth_limit
            && self.frames.len() > limit
        {
            self.pop_template();
            return Err(PanError::evaluation(format!(
                "call depth limit ({limit}) exceeded"
            )));
        }
        debug!(object = %self.object, template = self.current.name(), "enter");
        Ok(())
    }

    pub(crate) fn pop_template(&mut self) {
        if let Some((previous, _)) = self.frames.pop() {
            debug!(object = %self.object, template = self.current.name(), "exit");
            self.current = previous;
        }
    }

    pub(crate) fn check_iterations(&self, count: u64) -> Result<(), PanError> {
        match self.iteration_limit {
            Some(limit) if count > limit => Err(PanError::evaluation(format!(
                "iteration limit ({limit}) exceeded"
            ))),
            _ => Ok(()),
        }
    }

    pub fn traceback(&self, range: SourceRange) -> String {
        let mut out = String::from(">>> call stack trace \n");
        let _ = writeln!(out, ">>> {}", self.current.location(range));
        for (template, call_site) in self.frames.iter().rev() {
            let _ = writeln!(out, ">>> {}", template.location(*call_site));
        }
        out.push_str(">>> ====================\n");
        out
    }

    /// Adds location and traceback to an error that has none yet.
    pub(crate) fn located(&self, err: PanError, range: SourceRange) -> PanError {
        match &err {
            PanError::Evaluation { range: None, .. } => err.add_exception_info(
                Some(range),
                self.current.source_path(),
                Some(self.traceback(range)),
            ),
            PanError::Syntax { range: None, .. } => {
                err.add_exception_info(Some(range), self.current.source_path(), None)
            }
            _ => err,
        }
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.session.options.check_debug_enabled(self.current.name())
    }
}
