use std::sync::Arc;

use tracing::debug;

use crate::ArcStr;
use crate::data::{Element, Path, Term};
use crate::error::PanError;
use crate::eval::{Binding, Context, Function, SelfHolder, TypeDef};
use crate::template::{
    BinaryOp, Expr, ExprKind, SourceRange, Statement, StatementKind, Template, TemplateType,
    UnaryOp,
};

impl Context {
    /// Runs the object template: sets up the automatic variables, applies the
    /// configured root element and executes every statement.
    pub(crate) fn execute_object(&mut self) -> Result<(), PanError> {
        self.set_object_and_loadpath()?;

        let session = Arc::clone(&self.session);
        if let Some(expr) = &session.options.root_element {
            match self.execute_dml_block(expr)? {
                root @ Element::Dict(_) => self.root = root,
                other => {
                    return Err(PanError::evaluation(format!(
                        "root element must be a dict, not {}",
                        other.type_name()
                    )));
                }
            }
        }

        let template = Arc::clone(&self.object_template);
        if let Some(source) = template.source() {
            self.dependencies
                .templates
                .insert(ArcStr::from(template.name()), source.clone());
        }
        self.execute_statements(&template)
    }

    pub(crate) fn execute_statements(&mut self, template: &Template) -> Result<(), PanError> {
        for statement in template.statements() {
            self.execute(statement)
                .map_err(|e| self.located(e, statement.range))?;
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), PanError> {
        match &statement.kind {
            StatementKind::Include(expr) => {
                self.holders.push(SelfHolder::Invalid);
                let name = self.execute_dml_block(expr);
                self.holders.pop();
                match name? {
                    Element::String(name) => self.include(&name, statement.range),
                    Element::Null | Element::Undef => Ok(()),
                    other => Err(PanError::evaluation(format!(
                        "include expression must be a string, not {}",
                        other.type_name()
                    ))),
                }
            }
            StatementKind::Variable {
                name,
                value,
                conditional,
                is_final,
            } => self.assign_variable(name, value, *conditional, *is_final),
            StatementKind::Assign {
                path,
                value,
                conditional,
                is_final,
            } => self.assign_path(path, value, *conditional, *is_final),
            StatementKind::Bind { path, spec } => {
                if self.definitions.types.get(&spec.base).is_none() {
                    return Err(PanError::evaluation(format!("undefined type '{}'", spec.base)));
                }
                self.definitions.bindings.push(Binding {
                    path: path.clone(),
                    spec: spec.clone(),
                    location: self.current.location(statement.range),
                });
                Ok(())
            }
            StatementKind::Type { name, spec, with } => {
                if self.definitions.types.get(&spec.base).is_none() {
                    return Err(PanError::evaluation(format!("undefined type '{}'", spec.base)));
                }
                let def = TypeDef::User {
                    spec: spec.clone(),
                    with: with.clone(),
                    location: self.current.location(statement.range),
                };
                self.definitions.types.define(name, def)
            }
            StatementKind::Function { name, body } => {
                if super::builtins::is_builtin(name) || self.definitions.functions.contains_key(name) {
                    return Err(PanError::evaluation(format!(
                        "cannot redefine function '{name}'"
                    )));
                }
                let function = Function {
                    name: name.clone(),
                    body: body.clone(),
                    template: Arc::clone(&self.current),
                };
                self.definitions
                    .functions
                    .insert(name.clone(), Arc::new(function));
                Ok(())
            }
        }
    }

    pub(crate) fn include(&mut self, name: &str, call_site: SourceRange) -> Result<(), PanError> {
        let template = self
            .global_load(name, false)?
            .ok_or_else(|| PanError::evaluation(format!("cannot locate template: {name}")))?;

        match template.template_type() {
            TemplateType::Object => {
                return Err(PanError::evaluation(format!(
                    "cannot include object template '{name}'"
                )));
            }
            TemplateType::Structure if self.relative_root.is_none() => {
                return Err(PanError::evaluation(format!(
                    "structure template '{name}' can only be used through create()"
                )));
            }
            TemplateType::Unique | TemplateType::Declaration
                if !self.included.insert(ArcStr::from(name)) =>
            {
                debug!(template = name, "already included");
                return Ok(());
            }
            _ => {}
        }

        self.push_template(Arc::clone(&template), call_site)?;
        let result = self.execute_statements(&template);
        self.pop_template();
        result
    }

    fn assign_variable(
        &mut self,
        name: &ArcStr,
        value: &Expr,
        conditional: bool,
        is_final: bool,
    ) -> Result<(), PanError> {
        let current = match self.global_variable(name) {
            Some(current) => current.clone(),
            None => {
                self.set_global_variable(name, Some(Element::Undef), false)?;
                Element::Undef
            }
        };

        self.holders.push(SelfHolder::Variable {
            name: name.clone(),
            element: current.clone(),
        });
        let result = if !conditional || current.is_undef() {
            self.execute_dml_block(value)
                .and_then(|v| self.set_global_variable(name, Some(v), is_final))
        } else if is_final {
            self.set_global_variable(name, Some(current), true)
        } else {
            Ok(())
        };
        self.holders.pop();
        result
    }

    fn assign_path(
        &mut self,
        path: &Path,
        value: &Expr,
        conditional: bool,
        is_final: bool,
    ) -> Result<(), PanError> {
        // Final flags only cover the object's own tree.
        let checks_final = path.is_absolute();
        if checks_final && let Some(reason) = self.final_flags.final_reason(path.terms()) {
            return Err(PanError::evaluation(reason));
        }

        let current = self.initialize_self(path)?;
        let result = self.assign_path_value(path, value, conditional, &current);
        self.holders.pop();
        result?;

        if is_final && checks_final {
            self.final_flags.set_final(path.terms())?;
        }
        Ok(())
    }

    fn assign_path_value(
        &mut self,
        path: &Path,
        value: &Expr,
        conditional: bool,
        current: &Element,
    ) -> Result<(), PanError> {
        if conditional && !current.is_undef() {
            return Ok(());
        }
        let value = self.execute_dml_block(value)?;
        let value = if value.is_null() { None } else { Some(value) };
        self.put_element(path, value)
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Element, PanError> {
        self.eval_kind(expr).map_err(|e| self.located(e, expr.range))
    }

    fn eval_kind(&mut self, expr: &Expr) -> Result<Element, PanError> {
        match &expr.kind {
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::SelfRef(subscripts) => {
                let base = self.read_self()?.clone();
                self.subscript(base, subscripts)
            }
            ExprKind::Variable { name, subscripts } => {
                let base = self
                    .variable(name)
                    .ok_or_else(|| PanError::evaluation(format!("undefined variable: {name}")))?;
                self.subscript(base, subscripts)
            }
            ExprKind::AssignSelf { subscripts, value } => {
                let value = self.eval(value)?;
                let updated = if subscripts.is_empty() {
                    value.clone()
                } else {
                    let terms = self.terms(subscripts)?;
                    let mut current = self.read_self()?.clone();
                    if current.is_undef() || current.is_null() {
                        current = if terms[0].is_key() {
                            Element::empty_dict()
                        } else {
                            Element::empty_list()
                        };
                    }
                    let child = if value.is_null() { None } else { Some(value.clone()) };
                    current.rput(&terms, child)?;
                    current
                };
                self.write_self(updated)?;
                Ok(value)
            }
            ExprKind::AssignLocal {
                name,
                subscripts,
                value,
            } => {
                let value = self.eval(value)?;
                let terms = self.terms(subscripts)?;
                self.set_local_variable(name, &terms, value.clone())?;
                Ok(value)
            }
            ExprKind::Block(body) => {
                let mut last = Element::Undef;
                for expr in body {
                    last = self.eval(expr)?;
                }
                Ok(last)
            }
            ExprKind::If {
                condition,
                then,
                otherwise,
            } => {
                if self.eval_bool(condition)? {
                    self.eval(then)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise)
                } else {
                    Ok(Element::Undef)
                }
            }
            ExprKind::Foreach {
                key,
                value,
                collection,
                body,
            } => {
                let entries: Vec<(Element, Element)> = match self.eval(collection)? {
                    Element::List(list) => list
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (Element::Long(i as i64), v.clone()))
                        .collect(),
                    Element::Dict(dict) => dict
                        .iter()
                        .map(|(k, v)| (Element::String(k.clone()), v.clone()))
                        .collect(),
                    other => {
                        return Err(PanError::evaluation(format!(
                            "foreach requires a list or dict, not {}",
                            other.type_name()
                        )));
                    }
                };

                let mut last = Element::Undef;
                for (count, (k, v)) in entries.into_iter().enumerate() {
                    self.check_iterations(count as u64 + 1)?;
                    self.set_loop_variable(key, k)?;
                    self.set_loop_variable(value, v)?;
                    last = self.eval(body)?;
                }
                Ok(last)
            }
            ExprKind::While { condition, body } => {
                let mut count = 0;
                let mut last = Element::Undef;
                while self.eval_bool(condition)? {
                    count += 1;
                    self.check_iterations(count)?;
                    last = self.eval(body)?;
                }
                Ok(last)
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                lhs,
                rhs,
            } => {
                let left = self.eval_bool(lhs)?;
                match (op, left) {
                    (BinaryOp::And, false) => Ok(Element::Boolean(false)),
                    (BinaryOp::Or, true) => Ok(Element::Boolean(true)),
                    _ => Ok(Element::Boolean(self.eval_bool(rhs)?)),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                binary(*op, left, right)
            }
            ExprKind::Call { name, args } => self.call(name, args, expr.range),
        }
    }

    pub(crate) fn eval_bool(&mut self, expr: &Expr) -> Result<bool, PanError> {
        match self.eval(expr)? {
            Element::Boolean(b) => Ok(b),
            other => Err(PanError::evaluation(format!(
                "expected a boolean, found {}",
                other.type_name()
            ))
            .add_exception_info(Some(expr.range), None, None)),
        }
    }

    pub(crate) fn eval_string(&mut self, expr: &Expr) -> Result<ArcStr, PanError> {
        match self.eval(expr)? {
            Element::String(s) => Ok(s),
            other => Err(PanError::evaluation(format!(
                "expected a string, found {}",
                other.type_name()
            ))),
        }
    }

    fn terms(&mut self, subscripts: &[Expr]) -> Result<Vec<Term>, PanError> {
        subscripts
            .iter()
            .map(|expr| Term::from_element(&self.eval(expr)?))
            .collect()
    }

    /// Indexes into `base`. Missing children read as undef.
    fn subscript(&mut self, mut base: Element, subscripts: &[Expr]) -> Result<Element, PanError> {
        for expr in subscripts {
            let term = Term::from_element(&self.eval(expr)?)?;
            base = base.child(&term)?.cloned().unwrap_or_default();
        }
        Ok(base)
    }
}

fn unary(op: UnaryOp, value: Element) -> Result<Element, PanError> {
    match (op, value) {
        (UnaryOp::Negate, Element::Long(x)) => x
            .checked_neg()
            .map(Element::Long)
            .ok_or_else(|| PanError::evaluation("long overflow")),
        (UnaryOp::Negate, Element::Double(x)) => Ok(Element::Double(-x)),
        (UnaryOp::Not, Element::Boolean(b)) => Ok(Element::Boolean(!b)),
        (op, value) => Err(PanError::evaluation(format!(
            "invalid argument of type {} for unary '{}'",
            value.type_name(),
            match op {
                UnaryOp::Negate => "-",
                UnaryOp::Not => "!",
            }
        ))),
    }
}

fn as_double(value: &Element) -> Option<f64> {
    match value {
        Element::Long(x) => Some(*x as f64),
        Element::Double(x) => Some(*x),
        _ => None,
    }
}

fn binary(op: BinaryOp, left: Element, right: Element) -> Result<Element, PanError> {
    let invalid = |left: &Element, right: &Element| {
        PanError::evaluation(format!(
            "invalid arguments of types {} and {} for '{}'",
            left.type_name(),
            right.type_name(),
            op.symbol()
        ))
    };
    let overflow = || PanError::evaluation(format!("long overflow in '{}'", op.symbol()));

    match op {
        BinaryOp::Eq | BinaryOp::Ne => {
            if left.is_resource() || right.is_resource() {
                return Err(invalid(&left, &right));
            }
            Ok(Element::Boolean((left == right) == (op == BinaryOp::Eq)))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Element::Long(a), Element::Long(b)) => Some(a.cmp(b)),
                (Element::String(a), Element::String(b)) => Some(a.cmp(b)),
                _ => match (as_double(&left), as_double(&right)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(invalid(&left, &right)),
                },
            };
            let result = ordering.is_some_and(|o| match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Le => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            });
            Ok(Element::Boolean(result))
        }
        BinaryOp::Add => match (&left, &right) {
            (Element::String(a), Element::String(b)) => Ok(Element::string(format!("{a}{b}"))),
            (Element::Long(a), Element::Long(b)) => {
                a.checked_add(*b).map(Element::Long).ok_or_else(overflow)
            }
            _ => numeric(&left, &right, |a, b| a + b).ok_or_else(|| invalid(&left, &right)),
        },
        BinaryOp::Sub => match (&left, &right) {
            (Element::Long(a), Element::Long(b)) => {
                a.checked_sub(*b).map(Element::Long).ok_or_else(overflow)
            }
            _ => numeric(&left, &right, |a, b| a - b).ok_or_else(|| invalid(&left, &right)),
        },
        BinaryOp::Mul => match (&left, &right) {
            (Element::Long(a), Element::Long(b)) => {
                a.checked_mul(*b).map(Element::Long).ok_or_else(overflow)
            }
            _ => numeric(&left, &right, |a, b| a * b).ok_or_else(|| invalid(&left, &right)),
        },
        BinaryOp::Div => match (&left, &right) {
            (Element::Long(_), Element::Long(0)) => Err(PanError::evaluation("division by zero")),
            (Element::Long(a), Element::Long(b)) => {
                a.checked_div(*b).map(Element::Long).ok_or_else(overflow)
            }
            _ => numeric(&left, &right, |a, b| a / b).ok_or_else(|| invalid(&left, &right)),
        },
        BinaryOp::Rem => match (&left, &right) {
            (Element::Long(_), Element::Long(0)) => Err(PanError::evaluation("division by zero")),
            (Element::Long(a), Element::Long(b)) => {
                a.checked_rem(*b).map(Element::Long).ok_or_else(overflow)
            }
            _ => Err(invalid(&left, &right)),
        },
        BinaryOp::And | BinaryOp::Or => match (&left, &right) {
            (Element::Boolean(a), Element::Boolean(b)) => Ok(Element::Boolean(if op == BinaryOp::And {
                *a && *b
            } else {
                *a || *b
            })),
            _ => Err(invalid(&left, &right)),
        },
    }
}

fn numeric(left: &Element, right: &Element, f: impl Fn(f64, f64) -> f64) -> Option<Element> {
    Some(Element::Double(f(as_double(left)?, as_double(right)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let add = binary(BinaryOp::Add, Element::Long(2), Element::Long(3)).unwrap();
        assert_eq!(add, Element::Long(5));

        let mixed = binary(BinaryOp::Mul, Element::Long(2), Element::Double(1.5)).unwrap();
        assert_eq!(mixed, Element::Double(3.0));

        let concat = binary(BinaryOp::Add, Element::string("a"), Element::string("b")).unwrap();
        assert_eq!(concat, Element::string("ab"));

        assert!(binary(BinaryOp::Div, Element::Long(1), Element::Long(0)).is_err());
        assert!(binary(BinaryOp::Add, Element::Long(i64::MAX), Element::Long(1)).is_err());
        assert!(binary(BinaryOp::Sub, Element::string("a"), Element::Long(1)).is_err());
        assert!(unary(UnaryOp::Negate, Element::Long(i64::MIN)).is_err());
    }

    #[test]
    fn test_comparisons() {
        let lt = binary(BinaryOp::Lt, Element::Long(1), Element::Double(1.5)).unwrap();
        assert_eq!(lt, Element::Boolean(true));

        let ge = binary(BinaryOp::Ge, Element::string("b"), Element::string("a")).unwrap();
        assert_eq!(ge, Element::Boolean(true));

        let ne = binary(BinaryOp::Ne, Element::Long(1), Element::string("1")).unwrap();
        assert_eq!(ne, Element::Boolean(true));

        assert!(binary(BinaryOp::Eq, Element::empty_list(), Element::empty_list()).is_err());
        assert!(binary(BinaryOp::Lt, Element::Boolean(true), Element::Long(1)).is_err());
    }
}
