use std::fmt;

use crate::ArcStr;
use crate::data::{Element, Path};
use crate::template::SourceRange;

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub range: SourceRange,
    /// Text of `#@` comments directly preceding the statement.
    pub doc: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Include(Expr),
    Variable {
        name: ArcStr,
        value: Expr,
        conditional: bool,
        is_final: bool,
    },
    Assign {
        path: Path,
        value: Expr,
        conditional: bool,
        is_final: bool,
    },
    Bind {
        path: Path,
        spec: TypeSpec,
    },
    Type {
        name: ArcStr,
        spec: TypeSpec,
        with: Option<Expr>,
    },
    Function {
        name: ArcStr,
        body: Expr,
    },
}

impl StatementKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            StatementKind::Include(_) => "include",
            StatementKind::Variable { .. } => "variable",
            StatementKind::Assign { .. } => "assign",
            StatementKind::Bind { .. } => "bind",
            StatementKind::Type { .. } => "type",
            StatementKind::Function { .. } => "function",
        }
    }

    /// Name or path the statement defines, if any.
    pub fn subject(&self) -> Option<String> {
        match self {
            StatementKind::Include(_) => None,
            StatementKind::Variable { name, .. }
            | StatementKind::Type { name, .. }
            | StatementKind::Function { name, .. } => Some(name.to_string()),
            StatementKind::Assign { path, .. } | StatementKind::Bind { path, .. } => {
                Some(path.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    Plain,
    List,
    Dict,
}

/// Reference to a named type, optionally as the element type of a list
/// (`name[]`) or dict (`name{}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    pub base: ArcStr,
    pub shape: TypeShape,
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            TypeShape::Plain => write!(f, "{}", self.base),
            TypeShape::List => write!(f, "{}[]", self.base),
            TypeShape::Dict => write!(f, "{}{{}}", self.base),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: SourceRange,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Element),
    SelfRef(Vec<Expr>),
    Variable {
        name: ArcStr,
        subscripts: Vec<Expr>,
    },
    AssignSelf {
        subscripts: Vec<Expr>,
        value: Box<Expr>,
    },
    AssignLocal {
        name: ArcStr,
        subscripts: Vec<Expr>,
        value: Box<Expr>,
    },
    Block(Vec<Expr>),
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Foreach {
        key: ArcStr,
        value: ArcStr,
        collection: Box<Expr>,
        body: Box<Expr>,
    },
    While {
        condition: Box<Expr>,
        body: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: ArcStr,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}
