use crate::ArcStr;
use crate::data::{Element, Path, PathKind};
use crate::error::PanError;
use crate::source::{SourceFile, is_valid_template_name};
use crate::template::ast::*;
use crate::template::lexer::{Lexer, Token, TokenKind};
use crate::template::{SourceRange, Template, TemplateType};

/// Parses a complete template. Syntax errors carry the template's file.
pub fn parse_template(text: &str, source: Option<SourceFile>) -> Result<Template, PanError> {
    let file = source.as_ref().and_then(|s| s.path().map(|p| p.to_path_buf()));
    parse(text, source).map_err(|e| e.add_exception_info(None, file.as_deref(), None))
}

fn parse(text: &str, source: Option<SourceFile>) -> Result<Template, PanError> {
    let mut parser = Parser::new(text)?;
    let doc = parser.current.doc.take();
    let (template_type, name, range) = parser.header()?;
    parser.template_type = template_type;

    let mut statements = Vec::new();
    while parser.current.kind != TokenKind::Eof {
        statements.push(parser.statement()?);
    }

    Ok(Template {
        name,
        template_type,
        source,
        doc,
        range,
        statements,
    })
}

/// Reads only the template declaration and returns the declared type and
/// name. Used to map object files to profile names without a full parse.
pub fn extract_template_name(text: &str) -> Result<(TemplateType, String), PanError> {
    let mut parser = Parser::new(text)?;
    let (template_type, name, _) = parser.header()?;
    Ok((template_type, name.to_string()))
}

/// Parses a standalone expression, such as a root element given on the
/// command line.
pub fn parse_expression(text: &str) -> Result<Expr, PanError> {
    let mut parser = Parser::new(text)?;
    let expr = parser.expr()?;
    if parser.current.kind != TokenKind::Eof {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    last: SourceRange,
    template_type: TemplateType,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Result<Self, PanError> {
        let mut lexer = Lexer::new(text);
        let current = lexer.next_token()?;
        Ok(Parser {
            lexer,
            last: current.range,
            current,
            template_type: TemplateType::Ordinary,
        })
    }

    fn advance(&mut self) -> Result<Token, PanError> {
        let next = self.lexer.next_token()?;
        let token = std::mem::replace(&mut self.current, next);
        self.last = token.range;
        Ok(token)
    }

    fn at(&self, punct: &str) -> bool {
        matches!(self.current.kind, TokenKind::Punct(p) if p == punct)
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(&self.current.kind, TokenKind::Ident(w) if &**w == word)
    }

    fn eat(&mut self, punct: &str) -> Result<bool, PanError> {
        if self.at(punct) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), PanError> {
        if self.eat(punct)? {
            Ok(())
        } else {
            Err(PanError::syntax(
                format!(
                    "expected '{punct}' but found {}",
                    self.current.kind.describe()
                ),
                Some(self.current.range),
            ))
        }
    }

    fn unexpected(&self) -> PanError {
        PanError::syntax(
            format!("unexpected {}", self.current.kind.describe()),
            Some(self.current.range),
        )
    }

    fn ident(&mut self) -> Result<ArcStr, PanError> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(PanError::syntax(
                format!("expected identifier but found {}", self.current.kind.describe()),
                Some(self.current.range),
            )),
        }
    }

    fn header(&mut self) -> Result<(TemplateType, ArcStr, SourceRange), PanError> {
        let begin = self.current.range;
        let template_type = match &self.current.kind {
            TokenKind::Ident(word) => match &**word {
                "object" => TemplateType::Object,
                "structure" => TemplateType::Structure,
                "unique" => TemplateType::Unique,
                "declaration" => TemplateType::Declaration,
                _ => TemplateType::Ordinary,
            },
            _ => TemplateType::Ordinary,
        };
        if template_type != TemplateType::Ordinary {
            self.advance()?;
        }

        if !self.at_word("template") {
            return Err(PanError::syntax(
                "template must begin with a template declaration",
                Some(self.current.range),
            ));
        }
        self.advance()?;

        let name = match &self.current.kind {
            TokenKind::Name(name) => name.clone(),
            _ => return Err(self.unexpected()),
        };
        if !is_valid_template_name(&name) {
            return Err(PanError::syntax(
                format!("invalid template name: '{name}'"),
                Some(self.current.range),
            ));
        }
        self.advance()?;
        self.expect(";")?;

        Ok((template_type, name, begin.to(self.last)))
    }

    fn statement(&mut self) -> Result<Statement, PanError> {
        let doc = self.current.doc.take();
        let begin = self.current.range;

        let word = match &self.current.kind {
            TokenKind::Ident(word) => Some(word.clone()),
            TokenKind::Path(_) | TokenKind::Str(_) => None,
            _ => return Err(self.unexpected()),
        };

        let kind = match word.as_deref() {
            None => self.assignment(false)?,
            Some(word) => match word {
                "include" => {
                    self.advance()?;
                    StatementKind::Include(self.expr()?)
                }
                "variable" => {
                    self.advance()?;
                    self.variable(false)?
                }
                "final" => {
                    self.advance()?;
                    if self.at_word("variable") {
                        self.advance()?;
                        self.variable(true)?
                    } else {
                        self.assignment(true)?
                    }
                }
                "bind" => {
                    self.advance()?;
                    let path = self.path()?;
                    if !path.is_absolute() {
                        return Err(PanError::syntax(
                            format!("bind requires an absolute path: '{path}'"),
                            Some(self.last),
                        ));
                    }
                    self.expect("=")?;
                    let spec = self.type_spec()?;
                    StatementKind::Bind { path, spec }
                }
                "type" => {
                    self.advance()?;
                    let name = self.ident()?;
                    self.expect("=")?;
                    let spec = self.type_spec()?;
                    let with = if self.at_word("with") {
                        self.advance()?;
                        Some(self.expr()?)
                    } else {
                        None
                    };
                    StatementKind::Type { name, spec, with }
                }
                "function" => {
                    self.advance()?;
                    let name = self.ident()?;
                    self.expect("=")?;
                    let body = self.expr()?;
                    StatementKind::Function { name, body }
                }
                _ => return Err(self.unexpected()),
            },
        };

        self.expect(";")?;
        let range = begin.to(self.last);

        if self.template_type == TemplateType::Declaration
            && matches!(kind, StatementKind::Assign { .. })
        {
            return Err(PanError::syntax(
                "declaration template cannot contain path assignments",
                Some(range),
            ));
        }

        Ok(Statement { kind, range, doc })
    }

    fn variable(&mut self, is_final: bool) -> Result<StatementKind, PanError> {
        let name = self.ident()?;
        let conditional = self.assign_op()?;
        let value = self.expr()?;
        Ok(StatementKind::Variable {
            name,
            value,
            conditional,
            is_final,
        })
    }

    fn assignment(&mut self, is_final: bool) -> Result<StatementKind, PanError> {
        let path = self.path()?;
        let range = self.last;

        match (path.kind(), self.template_type) {
            (PathKind::Relative, TemplateType::Structure) => {}
            (PathKind::Relative, _) => {
                return Err(PanError::syntax(
                    format!("relative path '{path}' not allowed outside structure templates"),
                    Some(range),
                ));
            }
            (PathKind::External, _) => {
                return Err(PanError::syntax(
                    format!("external path '{path}' cannot be assigned"),
                    Some(range),
                ));
            }
            (PathKind::Absolute, TemplateType::Structure) => {
                return Err(PanError::syntax(
                    format!("absolute path '{path}' not allowed in structure templates"),
                    Some(range),
                ));
            }
            (PathKind::Absolute, _) => {}
        }

        let conditional = self.assign_op()?;
        let value = self.expr()?;
        Ok(StatementKind::Assign {
            path,
            value,
            conditional,
            is_final,
        })
    }

    fn assign_op(&mut self) -> Result<bool, PanError> {
        if self.eat("?=")? {
            Ok(true)
        } else {
            self.expect("=")?;
            Ok(false)
        }
    }

    fn path(&mut self) -> Result<Path, PanError> {
        let range = self.current.range;
        let text = match &self.current.kind {
            TokenKind::Path(text) | TokenKind::Str(text) => text.clone(),
            _ => return Err(self.unexpected()),
        };
        self.advance()?;
        Path::parse(&text).map_err(|e| e.add_exception_info(Some(range), None, None))
    }

    fn type_spec(&mut self) -> Result<TypeSpec, PanError> {
        let base = self.ident()?;
        let shape = if self.eat("[")? {
            self.expect("]")?;
            TypeShape::List
        } else if self.eat("{")? {
            self.expect("}")?;
            TypeShape::Dict
        } else {
            TypeShape::Plain
        };
        Ok(TypeSpec { base, shape })
    }

    fn expr(&mut self) -> Result<Expr, PanError> {
        self.binary(0)
    }

    /// Precedence climbing over the binary operator table.
    fn binary(&mut self, level: usize) -> Result<Expr, PanError> {
        const LEVELS: [&[(&str, BinaryOp)]; 6] = [
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];

        if level == LEVELS.len() {
            return self.unary();
        }

        let mut lhs = self.binary(level + 1)?;
        'outer: loop {
            for (symbol, op) in LEVELS[level] {
                if self.eat(symbol)? {
                    let rhs = self.binary(level + 1)?;
                    let range = lhs.range.to(rhs.range);
                    lhs = Expr {
                        kind: ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        range,
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, PanError> {
        let begin = self.current.range;
        let op = if self.eat("-")? {
            UnaryOp::Negate
        } else if self.eat("!")? {
            UnaryOp::Not
        } else {
            return self.primary();
        };
        let operand = self.unary()?;
        let range = begin.to(operand.range);
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            range,
        })
    }

    fn finish(&self, begin: SourceRange, kind: ExprKind) -> Expr {
        Expr {
            kind,
            range: begin.to(self.last),
        }
    }

    fn primary(&mut self) -> Result<Expr, PanError> {
        let begin = self.current.range;

        let literal = match &self.current.kind {
            TokenKind::Long(v) => Some(Element::Long(*v)),
            TokenKind::Double(v) => Some(Element::Double(*v)),
            TokenKind::Str(s) => Some(Element::String(s.clone())),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance()?;
            return Ok(self.finish(begin, ExprKind::Literal(value)));
        }

        if self.eat("(")? {
            let inner = self.expr()?;
            self.expect(")")?;
            return Ok(inner);
        }

        if self.eat("{")? {
            let mut body = Vec::new();
            while !self.eat("}")? {
                body.push(self.expr()?);
                if !self.eat(";")? {
                    self.expect("}")?;
                    break;
                }
            }
            return Ok(self.finish(begin, ExprKind::Block(body)));
        }

        let name = match &self.current.kind {
            TokenKind::Ident(name) => name.clone(),
            _ => return Err(self.unexpected()),
        };
        self.advance()?;

        let kind = match &*name {
            "true" => ExprKind::Literal(Element::Boolean(true)),
            "false" => ExprKind::Literal(Element::Boolean(false)),
            "null" => ExprKind::Literal(Element::Null),
            "undef" => ExprKind::Literal(Element::Undef),
            "SELF" => {
                let subscripts = self.subscripts()?;
                if self.eat("=")? {
                    let value = Box::new(self.expr()?);
                    ExprKind::AssignSelf { subscripts, value }
                } else {
                    ExprKind::SelfRef(subscripts)
                }
            }
            "if" => {
                self.expect("(")?;
                let condition = Box::new(self.expr()?);
                self.expect(")")?;
                let then = Box::new(self.expr()?);
                let otherwise = if self.at_word("else") {
                    self.advance()?;
                    Some(Box::new(self.expr()?))
                } else {
                    None
                };
                ExprKind::If {
                    condition,
                    then,
                    otherwise,
                }
            }
            "foreach" => {
                self.expect("(")?;
                let key = self.ident()?;
                self.expect(";")?;
                let value = self.ident()?;
                self.expect(";")?;
                let collection = Box::new(self.expr()?);
                self.expect(")")?;
                let body = Box::new(self.expr()?);
                ExprKind::Foreach {
                    key,
                    value,
                    collection,
                    body,
                }
            }
            "while" => {
                self.expect("(")?;
                let condition = Box::new(self.expr()?);
                self.expect(")")?;
                let body = Box::new(self.expr()?);
                ExprKind::While { condition, body }
            }
            _ if self.at("(") => {
                self.advance()?;
                let mut args = Vec::new();
                if !self.eat(")")? {
                    loop {
                        args.push(self.expr()?);
                        if self.eat(")")? {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                ExprKind::Call { name, args }
            }
            _ => {
                let subscripts = self.subscripts()?;
                if self.eat("=")? {
                    let value = Box::new(self.expr()?);
                    ExprKind::AssignLocal {
                        name,
                        subscripts,
                        value,
                    }
                } else {
                    ExprKind::Variable { name, subscripts }
                }
            }
        };

        Ok(self.finish(begin, kind))
    }

    fn subscripts(&mut self) -> Result<Vec<Expr>, PanError> {
        let mut subscripts = Vec::new();
        while self.eat("[")? {
            subscripts.push(self.expr()?);
            self.expect("]")?;
        }
        Ok(subscripts)
    }
}
