mod ast;
mod lexer;
mod parser;

use std::fmt;

use camino::Utf8Path;

use crate::ArcStr;
use crate::error::PanError;
use crate::source::SourceFile;

pub use ast::{BinaryOp, Expr, ExprKind, Statement, StatementKind, TypeShape, TypeSpec, UnaryOp};
pub use parser::{extract_template_name, parse_expression, parse_template};

/// Location of a construct in a template, lines and columns start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceRange {
    pub begin_line: u32,
    pub begin_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceRange {
    pub fn new(begin_line: u32, begin_column: u32, end_line: u32, end_column: u32) -> Self {
        SourceRange {
            begin_line,
            begin_column,
            end_line,
            end_column,
        }
    }

    /// Range starting where `self` starts and ending where `other` ends.
    pub fn to(self, other: SourceRange) -> Self {
        SourceRange {
            end_line: other.end_line,
            end_column: other.end_column,
            ..self
        }
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}-{}.{}",
            self.begin_line, self.begin_column, self.end_line, self.end_column
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateType {
    Ordinary,
    Object,
    Structure,
    Unique,
    Declaration,
}

impl TemplateType {
    pub fn keyword(self) -> &'static str {
        match self {
            TemplateType::Ordinary => "ordinary",
            TemplateType::Object => "object",
            TemplateType::Structure => "structure",
            TemplateType::Unique => "unique",
            TemplateType::Declaration => "declaration",
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A parsed template, shared read-only between every build that uses it.
#[derive(Debug)]
pub struct Template {
    name: ArcStr,
    template_type: TemplateType,
    source: Option<SourceFile>,
    doc: Option<String>,
    range: SourceRange,
    statements: Vec<Statement>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template_type(&self) -> TemplateType {
        self.template_type
    }

    pub fn is_object(&self) -> bool {
        self.template_type == TemplateType::Object
    }

    pub fn source(&self) -> Option<&SourceFile> {
        self.source.as_ref()
    }

    pub fn source_path(&self) -> Option<&Utf8Path> {
        self.source.as_ref().and_then(SourceFile::path)
    }

    /// Documentation attached to the template declaration.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn range(&self) -> SourceRange {
        self.range
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Fails unless the declared name is the one the template was loaded
    /// under.
    pub fn verify_name(&self, expected: &str) -> Result<(), PanError> {
        if *self.name == *expected {
            Ok(())
        } else {
            Err(PanError::evaluation(format!(
                "template name '{}' does not match the requested name '{expected}'",
                self.name
            ))
            .add_exception_info(Some(self.range), self.source_path(), None))
        }
    }

    /// `name:range` label used in tracebacks and type locations.
    pub fn location(&self, range: SourceRange) -> String {
        let file = self
            .source_path()
            .map(|p| p.as_str())
            .unwrap_or(&self.name);
        format!("{file}:{range}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_display() {
        let range = SourceRange::new(1, 2, 3, 4);
        assert_eq!(range.to_string(), "1.2-3.4");
        assert_eq!(
            range.to(SourceRange::new(7, 1, 8, 9)),
            SourceRange::new(1, 2, 8, 9)
        );
    }
}
