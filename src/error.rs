use std::fmt::Write;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::data::{Path, Term};
use crate::template::SourceRange;

/// Every failure the compiler can report for a template or an object.
///
/// Failures are shared between all tasks waiting on the same key, so the
/// type is cheap to clone.
#[derive(Debug, Error, Clone)]
pub enum PanError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{}", located("syntax error", .message, .source_file, .range, &None))]
    Syntax {
        message: String,
        source_file: Option<Utf8PathBuf>,
        range: Option<SourceRange>,
    },

    #[error("{}", located("evaluation error", .message, .source_file, .range, .traceback))]
    Evaluation {
        message: String,
        source_file: Option<Utf8PathBuf>,
        range: Option<SourceRange>,
        traceback: Option<String>,
    },

    #[error(transparent)]
    Validation(Box<ValidationError>),

    #[error("compiler error: {0}\nplease file a bug report")]
    Compiler(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{}", system(.message, .file, .cause))]
    System {
        message: String,
        file: Option<Utf8PathBuf>,
        #[source]
        cause: Arc<io::Error>,
    },

    #[error("evaluation error: interrupted thread while waiting for '{key}'")]
    Interrupted { key: String },

    #[error("evaluation error: cancelled thread while waiting for '{key}'")]
    Cancelled { key: String },
}

fn located(
    kind: &str,
    message: &str,
    file: &Option<Utf8PathBuf>,
    range: &Option<SourceRange>,
    traceback: &Option<String>,
) -> String {
    let mut out = String::new();
    let file = file.as_ref().map(|f| f.as_str()).unwrap_or("<unknown>");
    let range = range
        .map(|r| r.to_string())
        .unwrap_or_else(|| String::from("<unknown>"));
    let _ = writeln!(out, "{kind} [{file}:{range}]");
    out.push_str(message);
    if let Some(traceback) = traceback {
        out.push('\n');
        out.push_str(traceback);
    }
    out
}

fn system(message: &str, file: &Option<Utf8PathBuf>, cause: &Arc<io::Error>) -> String {
    match file {
        Some(file) => format!("system error: {message} [{file}]: {cause}"),
        None => format!("system error: {message}: {cause}"),
    }
}

impl PanError {
    pub fn evaluation(message: impl Into<String>) -> Self {
        PanError::Evaluation {
            message: message.into(),
            source_file: None,
            range: None,
            traceback: None,
        }
    }

    pub fn syntax(message: impl Into<String>, range: Option<SourceRange>) -> Self {
        PanError::Syntax {
            message: message.into(),
            source_file: None,
            range,
        }
    }

    pub fn compiler(message: impl Into<String>) -> Self {
        PanError::Compiler(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        PanError::InvalidArgument(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        PanError::Configuration(message.into())
    }

    pub fn system(message: impl Into<String>, file: Option<&Utf8Path>, cause: io::Error) -> Self {
        PanError::System {
            message: message.into(),
            file: file.map(Utf8Path::to_path_buf),
            cause: Arc::new(cause),
        }
    }

    /// Fills in location details that are still unknown. Information already
    /// present is never overwritten, so the innermost location wins.
    pub fn add_exception_info(
        mut self,
        at: Option<SourceRange>,
        file: Option<&Utf8Path>,
        trace: Option<String>,
    ) -> Self {
        match &mut self {
            PanError::Evaluation {
                source_file,
                range,
                traceback,
                ..
            } => {
                if range.is_none() {
                    *range = at;
                }
                if source_file.is_none() {
                    *source_file = file.map(Utf8Path::to_path_buf);
                }
                if traceback.is_none() {
                    *traceback = trace;
                }
            }
            PanError::Syntax {
                source_file, range, ..
            } => {
                if range.is_none() {
                    *range = at;
                }
                if source_file.is_none() {
                    *source_file = file.map(Utf8Path::to_path_buf);
                }
            }
            _ => {}
        }
        self
    }

    /// Bare message without the location header.
    pub fn simple_message(&self) -> String {
        match self {
            PanError::Evaluation { message, .. } | PanError::Syntax { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PanError::Validation(_))
    }

    /// Applies `f` to a validation failure and leaves other errors alone.
    pub fn map_validation(self, f: impl FnOnce(ValidationError) -> ValidationError) -> Self {
        match self {
            PanError::Validation(err) => PanError::Validation(Box::new(f(*err))),
            other => other,
        }
    }
}

impl From<ValidationError> for PanError {
    fn from(err: ValidationError) -> Self {
        PanError::Validation(Box::new(err))
    }
}

/// Structural validation failure of a built object.
///
/// The path and type trail are accumulated while the error travels outward
/// through nested type checks.
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    message: String,
    object_file: Option<Utf8PathBuf>,
    path: Option<Path>,
    bound_type: Option<(String, String)>,
    terms: Vec<Term>,
    type_stack: Vec<String>,
    value: Option<String>,
    cause: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl ToString) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_cause(mut self, cause: &PanError) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn set_object_template(mut self, file: Option<&Utf8Path>) -> Self {
        if self.object_file.is_none() {
            self.object_file = file.map(Utf8Path::to_path_buf);
        }
        self
    }

    /// Records the binding that failed. `type_location` is rendered as
    /// `source:range` of the type definition.
    pub fn set_path_type_and_object(
        mut self,
        path: &Path,
        type_name: &str,
        type_location: &str,
        file: Option<&Utf8Path>,
    ) -> Self {
        self.path = Some(path.clone());
        self.bound_type = Some((type_name.to_string(), type_location.to_string()));
        self.set_object_template(file)
    }

    pub fn add_term(mut self, term: Term) -> Self {
        self.terms.insert(0, term);
        self
    }

    pub fn add_type_to_stack(mut self, name: &str, location: Option<&str>) -> Self {
        let location = location.unwrap_or("?:?");
        self.type_stack
            .push(format!("type: '{name}' [{location}]\n"));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Full path of the offending element, bound path plus accumulated terms.
    pub fn element_path(&self) -> Option<Path> {
        self.path
            .as_ref()
            .map(|path| path.join(&self.terms).unwrap_or_else(|_| path.clone()))
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let object = self
            .object_file
            .as_ref()
            .map(|f| f.as_str())
            .unwrap_or("?");
        writeln!(f, "validation error [{object}]")?;
        writeln!(f, "{}", self.message)?;
        if let Some(path) = self.element_path() {
            writeln!(f, "element path: '{path}'")?;
        }
        if let Some(value) = &self.value {
            writeln!(f, "element value: {value}")?;
        }
        for frame in &self.type_stack {
            f.write_str(frame)?;
        }
        if let (Some(path), Some((name, location))) = (&self.path, &self.bound_type) {
            writeln!(f, "path '{path}' bound to type {name} in [{location}]")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "caused by: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Hard failures of the incremental rebuild check. These differ from an
/// object simply being outdated and need investigation.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("malformed dependency line: '{0}'")]
    MalformedLine(String),

    #[error("unknown file type: {0}")]
    UnknownType(String),

    #[error("missing path information for dependency {0}")]
    MissingPath(String),

    #[error("path information for absent file {0}")]
    AbsentWithPath(String),

    #[error("invalid dependency URI '{0}'")]
    InvalidUri(String),

    #[error("cannot read dependency file {file}: {source}")]
    Unreadable {
        file: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_message_header() {
        let err = PanError::evaluation("undefined variable x");
        let text = err.to_string();
        assert!(text.starts_with("evaluation error [<unknown>:<unknown>]\n"));
        assert!(text.contains("undefined variable x"));
    }

    #[test]
    fn test_exception_info_keeps_innermost() {
        let range = SourceRange::new(3, 1, 3, 10);
        let err = PanError::evaluation("boom")
            .add_exception_info(Some(range), Some(Utf8Path::new("/a.pan")), None)
            .add_exception_info(
                Some(SourceRange::new(9, 1, 9, 2)),
                Some(Utf8Path::new("/b.pan")),
                Some(String::from("trace")),
            );

        let text = err.to_string();
        assert!(text.contains("[/a.pan:3.1-3.10]"));
        assert!(text.ends_with("trace"));
    }

    #[test]
    fn test_validation_trail() {
        let path = Path::parse("/system/network").unwrap();
        let err = ValidationError::new("value is not a long")
            .add_term(Term::index(0))
            .add_term(Term::key("hosts"))
            .add_type_to_stack("host", Some("/tpl/types.pan:4.1-4.20"))
            .set_path_type_and_object(&path, "network", "/tpl/types.pan:9.1-9.30", None);

        let text = err.to_string();
        assert!(text.starts_with("validation error [?]\nvalue is not a long\n"));
        assert!(text.contains("element path: '/system/network/hosts/0'"));
        assert!(text.contains("type: 'host' [/tpl/types.pan:4.1-4.20]"));
        assert!(text.contains("bound to type network"));
    }
}
