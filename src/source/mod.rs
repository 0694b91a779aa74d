mod params;
mod repository;
mod stat;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::ArcStr;
use crate::error::PanError;

pub use params::{Parameter, ParameterList};
pub use repository::SourceRepository;
pub(crate) use repository::{current_dir, validate_directory};
pub use stat::FileStatCache;

/// Extensions of pan sources in lookup order.
pub const PAN_EXTENSIONS: [&str; 3] = [".tpl", ".pan", ".panx"];

static TEMPLATE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w./+\-]+$").expect("valid template name pattern"));

/// Template names are `/` separated segments of word characters, dots, plus
/// and minus signs. A segment can be neither empty nor hidden.
pub fn is_valid_template_name(name: &str) -> bool {
    TEMPLATE_NAME.is_match(name)
        && name
            .split('/')
            .all(|segment| !segment.is_empty() && !segment.starts_with('.'))
}

/// Kind of a file a template can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceType {
    Tpl,
    Pan,
    Panx,
    Text,
    AbsentSource,
    AbsentText,
}

impl SourceType {
    pub fn extension(self) -> &'static str {
        match self {
            SourceType::Tpl => ".tpl",
            SourceType::Pan => ".pan",
            SourceType::Panx => ".panx",
            SourceType::Text | SourceType::AbsentSource | SourceType::AbsentText => "",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".tpl" => Some(SourceType::Tpl),
            ".pan" => Some(SourceType::Pan),
            ".panx" => Some(SourceType::Panx),
            _ => None,
        }
    }

    pub fn is_absent(self) -> bool {
        matches!(self, SourceType::AbsentSource | SourceType::AbsentText)
    }

    pub fn is_source(self) -> bool {
        matches!(
            self,
            SourceType::Tpl | SourceType::Pan | SourceType::Panx | SourceType::AbsentSource
        )
    }

    pub fn is_text(self) -> bool {
        matches!(self, SourceType::Text | SourceType::AbsentText)
    }

    /// Tag used in dependency files.
    pub fn tag(self) -> &'static str {
        match self {
            SourceType::Tpl => "TPL",
            SourceType::Pan => "PAN",
            SourceType::Panx => "PANX",
            SourceType::Text => "TEXT",
            SourceType::AbsentSource => "ABSENT_SOURCE",
            SourceType::AbsentText => "ABSENT_TEXT",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TPL" => Ok(SourceType::Tpl),
            "PAN" => Ok(SourceType::Pan),
            "PANX" => Ok(SourceType::Panx),
            "TEXT" => Ok(SourceType::Text),
            "ABSENT_SOURCE" => Ok(SourceType::AbsentSource),
            "ABSENT_TEXT" => Ok(SourceType::AbsentText),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A template or text file found (or not found) by the source repository.
///
/// Absent files carry no path. Present files carry an absolute path that ends
/// with the name followed by the type's extension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceFile {
    name: ArcStr,
    source_type: SourceType,
    path: Option<Utf8PathBuf>,
}

impl SourceFile {
    pub fn new(
        name: &str,
        source_type: SourceType,
        path: Option<Utf8PathBuf>,
    ) -> Result<Self, PanError> {
        if source_type.is_source() && !is_valid_template_name(name) {
            return Err(PanError::invalid_argument(format!("invalid template name: {name}")));
        }

        match (&path, source_type.is_absent()) {
            (Some(_), true) => {
                return Err(PanError::invalid_argument(format!(
                    "absent source {name} cannot have a path"
                )));
            }
            (None, false) => {
                return Err(PanError::invalid_argument(format!(
                    "source {name} of type {source_type} requires a path"
                )));
            }
            (Some(path), false) => {
                let expected = format!("/{name}{}", source_type.extension());
                if !path.is_absolute() || !path.as_str().ends_with(&expected) {
                    return Err(PanError::invalid_argument(format!(
                        "path {path} is inconsistent with name {name} and type {source_type}"
                    )));
                }
            }
            (None, true) => {}
        }

        Ok(SourceFile {
            name: ArcStr::from(name),
            source_type,
            path,
        })
    }

    pub fn absent(name: &str, source_type: SourceType) -> Self {
        let source_type = if source_type.is_text() {
            SourceType::AbsentText
        } else {
            SourceType::AbsentSource
        };
        SourceFile {
            name: ArcStr::from(name),
            source_type,
            path: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn is_absent(&self) -> bool {
        self.source_type.is_absent()
    }

    /// Directory that, joined with `name + extension`, yields the file.
    pub fn location(&self) -> Option<Utf8PathBuf> {
        let path = self.path.as_ref()?;
        let suffix_len = self.name.len() + self.source_type.extension().len();
        let prefix = &path.as_str()[..path.as_str().len() - suffix_len];
        Some(Utf8PathBuf::from(prefix))
    }
}

impl fmt::Display for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} ({}) {}", self.name, self.source_type, path),
            None => write!(f, "{} ({})", self.name, self.source_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_names() {
        assert!(is_valid_template_name("a"));
        assert!(is_valid_template_name("site/config/base-1.2+x"));
        assert!(!is_valid_template_name(""));
        assert!(!is_valid_template_name("a//b"));
        assert!(!is_valid_template_name("a/.hidden"));
        assert!(!is_valid_template_name("/abs"));
        assert!(!is_valid_template_name("with space"));
    }

    #[test]
    fn test_source_file_consistency() {
        let ok = SourceFile::new(
            "a/b",
            SourceType::Pan,
            Some(Utf8PathBuf::from("/tpl/a/b.pan")),
        )
        .unwrap();
        assert_eq!(ok.location(), Some(Utf8PathBuf::from("/tpl/")));

        assert!(matches!(
            SourceFile::new("a/b", SourceType::Pan, Some("/tpl/a/b.tpl".into())),
            Err(PanError::InvalidArgument(_))
        ));
        assert!(SourceFile::new("a/b", SourceType::Pan, Some("tpl/a/b.pan".into())).is_err());
        assert!(SourceFile::new("a/b", SourceType::Pan, None).is_err());
        assert!(SourceFile::new("a", SourceType::AbsentSource, Some("/a".into())).is_err());
        assert!(SourceFile::new("a", SourceType::AbsentText, None).is_ok());
        assert!(SourceFile::new("bad name", SourceType::AbsentSource, None).is_err());
    }

    #[test]
    fn test_ordering() {
        let a = SourceFile::absent("a", SourceType::Pan);
        let b = SourceFile::absent("b", SourceType::Pan);
        let a_text = SourceFile::absent("a", SourceType::Text);
        assert!(a < b);
        assert!(a < a_text);
    }

    #[test]
    fn test_type_tags() {
        for ty in [
            SourceType::Tpl,
            SourceType::Pan,
            SourceType::Panx,
            SourceType::Text,
            SourceType::AbsentSource,
            SourceType::AbsentText,
        ] {
            assert_eq!(ty.tag().parse::<SourceType>(), Ok(ty));
        }
        assert!("XML".parse::<SourceType>().is_err());
    }
}
