use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use url::Url;

use crate::error::DependencyError;
use crate::source::{SourceFile, SourceType};

/// One line of a dependency file: `name TYPE [parentURI]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInfo {
    pub name: String,
    pub source_type: SourceType,
    /// Recorded location; absent types never carry one.
    pub path: Option<Utf8PathBuf>,
}

impl DependencyInfo {
    /// Line describing `file`, using its parent directory as the URI.
    pub fn from_source(file: &SourceFile) -> Self {
        DependencyInfo {
            name: file.name().to_string(),
            source_type: file.source_type(),
            path: file.path().map(Utf8Path::to_path_buf),
        }
    }

    /// Directory that, joined with `name` and the type's extension, gives the
    /// recorded path.
    fn parent(&self) -> Option<&str> {
        let path = self.path.as_ref()?.as_str();
        let suffix = format!("{}{}", self.name, self.source_type.extension());
        path.strip_suffix(&suffix)
    }
}

impl FromStr for DependencyInfo {
    type Err = DependencyError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (name, tag, uri) = match fields[..] {
            [name, tag] => (name, tag, None),
            [name, tag, uri] => (name, tag, Some(uri)),
            _ => return Err(DependencyError::MalformedLine(line.to_string())),
        };

        let source_type: SourceType = tag.parse().map_err(DependencyError::UnknownType)?;
        let path = match (source_type.is_absent(), uri) {
            (true, None) => None,
            (true, Some(_)) => return Err(DependencyError::AbsentWithPath(name.to_string())),
            (false, None) => return Err(DependencyError::MissingPath(name.to_string())),
            (false, Some(uri)) => Some(reconstruct_single_dependency(uri, name, source_type)?),
        };

        Ok(DependencyInfo {
            name: name.to_string(),
            source_type,
            path,
        })
    }
}

impl fmt::Display for DependencyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.source_type)?;
        if let Some(uri) = self.parent().and_then(|dir| Url::from_directory_path(dir).ok()) {
            write!(f, " {uri}")?;
        }
        Ok(())
    }
}

/// File named by `name` and `source_type` under the directory `uri`.
pub fn reconstruct_single_dependency(
    uri: &str,
    name: &str,
    source_type: SourceType,
) -> Result<Utf8PathBuf, DependencyError> {
    let invalid = || DependencyError::InvalidUri(uri.to_string());

    let url = Url::parse(uri).map_err(|_| invalid())?;
    if url.scheme() != "file" {
        return Err(invalid());
    }
    let dir = url.to_file_path().map_err(|_| invalid())?;
    let dir = Utf8PathBuf::from_path_buf(dir).map_err(|_| invalid())?;
    Ok(dir.join(format!("{name}{}", source_type.extension())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_present_dependency() {
        let info: DependencyInfo = "site/base PAN file:///srv/tpl/".parse().unwrap();
        assert_eq!(info.name, "site/base");
        assert_eq!(info.source_type, SourceType::Pan);
        assert_eq!(info.path.as_deref(), Some(Utf8Path::new("/srv/tpl/site/base.pan")));
    }

    #[test]
    fn test_parse_absent_dependency() {
        let info: DependencyInfo = "missing ABSENT_SOURCE".parse().unwrap();
        assert_eq!(info.source_type, SourceType::AbsentSource);
        assert!(info.path.is_none());
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(
            "only".parse::<DependencyInfo>(),
            Err(DependencyError::MalformedLine(_))
        ));
        assert!(matches!(
            "a PAN file:///x/ extra".parse::<DependencyInfo>(),
            Err(DependencyError::MalformedLine(_))
        ));
        assert!(matches!(
            "a JAVA file:///x/".parse::<DependencyInfo>(),
            Err(DependencyError::UnknownType(tag)) if tag == "JAVA"
        ));
        assert!(matches!(
            "a PAN".parse::<DependencyInfo>(),
            Err(DependencyError::MissingPath(_))
        ));
        assert!(matches!(
            "a ABSENT_TEXT file:///x/".parse::<DependencyInfo>(),
            Err(DependencyError::AbsentWithPath(_))
        ));
        assert!(matches!(
            "a PAN http://x/".parse::<DependencyInfo>(),
            Err(DependencyError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_display_encodes_directory() {
        let file = SourceFile::new(
            "conf/a b",
            SourceType::Text,
            Some(Utf8PathBuf::from("/my dir/100%/conf/a b")),
        )
        .unwrap();
        let info = DependencyInfo::from_source(&file);
        let line = info.to_string();
        assert_eq!(line, "conf/a b TEXT file:///my%20dir/100%25/");

        // names with whitespace cannot be read back, only the URI is checked
        let dir = line.rsplit(' ').next().unwrap();
        let path = reconstruct_single_dependency(dir, "x", SourceType::Text).unwrap();
        assert_eq!(path, Utf8PathBuf::from("/my dir/100%/x"));
    }

    #[test]
    fn test_single_slash_file_uri() {
        let info: DependencyInfo = "base PAN file:/tpl/".parse().unwrap();
        assert_eq!(info.path.as_deref(), Some(Utf8Path::new("/tpl/base.pan")));

        let path = reconstruct_single_dependency("file:/a%20b/c", "d", SourceType::Text).unwrap();
        assert_eq!(path, Utf8PathBuf::from("/a b/c/d"));

        assert!(matches!(
            reconstruct_single_dependency("not a uri", "d", SourceType::Text),
            Err(DependencyError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_line_round_trip() {
        let file = SourceFile::new(
            "os/linux",
            SourceType::Tpl,
            Some(Utf8PathBuf::from("/tpl/os/linux.tpl")),
        )
        .unwrap();
        let info = DependencyInfo::from_source(&file);
        let parsed: DependencyInfo = info.to_string().parse().unwrap();
        assert_eq!(parsed, info);
    }
}
