use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use tracing::debug;

use crate::error::PanError;
use crate::source::{PAN_EXTENSIONS, ParameterList, SourceFile, SourceType};

enum Lookup {
    Found(Utf8PathBuf),
    Deleted,
    NotFound,
}

/// Maps logical template names to files on disk.
///
/// Lookups go through every include directory and, for each one, through
/// every relative path of the load path. If a session directory is set, it is
/// consulted before the include directory for each relative path. A `.del`
/// marker next to a would-be template hides that relative path.
#[derive(Debug)]
pub struct SourceRepository {
    session_dir: Option<Utf8PathBuf>,
    include_dirs: Vec<Utf8PathBuf>,
    cache: DashMap<String, SourceFile>,
}

impl SourceRepository {
    pub fn new(
        session_dir: Option<Utf8PathBuf>,
        include_dirs: Vec<Utf8PathBuf>,
    ) -> Result<Self, PanError> {
        if let Some(dir) = &session_dir {
            validate_directory(dir, "session")?;
        }

        let include_dirs = if include_dirs.is_empty() {
            vec![current_dir()?]
        } else {
            include_dirs
        };
        for dir in &include_dirs {
            validate_directory(dir, "include")?;
        }

        Ok(SourceRepository {
            session_dir,
            include_dirs,
            cache: DashMap::new(),
        })
    }

    /// Builds a repository from `includeDirectory` (repeatable) and
    /// `sessionDirectory` parameters.
    pub fn from_parameters(params: &ParameterList) -> Result<Self, PanError> {
        let includes = params
            .values("includeDirectory")
            .map(Utf8PathBuf::from)
            .collect();
        let session = params.values("sessionDirectory").last().map(Utf8PathBuf::from);
        Self::new(session, includes)
    }

    pub fn include_dirs(&self) -> &[Utf8PathBuf] {
        &self.include_dirs
    }

    pub fn session_dir(&self) -> Option<&Utf8Path> {
        self.session_dir.as_deref()
    }

    pub fn retrieve_pan_source(&self, name: &str) -> SourceFile {
        self.retrieve_pan_source_with(name, &[String::new()])
    }

    pub fn retrieve_pan_source_with(&self, name: &str, loadpath: &[String]) -> SourceFile {
        self.retrieve(name, loadpath, false)
    }

    pub fn retrieve_txt_source(&self, name: &str) -> SourceFile {
        self.retrieve_txt_source_with(name, &[String::new()])
    }

    pub fn retrieve_txt_source_with(&self, name: &str, loadpath: &[String]) -> SourceFile {
        self.retrieve(name, loadpath, true)
    }

    fn retrieve(&self, name: &str, loadpath: &[String], text: bool) -> SourceFile {
        let loadpath = if loadpath.is_empty() {
            &[String::new()][..]
        } else {
            loadpath
        };
        let kind = if text { "txt" } else { "pan" };
        let key = format!("{kind} {name} {}", loadpath.join(":"));

        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let found = self.lookup(name, loadpath, text);
        let source = match found {
            Some((rpath, path)) => {
                let full_name = match rpath.trim_end_matches('/') {
                    "" => name.to_string(),
                    rpath => format!("{rpath}/{name}"),
                };
                let source_type = if text {
                    Some(SourceType::Text)
                } else {
                    path.extension()
                        .and_then(|ext| SourceType::from_extension(&format!(".{ext}")))
                };
                source_type
                    .and_then(|ty| SourceFile::new(&full_name, ty, Some(path)).ok())
                    .unwrap_or_else(|| absent(name, text))
            }
            None => absent(name, text),
        };

        debug!(name, source = %source, "resolved source");
        self.cache.entry(key).or_insert(source).clone()
    }

    /// First hit on the load path, with the relative directory it was found
    /// under.
    fn lookup<'a>(
        &self,
        name: &str,
        loadpath: &'a [String],
        text: bool,
    ) -> Option<(&'a str, Utf8PathBuf)> {
        for dir in &self.include_dirs {
            for rpath in loadpath {
                if let Some(session) = &self.session_dir {
                    match lookup_single(session, rpath, name, text) {
                        Lookup::Found(path) => return Some((rpath, path)),
                        Lookup::Deleted => continue,
                        Lookup::NotFound => {}
                    }
                }
                match lookup_single(dir, rpath, name, text) {
                    Lookup::Found(path) => return Some((rpath, path)),
                    Lookup::Deleted | Lookup::NotFound => {}
                }
            }
        }
        None
    }
}

fn absent(name: &str, text: bool) -> SourceFile {
    let ty = if text {
        SourceType::AbsentText
    } else {
        SourceType::AbsentSource
    };
    SourceFile::absent(name, ty)
}

fn lookup_single(root: &Utf8Path, rpath: &str, name: &str, text: bool) -> Lookup {
    let dir = if rpath.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rpath)
    };

    if dir.join(format!("{name}.del")).exists() {
        return Lookup::Deleted;
    }

    if text {
        let file = dir.join(name);
        if file.is_file() {
            return Lookup::Found(file);
        }
        return Lookup::NotFound;
    }

    PAN_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}{ext}")))
        .find(|file| file.is_file())
        .map_or(Lookup::NotFound, Lookup::Found)
}

pub(crate) fn current_dir() -> Result<Utf8PathBuf, PanError> {
    let cwd = env::current_dir()
        .map_err(|e| PanError::system("cannot read current directory", None, e))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| PanError::configuration(format!("non UTF-8 directory: {}", p.display())))
}

/// Directories handed to the compiler must be absolute and exist.
pub(crate) fn validate_directory(dir: &Utf8Path, label: &str) -> Result<(), PanError> {
    if !dir.is_absolute() {
        return Err(PanError::configuration(format!(
            "{label} directory must be an absolute path: {dir}"
        )));
    }
    if !dir.exists() {
        return Err(PanError::configuration(format!(
            "{label} directory does not exist: {dir}"
        )));
    }
    if !dir.is_dir() {
        return Err(PanError::configuration(format!(
            "{label} directory value is not a directory: {dir}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    #[test]
    fn test_lookup_precedence() {
        for mask in 0..8u8 {
            let root = tempfile::tempdir().unwrap();
            let session = utf8(&root.path().join("session"));
            let first = utf8(&root.path().join("i1"));
            let second = utf8(&root.path().join("i2"));
            let dirs = [&session, &first, &second];
            for (bit, dir) in dirs.iter().enumerate() {
                fs::create_dir(dir).unwrap();
                if mask & (1 << bit) != 0 {
                    fs::write(dir.join("node.pan"), "template node;").unwrap();
                }
            }

            let repo =
                SourceRepository::new(Some(session.clone()), vec![first.clone(), second.clone()])
                    .unwrap();
            let found = repo.retrieve_pan_source("node");

            let expected = (0..3).find(|bit| mask & (1 << bit) != 0);
            match expected {
                Some(bit) => {
                    assert_eq!(found.source_type(), SourceType::Pan);
                    assert_eq!(found.path(), Some(dirs[bit].join("node.pan").as_path()));
                }
                None => assert_eq!(found.source_type(), SourceType::AbsentSource),
            }
        }
    }

    #[test]
    fn test_extension_order_and_loadpath() {
        let root = tempfile::tempdir().unwrap();
        let dir = utf8(root.path());
        fs::create_dir(dir.join("site")).unwrap();
        fs::write(dir.join("a.pan"), "").unwrap();
        fs::write(dir.join("a.tpl"), "").unwrap();
        fs::write(dir.join("site/b.pan"), "").unwrap();

        let repo = SourceRepository::new(None, vec![dir.clone()]).unwrap();
        assert_eq!(repo.retrieve_pan_source("a").source_type(), SourceType::Tpl);
        assert!(repo.retrieve_pan_source("b").is_absent());

        let loadpath = [String::new(), String::from("site")];
        let b = repo.retrieve_pan_source_with("b", &loadpath);
        assert_eq!(b.path(), Some(dir.join("site/b.pan").as_path()));
        assert_eq!(b.name(), "site/b");
    }

    #[test]
    fn test_session_deletion_marker() {
        let root = tempfile::tempdir().unwrap();
        let session = utf8(&root.path().join("s"));
        let include = utf8(&root.path().join("i"));
        fs::create_dir(&session).unwrap();
        fs::create_dir(&include).unwrap();
        fs::write(include.join("x.pan"), "").unwrap();
        fs::write(session.join("x.del"), "").unwrap();

        let repo = SourceRepository::new(Some(session), vec![include]).unwrap();
        assert!(repo.retrieve_pan_source("x").is_absent());
    }

    #[test]
    fn test_text_lookup() {
        let root = tempfile::tempdir().unwrap();
        let dir = utf8(root.path());
        fs::write(dir.join("motd.txt"), "hello").unwrap();

        let repo = SourceRepository::new(None, vec![dir.clone()]).unwrap();
        let text = repo.retrieve_txt_source("motd.txt");
        assert_eq!(text.source_type(), SourceType::Text);
        assert_eq!(
            repo.retrieve_txt_source("missing.txt").source_type(),
            SourceType::AbsentText
        );
    }

    #[test]
    fn test_directory_validation() {
        let root = tempfile::tempdir().unwrap();
        let dir = utf8(root.path());
        let file = dir.join("plain");
        fs::write(&file, "").unwrap();

        assert!(SourceRepository::new(None, vec![Utf8PathBuf::from("relative")]).is_err());
        assert!(SourceRepository::new(None, vec![dir.join("missing")]).is_err());
        assert!(SourceRepository::new(None, vec![file.clone()]).is_err());
        assert!(SourceRepository::new(Some(file), vec![dir.clone()]).is_err());

        let mut params = ParameterList::new();
        params.append("includeDirectory", dir.as_str()).unwrap();
        let repo = SourceRepository::from_parameters(&params).unwrap();
        assert_eq!(repo.include_dirs(), &[dir]);
    }
}
