//! Incremental rebuild checks.
//!
//! An object is up to date when all of its profile files exist, its
//! dependency file is at least as new as the oldest of them, and none of the
//! files listed in the dependency file changed or moved since.

mod info;

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{DependencyError, PanError};
use crate::output::{DepFormatter, Formatter, XmlFormatter, output_file};
use crate::source::{FileStatCache, PAN_EXTENSIONS, current_dir};
use crate::template::extract_template_name;

pub use info::{DependencyInfo, reconstruct_single_dependency};

/// Decides which object templates need to be compiled again.
#[derive(Debug)]
pub struct DependencyChecker {
    include_dirs: Vec<Utf8PathBuf>,
    output_dir: Utf8PathBuf,
    formatters: Vec<Arc<dyn Formatter>>,
    ignore: Regex,
    stats: FileStatCache,
}

impl DependencyChecker {
    /// `ignore` must match a whole dependency name for it to be skipped. The
    /// dependency formatter is added when `formatters` lacks it.
    pub fn new(
        include_dirs: Vec<Utf8PathBuf>,
        output_dir: Utf8PathBuf,
        formatters: Vec<Arc<dyn Formatter>>,
        ignore: Option<&str>,
    ) -> Result<Self, PanError> {
        let include_dirs = if include_dirs.is_empty() {
            vec![current_dir()?]
        } else {
            include_dirs
        };

        let pattern = ignore.unwrap_or("");
        let ignore = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            PanError::configuration(format!("invalid ignore pattern '{pattern}': {e}"))
        })?;

        Ok(DependencyChecker {
            include_dirs,
            output_dir,
            formatters: with_dep_formatter(formatters),
            ignore,
            stats: FileStatCache::new(),
        })
    }

    /// Outdated subset of `files`, judged against the XML profiles (gzipped
    /// or not) and dependency files in `output_dir`.
    pub fn extract_outdated_files(
        &self,
        files: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        gzip: bool,
    ) -> Result<Vec<Utf8PathBuf>, DependencyError> {
        let formatters: Vec<Arc<dyn Formatter>> =
            vec![Arc::new(XmlFormatter { gzip }), Arc::new(DepFormatter)];
        self.outdated_among(files, output_dir, &formatters)
    }

    /// Outdated subset of `files` for the configured formatters.
    pub fn filter_for_outdated_files(
        &self,
        files: &[Utf8PathBuf],
    ) -> Result<Vec<Utf8PathBuf>, DependencyError> {
        self.outdated_among(files, &self.output_dir, &self.formatters)
    }

    pub fn is_outdated(&self, file: &Utf8Path) -> Result<bool, DependencyError> {
        self.is_outdated_with(file, &self.output_dir, &self.formatters)
    }

    fn outdated_among(
        &self,
        files: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        formatters: &[Arc<dyn Formatter>],
    ) -> Result<Vec<Utf8PathBuf>, DependencyError> {
        let flags = files
            .par_iter()
            .map(|file| self.is_outdated_with(file, output_dir, formatters))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(files
            .iter()
            .zip(flags)
            .filter(|(_, outdated)| *outdated)
            .map(|(file, _)| file.clone())
            .collect())
    }

    fn is_outdated_with(
        &self,
        file: &Utf8Path,
        output_dir: &Utf8Path,
        formatters: &[Arc<dyn Formatter>],
    ) -> Result<bool, DependencyError> {
        let name = match fs::read_to_string(file)
            .map_err(|e| PanError::system("cannot read template", Some(file), e))
            .and_then(|text| extract_template_name(&text))
        {
            Ok((_, name)) => name,
            Err(e) => {
                debug!(file = %file, "cannot extract template name: {e}");
                return Ok(true);
            }
        };

        let profiles: Vec<Arc<dyn Formatter>> = formatters
            .iter()
            .filter(|f| f.key() != DepFormatter.key())
            .cloned()
            .collect();
        let mut target = None;
        for output in resolve_output_files(&name, output_dir, &profiles) {
            let time = self.stats.modification_time(&output);
            if time == 0 {
                debug!(file = %file, output = %output, "missing output");
                return Ok(true);
            }
            target = Some(target.map_or(time, |t: u64| t.min(time)));
        }

        let dep_file = resolve_output_file(&name, output_dir, &DepFormatter);
        let dep_time = self.stats.modification_time(&dep_file);
        let target = target.unwrap_or(dep_time);
        if self.stats.is_missing_or_modified_before(&dep_file, target) {
            debug!(file = %file, "dependency file missing or older than the profile");
            return Ok(true);
        }

        self.is_dependency_list_outdated(&dep_file, target)
    }

    /// Whether any dependency recorded in `dep_file` changed after `target`
    /// (milliseconds since the epoch).
    pub fn is_dependency_list_outdated(
        &self,
        dep_file: &Utf8Path,
        target: u64,
    ) -> Result<bool, DependencyError> {
        let text = fs::read_to_string(dep_file).map_err(|source| DependencyError::Unreadable {
            file: dep_file.to_path_buf(),
            source,
        })?;

        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if line.starts_with('"') {
                warn!(file = %dep_file, "old dependency file format, treating object as outdated");
                return Ok(true);
            }

            let info: DependencyInfo = line.parse()?;
            if self.is_dependency_outdated(&info, target) {
                debug!(file = %dep_file, dependency = %info.name, "changed");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_dependency_outdated(&self, info: &DependencyInfo, target: u64) -> bool {
        if self.ignore.is_match(&info.name) {
            return false;
        }

        let current = if info.source_type.is_text() {
            self.lookup_text_file(&info.name)
        } else {
            self.lookup_source_file(&info.name)
        };

        match &info.path {
            Some(path) => {
                self.stats.is_missing_or_modified_after(path, target)
                    || is_single_dependency_different(path, current.as_deref())
            }
            None => current.is_some(),
        }
    }

    /// First template named `name` in the include directories.
    pub fn lookup_source_file(&self, name: &str) -> Option<Utf8PathBuf> {
        self.include_dirs.iter().find_map(|dir| {
            PAN_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{name}{ext}")))
                .find(|path| self.stats.exists(path))
        })
    }

    /// First text file named `name` in the include directories.
    pub fn lookup_text_file(&self, name: &str) -> Option<Utf8PathBuf> {
        self.include_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| self.stats.exists(path))
    }
}

fn with_dep_formatter(mut formatters: Vec<Arc<dyn Formatter>>) -> Vec<Arc<dyn Formatter>> {
    if !formatters.iter().any(|f| f.key() == DepFormatter.key()) {
        formatters.push(Arc::new(DepFormatter));
    }
    formatters
}

/// A dependency that cannot be found any more is not considered different:
/// it may have been reached through LOADPATH, which is not visible here.
pub fn is_single_dependency_different(recorded: &Utf8Path, found: Option<&Utf8Path>) -> bool {
    found.is_some_and(|found| found != recorded)
}

/// Removes a trailing pan source extension from `name`.
pub fn strip_pan_extensions(name: &str) -> &str {
    PAN_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(name)
}

pub fn resolve_output_file(object: &str, output_dir: &Utf8Path, formatter: &dyn Formatter) -> Utf8PathBuf {
    output_file(output_dir, object, formatter.suffix())
}

pub fn resolve_output_files(
    object: &str,
    output_dir: &Utf8Path,
    formatters: &[Arc<dyn Formatter>],
) -> Vec<Utf8PathBuf> {
    formatters
        .iter()
        .map(|formatter| resolve_output_file(object, output_dir, formatter.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::source::{SourceFile, SourceType};

    struct Fixture {
        _dir: tempfile::TempDir,
        tpl: Utf8PathBuf,
        out: Utf8PathBuf,
        object: Utf8PathBuf,
    }

    fn touch(path: &Utf8Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    /// An object `node` including `base`, with outputs written at t=2000.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let tpl = root.join("tpl");
        let out = root.join("out");
        fs::create_dir_all(&tpl).unwrap();
        fs::create_dir_all(&out).unwrap();

        let object = tpl.join("node.pan");
        let base = tpl.join("base.pan");
        fs::write(&object, "object template node;\ninclude 'base';\n").unwrap();
        fs::write(&base, "template base;\n").unwrap();
        touch(&object, 1000);
        touch(&base, 1000);

        let deps = [
            SourceFile::new("node", SourceType::Pan, Some(object.clone())).unwrap(),
            SourceFile::new("base", SourceType::Pan, Some(base.clone())).unwrap(),
            SourceFile::absent("extra", SourceType::Pan),
        ];
        let lines: Vec<String> = deps
            .iter()
            .map(|dep| DependencyInfo::from_source(dep).to_string())
            .collect();
        fs::write(out.join("node.xml"), "<nlist/>").unwrap();
        fs::write(out.join("node.xml.dep"), lines.join("\n")).unwrap();
        touch(&out.join("node.xml"), 2000);
        touch(&out.join("node.xml.dep"), 2000);

        Fixture {
            _dir: dir,
            tpl,
            out,
            object,
        }
    }

    fn checker(fixture: &Fixture, ignore: Option<&str>) -> DependencyChecker {
        DependencyChecker::new(
            vec![fixture.tpl.clone()],
            fixture.out.clone(),
            vec![Arc::new(XmlFormatter { gzip: false })],
            ignore,
        )
        .unwrap()
    }

    fn outdated(fixture: &Fixture, ignore: Option<&str>) -> bool {
        let files = vec![fixture.object.clone()];
        let result = checker(fixture, ignore)
            .extract_outdated_files(&files, &fixture.out, false)
            .unwrap();
        !result.is_empty()
    }

    #[test]
    fn test_up_to_date() {
        let fixture = fixture();
        assert!(!outdated(&fixture, None));
        assert!(!checker(&fixture, None).is_outdated(&fixture.object).unwrap());
    }

    #[test]
    fn test_modified_dependency() {
        let fixture = fixture();
        touch(&fixture.tpl.join("base.pan"), 3000);
        assert!(outdated(&fixture, None));
        assert!(!outdated(&fixture, Some("ba.*")));
    }

    #[test]
    fn test_deleted_dependency() {
        let fixture = fixture();
        fs::remove_file(fixture.tpl.join("base.pan")).unwrap();
        assert!(outdated(&fixture, None));
    }

    #[test]
    fn test_absent_dependency_appears() {
        let fixture = fixture();
        fs::write(fixture.tpl.join("extra.tpl"), "template extra;\n").unwrap();
        assert!(outdated(&fixture, None));
    }

    #[test]
    fn test_missing_or_old_outputs() {
        let fixture = fixture();
        touch(&fixture.out.join("node.xml.dep"), 1500);
        assert!(outdated(&fixture, None));

        let fixture = self::fixture();
        fs::remove_file(fixture.out.join("node.xml")).unwrap();
        assert!(outdated(&fixture, None));

        // only the gzipped profile is looked for
        let fixture = self::fixture();
        let files = vec![fixture.object.clone()];
        let result = checker(&fixture, None)
            .extract_outdated_files(&files, &fixture.out, true)
            .unwrap();
        assert_eq!(result, files);
    }

    #[test]
    fn test_dependency_file_older_than_profile() {
        let fixture = fixture();
        touch(&fixture.out.join("node.xml"), 2500);
        assert!(outdated(&fixture, None));
        assert!(checker(&fixture, None).is_outdated(&fixture.object).unwrap());

        // with no profile formatter the dependency file is its own reference
        let fixture = self::fixture();
        let checker = DependencyChecker::new(
            vec![fixture.tpl.clone()],
            fixture.out.clone(),
            vec![Arc::new(DepFormatter)],
            None,
        )
        .unwrap();
        assert!(!checker.is_outdated(&fixture.object).unwrap());
    }

    #[test]
    fn test_unparsable_object_is_outdated() {
        let fixture = fixture();
        fs::write(&fixture.object, "this is not pan").unwrap();
        assert!(outdated(&fixture, None));
    }

    #[test]
    fn test_shadowed_dependency() {
        let fixture = fixture();
        let first = fixture.tpl.parent().unwrap().join("first");
        fs::create_dir_all(&first).unwrap();
        fs::write(first.join("base.tpl"), "template base;\n").unwrap();
        touch(&first.join("base.tpl"), 1000);

        let checker = DependencyChecker::new(
            vec![first, fixture.tpl.clone()],
            fixture.out.clone(),
            vec![Arc::new(XmlFormatter { gzip: false })],
            None,
        )
        .unwrap();
        assert!(checker.is_outdated(&fixture.object).unwrap());
    }

    #[test]
    fn test_bad_dependency_files() {
        let fixture = fixture();
        let dep_file = fixture.out.join("node.xml.dep");

        fs::write(&dep_file, "node FOO file:///x/\n").unwrap();
        touch(&dep_file, 2000);
        let checker = checker(&fixture, None);
        assert!(matches!(
            checker.is_outdated(&fixture.object),
            Err(DependencyError::UnknownType(_))
        ));

        fs::write(&dep_file, "\"node\" \"/tpl/node.pan\"\n").unwrap();
        assert!(checker.is_dependency_list_outdated(&dep_file, 2000).unwrap());

        assert!(matches!(
            checker.is_dependency_list_outdated(&fixture.out.join("nothing.dep"), 0),
            Err(DependencyError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_helpers() {
        for ext in PAN_EXTENSIONS {
            assert_eq!(strip_pan_extensions(&format!("ok/{ext}")), "ok/");
        }
        assert_eq!(strip_pan_extensions("ok/file.txt"), "ok/file.txt");

        let first = Utf8Path::new("/first/file.txt");
        let second = Utf8Path::new("/second/file.txt");
        assert!(is_single_dependency_different(first, Some(second)));
        assert!(!is_single_dependency_different(first, Some(first)));
        assert!(!is_single_dependency_different(first, None));

        let formatters: Vec<Arc<dyn Formatter>> =
            vec![Arc::new(XmlFormatter { gzip: true }), Arc::new(DepFormatter)];
        let files = resolve_output_files("a/b", Utf8Path::new("/out"), &formatters);
        assert_eq!(
            files,
            vec![
                Utf8PathBuf::from("/out/a/b.xml.gz"),
                Utf8PathBuf::from("/out/a/b.xml.dep")
            ]
        );
    }
}
