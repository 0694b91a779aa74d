//! Compiler configuration and the driver of one compilation run.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use regex::Regex;
use tracing::{Level, info};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{ResultType, Session};
use crate::error::PanError;
use crate::output::{Formatter, formatter_for_key};
use crate::source::{SourceRepository, validate_directory};
use crate::template::{Expr, parse_expression};

const DEFAULT_MAX_ITERATION: u64 = 5000;
const DEFAULT_MAX_RECURSION: usize = 50;

/// How uses of deprecated features are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeprecationLevel {
    #[default]
    Off,
    On,
    Fatal,
}

impl FromStr for DeprecationLevel {
    type Err = PanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(DeprecationLevel::Off),
            "on" => Ok(DeprecationLevel::On),
            "fatal" => Ok(DeprecationLevel::Fatal),
            other => Err(PanError::configuration(format!(
                "invalid deprecation warnings value: '{other}'"
            ))),
        }
    }
}

/// Validated settings of a compiler run.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    pub include_dirs: Vec<Utf8PathBuf>,
    pub session_dir: Option<Utf8PathBuf>,
    pub output_dir: Option<Utf8PathBuf>,
    pub formatters: Vec<Arc<dyn Formatter>>,
    /// `None` means unlimited.
    pub max_iteration: Option<u64>,
    /// `None` means unlimited.
    pub max_recursion: Option<usize>,
    /// Initial size of every worker pool.
    pub threads: usize,
    pub annotation_dir: Option<Utf8PathBuf>,
    pub annotation_base_dir: Option<Utf8PathBuf>,
    pub debug_include: Vec<Regex>,
    pub debug_exclude: Vec<Regex>,
    pub deprecation: DeprecationLevel,
    /// Evaluated to seed the root of every object.
    pub root_element: Option<Expr>,
}

impl CompilerOptions {
    pub fn builder() -> CompilerOptionsBuilder {
        CompilerOptionsBuilder::default()
    }

    /// Options for runs that only check the syntax of templates.
    pub fn check_syntax(deprecation: DeprecationLevel) -> Self {
        CompilerOptions {
            include_dirs: Vec::new(),
            session_dir: None,
            output_dir: None,
            formatters: Vec::new(),
            max_iteration: Some(DEFAULT_MAX_ITERATION),
            max_recursion: Some(DEFAULT_MAX_RECURSION),
            threads: default_threads(),
            annotation_dir: None,
            annotation_base_dir: None,
            debug_include: Vec::new(),
            debug_exclude: Vec::new(),
            deprecation,
            root_element: None,
        }
    }

    /// Debugging is on for templates matching an include pattern and no
    /// exclude pattern.
    pub fn check_debug_enabled(&self, name: &str) -> bool {
        if self.debug_exclude.iter().any(|p| p.is_match(name)) {
            return false;
        }
        self.debug_include.iter().any(|p| p.is_match(name))
    }

    /// Absolute paths of `files` plus the files of the named object
    /// templates.
    pub fn resolve_file_list(
        &self,
        object_names: &[String],
        files: &[Utf8PathBuf],
    ) -> Result<BTreeSet<Utf8PathBuf>, PanError> {
        let mut resolved = files
            .iter()
            .map(|file| absolute(file))
            .collect::<Result<BTreeSet<_>, _>>()?;

        if !object_names.is_empty() {
            let repository =
                SourceRepository::new(self.session_dir.clone(), self.include_dirs.clone())?;
            for name in object_names {
                let source = repository.retrieve_pan_source(name);
                let path = source.path().ok_or_else(|| {
                    PanError::evaluation(format!("cannot locate object template: {name}"))
                })?;
                resolved.insert(path.to_path_buf());
            }
        }
        Ok(resolved)
    }
}

/// Collects raw option values; [`build`](CompilerOptionsBuilder::build)
/// checks them all at once.
#[derive(Debug, Default)]
pub struct CompilerOptionsBuilder {
    include_dirs: Vec<Utf8PathBuf>,
    session_dir: Option<Utf8PathBuf>,
    output_dir: Option<Utf8PathBuf>,
    formats: Vec<String>,
    formatters: Vec<Arc<dyn Formatter>>,
    max_iteration: Option<i64>,
    max_recursion: Option<i64>,
    threads: Option<usize>,
    annotation_dir: Option<Utf8PathBuf>,
    annotation_base_dir: Option<Utf8PathBuf>,
    debug_include: Vec<String>,
    debug_exclude: Vec<String>,
    deprecation: DeprecationLevel,
    root_element: Option<String>,
}

impl CompilerOptionsBuilder {
    pub fn include_dir(mut self, dir: &Utf8Path) -> Self {
        self.include_dirs.push(dir.to_path_buf());
        self
    }

    pub fn session_dir(mut self, dir: &Utf8Path) -> Self {
        self.session_dir = Some(dir.to_path_buf());
        self
    }

    pub fn output_dir(mut self, dir: &Utf8Path) -> Self {
        self.output_dir = Some(dir.to_path_buf());
        self
    }

    /// Comma separated formatter names, e.g. `json,dep`. `none` adds nothing.
    pub fn formats(mut self, names: &str) -> Self {
        self.formats.extend(
            names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty() && *name != "none")
                .map(String::from),
        );
        self
    }

    pub fn formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatters.push(formatter);
        self
    }

    /// Values below 1 disable the limit.
    pub fn max_iteration(mut self, limit: i64) -> Self {
        self.max_iteration = Some(limit);
        self
    }

    /// Values below 1 disable the limit.
    pub fn max_recursion(mut self, limit: i64) -> Self {
        self.max_recursion = Some(limit);
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Writes annotation files for sources under `base` into `dir`.
    pub fn annotations(mut self, dir: &Utf8Path, base: &Utf8Path) -> Self {
        self.annotation_dir = Some(dir.to_path_buf());
        self.annotation_base_dir = Some(base.to_path_buf());
        self
    }

    pub fn debug_include(mut self, pattern: &str) -> Self {
        self.debug_include.push(pattern.to_string());
        self
    }

    pub fn debug_exclude(mut self, pattern: &str) -> Self {
        self.debug_exclude.push(pattern.to_string());
        self
    }

    pub fn deprecation(mut self, level: DeprecationLevel) -> Self {
        self.deprecation = level;
        self
    }

    /// Pan expression evaluated to a dict that every object starts from.
    pub fn root_element(mut self, expr: &str) -> Self {
        self.root_element = Some(expr.to_string());
        self
    }

    pub fn build(self) -> Result<CompilerOptions, PanError> {
        if let Some(dir) = &self.output_dir {
            validate_directory(dir, "output")?;
        }
        if let Some(dir) = &self.session_dir {
            validate_directory(dir, "session")?;
        }
        for dir in &self.include_dirs {
            validate_directory(dir, "include")?;
        }
        if let Some(dir) = &self.annotation_dir {
            validate_directory(dir, "annotation")?;
        }
        if let Some(dir) = &self.annotation_base_dir {
            validate_directory(dir, "annotation base")?;
        }

        let mut formatters = self.formatters;
        for name in &self.formats {
            let formatter = formatter_for_key(name)
                .ok_or_else(|| PanError::configuration(format!("unknown formatter: '{name}'")))?;
            if !formatters.iter().any(|f| f.key() == formatter.key()) {
                formatters.push(formatter);
            }
        }
        if !formatters.is_empty() && self.output_dir.is_none() {
            return Err(PanError::configuration(
                "an output directory must be given when writing output files",
            ));
        }

        let root_element = self
            .root_element
            .as_deref()
            .map(parse_expression)
            .transpose()
            .map_err(|e| PanError::configuration(format!("invalid root element: {e}")))?;

        Ok(CompilerOptions {
            include_dirs: self.include_dirs,
            session_dir: self.session_dir,
            output_dir: self.output_dir,
            formatters,
            max_iteration: limit(self.max_iteration, DEFAULT_MAX_ITERATION as i64)
                .map(|n| n as u64),
            max_recursion: limit(self.max_recursion, DEFAULT_MAX_RECURSION as i64)
                .map(|n| n as usize),
            threads: self.threads.filter(|&n| n > 0).unwrap_or_else(default_threads),
            annotation_dir: self.annotation_dir,
            annotation_base_dir: self.annotation_base_dir,
            debug_include: compile_patterns(&self.debug_include)?,
            debug_exclude: compile_patterns(&self.debug_exclude)?,
            deprecation: self.deprecation,
            root_element,
        })
    }
}

fn limit(value: Option<i64>, default: i64) -> Option<i64> {
    Some(value.unwrap_or(default)).filter(|&n| n > 0)
}

fn default_threads() -> usize {
    rayon::current_num_threads().max(1)
}

/// Patterns must match whole template names.
fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, PanError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                PanError::configuration(format!("invalid debug pattern '{pattern}': {e}"))
            })
        })
        .collect()
}

fn absolute(file: &Utf8Path) -> Result<Utf8PathBuf, PanError> {
    if file.is_absolute() {
        return Ok(file.to_path_buf());
    }
    let path = std::path::absolute(file)
        .map_err(|e| PanError::system("cannot resolve file", Some(file), e))?;
    Utf8PathBuf::from_path_buf(path)
        .map_err(|p| PanError::configuration(format!("non UTF-8 path: {}", p.display())))
}

/// One compilation of a set of template files.
#[derive(Debug)]
pub struct Compiler {
    options: CompilerOptions,
    files: BTreeSet<Utf8PathBuf>,
}

impl Compiler {
    pub fn new(
        options: CompilerOptions,
        object_names: &[String],
        files: &[Utf8PathBuf],
    ) -> Result<Self, PanError> {
        let files = options.resolve_file_list(object_names, files)?;
        Ok(Compiler { options, files })
    }

    /// Compiles `files` and the object templates named in `object_names`.
    pub fn run(
        options: CompilerOptions,
        object_names: &[String],
        files: &[Utf8PathBuf],
    ) -> Result<CompilerResults, PanError> {
        Compiler::new(options, object_names, files)?.process()
    }

    pub fn files(&self) -> &BTreeSet<Utf8PathBuf> {
        &self.files
    }

    /// Runs every task that follows from the files and gathers the failures.
    /// Fails only when the run cannot start.
    pub fn process(&self) -> Result<CompilerResults, PanError> {
        let requested: HashSet<Utf8PathBuf> = self.files.iter().cloned().collect();
        let session = Session::new(self.options.clone(), requested)?;

        let style = crate::utils::run_style()
            .map_err(|e| PanError::configuration(format!("invalid progress style: {e}")))?;
        let root_span = tracing::span!(Level::INFO, "compiling", files = self.files.len());
        root_span.pb_set_style(&style);
        root_span.pb_set_message("Compiling templates...");
        let _enter = root_span.enter();

        for file in &self.files {
            session.submit_compile(file)?;
        }

        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let mut processed = 0;
        while processed < session.submitted() {
            root_span.pb_set_length(session.submitted() as u64);
            let Ok(job) = session.results().recv() else {
                break;
            };
            processed += 1;

            if let Some(err) = job.wait_error()
                && seen.insert(err.to_string())
            {
                errors.push(err);
            }
            root_span.pb_inc(1);
        }
        session.shutdown();

        let stats = session.statistics(self.files.len());
        info!("Build complete!");
        Ok(CompilerResults { stats, errors })
    }
}

/// Task counts and timing of one run.
#[derive(Debug, Clone, Default)]
pub struct CompilerStatistics {
    pub file_count: usize,
    /// Started tasks, indexed by [`ResultType::index`].
    pub started: [usize; 6],
    /// Finished tasks, indexed by [`ResultType::index`].
    pub finished: [usize; 6],
    pub build_time: Duration,
}

impl CompilerStatistics {
    pub fn finished(&self, result_type: ResultType) -> usize {
        self.finished[result_type.index()]
    }
}

impl fmt::Display for CompilerStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} file(s) processed in {} ms",
            style(self.file_count).bold(),
            style(self.build_time.as_millis()).bold()
        )?;
        for result_type in ResultType::ALL {
            let i = result_type.index();
            if self.started[i] == 0 {
                continue;
            }
            writeln!(
                f,
                "  {:<10} {} / {}",
                style(result_type.label()).cyan(),
                self.finished[i],
                self.started[i]
            )?;
        }
        Ok(())
    }
}

/// Everything a run produced besides the files it wrote.
#[derive(Debug)]
pub struct CompilerResults {
    pub stats: CompilerStatistics,
    pub errors: Vec<PanError>,
}

impl CompilerResults {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// All errors, separated by blank lines.
    pub fn format_errors(&self) -> String {
        self.errors
            .iter()
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl fmt::Display for CompilerResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_errors() {
            writeln!(f, "{}", self.format_errors())?;
        }
        write!(f, "{}", self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_deprecation_level() {
        assert_eq!("FATAL".parse::<DeprecationLevel>().unwrap(), DeprecationLevel::Fatal);
        assert_eq!(" on ".parse::<DeprecationLevel>().unwrap(), DeprecationLevel::On);
        assert!("loud".parse::<DeprecationLevel>().is_err());
    }

    #[test]
    fn test_limits() {
        let (_dir, root) = tempdir();
        let options = CompilerOptions::builder().include_dir(&root).build().unwrap();
        assert_eq!(options.max_iteration, Some(5000));
        assert_eq!(options.max_recursion, Some(50));

        let options = CompilerOptions::builder()
            .max_iteration(0)
            .max_recursion(-3)
            .build()
            .unwrap();
        assert_eq!(options.max_iteration, None);
        assert_eq!(options.max_recursion, None);
    }

    #[test]
    fn test_formatters_need_output_dir() {
        let err = CompilerOptions::builder().formats("json").build().unwrap_err();
        assert!(matches!(err, PanError::Configuration(_)));

        let (_dir, out) = tempdir();
        let options = CompilerOptions::builder()
            .output_dir(&out)
            .formats("json, dep,json,none")
            .build()
            .unwrap();
        let keys: Vec<_> = options.formatters.iter().map(|f| f.key()).collect();
        assert_eq!(keys, ["json", "dep"]);

        assert!(
            CompilerOptions::builder()
                .output_dir(&out)
                .formats("yaml")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_bad_directories() {
        assert!(
            CompilerOptions::builder()
                .include_dir(Utf8Path::new("relative/dir"))
                .build()
                .is_err()
        );
        let (_dir, root) = tempdir();
        assert!(
            CompilerOptions::builder()
                .session_dir(&root.join("missing"))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_debug_patterns() {
        let options = CompilerOptions::builder()
            .debug_include("site/.*")
            .debug_exclude("site/secret")
            .build()
            .unwrap();
        assert!(options.check_debug_enabled("site/base"));
        assert!(!options.check_debug_enabled("site/secret"));
        assert!(!options.check_debug_enabled("other/site/base"));
        assert!(!CompilerOptions::check_syntax(DeprecationLevel::Off).check_debug_enabled("a"));
    }

    #[test]
    fn test_root_element() {
        let options = CompilerOptions::builder()
            .root_element("dict('a', 1)")
            .build()
            .unwrap();
        assert!(options.root_element.is_some());
        assert!(CompilerOptions::builder().root_element("dict(").build().is_err());
    }

    #[test]
    fn test_resolve_file_list() {
        let (_dir, root) = tempdir();
        std::fs::create_dir_all(root.join("site")).unwrap();
        std::fs::write(root.join("site/node.pan"), "object template site/node;\n").unwrap();

        let options = CompilerOptions::builder().include_dir(&root).build().unwrap();
        let extra = root.join("extra.pan");
        let files = options
            .resolve_file_list(&["site/node".to_string()], &[extra.clone()])
            .unwrap();
        assert_eq!(
            files.into_iter().collect::<Vec<_>>(),
            vec![extra, root.join("site/node.pan")]
        );

        assert!(options.resolve_file_list(&["nowhere".to_string()], &[]).is_err());
    }

    #[test]
    fn test_statistics_summary() {
        let mut stats = CompilerStatistics {
            file_count: 2,
            ..Default::default()
        };
        stats.started[ResultType::Build.index()] = 2;
        stats.finished[ResultType::Build.index()] = 1;
        console::set_colors_enabled(false);
        let text = stats.to_string();
        assert!(text.contains("2 file(s) processed"));
        assert!(text.contains("build"));
        assert!(text.contains("1 / 2"));
        assert!(!text.contains("validate"));
        assert_eq!(stats.finished(ResultType::Build), 1);
    }
}
