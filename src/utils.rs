use camino::{Utf8Path, Utf8PathBuf};
use indicatif::ProgressStyle;

/// Spinner shown for every running task.
pub(crate) fn task_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::with_template("{spinner:.blue} {msg}")?)
}

/// Bar shown for a whole compiler run.
pub(crate) fn run_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

/// `file` relative to `base`, or `None` when `file` lies outside of it.
pub fn get_relative_path(base: &Utf8Path, file: &Utf8Path) -> Option<Utf8PathBuf> {
    file.strip_prefix(base).ok().map(Utf8Path::to_path_buf)
}

/// Annotation file for the source at `relative` (as given by
/// [`get_relative_path`]).
pub fn annotation_output_file(dir: &Utf8Path, relative: &Utf8Path) -> Utf8PathBuf {
    dir.join(format!("{relative}.annotation.xml"))
}
