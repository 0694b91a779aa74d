//! Serialization of validated objects.
//!
//! Every formatter writes one file per object, `<outdir>/<object>.<suffix>`,
//! stamped with the object's build time so dependency checks can compare
//! against it.

pub mod annotation;
mod dep;
mod json;
mod txt;
mod xml;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::engine::{FinalResult, ResultType};
use crate::error::PanError;

pub use dep::DepFormatter;
pub use json::JsonFormatter;
pub use txt::TxtFormatter;
pub use xml::XmlFormatter;

/// Writes a [`FinalResult`] in one output format.
pub trait Formatter: fmt::Debug + Send + Sync {
    /// Name used to select the formatter, e.g. `json.gz`.
    fn key(&self) -> &'static str;

    /// File name suffix, without the leading dot.
    fn suffix(&self) -> &'static str;

    /// Pool the writer runs on.
    fn result_type(&self) -> ResultType {
        ResultType::Output
    }

    fn write(&self, result: &FinalResult, writer: &mut dyn Write) -> anyhow::Result<()>;
}

/// Formatter registered under `key`.
pub fn formatter_for_key(key: &str) -> Option<Arc<dyn Formatter>> {
    let formatter: Arc<dyn Formatter> = match key {
        "json" => Arc::new(JsonFormatter { gzip: false }),
        "json.gz" => Arc::new(JsonFormatter { gzip: true }),
        "xml" | "pan" => Arc::new(XmlFormatter { gzip: false }),
        "xml.gz" | "pan.gz" => Arc::new(XmlFormatter { gzip: true }),
        "text" | "txt" => Arc::new(TxtFormatter),
        "dep" => Arc::new(DepFormatter),
        _ => return None,
    };
    Some(formatter)
}

pub fn output_file(outdir: &Utf8Path, object: &str, suffix: &str) -> Utf8PathBuf {
    outdir.join(format!("{object}.{suffix}"))
}

/// Creates `file` and its parent directories, fills it through `fill` and
/// sets its modification time to `timestamp`.
pub(crate) fn write_file<F>(file: &Utf8Path, timestamp: SystemTime, fill: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut dyn Write) -> anyhow::Result<()>,
{
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create output directory {parent}"))?;
    }

    let mut writer = BufWriter::new(File::create(file)?);
    fill(&mut writer)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.set_modified(timestamp)?;
    Ok(())
}

/// Runs `fill` through a gzip encoder when `gzip` is set.
pub(crate) fn maybe_compressed<F>(gzip: bool, writer: &mut dyn Write, fill: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut dyn Write) -> anyhow::Result<()>,
{
    if gzip {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        fill(&mut encoder)?;
        encoder.finish()?;
        Ok(())
    } else {
        fill(writer)
    }
}

pub(crate) fn system_error(err: anyhow::Error, file: &Utf8Path) -> PanError {
    match err.downcast::<io::Error>() {
        Ok(io) => PanError::system("cannot write output", Some(file), io),
        Err(other) => PanError::system(
            "cannot write output",
            Some(file),
            io::Error::other(format!("{other:#}")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::Read;
    use std::time::{Duration, UNIX_EPOCH};

    use flate2::read::GzDecoder;

    use super::*;
    use crate::data::Element;

    fn sample() -> FinalResult {
        let root = Element::Dict(Arc::new(
            [
                (crate::ArcStr::from("name"), Element::string("node1")),
                (crate::ArcStr::from("cpus"), Element::Long(4)),
            ]
            .into_iter()
            .collect(),
        ));
        FinalResult::new("node1", root, UNIX_EPOCH + Duration::from_secs(1_000_000), BTreeSet::new())
    }

    #[test]
    fn test_formatter_keys() {
        for key in ["json", "json.gz", "xml", "xml.gz", "text", "dep"] {
            let formatter = formatter_for_key(key).unwrap();
            assert_eq!(formatter.key(), key);
        }
        assert_eq!(formatter_for_key("dep").unwrap().suffix(), "xml.dep");
        assert_eq!(
            formatter_for_key("dep").unwrap().result_type(),
            ResultType::Dependency
        );
        assert!(formatter_for_key("yaml").is_none());
    }

    #[test]
    fn test_write_file_sets_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = Utf8Path::from_path(dir.path()).unwrap();
        let result = sample();
        let formatter = formatter_for_key("json").unwrap();

        let file = output_file(outdir, "site/node1", formatter.suffix());
        write_file(&file, result.timestamp, |w| formatter.write(&result, w)).unwrap();

        let modified = fs::metadata(&file).unwrap().modified().unwrap();
        assert_eq!(modified, result.timestamp);
        let text = fs::read_to_string(&file).unwrap();
        assert!(text.contains("\"cpus\": 4"));
    }

    #[test]
    fn test_gzip_output() {
        let formatter = formatter_for_key("json.gz").unwrap();
        let mut bytes = Vec::new();
        formatter.write(&sample(), &mut bytes).unwrap();

        let mut text = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut text).unwrap();
        assert!(text.contains("\"name\": \"node1\""));
    }
}
