use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::ArcStr;
use crate::data::Element;
use crate::engine::{BuildResult, Session};
use crate::error::PanError;
use crate::eval::Dependencies;
use crate::output::{self, Formatter};
use crate::source::SourceFile;

/// A validated object, ready to be written out.
#[derive(Debug, Clone)]
pub struct FinalResult {
    pub object: ArcStr,
    pub root: Element,
    pub timestamp: SystemTime,
    /// Every file the profile depends on, including through referenced
    /// objects.
    pub dependencies: BTreeSet<SourceFile>,
}

impl FinalResult {
    pub fn new(
        object: &str,
        root: Element,
        timestamp: SystemTime,
        dependencies: BTreeSet<SourceFile>,
    ) -> Self {
        FinalResult {
            object: ArcStr::from(object),
            root,
            timestamp,
            dependencies,
        }
    }

    /// Gathers the dependencies of `build` and, transitively, of every object
    /// it referenced.
    pub(crate) fn collect(session: &Session, build: &BuildResult) -> Result<Self, PanError> {
        let mut dependencies = BTreeSet::new();
        let mut processed = HashSet::new();
        processed.insert(build.object.clone());
        add_files(&mut dependencies, &build.dependencies);

        let mut pending: Vec<ArcStr> = build.dependencies.objects.iter().cloned().collect();
        while let Some(object) = pending.pop() {
            if !processed.insert(object.clone()) {
                continue;
            }
            let other = session.built.wait_for_result(&object)?;
            add_files(&mut dependencies, &other.dependencies);
            pending.extend(other.dependencies.objects.iter().cloned());
        }

        Ok(FinalResult {
            object: build.object.clone(),
            root: build.root.clone(),
            timestamp: build.timestamp,
            dependencies,
        })
    }
}

fn add_files(into: &mut BTreeSet<SourceFile>, dependencies: &Dependencies) {
    into.extend(dependencies.templates.values().cloned());
    into.extend(dependencies.other.iter().cloned());
}

/// Writes one output file of a validated object.
pub(super) fn write_output(
    session: &Arc<Session>,
    object: &str,
    formatter: &dyn Formatter,
) -> Result<(), PanError> {
    let result = session.validated.wait_for_result(object)?;
    let outdir = session
        .options
        .output_dir
        .as_deref()
        .ok_or_else(|| PanError::configuration("formatters require an output directory"))?;

    let file = output::output_file(outdir, object, formatter.suffix());
    output::write_file(&file, result.timestamp, |writer| formatter.write(&result, writer))
        .map_err(|e| output::system_error(e, &file))?;
    debug!(object, file = %file, "written");
    Ok(())
}
