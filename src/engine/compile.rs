use std::fs;
use std::sync::Arc;

use camino::Utf8Path;
use tracing::debug;

use crate::engine::{ResultType, Session, results};
use crate::error::PanError;
use crate::output;
use crate::source::{SourceFile, SourceType};
use crate::template::{Template, extract_template_name, parse_template};
use crate::utils::{annotation_output_file, get_relative_path};

/// Compiles the template stored at `key` and schedules the work that follows
/// from it: the build and outputs of requested object templates, and the
/// annotation file.
pub(super) fn compile(session: &Arc<Session>, key: &str) -> Result<Arc<Template>, PanError> {
    let path = Utf8Path::new(key);
    let text = fs::read_to_string(path)
        .map_err(|e| PanError::system("cannot read template", Some(path), e))?;

    let (_, name) = extract_template_name(&text)
        .map_err(|e| e.add_exception_info(None, Some(path), None))?;
    let source_type = path
        .extension()
        .and_then(|ext| SourceType::from_extension(&format!(".{ext}")))
        .ok_or_else(|| {
            PanError::syntax(format!("unknown template extension: {path}"), None)
                .add_exception_info(None, Some(path), None)
        })?;
    let source = SourceFile::new(&name, source_type, Some(path.to_path_buf())).map_err(|_| {
        PanError::syntax(
            format!("template name '{name}' does not match the file location"),
            None,
        )
        .add_exception_info(None, Some(path), None)
    })?;

    let template = Arc::new(parse_template(&text, Some(source))?);
    debug!(template = template.name(), "compiled");

    schedule_followups(session, &template, path)?;
    Ok(template)
}

fn schedule_followups(
    session: &Arc<Session>,
    template: &Arc<Template>,
    path: &Utf8Path,
) -> Result<(), PanError> {
    let options = &session.options;

    if template.is_object() && !options.formatters.is_empty() && session.requested.contains(path) {
        let object = template.name();
        session.built.retrieve(object, false)?;
        session.validated.retrieve(object, false)?;

        for formatter in &options.formatters {
            let key = format!("{object}.{}", formatter.suffix());
            let formatter = Arc::clone(formatter);
            let object = object.to_string();
            session.spawn(formatter.result_type(), &key, move |session, _| {
                results::write_output(session, &object, formatter.as_ref())
            });
        }
    }

    if let (Some(dir), Some(base)) = (&options.annotation_dir, &options.annotation_base_dir)
        && let Some(relative) = get_relative_path(base, path)
    {
        let file = annotation_output_file(dir, &relative);
        let key = file.to_string();
        let template = Arc::clone(template);
        session.spawn(ResultType::Annotation, &key, move |_, _| {
            output::annotation::write_annotation(&template, &file)
                .map_err(|e| output::system_error(e, &file))
        });
    }
    Ok(())
}
