use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::ArcStr;
use crate::data::Element;
use crate::engine::Session;
use crate::error::PanError;
use crate::eval::{Context, Definitions, Dependencies};
use crate::template::Template;

/// Outcome of executing an object template.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub object: ArcStr,
    pub root: Element,
    pub template: Arc<Template>,
    pub timestamp: SystemTime,
    pub dependencies: Arc<Dependencies>,
    pub definitions: Arc<Definitions>,
}

pub(super) fn build(session: &Arc<Session>, object: &str) -> Result<BuildResult, PanError> {
    let source = session.repository.retrieve_pan_source(object);
    let path = source
        .path()
        .ok_or_else(|| PanError::evaluation(format!("cannot locate object template: {object}")))?;

    let template = session.compiled.wait_for_result(path.as_str())?;
    template.verify_name(object)?;
    if !template.is_object() {
        return Err(PanError::evaluation(format!(
            "{object} is not an object template"
        )));
    }

    info!(object, "build started");
    let timestamp = SystemTime::now();
    let mut context = Context::new(Arc::clone(session), Arc::clone(&template));
    context.execute_object()?;
    context.turn_off_object_dependency_checking();

    let (root, definitions, dependencies) = context.into_parts();
    debug!(
        object,
        templates = dependencies.templates.len(),
        objects = dependencies.objects.len(),
        "build finished"
    );

    Ok(BuildResult {
        object: ArcStr::from(object),
        root,
        template,
        timestamp,
        dependencies: Arc::new(dependencies),
        definitions: Arc::new(definitions),
    })
}
