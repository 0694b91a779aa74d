use std::sync::Arc;

use tracing::debug;

use crate::engine::{FinalResult, Session};
use crate::error::PanError;
use crate::eval::Context;

/// Validates a built object and gathers everything its profile depends on.
pub(super) fn validate(session: &Arc<Session>, object: &str) -> Result<Arc<FinalResult>, PanError> {
    let build = session.built.wait_for_result(object)?;

    let mut context = Context::for_validation(
        Arc::clone(session),
        Arc::clone(&build.template),
        build.root.clone(),
        (*build.definitions).clone(),
    );
    context.validate()?;
    debug!(object, bindings = build.definitions.bindings.len(), "validated");

    FinalResult::collect(session, &build).map(Arc::new)
}
