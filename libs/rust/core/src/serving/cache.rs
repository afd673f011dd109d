use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use super::ModelSource;
use crate::error::Result;
use crate::model::ModelHandle;
use crate::registry::ModelReference;

/// Holds at most one resolved model for the process lifetime.
///
/// Racing first callers block on one initialization; the resolver runs once on success and every
/// caller sees the same handle. A failed resolution is not retained, so the next call resolves
/// again. A newly promoted version is only picked up after a restart.
pub struct ModelCache {
    source: Arc<dyn ModelSource>,
    reference: ModelReference,
    cell: OnceCell<ModelHandle>,
}

impl ModelCache {
    pub fn new(source: Arc<dyn ModelSource>, reference: ModelReference) -> Self {
        Self { source, reference, cell: OnceCell::new() }
    }

    pub fn reference(&self) -> &ModelReference { &self.reference }

    pub fn get_or_load(&self) -> Result<ModelHandle> {
        self.cell
            .get_or_try_init(|| {
                let handle = self.source.resolve(&self.reference)?;
                info!(target: "mlops_core::serving", model_uri = %self.reference, "model cached for process lifetime");
                Ok(handle)
            })
            .cloned()
    }
}
