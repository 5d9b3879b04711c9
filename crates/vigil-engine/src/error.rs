use thiserror::Error;

/// Only infrastructure-level faults surface here; per-rule faults become
/// result records and never propagate.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] vigil_store::StoreError),

    #[error(transparent)]
    Audit(#[from] vigil_core::AuditError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
