//! Error types shared across the workspace.

/// Top-level error for runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum AquaHubError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperationError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("driver failure: {0}")]
    Driver(String),
    #[error("operation not implemented")]
    NotImplemented,
}

/// Lookup failure for a registered entity.
#[derive(Debug, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

impl NotFoundError {
    #[must_use]
    pub fn new(entity: &'static str, id: impl Into<String>) -> Self {
        Self {
            entity,
            id: id.into(),
        }
    }
}

/// A write operation applied to an observable kind that does not support it.
#[derive(Debug, thiserror::Error)]
#[error("operation {operation} is not supported by {kind} observable {id}")]
pub struct UnsupportedOperationError {
    pub operation: &'static str,
    pub kind: &'static str,
    pub id: String,
}

impl UnsupportedOperationError {
    #[must_use]
    pub fn new(operation: &'static str, kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            id: id.into(),
        }
    }
}

/// An operation rejected because the entity is in the wrong state.
#[derive(Debug, thiserror::Error)]
#[error("precondition failed for {id}: {reason}")]
pub struct PreconditionError {
    pub id: String,
    pub reason: String,
}

impl PreconditionError {
    #[must_use]
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid descriptor or driver configuration.
#[derive(Debug, thiserror::Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);
