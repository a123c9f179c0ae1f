use thiserror::Error;

/// Core error taxonomy. Per-symbol evaluation failures never propagate past
/// the symbol; everything else surfaces to the immediate caller.
#[derive(Error, Debug)]
pub enum ChakraError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Snapshot source error: {0}")]
    SnapshotSource(String),

    #[error("Snapshot build error: {0}")]
    SnapshotBuild(String),

    #[error("Evaluation error for {symbol}: {reason}")]
    Evaluation { symbol: String, reason: String },

    #[error("Chain provider error: {0}")]
    Provider(String),

    #[error("Chain provider timeout after {0}s")]
    ProviderTimeout(u64),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Freeze violation: {0}")]
    FreezeViolation(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ChakraError {
    /// True when the error maps to an HTTP 409 at the transport boundary.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ChakraError::FreezeViolation(_))
    }
}
