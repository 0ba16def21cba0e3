//! Error types for flow-table queries.

use thiserror::Error;

/// Errors surfaced by flow-table dumps.
#[derive(Debug, Clone, Error)]
pub enum FlowQueryError {
    /// The bridge could not be queried.
    #[error("flow dump failed: {0}")]
    DumpFailed(String),
}
