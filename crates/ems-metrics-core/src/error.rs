//! Typed failures of the normalization layer.

use thiserror::Error;

/// Failure of a single category normalizer.
#[derive(Debug, Error)]
pub enum CategoryError {
    /// The backing collection or feed could not be read. Recoverable: the
    /// caller substitutes a zero-row table.
    #[error("source '{collection}' unavailable: {reason}")]
    SourceUnavailable { collection: String, reason: String },

    /// More than one index row matched an identifier in a one-to-one join.
    #[error("ambiguous join on protocolId '{protocol_id}': {matches} index rows")]
    AmbiguousJoin { protocol_id: String, matches: usize },
}

impl CategoryError {
    pub fn unavailable(collection: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CategoryError::SourceUnavailable {
            collection: collection.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure surfaced by the coordinator to its caller.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error(transparent)]
    Category(#[from] CategoryError),
}

impl CoordinatorError {
    /// Stable machine-readable code used by the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::UnknownCategory(_) => "unknown_category",
            CoordinatorError::Category(CategoryError::AmbiguousJoin { .. }) => "ambiguous_join",
            CoordinatorError::Category(CategoryError::SourceUnavailable { .. }) => {
                "source_unavailable"
            }
        }
    }
}
