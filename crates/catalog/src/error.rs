//! Catalog error types

use thiserror::Error;

/// Errors produced when mapping raw driver values or names onto catalog types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Integer value has no counterpart in the closed enum
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: i32 },

    /// Name has no counterpart in the closed enum
    #[error("Unknown {kind} name: '{name}'")]
    UnknownName { kind: &'static str, name: String },
}

/// Type alias for catalog results
pub type Result<T> = std::result::Result<T, CatalogError>;
