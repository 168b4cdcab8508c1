use thiserror::Error;

/// Core error type shared across rowforge crates.
#[derive(Debug, Error)]
pub enum Error {
    /// A value cannot be represented as a field value.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// A value has the wrong shape for the requested conversion.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Convenience alias for results returned by rowforge crates.
pub type Result<T> = std::result::Result<T, Error>;
