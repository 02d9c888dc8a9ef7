use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes surfaced across the loader boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    Success,
    /// The instantiation does not satisfy its generic declaration.
    Generic,
    /// A template is malformed.
    Program,
    Circular,
    /// An import could not be resolved against its target's export table.
    Link,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::Generic => "GENERIC",
            ErrorCode::Program => "PROGRAM",
            ErrorCode::Circular => "CIRCULAR",
            ErrorCode::Link => "LINK",
            ErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoaderError {
    #[error("generic constraint failed: {0}")]
    Generic(String),
    #[error("invalid program: {0}")]
    Program(String),
    #[error("circular reference: {0}")]
    Circular(String),
    #[error("link failure: {0}")]
    Link(String),
    #[error("loading limit exceeded ({limit} objects staged)")]
    LoadingLimit { limit: usize },
    #[error("{0}")]
    Unknown(String),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    pub fn program(msg: impl Into<String>) -> Self {
        Self::Program(msg.into())
    }

    pub fn circular(msg: impl Into<String>) -> Self {
        Self::Circular(msg.into())
    }

    pub fn link(msg: impl Into<String>) -> Self {
        Self::Link(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            LoaderError::Generic(_) => ErrorCode::Generic,
            LoaderError::Program(_) | LoaderError::LoadingLimit { .. } => ErrorCode::Program,
            LoaderError::Circular(_) => ErrorCode::Circular,
            LoaderError::Link(_) => ErrorCode::Link,
            LoaderError::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// Failures that best-effort (`TRY`) evaluation may turn into a failed value.
    pub fn is_soft(&self) -> bool {
        matches!(self, LoaderError::Generic(_) | LoaderError::Link(_))
    }

    pub fn code_of<T>(result: &LoaderResult<T>) -> ErrorCode {
        match result {
            Ok(_) => ErrorCode::Success,
            Err(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(LoaderError::generic("x").code(), ErrorCode::Generic);
        assert_eq!(
            LoaderError::LoadingLimit { limit: 4 }.code(),
            ErrorCode::Program
        );
        assert_eq!(LoaderError::code_of(&Ok::<_, LoaderError>(())), ErrorCode::Success);
        assert!(LoaderError::link("x").is_soft());
        assert!(!LoaderError::circular("x").is_soft());
    }
}
