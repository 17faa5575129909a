// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed errors for the chunking/merge core and the service layer.

use thiserror::Error;

/// Errors raised by the pure chunking and merge routines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A caller-supplied parameter is outside its domain (e.g. `max_size == 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Input data has the wrong shape (empty, count or dimension mismatch).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors surfaced by request handlers that talk to external services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A referenced resource (document, folder, posting, index entry) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A backing service failed or could not be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The request is malformed or a prerequisite step has not been completed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServiceError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Wraps a backend failure, keeping the full context chain in the message.
    pub fn unavailable(err: anyhow::Error) -> Self {
        Self::Unavailable(format!("{:#}", err))
    }

    /// HTTP status code used by the web front end.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Unavailable(_) => 503,
            Self::InvalidRequest(_) | Self::Core(_) => 400,
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ServiceError::not_found("doc").status_code(), 404);
        assert_eq!(ServiceError::invalid("tag").status_code(), 400);
        assert_eq!(
            ServiceError::unavailable(anyhow::anyhow!("boom")).status_code(),
            503
        );
        let core: ServiceError = CoreError::InvalidInput("empty".into()).into();
        assert_eq!(core.status_code(), 400);
    }

    #[test]
    fn unavailable_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("Failed to query warehouse");
        let msg = ServiceError::unavailable(err).to_string();
        assert!(msg.contains("Failed to query warehouse"));
        assert!(msg.contains("connection refused"));
    }
}
