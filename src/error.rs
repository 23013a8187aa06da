//! Error types for the stage file proxy

use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors raised while configuring or running the proxy
///
/// Fetch failures are not part of this enum: they are reported through
/// [`FetchError`] and always end in a `Failed` outcome instead of an `Err`.
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::IoError(err.to_string())
    }
}

/// Reasons a single fetch-and-materialize attempt can fail
///
/// The type is `Clone` because one attempt's result is handed to every
/// request that was waiting on the same relative path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Origin unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Origin returned HTTP {status}")]
    UpstreamError { status: u16 },

    #[error("Incomplete download: expected {expected} bytes, received {received}")]
    IncompleteDownload { expected: u64, received: u64 },

    #[error("Failed to write local file: {0}")]
    LocalWriteError(String),
}

impl FetchError {
    /// Short label used in log fields and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NetworkUnreachable(_) => "network_unreachable",
            FetchError::UpstreamError { .. } => "upstream_error",
            FetchError::IncompleteDownload { .. } => "incomplete_download",
            FetchError::LocalWriteError(_) => "local_write_error",
        }
    }

    /// Status code reported by the origin, if the failure came from one
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            FetchError::UpstreamError { status } => Some(*status),
            _ => None,
        }
    }

    /// Classify a reqwest transport error
    ///
    /// Timeouts, connect failures and body read errors all mean the origin
    /// could not deliver the file, so they share one reason.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::NetworkUnreachable(format!("request timed out: {}", err))
        } else if err.is_connect() {
            FetchError::NetworkUnreachable(format!("connection failed: {}", err))
        } else {
            FetchError::NetworkUnreachable(err.to_string())
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::LocalWriteError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            FetchError::NetworkUnreachable("x".into()).kind(),
            "network_unreachable"
        );
        assert_eq!(FetchError::UpstreamError { status: 500 }.kind(), "upstream_error");
        assert_eq!(
            FetchError::IncompleteDownload { expected: 10, received: 4 }.kind(),
            "incomplete_download"
        );
        assert_eq!(
            FetchError::LocalWriteError("disk full".into()).kind(),
            "local_write_error"
        );
    }

    #[test]
    fn test_upstream_status() {
        assert_eq!(FetchError::UpstreamError { status: 404 }.upstream_status(), Some(404));
        assert_eq!(FetchError::NetworkUnreachable("x".into()).upstream_status(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: FetchError = io.into();
        assert!(matches!(err, FetchError::LocalWriteError(_)));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ProxyError = io.into();
        assert!(matches!(err, ProxyError::IoError(_)));
    }

    #[test]
    fn test_display() {
        let err = FetchError::UpstreamError { status: 503 };
        assert_eq!(err.to_string(), "Origin returned HTTP 503");
    }
}
