//! Classified errors for screening service calls.

use thiserror::Error;

/// Failure of a single screening service call.
///
/// Callers branch on [`CallError::is_transient`]: transient failures are
/// worth retrying, permanent ones are not. An HTTP 4xx cannot succeed on a
/// second attempt, so it is classified permanent.
#[derive(Debug, Error)]
pub enum CallError {
    /// The request exceeded the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure (DNS, TLS, refused, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success HTTP status.
    #[error("service returned HTTP {code}: {message}")]
    Status { code: u16, message: String },

    /// The response body could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// All retry attempts were used up; wraps the last observed error.
    #[error("max retries reached after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<CallError>,
    },
}

impl CallError {
    pub fn retries_exhausted(attempts: u32, last: CallError) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { code, .. } => *code >= 500,
            Self::InvalidResponse(_) => false,
            Self::RetriesExhausted { .. } => false,
        }
    }

    /// The HTTP status observed on the failing call, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::RetriesExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Status {
                code: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return Self::InvalidResponse(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let err = CallError::Status {
            code: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());

        let err = CallError::Status {
            code: 400,
            message: "bad request".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn exhaustion_reports_inner_status_code() {
        let inner = CallError::Status {
            code: 502,
            message: "bad gateway".into(),
        };
        let err = CallError::retries_exhausted(3, inner);
        assert_eq!(err.status_code(), Some(502));
        assert!(err.to_string().contains("max retries reached"));
    }
}
