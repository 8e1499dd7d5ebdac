//! Failure modes of an outbound call.

use std::time::Duration;

use paperscout_shared::PaperScoutError;

/// Statuses worth another attempt.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("{label}: timed out after {after:?}")]
    Timeout { label: String, after: Duration },

    #[error("{label}: connection failed: {message}")]
    Connect { label: String, message: String },

    #[error("{label}: HTTP {status}")]
    Status { label: String, status: u16 },

    #[error("{label}: response exceeds {limit} bytes")]
    TooLarge { label: String, limit: u64 },

    #[error("{label}: could not decode response: {message}")]
    Decode { label: String, message: String },

    #[error("{label}: invalid request: {message}")]
    Build { label: String, message: String },

    #[error("request limiter closed")]
    LimiterClosed,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<HttpError> },
}

impl HttpError {
    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } => true,
            Self::Status { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// HTTP status of the final failure, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(label: &str, timeout: Duration, err: reqwest::Error) -> Self {
        let label = label.to_string();
        if err.is_timeout() {
            Self::Timeout {
                label,
                after: timeout,
            }
        } else if err.is_builder() {
            Self::Build {
                label,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Decode {
                label,
                message: err.to_string(),
            }
        } else {
            Self::Connect {
                label,
                message: err.to_string(),
            }
        }
    }
}

impl From<HttpError> for PaperScoutError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Decode { .. } => PaperScoutError::parse(err.to_string()),
            other => PaperScoutError::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_transient_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 501] {
            assert!(!is_transient_status(status), "{status}");
        }

        let timeout = HttpError::Timeout {
            label: "x".into(),
            after: Duration::from_secs(1),
        };
        assert!(timeout.is_transient());

        let exhausted = HttpError::Exhausted {
            attempts: 3,
            last: Box::new(HttpError::Status {
                label: "x".into(),
                status: 503,
            }),
        };
        assert!(!exhausted.is_transient());
        assert_eq!(exhausted.status(), Some(503));
    }

    #[test]
    fn converts_into_domain_error() {
        let err: PaperScoutError = HttpError::Decode {
            label: "openalex search".into(),
            message: "expected value".into(),
        }
        .into();
        assert!(matches!(err, PaperScoutError::Parse { .. }));

        let err: PaperScoutError = HttpError::Status {
            label: "crossref".into(),
            status: 404,
        }
        .into();
        assert!(err.to_string().contains("HTTP 404"));
    }
}
