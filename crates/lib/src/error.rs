//! Error taxonomy for backend calls.

use reqwest::StatusCode;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Access token rejected; the transport may refresh once.
    Unauthorized,
    /// Connection failure or a non-auth error status. Never retried.
    NetworkFailure,
    /// Input rejected before dispatch.
    ValidationFailure,
    /// An in-flight chat stream broke before its final event.
    StreamError,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("api error: {status} {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("chat stream failed: {0}")]
    Stream(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::Network(_) | ApiError::Status { .. } | ApiError::Decode(_) => {
                ErrorKind::NetworkFailure
            }
            ApiError::Validation(_) => ErrorKind::ValidationFailure,
            ApiError::Stream(_) => ErrorKind::StreamError,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Map a non-success response to an error, reading the body for context.
    pub(crate) async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            ApiError::Unauthorized(body)
        } else {
            ApiError::Status { status, body }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(ApiError::Unauthorized(String::new()).kind(), ErrorKind::Unauthorized);
        assert_eq!(
            ApiError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: String::new()
            }
            .kind(),
            ErrorKind::NetworkFailure
        );
        assert_eq!(ApiError::Validation("x".into()).kind(), ErrorKind::ValidationFailure);
        assert_eq!(ApiError::Stream("x".into()).kind(), ErrorKind::StreamError);
    }

    #[test]
    fn unauthorized_reports_401() {
        assert_eq!(
            ApiError::Unauthorized(String::new()).status(),
            Some(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(ApiError::Validation("x".into()).status(), None);
    }
}
