use drip_limit::AcquireError;
use drip_limit::AdmitError;
use drip_limit::Dimension;

/// Errors produced by the admission middleware.
///
/// Errors from the inner service are passed through untouched; only a
/// refused admission produces a `DripError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DripError {
    /// The request waited for its budget longer than the configured timeout.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out waiting for {dimension} budget")]
    Timeout {
        /// The budget the request was still waiting on.
        dimension: Dimension,
    },

    /// The budget was exhausted and the service is configured to fail fast.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`.
    #[error("Rate limit exceeded on {dimension} budget")]
    RateLimited { dimension: Dimension },

    /// The limiter has been stopped and will not admit anything again.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Rate limiter stopped")]
    Stopped,
}

impl DripError {
    pub(crate) fn from_admit(err: AdmitError) -> Self {
        match err.source {
            AcquireError::Stopped => Self::Stopped,
            AcquireError::Timeout | AcquireError::Cancelled => Self::Timeout {
                dimension: err.dimension,
            },
        }
    }

    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Stopped => "stopped",
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for DripError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}
