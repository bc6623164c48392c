use std::fmt;

/// Reasons a blocking acquisition can fail.
///
/// Running out of tokens is not an error: [`TokenBucket::try_acquire`]
/// reports it as `false` and the blocking forms simply wait.
///
/// [`TokenBucket::try_acquire`]: crate::TokenBucket::try_acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// The bucket has been stopped. It will never grant another token.
    #[error("rate limiter stopped")]
    Stopped,

    /// The caller's deadline passed before a token was granted.
    #[error("deadline elapsed while waiting for a token")]
    Timeout,

    /// The caller's cancellation token fired before a token was granted.
    #[error("cancelled while waiting for a token")]
    Cancelled,
}

impl AcquireError {
    /// `true` if the limiter gave up for good, `false` if the caller did.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Which budget of a [`DualLimiter`](crate::DualLimiter) refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Requests,
    Units,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Units => "units",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed multi-dimensional admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{dimension} rate limit exceeded: {source}")]
pub struct AdmitError {
    pub dimension: Dimension,
    #[source]
    pub source: AcquireError,
}

impl AdmitError {
    pub fn is_stopped(&self) -> bool {
        self.source.is_stopped()
    }
}

/// A bucket was built with no tokio runtime around to run its refill task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token bucket needs a tokio runtime to refill on")]
pub struct NoRuntime;
