//! # drip-limit
//!
//! `drip-limit` provides a self-refilling token bucket for throttling calls to
//! a metered resource, and a two-dimensional limiter built from a pair of them.
//!
//! ## Core Philosophy
//!
//! The pool of tokens is a [`tokio::sync::Semaphore`]. Taking a token is a
//! lock-free permit acquisition, waiting for one is an ordinary async wait, and
//! stopping the bucket closes the semaphore, which releases every waiter at
//! once. A single background task drips one token back in per interval.
//!
//! ## Key Concepts
//!
//! * **Starts Full**: a new bucket holds `capacity` tokens.
//! * **No Catch-up**: one token per tick, capped at capacity; missed ticks are
//!   skipped, never replayed as a burst.
//! * **Exhaustion Is Not An Error**: [`TokenBucket::try_acquire`] answers with a
//!   `bool`. Only the waiting forms return [`AcquireError`], and
//!   [`AcquireError::Stopped`] tells "this limiter is gone" apart from the
//!   caller's own timeout or cancellation.
//! * **Both Budgets Must Agree**: [`DualLimiter`] takes one request token and
//!   then one unit token per unit of cost.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use drip_limit::DualLimiter;
//! use drip_limit::RateConfig;
//! use drip_limit::TokenBucket;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bucket = TokenBucket::new(3, Duration::from_millis(100));
//!
//! if bucket.try_acquire() {
//!     // Request allowed
//! }
//! bucket.acquire_timeout(Duration::from_secs(1)).await.unwrap();
//! bucket.stop();
//!
//! let config = RateConfig::default()
//!     .with_requests_per_minute(10)
//!     .with_units_per_minute(1000);
//! let limiter = DualLimiter::from_config(&config);
//! limiter.admit(50).await.unwrap();
//! # }
//! ```

mod config;
mod dual;
mod error;
mod token_bucket;

pub use config::DEFAULT_REQUESTS_PER_MINUTE;
pub use config::DEFAULT_UNITS_PER_MINUTE;
pub use config::RateConfig;
pub use dual::DualLimiter;
pub use error::AcquireError;
pub use error::AdmitError;
pub use error::Dimension;
pub use error::NoRuntime;
pub use token_bucket::DEFAULT_CAPACITY;
pub use token_bucket::DEFAULT_REFILL_INTERVAL;
pub use token_bucket::TokenBucket;

pub use tokio_util::sync::CancellationToken;
