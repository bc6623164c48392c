//! # Tower Drip
//!
//! `tower-drip` puts a [`drip_limit::DualLimiter`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service, so that calls to a
//! metered backend are held back until both the request budget and the unit
//! budget allow them.
//!
//! ## How a call is admitted
//! 1. **Estimate**: a caller-supplied cost function turns the request into a
//!    number of units before anything else happens.
//! 2. **Admit**: one request token and then `cost` unit tokens are taken from
//!    the shared limiter, waiting for refills if needed.
//! 3. **Call**: only an admitted request reaches the inner service. A refused
//!    one fails with [`DripError`] and the inner service never sees it.
//!
//! Waiting can be bounded with [`AdmissionLayer::with_timeout`], or skipped
//! entirely with [`AdmissionLayer::with_fail_fast`].
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`DripError`], allowing automatic conversion
//!   to HTTP status codes (408, 429, 503).

mod error;
mod layer;
mod service;
mod utils;


pub use drip_limit::Dimension;
pub use error::DripError;
pub use layer::AdmissionLayer;
pub use service::AdmissionService;
pub use utils::ServiceBuilderExt;
