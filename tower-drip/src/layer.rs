use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use drip_limit::DualLimiter;
use tower::Layer;

use crate::service::AdmissionService;

/// Applies request and unit budgets to requests.
#[derive(Clone)]
pub struct AdmissionLayer<F> {
    limiter: Arc<DualLimiter>,
    cost: F,
    fail_fast: bool,
    timeout: Option<Duration>,
}

impl<F> AdmissionLayer<F> {
    /// Create an AdmissionLayer
    ///
    /// `cost` estimates how many units each request will consume.
    pub fn new(limiter: Arc<DualLimiter>, cost: F) -> Self {
        AdmissionLayer {
            limiter,
            cost,
            fail_fast: false,
            timeout: None,
        }
    }

    /// Set whether the service should fail immediately when a budget is empty.
    ///
    /// If `true`, the service will return `DripError::RateLimited` instead of
    /// waiting for tokens to refill. Tokens already sitting in the buckets
    /// are still granted, and a refused request takes none of them.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set how long a request may wait for its budget.
    ///
    /// If admission takes longer, the service will return
    /// `DripError::Timeout` and the inner service is not called.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<F> fmt::Debug for AdmissionLayer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLayer")
            .field("limiter", &self.limiter)
            .field("fail_fast", &self.fail_fast)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S, F> Layer<S> for AdmissionLayer<F>
where
    F: Clone,
{
    type Service = AdmissionService<S, F>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = AdmissionService::new(service, self.limiter.clone(), self.cost.clone())
            .with_fail_fast(self.fail_fast);
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}
