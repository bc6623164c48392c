use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower::layer::util::Stack;

use drip_limit::DualLimiter;

use crate::AdmissionLayer;

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Wait up to `timeout` for both budgets before calling the inner service
    fn throttle<F>(
        self,
        limiter: Arc<DualLimiter>,
        cost: F,
        timeout: Duration,
    ) -> ServiceBuilder<Stack<AdmissionLayer<F>, L>>;

    /// Refuse immediately when either budget is empty
    fn shed_over_budget<F>(
        self,
        limiter: Arc<DualLimiter>,
        cost: F,
    ) -> ServiceBuilder<Stack<AdmissionLayer<F>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn throttle<F>(
        self,
        limiter: Arc<DualLimiter>,
        cost: F,
        timeout: Duration,
    ) -> ServiceBuilder<Stack<AdmissionLayer<F>, L>> {
        self.layer(AdmissionLayer::new(limiter, cost).with_timeout(timeout))
    }

    fn shed_over_budget<F>(
        self,
        limiter: Arc<DualLimiter>,
        cost: F,
    ) -> ServiceBuilder<Stack<AdmissionLayer<F>, L>> {
        self.layer(AdmissionLayer::new(limiter, cost).with_fail_fast(true))
    }
}
