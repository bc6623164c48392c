use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tower::BoxError;
use tower::Service;
use tracing::trace;

use drip_limit::DualLimiter;

use crate::error::DripError;

#[derive(Clone, Debug)]
struct AdmissionServiceMetrics {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
}

/// Gates every call to the inner service on a [`DualLimiter`].
///
/// `cost` estimates the units a request will consume before it runs. The
/// inner service is only called once one request token and `cost` unit
/// tokens have been granted.
pub struct AdmissionService<S, F> {
    inner: S,
    limiter: Arc<DualLimiter>,
    cost: F,
    fail_fast: bool,
    timeout: Option<Duration>,
    instruments: AdmissionServiceMetrics,
}

impl<S, F> Clone for AdmissionService<S, F>
where
    S: Clone,
    F: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            cost: self.cost.clone(),
            fail_fast: self.fail_fast,
            timeout: self.timeout,
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, F> fmt::Debug for AdmissionService<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionService")
            .field("limiter", &self.limiter)
            .field("fail_fast", &self.fail_fast)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S, F, Req> Service<Req> for AdmissionService<S, F>
where
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    F: Fn(&Req) -> usize,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.limiter.is_stopped() {
            return Poll::Ready(Err(Box::new(DripError::Stopped)));
        }
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let cost = (self.cost)(&req);

        // The clone may not be ready; keep it and use the one that is.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let limiter = Arc::clone(&self.limiter);
        let fail_fast = self.fail_fast;
        let timeout = self.timeout;
        let instruments = self.instruments.clone();

        Box::pin(async move {
            let admitted = if fail_fast {
                limiter.try_admit(cost).map_err(|dimension| {
                    if limiter.is_stopped() {
                        DripError::Stopped
                    } else {
                        DripError::RateLimited { dimension }
                    }
                })
            } else {
                match timeout {
                    Some(timeout) => limiter.admit_timeout(cost, timeout).await,
                    None => limiter.admit(cost).await,
                }
                .map_err(DripError::from_admit)
            };

            if let Err(err) = admitted {
                instruments
                    .rejected
                    .add(1, &[KeyValue::new("reason", err.reason())]);
                return Err(Box::new(err) as BoxError);
            }

            trace!(cost, "request admitted");
            instruments.admitted.add(1, &[]);
            inner.call(req).await
        })
    }
}

impl<S, F> AdmissionService<S, F> {
    pub fn new(inner: S, limiter: Arc<DualLimiter>, cost: F) -> Self {
        let meter = global::meter("admission_service");
        let instruments = AdmissionServiceMetrics {
            admitted: meter.u64_counter("admitted").build(),
            rejected: meter.u64_counter("rejected").build(),
        };

        Self {
            inner,
            limiter,
            cost,
            fail_fast: false,
            timeout: None,
            instruments,
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
