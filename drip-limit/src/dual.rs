use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::AcquireError;
use crate::AdmitError;
use crate::Dimension;
use crate::RateConfig;
use crate::TokenBucket;

/// Two token buckets that must both admit a call.
///
/// One bucket counts calls, the other counts the units a call consumes
/// (for example language model tokens). Admission takes one request token
/// and then `cost` unit tokens, one at a time, so whichever budget is more
/// constrained sets the pace.
///
/// A refused admission consumes nothing: tokens taken before the failing
/// stage go back to their buckets, as they do when an admission future is
/// dropped part way. A waiting admission may be granted a cost larger than
/// the unit capacity once enough refills have arrived; [`try_admit`]
/// never can.
///
/// [`try_admit`]: Self::try_admit
#[derive(Debug)]
pub struct DualLimiter {
    requests: TokenBucket,
    units: TokenBucket,
}

#[derive(Clone, Copy)]
enum Wait<'a> {
    Forever,
    Until(Instant),
    Cancel(&'a CancellationToken),
}

impl Wait<'_> {
    async fn acquire(self, bucket: &TokenBucket) -> Result<(), AcquireError> {
        match self {
            Self::Forever => bucket.acquire().await,
            Self::Until(deadline) => bucket.acquire_until(deadline).await,
            Self::Cancel(cancel) => bucket.acquire_with(cancel).await,
        }
    }
}

impl DualLimiter {
    pub fn new(requests: TokenBucket, units: TokenBucket) -> Self {
        Self { requests, units }
    }

    /// Build both buckets from per-minute budgets on the current runtime.
    ///
    /// Each bucket holds a full minute of budget and refills at an even
    /// pace across the minute.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn from_config(config: &RateConfig) -> Self {
        let config = config.normalized();
        Self::new(
            TokenBucket::new(config.requests_per_minute, config.request_interval()),
            TokenBucket::new(config.units_per_minute, config.unit_interval()),
        )
    }

    /// Wait, without a deadline, until one request and `cost` units are granted.
    pub async fn admit(&self, cost: usize) -> Result<(), AdmitError> {
        self.admit_by(cost, Wait::Forever).await
    }

    /// As [`admit`](Self::admit), giving up once `timeout` has passed.
    ///
    /// The deadline covers the whole admission, not each unit.
    pub async fn admit_timeout(&self, cost: usize, timeout: Duration) -> Result<(), AdmitError> {
        self.admit_by(cost, Wait::Until(Instant::now() + timeout)).await
    }

    /// As [`admit`](Self::admit), giving up when `cancel` fires.
    pub async fn admit_with(
        &self,
        cost: usize,
        cancel: &CancellationToken,
    ) -> Result<(), AdmitError> {
        self.admit_by(cost, Wait::Cancel(cancel)).await
    }

    /// Admit without waiting, taking everything or nothing.
    ///
    /// On refusal both buckets are left as they were and the exhausted
    /// budget is returned. A stopped limiter refuses every call.
    pub fn try_admit(&self, cost: usize) -> Result<(), Dimension> {
        if !self.units.try_acquire_many(cost) {
            debug!(dimension = %Dimension::Units, cost, "admission refused");
            return Err(Dimension::Units);
        }
        if !self.requests.try_acquire() {
            self.units.give_back(cost);
            debug!(dimension = %Dimension::Requests, cost, "admission refused");
            return Err(Dimension::Requests);
        }
        Ok(())
    }

    async fn admit_by(&self, cost: usize, wait: Wait<'_>) -> Result<(), AdmitError> {
        let mut held = Held {
            limiter: self,
            requests: 0,
            units: 0,
        };

        wait.acquire(&self.requests)
            .await
            .map_err(|source| reject(Dimension::Requests, cost, source))?;
        held.requests = 1;

        for _ in 0..cost {
            wait.acquire(&self.units)
                .await
                .map_err(|source| reject(Dimension::Units, cost, source))?;
            held.units += 1;
        }

        held.keep();
        Ok(())
    }

    /// Stop both buckets. Idempotent.
    pub fn stop(&self) {
        self.requests.stop();
        self.units.stop();
    }

    /// Stop both buckets and wait for their refill tasks to exit.
    pub async fn shutdown(&self) {
        self.requests.shutdown().await;
        self.units.shutdown().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.requests.is_stopped() || self.units.is_stopped()
    }

    pub fn available_requests(&self) -> usize {
        self.requests.available()
    }

    pub fn available_units(&self) -> usize {
        self.units.available()
    }

    pub fn requests(&self) -> &TokenBucket {
        &self.requests
    }

    pub fn units(&self) -> &TokenBucket {
        &self.units
    }
}

// Tokens taken by an admission still in progress. Dropped without `keep`,
// they go back to their buckets.
struct Held<'a> {
    limiter: &'a DualLimiter,
    requests: usize,
    units: usize,
}

impl Held<'_> {
    fn keep(mut self) {
        self.requests = 0;
        self.units = 0;
    }
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.limiter.requests.give_back(self.requests);
        self.limiter.units.give_back(self.units);
    }
}

fn reject(dimension: Dimension, cost: usize, source: AcquireError) -> AdmitError {
    debug!(%dimension, cost, error = %source, "admission refused");
    AdmitError { dimension, source }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use more_asserts::assert_ge;
    use more_asserts::assert_lt;
    use tokio::time::sleep;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn the_tighter_dimension_governs() {
        let config = RateConfig::default()
            .with_requests_per_minute(10)
            .with_units_per_minute(1000);
        let limiter = DualLimiter::from_config(&config);

        for _ in 0..10 {
            limiter
                .admit_timeout(50, Duration::ZERO)
                .await
                .expect("both budgets have headroom");
        }

        let err = limiter
            .admit_timeout(50, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.dimension, Dimension::Requests);
        assert_eq!(err.source, AcquireError::Timeout);

        // Room for ten more calls on the unit budget was left untouched.
        assert_eq!(limiter.available_requests(), 0);
        assert_eq!(limiter.available_units(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn units_can_exhaust_first() {
        let limiter = DualLimiter::new(
            TokenBucket::new(100, Duration::from_secs(1)),
            TokenBucket::new(100, Duration::from_secs(1)),
        );

        limiter.admit(60).await.unwrap();
        let err = limiter
            .admit_timeout(60, Duration::from_millis(10))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AdmitError {
                dimension: Dimension::Units,
                source: AcquireError::Timeout,
            }
        );
        // The refused call handed back its request token and the forty
        // units it had collected.
        assert_eq!(limiter.available_requests(), 99);
        assert_eq!(limiter.available_units(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_waits_for_unit_refills() {
        let limiter = DualLimiter::new(
            TokenBucket::new(10, Duration::from_secs(1)),
            TokenBucket::new(4, Duration::from_millis(100)),
        );

        let start = Instant::now();
        limiter.admit(6).await.unwrap();

        // Four units up front, two more from refills.
        assert_ge!(start.elapsed(), Duration::from_millis(200));
        assert_lt!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn try_admit_reports_exhaustion() {
        let limiter = DualLimiter::new(
            TokenBucket::new(2, Duration::from_secs(60)),
            TokenBucket::new(10, Duration::from_secs(60)),
        );

        assert_eq!(limiter.try_admit(5), Ok(()));
        assert_eq!(limiter.try_admit(5), Ok(()));
        assert_eq!(limiter.try_admit(1), Err(Dimension::Units));
        assert_eq!(limiter.available_requests(), 0);
        assert_eq!(limiter.available_units(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_try_admit_leaves_both_budgets_untouched() {
        let limiter = DualLimiter::new(
            TokenBucket::new(10, Duration::from_secs(60)),
            TokenBucket::new(30, Duration::from_secs(60)),
        );

        // More units than the bucket holds: refused every time, for free.
        for _ in 0..10 {
            assert_eq!(limiter.try_admit(50), Err(Dimension::Units));
        }
        assert_eq!(limiter.available_requests(), 10);
        assert_eq!(limiter.available_units(), 30);
        assert_eq!(limiter.try_admit(1), Ok(()));

        // Out of request tokens: the units taken first are handed back.
        let limiter = DualLimiter::new(
            TokenBucket::new(1, Duration::from_secs(60)),
            TokenBucket::new(30, Duration::from_secs(60)),
        );
        assert_eq!(limiter.try_admit(10), Ok(()));
        assert_eq!(limiter.try_admit(10), Err(Dimension::Requests));
        assert_eq!(limiter.available_requests(), 0);
        assert_eq!(limiter.available_units(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_admission_hands_its_tokens_back() {
        let limiter = DualLimiter::new(
            TokenBucket::new(5, Duration::from_secs(60)),
            TokenBucket::new(3, Duration::from_secs(60)),
        );

        {
            let mut pending = std::pin::pin!(limiter.admit(5));
            assert!(futures::poll!(&mut pending).is_pending());
            assert_eq!(limiter.available_requests(), 4);
            assert_eq!(limiter.available_units(), 0);
        }

        assert_eq!(limiter.available_requests(), 5);
        assert_eq!(limiter.available_units(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_admission() {
        let limiter = DualLimiter::new(
            TokenBucket::new(1, Duration::from_secs(60)),
            TokenBucket::new(1, Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        limiter.admit_with(1, &cancel).await.unwrap();
        let err = limiter.admit_with(1, &cancel).await.unwrap_err();

        assert_eq!(err.dimension, Dimension::Requests);
        assert_eq!(err.source, AcquireError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_fails_a_pending_admission() {
        let limiter = Arc::new(DualLimiter::new(
            TokenBucket::new(5, Duration::from_secs(60)),
            TokenBucket::new(1, Duration::from_secs(3600)),
        ));

        let pending = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.admit(3).await })
        };

        sleep(Duration::from_millis(10)).await;
        limiter.stop();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.dimension, Dimension::Units);
        assert!(err.is_stopped());
        assert!(limiter.is_stopped());

        let err = limiter.admit(1).await.unwrap_err();
        assert_eq!(err.dimension, Dimension::Requests);
        assert!(limiter.try_admit(0).is_err());

        limiter.shutdown().await;
    }
}
