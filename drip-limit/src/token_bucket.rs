use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio::time::interval_at;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::trace;

use crate::AcquireError;
use crate::NoRuntime;

/// Capacity used when a bucket is created with a capacity of zero.
pub const DEFAULT_CAPACITY: usize = 10;

/// Refill interval used when a bucket is created with a zero interval.
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// A fixed-capacity pool of tokens, topped up by one token per tick.
///
/// The pool is a [`Semaphore`] pre-filled to capacity. Consumers take a
/// permit and forget it; a single background task adds one permit per
/// `refill_interval` while the pool is below capacity. Ticks that arrive
/// while the pool is full are discarded, and ticks missed because the task
/// was scheduled late are skipped rather than replayed.
///
/// [`stop`](Self::stop) closes the semaphore, which wakes every blocked
/// waiter with [`AcquireError::Stopped`], and cancels the refill task.
/// Dropping the bucket stops it.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: usize,
    refill_interval: Duration,
    pool: Arc<Pool>,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Debug)]
struct Pool {
    tokens: Semaphore,
    capacity: usize,
    // Held by everything that adds permits. Takers never lock it.
    adding: Mutex<()>,
}

impl Pool {
    /// Add up to `n` permits without going over capacity.
    fn top_up(&self, n: usize) -> usize {
        let _adding = self.adding.lock().unwrap_or_else(PoisonError::into_inner);
        // Takers only ever remove permits, so the room can only grow
        // while the lock is held.
        let room = self
            .capacity
            .saturating_sub(self.tokens.available_permits());
        let added = n.min(room);
        if added > 0 {
            self.tokens.add_permits(added);
        }
        added
    }
}

impl TokenBucket {
    /// Create a full bucket and start refilling it on the current runtime.
    ///
    /// A `capacity` of zero is replaced by [`DEFAULT_CAPACITY`] and a zero
    /// `refill_interval` by [`DEFAULT_REFILL_INTERVAL`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime. Use
    /// [`try_new`](Self::try_new) or [`with_handle`](Self::with_handle) when
    /// that cannot be guaranteed.
    pub fn new(capacity: usize, refill_interval: Duration) -> Self {
        Self::with_handle(capacity, refill_interval, &Handle::current())
    }

    /// As [`new`](Self::new), but returns [`NoRuntime`] instead of panicking
    /// when there is no runtime to refill on.
    pub fn try_new(capacity: usize, refill_interval: Duration) -> Result<Self, NoRuntime> {
        let handle = Handle::try_current().map_err(|_| NoRuntime)?;
        Ok(Self::with_handle(capacity, refill_interval, &handle))
    }

    /// Create a full bucket whose refill task runs on `handle`.
    pub fn with_handle(capacity: usize, refill_interval: Duration, handle: &Handle) -> Self {
        let capacity = match capacity {
            0 => DEFAULT_CAPACITY,
            n => n.min(Semaphore::MAX_PERMITS),
        };
        let refill_interval = if refill_interval.is_zero() {
            DEFAULT_REFILL_INTERVAL
        } else {
            refill_interval
        };

        let pool = Arc::new(Pool {
            tokens: Semaphore::new(capacity),
            capacity,
            adding: Mutex::new(()),
        });
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();

        // The first tick is one full interval away: the bucket starts full.
        let start = Instant::now() + refill_interval;
        tasks.spawn_on(
            refill(Arc::clone(&pool), start, refill_interval, shutdown.clone()),
            handle,
        );
        tasks.close();

        debug!(capacity, ?refill_interval, "token bucket started");

        Self {
            capacity,
            refill_interval,
            pool,
            stopped: AtomicBool::new(false),
            shutdown,
            tasks,
        }
    }

    /// Take one token without waiting.
    ///
    /// Returns `false` if the bucket is empty or stopped.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_many(1)
    }

    /// Take `n` tokens at once without waiting, or none at all.
    ///
    /// Returns `false`, leaving the pool untouched, if fewer than `n` tokens
    /// are available or the bucket is stopped. Asking for more than the
    /// capacity can never succeed.
    pub fn try_acquire_many(&self, n: usize) -> bool {
        if self.is_stopped() {
            return false;
        }
        if n == 0 {
            return true;
        }
        let Ok(n) = u32::try_from(n) else {
            return false;
        };
        match self.pool.tokens.try_acquire_many(n) {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Put back up to `n` tokens that were taken but not used.
    ///
    /// The pool never grows past capacity, so a refill that landed in the
    /// meantime absorbs part of the return. Does nothing once stopped.
    pub(crate) fn give_back(&self, n: usize) {
        if n == 0 || self.is_stopped() {
            return;
        }
        let returned = self.pool.top_up(n);
        trace!(requested = n, returned, "tokens given back");
    }

    /// Wait for a token with no deadline.
    ///
    /// Dropping the returned future before it completes consumes nothing.
    pub async fn acquire(&self) -> Result<(), AcquireError> {
        self.acquire_or(std::future::pending()).await
    }

    /// Wait for a token for at most `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<(), AcquireError> {
        self.acquire_until(Instant::now() + timeout).await
    }

    /// Wait for a token until `deadline`.
    pub async fn acquire_until(&self, deadline: Instant) -> Result<(), AcquireError> {
        self.acquire_or(async move {
            sleep_until(deadline).await;
            AcquireError::Timeout
        })
        .await
    }

    /// Wait for a token until `cancel` fires.
    pub async fn acquire_with(&self, cancel: &CancellationToken) -> Result<(), AcquireError> {
        self.acquire_or(async move {
            cancel.cancelled().await;
            AcquireError::Cancelled
        })
        .await
    }

    // A stopped bucket always refuses. Otherwise a token that is already
    // available is granted even if `give_up` is already complete.
    async fn acquire_or<F>(&self, give_up: F) -> Result<(), AcquireError>
    where
        F: Future<Output = AcquireError>,
    {
        if self.is_stopped() {
            return Err(AcquireError::Stopped);
        }
        if self.try_acquire() {
            return Ok(());
        }

        tokio::select! {
            biased;
            permit = self.pool.tokens.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                // Only a closed semaphore fails an acquire.
                Err(_) => Err(AcquireError::Stopped),
            },
            err = give_up => Err(err),
        }
    }

    /// Stop the bucket.
    ///
    /// Halts the refill task and wakes every waiter with
    /// [`AcquireError::Stopped`]. Safe to call any number of times, from any
    /// number of threads.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.tokens.close();
        self.shutdown.cancel();
        debug!(
            capacity = self.capacity,
            remaining = self.available(),
            "token bucket stopped"
        );
    }

    /// Stop the bucket and wait for the refill task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        self.tasks.wait().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// A snapshot of the tokens currently in the pool.
    ///
    /// The value may be stale by the time the caller looks at it.
    pub fn available(&self) -> usize {
        self.pool.tokens.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refill(pool: Arc<Pool>, start: Instant, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                pool.top_up(1);
            }
        }
    }
    trace!("refill task exited");
}
