use std::time::Duration;

/// Requests per minute used when none is configured.
pub const DEFAULT_REQUESTS_PER_MINUTE: usize = 60;

/// Units per minute used when none is configured.
pub const DEFAULT_UNITS_PER_MINUTE: usize = 90_000;

const MINUTE: Duration = Duration::from_secs(60);

/// Per-minute budgets for a [`DualLimiter`](crate::DualLimiter).
///
/// A value of zero means "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RateConfig {
    pub requests_per_minute: usize,
    pub units_per_minute: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            units_per_minute: DEFAULT_UNITS_PER_MINUTE,
        }
    }
}

impl RateConfig {
    pub fn with_requests_per_minute(mut self, requests_per_minute: usize) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    pub fn with_units_per_minute(mut self, units_per_minute: usize) -> Self {
        self.units_per_minute = units_per_minute;
        self
    }

    /// Replace zero budgets with their defaults.
    pub fn normalized(self) -> Self {
        Self {
            requests_per_minute: non_zero_or(self.requests_per_minute, DEFAULT_REQUESTS_PER_MINUTE),
            units_per_minute: non_zero_or(self.units_per_minute, DEFAULT_UNITS_PER_MINUTE),
        }
    }

    /// Time between request token refills.
    pub fn request_interval(&self) -> Duration {
        per_minute(self.normalized().requests_per_minute)
    }

    /// Time between unit token refills.
    pub fn unit_interval(&self) -> Duration {
        per_minute(self.normalized().units_per_minute)
    }
}

fn non_zero_or(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}

fn per_minute(count: usize) -> Duration {
    // A budget above one per nanosecond still needs a non-zero tick.
    let nanos = MINUTE.as_nanos() / count as u128;
    Duration::from_nanos(nanos.max(1) as u64)
}
