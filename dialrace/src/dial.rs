//! Dial capability and per-request options.

use std::time::Duration;

use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

use crate::error::ConfigError;

/// Transport routine that opens one connection to one address.
///
/// Implementations must watch `cancel` and fail promptly once it fires.
#[async_trait]
pub trait Dial<A: Sync + ?Sized>: Send + Sync {
    type Connection: Send;
    type Error: Send;

    async fn dial(
        &self,
        address: &A,
        cancel: CancellationToken,
    ) -> Result<Self::Connection, Self::Error>;
}

const ATTEMPT_TIMEOUT_ENV: &str = "DIALRACE_ATTEMPT_TIMEOUT";
const MAX_PARALLEL_ENV: &str = "DIALRACE_MAX_PARALLEL";

/// Options for one dial request.
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// External cancellation signal. Firing it aborts the whole request.
    pub cancel: CancellationToken,
    /// Upper bound on a single attempt. `None` leaves it to the dialer.
    pub attempt_timeout: Option<Duration>,
    /// Upper bound on permits borrowed for the request.
    pub max_parallel: Option<usize>,
}

impl DialOptions {
    /// Options with a fresh cancellation token, no timeout and no cap.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            attempt_timeout: None,
            max_parallel: None,
        }
    }

    /// Read `DIALRACE_ATTEMPT_TIMEOUT` (seconds) and `DIALRACE_MAX_PARALLEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut options = Self::new();

        if let Some(raw) = lookup(ATTEMPT_TIMEOUT_ENV) {
            let secs = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s > 0.0)
                .ok_or_else(|| ConfigError {
                    name: ATTEMPT_TIMEOUT_ENV,
                    value: raw.clone(),
                })?;
            options.attempt_timeout = Some(Duration::from_secs_f64(secs));
        }

        if let Some(raw) = lookup(MAX_PARALLEL_ENV) {
            let max = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError {
                    name: MAX_PARALLEL_ENV,
                    value: raw.clone(),
                })?;
            options.max_parallel = Some(max);
        }

        Ok(options)
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max);
        self
    }

    /// Permits to ask the allocator for, given the number of addresses.
    pub(crate) fn permit_budget(&self, addresses: usize) -> usize {
        match self.max_parallel {
            Some(max) => addresses.min(max),
            None => addresses,
        }
    }
}

impl Default for DialOptions {
    fn default() -> Self {
        Self::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring dial configuration from environment");
            Self::new()
        })
    }
}
