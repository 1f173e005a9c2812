//! Lookup tuning parameters.
//!
//! [`LookupConfig`] can be built in code, taken from [`Default`], or loaded
//! from a JSON file in which every field is optional:
//!
//! ```json
//! { "k": 20, "alpha": 3, "request_timeout_ms": 5000, "worker_growth": 4 }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Default bucket size and result width.
pub const K_DEFAULT: usize = 20;
/// Default parallelism for concurrent lookups.
pub const ALPHA_DEFAULT: usize = 3;
/// Default time a lookup waits on a single peer before treating it as unresponsive.
pub const REQUEST_TIMEOUT_MS_DEFAULT: u64 = 5_000;
/// Default factor by which the worker pool may grow beyond `alpha` under backlog.
pub const WORKER_GROWTH_DEFAULT: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Number of closest contacts a lookup returns; also the routing bucket size.
    pub k: usize,
    /// Queries allowed in flight at once.
    pub alpha: usize,
    /// Per-request timeout, in milliseconds. Also bounds each round's wait.
    pub request_timeout_ms: u64,
    /// The worker pool may grow to `alpha * worker_growth` while queries queue up.
    pub worker_growth: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            k: K_DEFAULT,
            alpha: ALPHA_DEFAULT,
            request_timeout_ms: REQUEST_TIMEOUT_MS_DEFAULT,
            worker_growth: WORKER_GROWTH_DEFAULT,
        }
    }
}

impl LookupConfig {
    pub fn new(k: usize, alpha: usize, request_timeout: Duration) -> Self {
        Self {
            k,
            alpha,
            request_timeout_ms: u64::try_from(request_timeout.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Upper bound on concurrently running queries.
    pub fn max_workers(&self) -> usize {
        self.alpha.saturating_mul(self.worker_growth).max(self.alpha)
    }

    /// Reject settings a lookup cannot make progress with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.k >= 1, "k must be at least 1 (got {})", self.k);
        ensure!(self.alpha >= 1, "alpha must be at least 1 (got {})", self.alpha);
        ensure!(
            self.request_timeout_ms > 0,
            "request_timeout_ms must be positive"
        );
        ensure!(
            self.worker_growth >= 1,
            "worker_growth must be at least 1 (got {})",
            self.worker_growth
        );
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("malformed lookup config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}
