//! Engine configuration.

use std::time::Duration;

use tracing::warn;

use fundhub_core::Currency;

use crate::retry::RetryPolicy;

/// Tunables shared by every engine component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on waiting for one ordered batch of entity locks.
    pub lock_timeout: Duration,
    /// Internal retry of transient failures before they are surfaced.
    pub retry: RetryPolicy,
    /// Credit limit (minor units) for CREDIT_CARD/LOAN accounts opened without one.
    pub default_credit_limit: i64,
    /// Alert threshold for budgets created without one.
    pub budget_warning_percent: u8,
    pub default_currency: Currency,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            default_credit_limit: 500_000,
            budget_warning_percent: 80,
            default_currency: Currency::USD,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FUNDHUB_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(ms) = env_parse::<u64>("FUNDHUB_LOCK_TIMEOUT_MS") {
            cfg.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("FUNDHUB_RETRY_MAX_ATTEMPTS") {
            cfg.retry.max_attempts = n;
        }
        if let Some(limit) = env_parse::<i64>("FUNDHUB_DEFAULT_CREDIT_LIMIT") {
            if limit >= 0 {
                cfg.default_credit_limit = limit;
            } else {
                warn!(limit, "negative default credit limit ignored");
            }
        }
        if let Some(pct) = env_parse::<u8>("FUNDHUB_BUDGET_WARNING_PERCENT") {
            if (1..=100).contains(&pct) {
                cfg.budget_warning_percent = pct;
            } else {
                warn!(pct, "budget warning percent out of range ignored");
            }
        }
        if let Some(currency) = env_parse::<Currency>("FUNDHUB_DEFAULT_CURRENCY") {
            cfg.default_currency = currency;
        }

        cfg
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_credit_limit(mut self, limit: i64) -> Self {
        self.default_credit_limit = limit;
        self
    }

    pub fn with_budget_warning_percent(mut self, pct: u8) -> Self {
        self.budget_warning_percent = pct;
        self
    }
}
