//! Manager configuration and its environment overrides.
//!
//! | Variable                 | Field                | Unit         |
//! |--------------------------|----------------------|--------------|
//! | `TEE_MAX_QUANTUM_MS`     | `max_quantum`        | milliseconds |
//! | `TEE_POOL_VACANCY_LIMIT` | `pool_vacancy_limit` | slots        |
//! | `TEE_MAX_INLINE_DEPTH`   | `max_inline_depth`   | resumptions  |
//! | `TEE_PIN_CORE`           | `pin.core_id`        | core index   |

use std::str::FromStr;
use std::time::Duration;

use crate::affinity::PinConfig;
use crate::error::ConfigError;

/// Environment variable overriding [`ManagerConfig::max_quantum`].
pub const ENV_MAX_QUANTUM_MS: &str = "TEE_MAX_QUANTUM_MS";
/// Environment variable overriding [`ManagerConfig::pool_vacancy_limit`].
pub const ENV_POOL_VACANCY_LIMIT: &str = "TEE_POOL_VACANCY_LIMIT";
/// Environment variable overriding [`ManagerConfig::max_inline_depth`].
pub const ENV_MAX_INLINE_DEPTH: &str = "TEE_MAX_INLINE_DEPTH";
/// Environment variable pinning the manager thread to a core.
pub const ENV_PIN_CORE: &str = "TEE_PIN_CORE";

/// Tunables of one [`Manager`](crate::Manager).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Longest single park in [`drive`](crate::Manager::drive) when no clock is
    /// armed earlier.
    pub max_quantum: Duration,
    /// Vacant awaiter slots tolerated before the pool trims its tail.
    pub pool_vacancy_limit: usize,
    /// Nesting limit for inline resumption. Deeper resumptions are queued and
    /// run on the next iteration.
    pub max_inline_depth: usize,
    /// Pin the manager thread on construction.
    pub pin: Option<PinConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_quantum: Duration::from_millis(400),
            pool_vacancy_limit: 1000,
            max_inline_depth: 32,
            pin: None,
        }
    }
}

impl ManagerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`; unset keys leave fields alone.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(ms) = parse::<u64>(&lookup, ENV_MAX_QUANTUM_MS)? {
            self.max_quantum = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, ENV_POOL_VACANCY_LIMIT)? {
            self.pool_vacancy_limit = v;
        }
        if let Some(v) = parse(&lookup, ENV_MAX_INLINE_DEPTH)? {
            self.max_inline_depth = v;
        }
        if let Some(core) = parse(&lookup, ENV_PIN_CORE)? {
            self.pin.get_or_insert_with(PinConfig::default).core_id = Some(core);
        }
        Ok(())
    }

    /// Set [`max_quantum`](Self::max_quantum).
    #[must_use]
    pub fn max_quantum(mut self, d: Duration) -> Self {
        self.max_quantum = d;
        self
    }

    /// Set [`pool_vacancy_limit`](Self::pool_vacancy_limit).
    #[must_use]
    pub fn pool_vacancy_limit(mut self, n: usize) -> Self {
        self.pool_vacancy_limit = n;
        self
    }

    /// Set [`max_inline_depth`](Self::max_inline_depth).
    #[must_use]
    pub fn max_inline_depth(mut self, n: usize) -> Self {
        self.max_inline_depth = n;
        self
    }

    /// Set [`pin`](Self::pin).
    #[must_use]
    pub fn pin(mut self, pin: PinConfig) -> Self {
        self.pin = Some(pin);
        self
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        })
}
