use crate::polling::DelayPolicy;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_DELAY_MS: u64 = 250;
const DEFAULT_MAX_DELAY_MS: u64 = 2_000;

pub const ENV_MAX_ATTEMPTS: &str = "STOREFETCH_MAX_ATTEMPTS";
pub const ENV_INITIAL_DELAY_MS: &str = "STOREFETCH_INITIAL_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "STOREFETCH_MAX_DELAY_MS";
pub const ENV_METRICS_INTERVAL_SECS: &str = "STOREFETCH_METRICS_INTERVAL_SECS";

/// Settings shared by polling coordinators and the metrics reporter.
///
/// All instances must be constructed via [`CoordinatorConfig::builder`],
/// [`CoordinatorConfig::new`] or [`CoordinatorConfig::from_env`] so invariants
/// are validated before any coordinator observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    max_attempts: u32,
    delay: DelayPolicy,
    metrics_interval: Duration,
}

pub struct CoordinatorConfigParams {
    pub max_attempts: u32,
    pub delay: DelayPolicy,
    pub metrics_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: default_delay(),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    pub fn new(params: CoordinatorConfigParams) -> Result<Self> {
        let CoordinatorConfigParams {
            max_attempts,
            delay,
            metrics_interval,
        } = params;

        let config = Self {
            max_attempts,
            delay,
            metrics_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `STOREFETCH_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// Setting only `STOREFETCH_INITIAL_DELAY_MS` with `0` selects immediate
    /// retries.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(max_attempts) = env_value::<u32>(ENV_MAX_ATTEMPTS)? {
            builder = builder.max_attempts(max_attempts);
        }

        let initial = env_value::<u64>(ENV_INITIAL_DELAY_MS)?;
        let max = env_value::<u64>(ENV_MAX_DELAY_MS)?;
        match (initial, max) {
            (Some(0), None) => builder = builder.delay(DelayPolicy::Immediate),
            (None, None) => {}
            (initial, max) => {
                builder = builder.delay(DelayPolicy::Exponential {
                    initial: Duration::from_millis(initial.unwrap_or(DEFAULT_INITIAL_DELAY_MS)),
                    max: Duration::from_millis(max.unwrap_or(DEFAULT_MAX_DELAY_MS)),
                });
            }
        }

        if let Some(secs) = env_value::<u64>(ENV_METRICS_INTERVAL_SECS)? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Attempts allowed per target before the session degrades.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait inserted between unsuccessful attempts.
    pub fn delay(&self) -> DelayPolicy {
        self.delay
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        match self.delay {
            DelayPolicy::Immediate => {}
            DelayPolicy::Fixed(delay) => {
                if delay.is_zero() {
                    bail!("fixed delay must be greater than 0; use DelayPolicy::Immediate instead");
                }
            }
            DelayPolicy::Exponential { initial, max } => {
                if initial.is_zero() {
                    bail!("initial delay must be greater than 0");
                }
                if max < initial {
                    bail!(
                        "max delay ({}ms) must be at least the initial delay ({}ms)",
                        max.as_millis(),
                        initial.as_millis()
                    );
                }
            }
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CoordinatorConfigBuilder {
    max_attempts: Option<u32>,
    delay: Option<DelayPolicy>,
    metrics_interval: Option<Duration>,
}

impl CoordinatorConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn delay(mut self, delay: DelayPolicy) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<CoordinatorConfig> {
        CoordinatorConfig::new(CoordinatorConfigParams {
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            delay: self.delay.unwrap_or_else(default_delay),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        })
    }
}

fn default_delay() -> DelayPolicy {
    DelayPolicy::Exponential {
        initial: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
        max: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
    }
}

fn env_value<V>(name: &str) -> Result<Option<V>>
where
    V: FromStr,
    V::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<V>()
            .map(Some)
            .with_context(|| format!("{name} must be a non-negative integer, got {raw:?}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("{name} is not valid unicode")),
    }
}
