//! Configuration for loaders.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::timing::{Buffer, Capped, TimingPolicy, Window};

/// Window used when no policy is configured
pub const DEFAULT_DELAY: Duration = Duration::from_millis(10);

/// Built-in timing policies selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Fire `delay` after the first query
    Window,
    /// Fire `delay` after the latest query
    Buffer,
    /// Like buffer, but never later than `max_wait` after the first query
    Capped,
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "window" | "fixed" => Ok(Self::Window),
            "buffer" | "sliding" | "debounce" => Ok(Self::Buffer),
            "capped" => Ok(Self::Capped),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Window => write!(f, "window"),
            PolicyKind::Buffer => write!(f, "buffer"),
            PolicyKind::Capped => write!(f, "capped"),
        }
    }
}

/// Configuration for a loader
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Label for logs and observer events
    pub name: Option<String>,

    /// Which timing policy to build
    pub policy: PolicyKind,

    /// Window length (window) or quiet period (buffer, capped)
    pub delay: Duration,

    /// Upper bound on a batch's wait, used by the capped policy only
    pub max_wait: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            name: None,
            policy: PolicyKind::Window,
            delay: DEFAULT_DELAY,
            max_wait: Duration::from_millis(50),
        }
    }
}

impl LoaderConfig {
    /// Create config optimized for low latency (small batches, short waits)
    pub fn low_latency() -> Self {
        Self {
            name: None,
            policy: PolicyKind::Window,
            delay: Duration::from_millis(1),
            max_wait: Duration::from_millis(5),
        }
    }

    /// Create config optimized for fewer, larger batches under bursty load
    pub fn high_throughput() -> Self {
        Self {
            name: None,
            policy: PolicyKind::Capped,
            delay: Duration::from_millis(10),
            max_wait: Duration::from_millis(100),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COALESCE_NAME") {
            if !val.is_empty() {
                config.name = Some(val);
            }
        }

        if let Ok(val) = std::env::var("COALESCE_POLICY") {
            if let Ok(kind) = val.parse() {
                config.policy = kind;
            }
        }

        if let Ok(val) = std::env::var("COALESCE_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.delay = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("COALESCE_MAX_WAIT_MS") {
            if let Ok(n) = val.parse() {
                config.max_wait = Duration::from_millis(n);
            }
        }

        config
    }

    /// Check the fields make sense for the chosen policy
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy == PolicyKind::Capped && self.max_wait < self.delay {
            return Err(ConfigError::invalid(
                "max_wait",
                format!(
                    "{}ms is shorter than delay {}ms",
                    self.max_wait.as_millis(),
                    self.delay.as_millis()
                ),
            ));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("name", "must not be blank"));
            }
        }
        Ok(())
    }

    /// Build the timing policy described by this config
    pub fn timing_policy(&self) -> Arc<dyn TimingPolicy> {
        match self.policy {
            PolicyKind::Window => Arc::new(Window(self.delay)),
            PolicyKind::Buffer => Arc::new(Buffer(self.delay)),
            PolicyKind::Capped => Arc::new(Capped::new(self.delay, self.max_wait)),
        }
    }
}
