//! Filter configuration.
//!
//! Defaults reproduce the classic constants: eight insertion attempts half a
//! second apart, an immediate re-enumeration during teardown and a one
//! second quiesce poll.
//!
//! With the `serde` feature enabled, [`FilterConfig`] can be read from and
//! written to JSON:
//!
//! ```toml
//! [dependencies]
//! stackfilter = { version = "0.1", features = ["serde"] }
//! ```

use std::time::Duration;

use crate::FilterError;

/// Tunables of a [`StackFilter`](crate::StackFilter).
///
/// # Example
///
/// ```rust
/// use stackfilter::FilterConfig;
/// use std::time::Duration;
///
/// let config = FilterConfig::default()
///     .with_name("VolumeSpy")
///     .with_attach_retry_delay(Duration::from_millis(50));
/// assert_eq!(config.attach_attempts, 8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FilterConfig {
    /// Driver identity registered with the host.
    pub name: String,
    /// Chain-insertion attempts per target before giving up.
    pub attach_attempts: u32,
    /// Delay after each failed insertion attempt.
    pub attach_retry_delay: Duration,
    /// Delay between teardown enumeration passes.
    pub teardown_interval: Duration,
    /// Upper bound on one wait for in-flight completions before re-checking.
    pub quiesce_poll_interval: Duration,
    /// Subscribe to resource-class activation notifications on load.
    pub watch_resource_classes: bool,
    /// Log the file name of every open passing through.
    pub log_opens: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            name: "StackFilter".to_string(),
            attach_attempts: 8,
            attach_retry_delay: Duration::from_millis(500),
            teardown_interval: Duration::ZERO,
            quiesce_poll_interval: Duration::from_secs(1),
            watch_resource_classes: true,
            log_opens: true,
        }
    }
}

impl FilterConfig {
    /// Set the driver identity.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of insertion attempts.
    pub fn with_attach_attempts(mut self, attempts: u32) -> Self {
        self.attach_attempts = attempts;
        self
    }

    /// Set the delay after a failed insertion attempt.
    pub fn with_attach_retry_delay(mut self, delay: Duration) -> Self {
        self.attach_retry_delay = delay;
        self
    }

    /// Set the delay between teardown passes.
    pub fn with_teardown_interval(mut self, interval: Duration) -> Self {
        self.teardown_interval = interval;
        self
    }

    /// Set the quiesce poll interval.
    pub fn with_quiesce_poll_interval(mut self, interval: Duration) -> Self {
        self.quiesce_poll_interval = interval;
        self
    }

    /// Enable or disable resource-class notifications.
    pub fn with_watch_resource_classes(mut self, watch: bool) -> Self {
        self.watch_resource_classes = watch;
        self
    }

    /// Enable or disable open logging.
    pub fn with_log_opens(mut self, log_opens: bool) -> Self {
        self.log_opens = log_opens;
        self
    }

    /// Check the configuration for values the filter cannot run with.
    ///
    /// # Errors
    ///
    /// - [`FilterError::Config`] for an empty name or zero insertion attempts
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.name.trim().is_empty() {
            return Err(FilterError::Config("name must not be empty".into()));
        }
        if self.attach_attempts == 0 {
            return Err(FilterError::Config(
                "attach_attempts must be at least 1".into(),
            ));
        }
        if self.quiesce_poll_interval.is_zero() {
            return Err(FilterError::Config(
                "quiesce_poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// - [`FilterError::Config`] if the JSON is malformed or fails validation
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, FilterError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FilterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// - [`FilterError::Config`] if serialization fails
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, FilterError> {
        serde_json::to_string_pretty(self).map_err(|e| FilterError::Config(e.to_string()))
    }
}
