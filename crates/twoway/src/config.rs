//! Cache configuration, loadable from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use twoway_worker::TaskClass;

use crate::LockCoordinator;

/// Errors that can occur when loading a [`TwoWayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The document is not valid TOML or has unknown/mistyped keys.
	#[error("invalid twoway config: {0}")]
	Toml(#[from] toml::de::Error),

	/// A zero timeout would fail every contended acquisition immediately.
	#[error("lock_timeout_ms must be greater than zero (omit it to wait forever)")]
	ZeroLockTimeout,
}

/// Settings for one cache instance.
///
/// ```toml
/// name = "outline"
/// lock_timeout_ms = 2000
/// initiate_class = "cpu_blocking"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TwoWayConfig {
	/// Label attached to every trace event of the cache.
	pub name: String,
	/// Lock acquisition timeout. `None` waits forever.
	pub lock_timeout_ms: Option<u64>,
	/// Task class for derivations started with `initiate`.
	pub initiate_class: TaskClass,
}

impl Default for TwoWayConfig {
	fn default() -> Self {
		Self {
			name: "twoway".to_string(),
			lock_timeout_ms: None,
			initiate_class: TaskClass::CpuBlocking,
		}
	}
}

impl TwoWayConfig {
	/// Parses and validates a TOML document. Missing keys take their defaults.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.lock_timeout_ms == Some(0) {
			return Err(ConfigError::ZeroLockTimeout);
		}
		Ok(())
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}

	pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.lock_timeout_ms = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX).max(1));
		self
	}

	pub fn lock_timeout(&self) -> Option<Duration> {
		self.lock_timeout_ms.map(Duration::from_millis)
	}

	/// Builds a fresh lock coordinator honoring the configured timeout.
	pub fn lock_coordinator(&self) -> LockCoordinator {
		LockCoordinator::with_timeout(self.lock_timeout())
	}
}
