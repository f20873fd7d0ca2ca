//! Error types for the two-way cache.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error returned by [`Derivation`](crate::Derivation) callbacks.
pub type DeriveError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared, cloneable form of a callback error, kept in the cache and in events.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Which side of the lock coordinator an acquisition was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
	Read,
	Write,
}

impl std::fmt::Display for LockMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Read => "read",
			Self::Write => "write",
		})
	}
}

/// Errors surfaced by [`TwoWaySupport`](crate::TwoWaySupport) and [`LockCoordinator`](crate::LockCoordinator).
#[derive(Debug, Clone, Error)]
pub enum TwoWayError {
	/// The underlying value could not be derived. Displays as the cause itself.
	#[error("{0}")]
	Derivation(#[source] SharedError),

	/// An edited derived value could not be turned back into an underlying delta.
	#[error("recreation failed: {0}")]
	Recreation(#[source] SharedError),

	/// Lock acquisition exceeded the configured timeout.
	#[error("timed out after {waited:?} waiting for the {mode} lock")]
	LockTimeout {
		/// Side of the lock that was requested.
		mode: LockMode,
		/// Time spent waiting before giving up.
		waited: Duration,
	},

	/// The current thread holds a read scope and asked for the write scope.
	#[error("cannot acquire the write lock while holding only a read lock")]
	LockUpgrade,

	/// A derivation callback asked for the value it is currently computing.
	#[error("blocking read re-entered from inside its own derivation")]
	Reentrant,

	/// A background derivation was cancelled before it ran.
	#[error("derivation task was cancelled")]
	Cancelled,

	/// A background derivation task panicked or was aborted by the runtime.
	#[error("derivation task failed: {0}")]
	Task(String),
}

impl TwoWayError {
	pub(crate) fn derivation(cause: DeriveError) -> Self {
		Self::Derivation(Arc::from(cause))
	}

	pub(crate) fn recreation(cause: DeriveError) -> Self {
		Self::Recreation(Arc::from(cause))
	}

	/// Returns the callback error behind a derivation or recreation failure.
	pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
		match self {
			Self::Derivation(cause) | Self::Recreation(cause) => Some(cause.as_ref()),
			_ => None,
		}
	}

	pub fn is_derivation(&self) -> bool {
		matches!(self, Self::Derivation(_))
	}

	/// Lock timeouts and upgrade attempts are programming errors, not transient states.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::LockTimeout { .. } | Self::LockUpgrade | Self::Reentrant)
	}
}

/// Result type for two-way cache operations.
pub type Result<T> = std::result::Result<T, TwoWayError>;
