use std::sync::Arc;

use crate::error::TwoWayError;

/// Lifecycle state of the derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivationState {
	/// No usable derivation: never derived, or the last derivation failed.
	Invalid,
	/// The derived value matches the underlying value.
	Fresh,
	/// A derived value exists but changes are pending.
	Stale,
	/// A blocking derivation is running.
	Computing,
}

impl DerivationState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Invalid => "invalid",
			Self::Fresh => "fresh",
			Self::Stale => "stale",
			Self::Computing => "computing",
		}
	}
}

impl std::fmt::Display for DerivationState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Immutable view published to lock-free readers.
///
/// `fresh` is set only in [`DerivationState::Fresh`]. `stale` is the last
/// successfully derived value and survives invalidations and failures.
#[derive(Debug)]
pub(crate) struct Snapshot<V> {
	pub(crate) state: DerivationState,
	pub(crate) fresh: Option<Arc<V>>,
	pub(crate) stale: Option<Arc<V>>,
	pub(crate) error: Option<TwoWayError>,
}

impl<V> Snapshot<V> {
	pub(crate) fn initial() -> Self {
		Self {
			state: DerivationState::Invalid,
			fresh: None,
			stale: None,
			error: None,
		}
	}

	/// Same stale slot and error, new state, no fresh value.
	pub(crate) fn with_state(&self, state: DerivationState) -> Self {
		Self {
			state,
			fresh: None,
			stale: self.stale.clone(),
			error: self.error.clone(),
		}
	}

	pub(crate) fn fresh(value: Arc<V>) -> Self {
		Self {
			state: DerivationState::Fresh,
			fresh: Some(Arc::clone(&value)),
			stale: Some(value),
			error: None,
		}
	}

	/// A result that was superseded while computing: displayable, not fresh.
	pub(crate) fn superseded(value: Arc<V>) -> Self {
		Self {
			state: DerivationState::Stale,
			fresh: None,
			stale: Some(value),
			error: None,
		}
	}

	pub(crate) fn broken(&self, error: TwoWayError) -> Self {
		Self {
			state: DerivationState::Invalid,
			fresh: None,
			stale: self.stale.clone(),
			error: Some(error),
		}
	}

	pub(crate) fn fresh_value(&self) -> Option<Arc<V>> {
		match self.state {
			DerivationState::Fresh => self.fresh.clone(),
			_ => None,
		}
	}
}
