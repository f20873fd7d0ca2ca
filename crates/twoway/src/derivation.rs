use crate::error::DeriveError;

/// Output of one derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derived<V, DD> {
	/// The freshly derived value.
	pub value: V,
	/// How `value` differs from the previous derived value, when there was one.
	pub delta: Option<DD>,
}

impl<V, DD> Derived<V, DD> {
	pub fn new(value: V) -> Self {
		Self { value, delta: None }
	}

	pub fn with_delta(value: V, delta: DD) -> Self {
		Self { value, delta: Some(delta) }
	}
}

/// Derivation and recreation hooks supplied by the owner of the underlying value.
///
/// The cache calls [`derive`](Self::derive) under a read scope of its lock
/// coordinator, and [`compose`](Self::compose), [`recreate`](Self::recreate) and
/// [`apply`](Self::apply) under the write scope, so implementations may read and
/// write the underlying value without further synchronization against the cache.
pub trait Derivation: Send + Sync + 'static {
	/// The derived projection (e.g. a token list).
	type Value: Send + Sync + 'static;
	/// Description of a change to the underlying value.
	type UnderlyingDelta: Send + Sync + 'static;
	/// Description of a change to the derived value, reported to listeners.
	type DerivedDelta: Send + Sync + 'static;

	/// Computes the derived value.
	///
	/// `old` and `delta` are either both present (incremental: `delta` is every
	/// change since `old` was derived) or both absent (derive from scratch). Both
	/// paths must produce equal values for the same underlying value.
	fn derive(&self, old: Option<&Self::Value>, delta: Option<&Self::UnderlyingDelta>) -> Result<Derived<Self::Value, Self::DerivedDelta>, DeriveError>;

	/// Merges two pending deltas, `older` first.
	fn compose(&self, older: Self::UnderlyingDelta, newer: Self::UnderlyingDelta) -> Self::UnderlyingDelta;

	/// Computes the underlying delta that turns `old` into `edited`. Must not modify the underlying value.
	fn recreate(&self, old: &Self::Value, edited: &Self::Value) -> Result<Self::UnderlyingDelta, DeriveError>;

	/// Writes a recreated delta into the underlying value. Either applies fully or fails without changes.
	fn apply(&self, delta: &Self::UnderlyingDelta) -> Result<(), DeriveError>;
}
