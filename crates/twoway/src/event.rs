//! Change notifications for two-way caches.
//!
//! Events are collected while the cache holds its scopes and delivered only
//! after the cache has released them, so a listener may freely call back into the
//! cache. Scopes held by the caller are not released: an `invalidate` or `mutate`
//! issued inside the caller's write scope delivers inline while that scope is
//! still held, so such listeners run with the underlying value locked.
//!
//! With a [`UiQueue`] attached, delivery is posted to the queue thread instead
//! (always posted, also from the queue thread, to keep event order). A queue
//! listener that takes the write scope then waits for the caller to release it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use twoway_worker::UiQueue;

use crate::derivation::Derivation;
use crate::error::TwoWayError;

/// Something observable happened to the derived value.
pub enum TwoWayEvent<D: Derivation> {
	/// A derivation succeeded.
	Derived {
		/// The value displayed before (the stale slot), if any.
		old: Option<Arc<D::Value>>,
		new: Arc<D::Value>,
		delta: Option<Arc<D::DerivedDelta>>,
	},
	/// The underlying value changed; `old` was fresh until now.
	Invalidated { old: Option<Arc<D::Value>> },
	/// An edited derived value was written back into the underlying value.
	Recreated { old: Arc<D::Value>, new: Arc<D::Value> },
	/// A derivation failed; `stale` is what remains displayable.
	Broken { stale: Option<Arc<D::Value>>, error: TwoWayError },
}

/// Discriminant of a [`TwoWayEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TwoWayEventKind {
	Derived,
	Invalidated,
	Recreated,
	Broken,
}

impl<D: Derivation> TwoWayEvent<D> {
	pub fn kind(&self) -> TwoWayEventKind {
		match self {
			Self::Derived { .. } => TwoWayEventKind::Derived,
			Self::Invalidated { .. } => TwoWayEventKind::Invalidated,
			Self::Recreated { .. } => TwoWayEventKind::Recreated,
			Self::Broken { .. } => TwoWayEventKind::Broken,
		}
	}
}

impl<D: Derivation> Clone for TwoWayEvent<D> {
	fn clone(&self) -> Self {
		match self {
			Self::Derived { old, new, delta } => Self::Derived {
				old: old.clone(),
				new: Arc::clone(new),
				delta: delta.clone(),
			},
			Self::Invalidated { old } => Self::Invalidated { old: old.clone() },
			Self::Recreated { old, new } => Self::Recreated {
				old: Arc::clone(old),
				new: Arc::clone(new),
			},
			Self::Broken { stale, error } => Self::Broken {
				stale: stale.clone(),
				error: error.clone(),
			},
		}
	}
}

impl<D: Derivation> std::fmt::Debug for TwoWayEvent<D> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Broken { error, .. } => f.debug_struct("Broken").field("error", error).finish_non_exhaustive(),
			other => write!(f, "{:?}", other.kind()),
		}
	}
}

/// Receives [`TwoWayEvent`]s. Implemented for matching closures.
pub trait TwoWayListener<D: Derivation>: Send + Sync + 'static {
	fn on_event(&self, event: &TwoWayEvent<D>);
}

impl<D, F> TwoWayListener<D> for F
where
	D: Derivation,
	F: Fn(&TwoWayEvent<D>) + Send + Sync + 'static,
{
	fn on_event(&self, event: &TwoWayEvent<D>) {
		self(event)
	}
}

/// Handle returned by `add_listener`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerList<D> = Vec<(ListenerId, Arc<dyn TwoWayListener<D>>)>;

pub(crate) struct Listeners<D: Derivation> {
	list: RwLock<ListenerList<D>>,
	next_id: AtomicU64,
	ui: Option<UiQueue>,
}

impl<D: Derivation> Listeners<D> {
	pub(crate) fn new() -> Self {
		Self {
			list: RwLock::new(Vec::new()),
			next_id: AtomicU64::new(0),
			ui: None,
		}
	}

	pub(crate) fn set_ui_queue(&mut self, ui: UiQueue) {
		self.ui = Some(ui);
	}

	pub(crate) fn add(&self, listener: Arc<dyn TwoWayListener<D>>) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.list.write().push((id, listener));
		id
	}

	pub(crate) fn remove(&self, id: ListenerId) -> bool {
		let mut list = self.list.write();
		let before = list.len();
		list.retain(|(existing, _)| *existing != id);
		list.len() != before
	}

	/// Delivers `events` in order to every listener registered at call time.
	pub(crate) fn fire(&self, cache: &str, events: Vec<TwoWayEvent<D>>) {
		if events.is_empty() {
			return;
		}
		let targets: Vec<_> = self.list.read().iter().map(|(_, l)| Arc::clone(l)).collect();
		if targets.is_empty() {
			return;
		}
		match &self.ui {
			Some(ui) => {
				if ui.post(move || deliver(&targets, &events)).is_err() {
					tracing::warn!(cache, "twoway.events_dropped");
				}
			}
			None => deliver(&targets, &events),
		}
	}
}

fn deliver<D: Derivation>(targets: &[Arc<dyn TwoWayListener<D>>], events: &[TwoWayEvent<D>]) {
	for event in events {
		for listener in targets {
			listener.on_event(event);
		}
	}
}
