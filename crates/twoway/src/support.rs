//! Invalidation controller for a derived value.
//!
//! # Role
//!
//! [`TwoWaySupport`] caches the value produced by a [`Derivation`] and tracks
//! whether it still matches the underlying value. Non-blocking accessors read an
//! atomically published snapshot and never wait; [`TwoWaySupport::value_blocking`]
//! recomputes on demand.
//!
//! # Invariants
//!
//! - Never `Fresh` while a pending delta exists.
//! - The stale slot is only replaced by a newer successful derivation. Invalidations and
//!   failed derivations leave it alone.
//! - Deltas accumulate through [`Derivation::compose`] until the next derivation.
//! - An invalidation that lands while a derivation runs bumps the generation; the
//!   in-flight result is kept as the stale value but never published as fresh.
//!
//! # Locking
//!
//! `invalidate` and `mutate` run in the write scope of the shared [`LockCoordinator`].
//! `value_blocking` runs the derivation in a read scope behind a gate that admits one
//! derivation at a time. Bookkeeping sits behind a short internal mutex that is never
//! held across a callback.

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, trace};
use twoway_worker::{GenerationClock, GenerationToken, TaskClass, UiQueue};

use crate::config::TwoWayConfig;
use crate::derivation::{Derivation, Derived};
use crate::error::{Result, TwoWayError};
use crate::event::{ListenerId, Listeners, TwoWayEvent, TwoWayListener};
use crate::lock::LockCoordinator;
use crate::state::{DerivationState, Snapshot};
use crate::task::DerivationTask;

struct Bookkeeping<V, U> {
	/// Value the pending delta is relative to. `None` forces a derivation from scratch.
	base: Option<Arc<V>>,
	pending: Option<U>,
	computing_on: Option<ThreadId>,
}

type Events<D> = Vec<TwoWayEvent<D>>;

/// Derived-value cache with staleness tracking.
pub struct TwoWaySupport<D: Derivation> {
	name: String,
	derivation: D,
	lock: LockCoordinator,
	published: ArcSwap<Snapshot<D::Value>>,
	book: Mutex<Bookkeeping<D::Value, D::UnderlyingDelta>>,
	derive_gate: Mutex<()>,
	clock: GenerationClock,
	listeners: Listeners<D>,
	initiate_class: TaskClass,
}

impl<D: Derivation> TwoWaySupport<D> {
	/// Creates a cache in the `Invalid` state sharing `lock` with the owner of the underlying value.
	pub fn new(derivation: D, lock: LockCoordinator) -> Self {
		Self::with_config(derivation, lock, &TwoWayConfig::default())
	}

	/// Creates a cache labelled and classified by `config`.
	///
	/// The lock timeout in `config` applies to coordinators built with
	/// [`TwoWayConfig::lock_coordinator`]; an explicitly passed `lock` keeps its own.
	pub fn with_config(derivation: D, lock: LockCoordinator, config: &TwoWayConfig) -> Self {
		Self {
			name: config.name.clone(),
			derivation,
			lock,
			published: ArcSwap::from_pointee(Snapshot::initial()),
			book: Mutex::new(Bookkeeping {
				base: None,
				pending: None,
				computing_on: None,
			}),
			derive_gate: Mutex::new(()),
			clock: GenerationClock::new(),
			listeners: Listeners::new(),
			initiate_class: config.initiate_class,
		}
	}

	/// Routes listener delivery through `ui`.
	pub fn with_ui_queue(mut self, ui: UiQueue) -> Self {
		self.listeners.set_ui_queue(ui);
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn lock(&self) -> &LockCoordinator {
		&self.lock
	}

	pub fn derivation(&self) -> &D {
		&self.derivation
	}

	/// Current state. Lock-free.
	pub fn state(&self) -> DerivationState {
		self.published.load().state
	}

	/// Number of invalidations so far.
	pub fn generation(&self) -> u64 {
		self.clock.current()
	}

	/// True while the last derivation attempt failed.
	pub fn is_broken(&self) -> bool {
		self.published.load().error.is_some()
	}

	/// Failure of the last derivation attempt, if it failed.
	pub fn last_error(&self) -> Option<TwoWayError> {
		self.published.load().error.clone()
	}

	/// Returns the derived value only if it is fresh. Lock-free.
	pub fn value_non_blocking(&self) -> Option<Arc<D::Value>> {
		self.published.load().fresh_value()
	}

	/// Returns the last successfully derived value in any state. Lock-free.
	pub fn stale_value_non_blocking(&self) -> Option<Arc<D::Value>> {
		self.published.load().stale.clone()
	}

	/// Returns the fresh value, deriving it first when needed.
	///
	/// A derivation failure moves the cache to `Invalid`, keeps the stale value and
	/// returns [`TwoWayError::Derivation`] carrying the cause.
	///
	/// Listeners are notified after the cache's own scopes are released. When the
	/// caller itself holds a scope, inline listeners run while it is still held.
	pub fn value_blocking(&self) -> Result<Arc<D::Value>> {
		if let Some(value) = self.value_non_blocking() {
			return Ok(value);
		}
		let mut events = Vec::new();
		let result = self.derive_now(None, &mut events);
		self.listeners.fire(&self.name, events);
		result
	}

	/// Records that the underlying value changed by `delta`.
	///
	/// Call it in the same write scope as the mutation itself. Re-entering from a
	/// thread that already holds the write scope is fine.
	pub fn invalidate(&self, delta: D::UnderlyingDelta) -> Result<()> {
		let mut events = Vec::new();
		{
			let _write = self.lock.write_scope()?;
			self.invalidate_locked(delta, &mut events);
		}
		self.listeners.fire(&self.name, events);
		Ok(())
	}

	/// Writes an edited derived value back into the underlying value.
	///
	/// Runs [`Derivation::recreate`] against the current fresh value, applies the
	/// resulting delta, invalidates with it and derives again. On recreation
	/// failure the underlying value and the cache are left as they were.
	pub fn mutate(&self, edited: D::Value) -> Result<Arc<D::Value>> {
		let mut events = Vec::new();
		let result = self.mutate_locked(edited, &mut events);
		self.listeners.fire(&self.name, events);
		result
	}

	/// Starts a derivation on the worker runtime and returns without waiting.
	///
	/// Cancelling the returned task before it acquires the derivation gate skips
	/// the derivation; a derivation already running is not interrupted.
	pub fn initiate(self: &Arc<Self>) -> DerivationTask<D::Value> {
		let token = GenerationToken::new(self.clock.current());
		let this = Arc::clone(self);
		let task_token = token.clone();
		trace!(cache = %self.name, generation = token.generation(), "twoway.initiate");
		let handle = twoway_worker::spawn_blocking(self.initiate_class, &self.name, move || {
			if let Some(value) = this.value_non_blocking() {
				return Ok(value);
			}
			let mut events = Vec::new();
			let result = this.derive_now(Some(&task_token), &mut events);
			this.listeners.fire(&this.name, events);
			result
		});
		DerivationTask::new(token, handle)
	}

	pub fn add_listener(&self, listener: impl TwoWayListener<D>) -> ListenerId {
		self.listeners.add(Arc::new(listener))
	}

	pub fn remove_listener(&self, id: ListenerId) -> bool {
		self.listeners.remove(id)
	}

	fn publish(&self, snapshot: Snapshot<D::Value>) {
		trace!(cache = %self.name, state = %snapshot.state, "twoway.publish");
		self.published.store(Arc::new(snapshot));
	}

	fn invalidate_locked(&self, delta: D::UnderlyingDelta, events: &mut Events<D>) {
		let generation = self.clock.advance();
		let (has_base, older) = {
			let mut book = self.book.lock();
			(book.base.is_some(), book.pending.take())
		};
		if has_base {
			let merged = match older {
				Some(older) => self.derivation.compose(older, delta),
				None => delta,
			};
			self.book.lock().pending = Some(merged);
		}

		let prev = self.published.load_full();
		match prev.state {
			// Nothing derived (or last attempt failed): the next derivation starts from scratch anyway.
			DerivationState::Invalid => {}
			DerivationState::Fresh | DerivationState::Stale | DerivationState::Computing => {
				self.publish(prev.with_state(DerivationState::Stale));
				events.push(TwoWayEvent::Invalidated { old: prev.fresh.clone() });
			}
		}
		debug!(cache = %self.name, generation, from = %prev.state, accumulated = has_base, "twoway.invalidate");
	}

	fn mutate_locked(&self, edited: D::Value, events: &mut Events<D>) -> Result<Arc<D::Value>> {
		let _write = self.lock.write_scope()?;
		let old = self.derive_now(None, events)?;
		let delta = self.derivation.recreate(&old, &edited).map_err(TwoWayError::recreation)?;
		self.derivation.apply(&delta).map_err(TwoWayError::recreation)?;
		self.invalidate_locked(delta, events);
		let new = self.derive_now(None, events)?;
		debug!(cache = %self.name, generation = self.clock.current(), "twoway.recreate");
		events.push(TwoWayEvent::Recreated {
			old,
			new: Arc::clone(&new),
		});
		Ok(new)
	}

	fn derive_now(&self, token: Option<&GenerationToken>, events: &mut Events<D>) -> Result<Arc<D::Value>> {
		let me = std::thread::current().id();
		if self.book.lock().computing_on == Some(me) {
			return Err(TwoWayError::Reentrant);
		}

		let _read = self.lock.read_scope()?;
		let _gate = self.derive_gate.lock();
		if token.is_some_and(GenerationToken::is_cancelled) {
			return Err(TwoWayError::Cancelled);
		}

		let (base, pending, generation, displayed) = {
			let mut book = self.book.lock();
			let prev = self.published.load_full();
			// Another thread may have finished while this one waited on the gate.
			if let Some(value) = prev.fresh_value() {
				return Ok(value);
			}
			book.computing_on = Some(me);
			let base = book.base.clone();
			let pending = book.pending.take();
			self.publish(prev.with_state(DerivationState::Computing));
			(base, pending, self.clock.current(), prev.stale.clone())
		};

		let started = Instant::now();
		let incremental = base.is_some() && pending.is_some();
		let outcome = if incremental {
			self.derivation.derive(base.as_deref(), pending.as_ref())
		} else {
			self.derivation.derive(None, None)
		};
		let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

		let mut book = self.book.lock();
		book.computing_on = None;
		let superseded = self.clock.current() != generation;
		match outcome {
			Ok(Derived { value, delta }) => {
				let value = Arc::new(value);
				if superseded {
					// Newer deltas are relative to this result; without any, rederive from scratch.
					let has_newer = book.pending.is_some();
					book.base = has_newer.then(|| Arc::clone(&value));
					self.publish(Snapshot::superseded(Arc::clone(&value)));
				} else {
					book.base = Some(Arc::clone(&value));
					self.publish(Snapshot::fresh(Arc::clone(&value)));
				}
				drop(book);
				debug!(cache = %self.name, generation, incremental, superseded, elapsed_us, "twoway.derive");
				events.push(TwoWayEvent::Derived {
					old: displayed,
					new: Arc::clone(&value),
					delta: delta.map(Arc::new),
				});
				Ok(value)
			}
			Err(cause) => {
				book.base = None;
				book.pending = None;
				let error = TwoWayError::derivation(cause);
				let prev = self.published.load_full();
				self.publish(prev.broken(error.clone()));
				drop(book);
				debug!(cache = %self.name, generation, incremental, elapsed_us, %error, "twoway.derive_failed");
				events.push(TwoWayEvent::Broken {
					stale: prev.stale.clone(),
					error: error.clone(),
				});
				Err(error)
			}
		}
	}
}

#[cfg(test)]
mod tests;
