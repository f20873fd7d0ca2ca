//! Reader/writer lock coordinator gating mutation and derivation.
//!
//! # Invariants
//!
//! - At most one thread holds the write scope; while it does, no other thread holds a read scope.
//! - The write holder may re-enter `write` and may enter `read`.
//! - A read holder may re-enter `read` even when writers are queued.
//! - A thread holding only a read scope never upgrades: `write` fails with
//!   [`TwoWayError::LockUpgrade`] instead of deadlocking.
//! - Queued writers block new readers (threads not already reading).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{LockMode, Result, TwoWayError};

#[derive(Debug, Default)]
struct LockState {
	writer: Option<ThreadId>,
	write_depth: usize,
	readers: HashMap<ThreadId, usize>,
	writers_waiting: usize,
}

#[derive(Debug)]
struct LockInner {
	state: Mutex<LockState>,
	cond: Condvar,
	timeout: Option<Duration>,
}

/// Shared reader/writer lock. Clones refer to the same lock.
///
/// The owner of the underlying value and the cache built on it hold clones of
/// one coordinator so that a mutation and its invalidation happen under a
/// single write scope.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
	inner: Arc<LockInner>,
}

impl Default for LockCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

/// Read scope; released on drop. Bound to the acquiring thread.
#[must_use = "the read scope is released as soon as the guard is dropped"]
pub struct ReadScope<'a> {
	lock: &'a LockCoordinator,
	_not_send: PhantomData<*const ()>,
}

/// Write scope; released on drop. Bound to the acquiring thread.
#[must_use = "the write scope is released as soon as the guard is dropped"]
pub struct WriteScope<'a> {
	lock: &'a LockCoordinator,
	_not_send: PhantomData<*const ()>,
}

impl LockCoordinator {
	/// Creates a coordinator that waits indefinitely.
	pub fn new() -> Self {
		Self::with_timeout(None)
	}

	pub fn with_timeout(timeout: Option<Duration>) -> Self {
		Self {
			inner: Arc::new(LockInner {
				state: Mutex::new(LockState::default()),
				cond: Condvar::new(),
				timeout,
			}),
		}
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.inner.timeout
	}

	/// Runs `f` inside a read scope.
	pub fn read<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
		let _scope = self.read_scope()?;
		Ok(f())
	}

	/// Runs `f` inside the write scope.
	pub fn write<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
		let _scope = self.write_scope()?;
		Ok(f())
	}

	pub fn read_scope(&self) -> Result<ReadScope<'_>> {
		let me = std::thread::current().id();
		let started = Instant::now();
		let deadline = self.inner.timeout.map(|t| started + t);
		let mut state = self.inner.state.lock();
		loop {
			let reentrant = state.writer == Some(me) || state.readers.contains_key(&me);
			if reentrant || (state.writer.is_none() && state.writers_waiting == 0) {
				*state.readers.entry(me).or_insert(0) += 1;
				return Ok(ReadScope {
					lock: self,
					_not_send: PhantomData,
				});
			}
			self.wait(&mut state, deadline, started, LockMode::Read)?;
		}
	}

	pub fn write_scope(&self) -> Result<WriteScope<'_>> {
		let me = std::thread::current().id();
		let started = Instant::now();
		let deadline = self.inner.timeout.map(|t| started + t);
		let mut state = self.inner.state.lock();
		if state.writer == Some(me) {
			state.write_depth += 1;
			return Ok(WriteScope {
				lock: self,
				_not_send: PhantomData,
			});
		}
		if state.readers.contains_key(&me) {
			return Err(TwoWayError::LockUpgrade);
		}

		state.writers_waiting += 1;
		loop {
			if state.writer.is_none() && state.readers.is_empty() {
				state.writers_waiting -= 1;
				state.writer = Some(me);
				state.write_depth = 1;
				return Ok(WriteScope {
					lock: self,
					_not_send: PhantomData,
				});
			}
			if let Err(err) = self.wait(&mut state, deadline, started, LockMode::Write) {
				state.writers_waiting -= 1;
				// Readers parked behind this writer may proceed now.
				self.inner.cond.notify_all();
				return Err(err);
			}
		}
	}

	/// Returns true if the current thread holds the write scope.
	pub fn is_write_held(&self) -> bool {
		self.inner.state.lock().writer == Some(std::thread::current().id())
	}

	/// Returns true if the current thread holds a read scope.
	pub fn is_read_held(&self) -> bool {
		self.inner.state.lock().readers.contains_key(&std::thread::current().id())
	}

	fn wait(&self, state: &mut MutexGuard<'_, LockState>, deadline: Option<Instant>, started: Instant, mode: LockMode) -> Result<()> {
		match deadline {
			None => {
				self.inner.cond.wait(state);
				Ok(())
			}
			Some(deadline) if Instant::now() >= deadline => {
				tracing::warn!(%mode, waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX), "twoway.lock_timeout");
				Err(TwoWayError::LockTimeout {
					mode,
					waited: started.elapsed(),
				})
			}
			Some(deadline) => {
				// Spurious or timed-out wakeups fall through to the caller's recheck.
				let _ = self.inner.cond.wait_until(state, deadline);
				Ok(())
			}
		}
	}

	fn release_read(&self) {
		let me = std::thread::current().id();
		let mut state = self.inner.state.lock();
		if let Some(depth) = state.readers.get_mut(&me) {
			*depth -= 1;
			if *depth == 0 {
				state.readers.remove(&me);
			}
		}
		drop(state);
		self.inner.cond.notify_all();
	}

	fn release_write(&self) {
		let mut state = self.inner.state.lock();
		state.write_depth = state.write_depth.saturating_sub(1);
		if state.write_depth == 0 {
			state.writer = None;
		}
		drop(state);
		self.inner.cond.notify_all();
	}
}

impl Drop for ReadScope<'_> {
	fn drop(&mut self) {
		self.lock.release_read();
	}
}

impl Drop for WriteScope<'_> {
	fn drop(&mut self) {
		self.lock.release_write();
	}
}
