//! Single-consumer task queue standing in for a UI thread.
//!
//! Work is handed to the queue explicitly with [`UiQueue::post`] or
//! [`UiQueue::invoke_and_wait`]; nothing ever checks "am I on the UI thread"
//! and silently reschedules itself. Tasks run one at a time, in submission order,
//! on a dedicated named OS thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{TaskClass, spawn_named_thread};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum UiMsg {
	Run(Job),
	Shutdown,
}

/// Failure handing work to the UI queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UiQueueError {
	/// The queue thread has exited.
	#[error("ui queue is shut down")]
	Closed,
	/// The task was dropped before producing a result (it panicked, or the queue shut down first).
	#[error("ui task was dropped before completing")]
	Dropped,
}

struct UiQueueInner {
	name: String,
	tx: mpsc::UnboundedSender<UiMsg>,
	thread_id: ThreadId,
	join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running UI queue. Clones share the same consumer thread.
#[derive(Clone)]
pub struct UiQueue {
	inner: Arc<UiQueueInner>,
}

impl std::fmt::Debug for UiQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UiQueue").field("name", &self.inner.name).field("thread_id", &self.inner.thread_id).finish()
	}
}

impl UiQueue {
	/// Starts the consumer thread.
	pub fn start(name: impl Into<String>) -> std::io::Result<Self> {
		let name = name.into();
		let (tx, mut rx) = mpsc::unbounded_channel::<UiMsg>();
		let thread_name = name.clone();
		let join = spawn_named_thread(TaskClass::Interactive, name.clone(), move || {
			while let Some(msg) = rx.blocking_recv() {
				match msg {
					UiMsg::Run(job) => {
						if catch_unwind(AssertUnwindSafe(job)).is_err() {
							tracing::warn!(queue = %thread_name, "ui.task_panicked");
						}
					}
					UiMsg::Shutdown => break,
				}
			}
			tracing::debug!(queue = %thread_name, "ui.stopped");
		})?;
		let thread_id = join.thread().id();
		Ok(Self {
			inner: Arc::new(UiQueueInner {
				name,
				tx,
				thread_id,
				join: Mutex::new(Some(join)),
			}),
		})
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Returns true when called from the queue's own thread.
	pub fn is_current(&self) -> bool {
		std::thread::current().id() == self.inner.thread_id
	}

	/// Enqueues `f` to run on the UI thread and returns immediately.
	pub fn post<F>(&self, f: F) -> Result<(), UiQueueError>
	where
		F: FnOnce() + Send + 'static,
	{
		self.inner.tx.send(UiMsg::Run(Box::new(f))).map_err(|_| UiQueueError::Closed)
	}

	/// Runs `f` on the UI thread and blocks until it returns.
	///
	/// Called from the UI thread itself, `f` runs inline. Must not be called
	/// from inside an async task.
	pub fn invoke_and_wait<F, R>(&self, f: F) -> Result<R, UiQueueError>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		if self.is_current() {
			return Ok(f());
		}
		let (done_tx, done_rx) = oneshot::channel();
		self.post(move || {
			let _ = done_tx.send(f());
		})?;
		done_rx.blocking_recv().map_err(|_| UiQueueError::Dropped)
	}

	/// Stops the consumer after the tasks already queued have run.
	///
	/// Joins the thread unless called from the UI thread itself.
	pub fn shutdown(&self) {
		let _ = self.inner.tx.send(UiMsg::Shutdown);
		if self.is_current() {
			return;
		}
		let join = match self.inner.join.lock() {
			Ok(mut guard) => guard.take(),
			Err(_) => None,
		};
		if let Some(join) = join {
			let _ = join.join();
		}
	}
}
