use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::Span;

use crate::TaskClass;

/// Handle of the ambient Tokio runtime, or of a lazily built fallback runtime when
/// the caller is a plain OS thread (UI queue, test thread, embedding application).
pub(crate) fn runtime_handle() -> Handle {
	if let Ok(handle) = Handle::try_current() {
		return handle;
	}

	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK
		.get_or_init(|| {
			Builder::new_multi_thread()
				.enable_all()
				.worker_threads(1)
				.max_blocking_threads(8)
				.thread_name("twoway-derive")
				.build()
				.expect("failed to build twoway fallback runtime")
		})
		.handle()
		.clone()
}

fn task_span(class: TaskClass, label: &str) -> Span {
	tracing::debug_span!("worker.task", worker_class = class.as_str(), label)
}

/// Runs `f` on the blocking pool inside a `worker.task` span tagged with `label`.
pub fn spawn_blocking<F, R>(class: TaskClass, label: &str, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let span = task_span(class, label);
	tracing::trace!(parent: &span, "worker.spawn_blocking");
	runtime_handle().spawn_blocking(move || span.in_scope(f))
}

/// Runs `f` on a dedicated OS thread called `name`, inside a `worker.task` span.
pub fn spawn_named_thread<F, R>(class: TaskClass, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	let span = task_span(class, &name);
	tracing::trace!(parent: &span, "worker.spawn_named_thread");
	std::thread::Builder::new().name(name).spawn(move || span.in_scope(f))
}
