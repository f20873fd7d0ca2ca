use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak, mpsc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use super::*;
use crate::error::{DeriveError, LockMode};
use crate::event::TwoWayEventKind;
use crate::words::WordDocument;

type Hook = Box<dyn FnOnce() + Send>;

/// Underlying value: an integer. Derived value: twice that integer.
/// Deltas are increments of the underlying value and compose by addition.
struct Doubling {
	value: Mutex<i64>,
	derivations: AtomicUsize,
	hook: Mutex<Option<Hook>>,
}

#[derive(Debug, thiserror::Error)]
#[error("negative input {0}")]
struct Negative(i64);

#[derive(Debug, thiserror::Error)]
#[error("odd value {0} has no underlying counterpart")]
struct Odd(i64);

impl Doubling {
	fn new(value: i64) -> Self {
		Self {
			value: Mutex::new(value),
			derivations: AtomicUsize::new(0),
			hook: Mutex::new(None),
		}
	}

	fn set_hook(&self, hook: impl FnOnce() + Send + 'static) {
		*self.hook.lock() = Some(Box::new(hook));
	}

	fn derivations(&self) -> usize {
		self.derivations.load(Ordering::SeqCst)
	}
}

impl Derivation for Doubling {
	type Value = i64;
	type UnderlyingDelta = i64;
	type DerivedDelta = i64;

	fn derive(&self, old: Option<&i64>, delta: Option<&i64>) -> std::result::Result<Derived<i64, i64>, DeriveError> {
		self.derivations.fetch_add(1, Ordering::SeqCst);
		let current = *self.value.lock();
		let hook = self.hook.lock().take();
		if let Some(hook) = hook {
			hook();
		}
		if current < 0 {
			return Err(Negative(current).into());
		}
		match (old, delta) {
			(Some(old), Some(delta)) => Ok(Derived::with_delta(old + 2 * delta, 2 * delta)),
			_ => Ok(Derived::new(2 * current)),
		}
	}

	fn compose(&self, older: i64, newer: i64) -> i64 {
		older + newer
	}

	fn recreate(&self, old: &i64, edited: &i64) -> std::result::Result<i64, DeriveError> {
		if edited % 2 != 0 {
			return Err(Odd(*edited).into());
		}
		Ok((edited - old) / 2)
	}

	fn apply(&self, delta: &i64) -> std::result::Result<(), DeriveError> {
		*self.value.lock() += delta;
		Ok(())
	}
}

fn doubling(value: i64) -> Arc<TwoWaySupport<Doubling>> {
	Arc::new(TwoWaySupport::new(Doubling::new(value), LockCoordinator::new()))
}

/// Sets the underlying value and invalidates inside one write scope.
fn set(support: &TwoWaySupport<Doubling>, value: i64) {
	let _write = support.lock().write_scope().unwrap();
	let delta = {
		let mut current = support.derivation().value.lock();
		let delta = value - *current;
		*current = value;
		delta
	};
	support.invalidate(delta).unwrap();
}

fn words(list: &[&str]) -> Vec<String> {
	list.iter().map(|w| w.to_string()).collect()
}

fn record_events<D: Derivation>(support: &TwoWaySupport<D>) -> (ListenerId, Arc<Mutex<Vec<TwoWayEventKind>>>) {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let id = support.add_listener(move |event: &TwoWayEvent<D>| sink.lock().push(event.kind()));
	(id, seen)
}

#[test]
fn initial_edit_and_empty_text_scenario() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let doc = WordDocument::new("initial value");
	let support = doc.support();
	assert_eq!(support.state(), DerivationState::Invalid);
	assert_eq!(*doc.words().unwrap(), words(&["initial", "value"]));
	assert_eq!(support.state(), DerivationState::Fresh);

	doc.set_text("new value").unwrap();
	assert_eq!(support.value_non_blocking(), None);
	assert_eq!(support.stale_value_non_blocking().as_deref(), Some(&words(&["initial", "value"])));
	assert_eq!(*doc.words().unwrap(), words(&["new", "value"]));

	doc.set_text("").unwrap();
	let err = doc.words().unwrap_err();
	assert!(err.is_derivation());
	assert_eq!(err.to_string(), "empty string");
	assert_eq!(support.value_non_blocking(), None);
	assert_eq!(support.stale_value_non_blocking().as_deref(), Some(&words(&["new", "value"])));
	assert_eq!(support.state(), DerivationState::Invalid);
}

#[test]
fn non_blocking_read_is_empty_after_every_invalidation() {
	let support = doubling(1);
	for next in [2, 3, 3, 10] {
		support.value_blocking().unwrap();
		assert!(support.value_non_blocking().is_some());
		set(&support, next);
		assert_eq!(support.value_non_blocking(), None, "fresh value visible after invalidating to {next}");
		assert_eq!(support.state(), DerivationState::Stale);
	}
	assert_eq!(*support.value_blocking().unwrap(), 20);
}

#[test]
fn deltas_accumulate_between_blocking_reads() {
	let support = doubling(1);
	assert_eq!(*support.value_blocking().unwrap(), 2);
	set(&support, 4);
	set(&support, 9);
	set(&support, 6);
	assert_eq!(support.generation(), 3);
	assert_eq!(*support.value_blocking().unwrap(), 12);
	assert_eq!(support.derivation().derivations(), 2, "one derivation for three invalidations");
}

#[test]
fn stale_value_survives_repeated_failures() {
	let support = doubling(2);
	assert_eq!(support.stale_value_non_blocking(), None);
	support.value_blocking().unwrap();

	for bad in [-1, -5, -9] {
		set(&support, bad);
		let err = support.value_blocking().unwrap_err();
		assert_eq!(err.to_string(), format!("negative input {bad}"));
		assert!(support.is_broken());
		assert_eq!(support.stale_value_non_blocking().as_deref(), Some(&4));
	}

	set(&support, 3);
	assert_eq!(*support.value_blocking().unwrap(), 6);
	assert!(!support.is_broken());
	assert!(support.last_error().is_none());
	assert_eq!(support.stale_value_non_blocking().as_deref(), Some(&6));
}

#[test]
fn failure_before_first_success_leaves_no_stale_value() {
	let support = doubling(-3);
	assert!(support.value_blocking().is_err());
	assert_eq!(support.stale_value_non_blocking(), None);
	assert_eq!(support.state(), DerivationState::Invalid);

	// Invalidating an invalid cache keeps it invalid; the next read starts from scratch.
	set(&support, 5);
	assert_eq!(support.state(), DerivationState::Invalid);
	assert_eq!(*support.value_blocking().unwrap(), 10);
}

#[test]
fn invalidation_from_inside_derivation_supersedes_result() {
	let support = doubling(5);
	assert_eq!(*support.value_blocking().unwrap(), 10);

	let weak: Weak<TwoWaySupport<Doubling>> = Arc::downgrade(&support);
	support.derivation().set_hook(move || {
		if let Some(support) = weak.upgrade() {
			set(&support, 7);
		}
	});

	let _write = support.lock().write_scope().unwrap();
	set(&support, 6);
	// The derivation sees 6, then the hook moves the underlying value to 7.
	assert_eq!(*support.value_blocking().unwrap(), 12);
	assert_eq!(support.state(), DerivationState::Stale);
	assert_eq!(support.value_non_blocking(), None);
	assert_eq!(support.stale_value_non_blocking().as_deref(), Some(&12));
	assert_eq!(*support.value_blocking().unwrap(), 14);
	assert_eq!(support.state(), DerivationState::Fresh);
}

#[test]
fn invalidation_waiting_on_running_derivation_is_not_lost() {
	let support = doubling(1);
	support.value_blocking().unwrap();
	set(&support, 2);

	let (started_tx, started_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel::<()>();
	support.derivation().set_hook(move || {
		started_tx.send(()).unwrap();
		release_rx.recv().unwrap();
	});

	let reader = {
		let support = Arc::clone(&support);
		thread::spawn(move || support.value_blocking().map(|v| *v))
	};
	started_rx.recv().unwrap();
	assert_eq!(support.state(), DerivationState::Computing);

	let writer = {
		let support = Arc::clone(&support);
		thread::spawn(move || set(&support, 8))
	};
	thread::sleep(Duration::from_millis(20));
	release_tx.send(()).unwrap();

	assert_eq!(reader.join().unwrap().unwrap(), 4);
	writer.join().unwrap();
	assert_eq!(support.value_non_blocking(), None);
	assert_eq!(*support.value_blocking().unwrap(), 16);
}

#[test]
fn concurrent_blocking_readers_share_one_derivation() {
	let support = doubling(3);
	let barrier = Arc::new(std::sync::Barrier::new(8));
	let handles: Vec<_> = (0..8)
		.map(|_| {
			let support = Arc::clone(&support);
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				*support.value_blocking().unwrap()
			})
		})
		.collect();
	for handle in handles {
		assert_eq!(handle.join().unwrap(), 6);
	}
	assert_eq!(support.derivation().derivations(), 1);
}

#[test]
fn blocking_read_inside_derivation_is_rejected() {
	let support = doubling(1);
	let weak = Arc::downgrade(&support);
	let (tx, rx) = mpsc::channel();
	support.derivation().set_hook(move || {
		if let Some(support) = weak.upgrade() {
			tx.send(support.value_blocking().map(|v| *v)).unwrap();
		}
	});
	assert_eq!(*support.value_blocking().unwrap(), 2);
	assert!(matches!(rx.recv().unwrap(), Err(TwoWayError::Reentrant)));
}

#[test]
fn blocking_read_times_out_behind_writer() {
	let config = TwoWayConfig::default().with_lock_timeout(Some(Duration::from_millis(25)));
	let support = Arc::new(TwoWaySupport::with_config(Doubling::new(1), config.lock_coordinator(), &config));
	let (held_tx, held_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel::<()>();
	let holder = {
		let lock = support.lock().clone();
		thread::spawn(move || {
			let _write = lock.write_scope().unwrap();
			held_tx.send(()).unwrap();
			release_rx.recv().unwrap();
		})
	};
	held_rx.recv().unwrap();

	let err = support.value_blocking().unwrap_err();
	assert!(matches!(err, TwoWayError::LockTimeout { mode: LockMode::Read, .. }));
	assert_eq!(support.state(), DerivationState::Invalid, "timeouts must not touch cache state");

	release_tx.send(()).unwrap();
	holder.join().unwrap();
	assert_eq!(*support.value_blocking().unwrap(), 2);
}

#[test]
fn listeners_see_events_in_order() {
	let support = doubling(1);
	let (id, seen) = record_events(&support);

	support.value_blocking().unwrap();
	set(&support, -1);
	let _ = support.value_blocking();
	set(&support, 2);
	support.value_blocking().unwrap();

	assert_eq!(
		*seen.lock(),
		vec![
			TwoWayEventKind::Derived,
			TwoWayEventKind::Invalidated,
			TwoWayEventKind::Broken,
			TwoWayEventKind::Derived,
		]
	);

	assert!(support.remove_listener(id));
	assert!(!support.remove_listener(id));
	set(&support, 3);
	assert_eq!(seen.lock().len(), 4);
}

#[test]
fn inline_listeners_run_inside_caller_write_scope() {
	let support = doubling(1);
	support.value_blocking().unwrap();
	let lock = support.lock().clone();
	let held = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&held);
	support.add_listener(move |_: &TwoWayEvent<Doubling>| sink.lock().push(lock.is_write_held()));

	support.invalidate(0).unwrap();
	set(&support, 5);
	assert_eq!(*held.lock(), vec![false, true]);
}

#[test]
fn derived_event_carries_stale_value_and_delta() {
	let support = doubling(1);
	support.value_blocking().unwrap();
	let captured = Arc::new(Mutex::new(None));
	let sink = Arc::clone(&captured);
	support.add_listener(move |event: &TwoWayEvent<Doubling>| {
		if let TwoWayEvent::Derived { old, new, delta } = event {
			*sink.lock() = Some((old.as_deref().copied(), **new, delta.as_deref().copied()));
		}
	});
	set(&support, 4);
	support.value_blocking().unwrap();
	assert_eq!(*captured.lock(), Some((Some(2), 8, Some(6))));
}

#[test]
fn listeners_run_on_ui_queue_when_attached() {
	let ui = UiQueue::start("twoway-ui-test").unwrap();
	let support = Arc::new(TwoWaySupport::new(Doubling::new(1), LockCoordinator::new()).with_ui_queue(ui.clone()));
	let threads = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&threads);
	support.add_listener(move |_event: &TwoWayEvent<Doubling>| {
		sink.lock().push(thread::current().name().map(str::to_owned));
	});

	support.value_blocking().unwrap();
	set(&support, 2);
	ui.invoke_and_wait(|| ()).unwrap();

	let threads = threads.lock();
	assert_eq!(threads.len(), 2);
	assert!(threads.iter().all(|name| name.as_deref() == Some("twoway-ui-test")));
	drop(threads);
	ui.shutdown();
}

#[test]
fn mutate_writes_edited_value_back() {
	let support = doubling(3);
	let (_, seen) = record_events(&support);
	assert_eq!(*support.mutate(20).unwrap(), 20);
	assert_eq!(*support.derivation().value.lock(), 10);
	assert_eq!(support.state(), DerivationState::Fresh);
	assert_eq!(seen.lock().last(), Some(&TwoWayEventKind::Recreated));

	let scratch = TwoWaySupport::new(Doubling::new(*support.derivation().value.lock()), LockCoordinator::new());
	assert_eq!(*scratch.value_blocking().unwrap(), 20);
}

#[test]
fn failed_mutation_leaves_underlying_value_alone() {
	let support = doubling(3);
	support.value_blocking().unwrap();
	let generation = support.generation();

	let err = support.mutate(7).unwrap_err();
	assert!(matches!(err, TwoWayError::Recreation(_)));
	assert_eq!(err.to_string(), "recreation failed: odd value 7 has no underlying counterpart");
	assert_eq!(*support.derivation().value.lock(), 3);
	assert_eq!(support.generation(), generation);
	assert_eq!(support.value_non_blocking().as_deref(), Some(&6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initiate_derives_in_background() {
	let support = doubling(21);
	let task = support.initiate();
	assert_eq!(task.generation(), 0);
	assert_eq!(*task.join().await.unwrap(), 42);
	assert_eq!(support.value_non_blocking().as_deref(), Some(&42));

	// Already fresh: no second derivation.
	assert_eq!(*support.initiate().join().await.unwrap(), 42);
	assert_eq!(support.derivation().derivations(), 1);
}

#[tokio::test]
async fn cancelled_initiate_skips_derivation() {
	let support = doubling(1);
	let write = support.lock().write_scope().unwrap();
	let task = support.initiate();
	task.cancel();
	drop(write);

	assert!(matches!(task.join().await, Err(TwoWayError::Cancelled)));
	assert_eq!(support.derivation().derivations(), 0);
	assert_eq!(support.state(), DerivationState::Invalid);
}

#[derive(Debug, Clone)]
enum Step {
	Set(i64),
	Read,
	Mutate(i64),
}

fn step() -> impl Strategy<Value = Step> {
	prop_oneof![
		3 => (-4i64..40).prop_map(Step::Set),
		2 => Just(Step::Read),
		1 => (-10i64..80).prop_map(Step::Mutate),
	]
}

proptest! {
	#[test]
	fn incremental_reads_match_scratch_derivation(initial in 0i64..40, steps in prop::collection::vec(step(), 1..20)) {
		let support = doubling(initial);
		let mut underlying = initial;
		for step in steps {
			match step {
				Step::Set(value) => {
					set(&support, value);
					underlying = value;
				}
				Step::Read => {
					let _ = support.value_blocking();
				}
				Step::Mutate(edited) => {
					let accepted = support.mutate(edited).is_ok();
					// Even edits are written back; a negative result then fails to rederive.
					let recreated = underlying >= 0 && edited % 2 == 0;
					if recreated {
						underlying = edited / 2;
					}
					prop_assert_eq!(accepted, recreated && underlying >= 0);
				}
			}
			prop_assert_eq!(*support.derivation().value.lock(), underlying);
		}

		let scratch = Doubling::new(underlying).derive(None, None).map(|d| d.value).map_err(|e| e.to_string());
		let cached = support.value_blocking().map(|v| *v).map_err(|e| e.to_string());
		prop_assert_eq!(&cached, &scratch);
		let expected = if underlying >= 0 { DerivationState::Fresh } else { DerivationState::Invalid };
		prop_assert_eq!(support.state(), expected);
	}
}
