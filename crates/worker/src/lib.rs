//! Worker runtime helpers shared by the two-way cache.
//!
//! * [`spawn_blocking`], [`spawn_named_thread`]: classified, traced task spawning that
//!   falls back to a shared runtime when the caller is not inside one.
//! * [`GenerationClock`] / [`GenerationToken`]: generation-tagged cancellation.
//! * [`UiQueue`]: a single-consumer task queue with explicit cross-thread handoff.

mod class;
mod spawn;
mod token;
pub mod ui;

pub use class::TaskClass;
pub use spawn::{spawn_blocking, spawn_named_thread};
pub use token::{GenerationClock, GenerationToken};
pub use ui::{UiQueue, UiQueueError};
