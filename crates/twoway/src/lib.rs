//! Derived-value cache with staleness tracking.
//!
//! A [`TwoWaySupport`] keeps a value derived from some underlying state (text and
//! its parsed form, say) and knows at every moment whether that value is still
//! current:
//!
//! * [`TwoWaySupport::value_non_blocking`] returns it only while fresh;
//! * [`TwoWaySupport::stale_value_non_blocking`] returns the last good value in any state,
//!   so a UI can keep showing something while the underlying state is mid-edit;
//! * [`TwoWaySupport::value_blocking`] recomputes on demand.
//!
//! The owner reports changes with [`TwoWaySupport::invalidate`] inside the write
//! scope of a shared [`LockCoordinator`], and can push an edited derived value back
//! into the underlying state with [`TwoWaySupport::mutate`].

pub mod config;
pub mod derivation;
pub mod error;
pub mod event;
pub mod lock;
pub mod state;
pub mod support;
pub mod task;
pub mod words;

pub use config::{ConfigError, TwoWayConfig};
pub use derivation::{Derivation, Derived};
pub use error::{DeriveError, LockMode, Result, SharedError, TwoWayError};
pub use event::{ListenerId, TwoWayEvent, TwoWayEventKind, TwoWayListener};
pub use lock::{LockCoordinator, ReadScope, WriteScope};
pub use state::DerivationState;
pub use support::TwoWaySupport;
pub use task::DerivationTask;
pub use twoway_worker::{TaskClass, UiQueue};
