use std::sync::Arc;

use tokio::task::JoinHandle;
use twoway_worker::GenerationToken;

use crate::error::{Result, TwoWayError};

/// Handle to a derivation started with [`TwoWaySupport::initiate`](crate::TwoWaySupport::initiate).
#[derive(Debug)]
pub struct DerivationTask<V> {
	token: GenerationToken,
	handle: JoinHandle<Result<Arc<V>>>,
}

impl<V> DerivationTask<V> {
	pub(crate) fn new(token: GenerationToken, handle: JoinHandle<Result<Arc<V>>>) -> Self {
		Self { token, handle }
	}

	/// Generation of the cache when the task was started.
	pub fn generation(&self) -> u64 {
		self.token.generation()
	}

	/// Skips the derivation if it has not started yet.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}

	/// Waits for the derivation result.
	pub async fn join(self) -> Result<Arc<V>> {
		match self.handle.await {
			Ok(result) => result,
			Err(err) if err.is_cancelled() => Err(TwoWayError::Cancelled),
			Err(err) => Err(TwoWayError::Task(err.to_string())),
		}
	}
}
