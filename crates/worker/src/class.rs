use serde::{Deserialize, Serialize};

/// Execution classes used to route work onto threads and to label it in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
	/// Work that must run on the UI queue (listener delivery, repaint handoff).
	Interactive,
	/// Async work that can be delayed without user-visible effect.
	Background,
	/// CPU-bound blocking work such as a derivation run off the caller's thread.
	#[default]
	CpuBlocking,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Background => "background",
			Self::CpuBlocking => "cpu_blocking",
		}
	}
}

impl std::fmt::Display for TaskClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
