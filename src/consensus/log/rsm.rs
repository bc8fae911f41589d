//! The replicated-state-machine seam between the consensus log and the
//! application. The log module replicates and commits opaque commands; the
//! state machine applies them deterministically and owns snapshots.

use {
	super::cursor::Index,
	bytes::Bytes,
	core::fmt::Debug,
	serde::{Serialize, de::DeserializeOwned},
};

/// The state machine driven by the consensus log.
///
/// Notes:
///
/// - `apply` must be deterministic: given the same committed log prefix,
///   every server's state machine reproduces an identical state. Any
///   wall-clock or random decision belongs in the code that *proposes*
///   commands, never in `apply`.
///
/// - Commands must be idempotent under re-apply at the same index, which
///   makes crash recovery a plain snapshot-restore plus log replay.
pub trait StateMachine: Send + Sync + Unpin + 'static {
	/// The replicated state transition type.
	type Command: Command;

	/// The result of applying a command, handed to the caller that proposed
	/// it (e.g. the outcome of a compare-and-set).
	type Outcome: Debug + Send + 'static;

	/// A no-op command. A freshly elected leader appends one of these as a
	/// barrier in its own term and serves consistent reads only after it
	/// commits, closing the stale-read window after an election.
	fn barrier_command() -> Self::Command;

	/// Applies a committed command at the given log index.
	fn apply(&mut self, index: Index, command: Self::Command)
	-> Self::Outcome;

	/// Serializes the complete state at the current applied index.
	fn snapshot(&self) -> Bytes;

	/// Replaces the complete state from a snapshot taken at `index`.
	fn restore(&mut self, index: Index, data: &[u8])
	-> Result<(), RestoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
	#[error("snapshot decode failed: {0}")]
	Decode(String),
}

pub trait Command:
	Debug + Clone + Send + Sync + Unpin + Serialize + DeserializeOwned + 'static
{
}

impl<T> Command for T where
	T: Debug
		+ Clone
		+ Send
		+ Sync
		+ Unpin
		+ Serialize
		+ DeserializeOwned
		+ 'static
{
}
