mod cursor;
mod driver;
mod rsm;
mod snapshot;
mod storage;

// Public API exports
pub use {
	cursor::{Cursor, Index, Term},
	driver::Driver,
	rsm::{Command, RestoreError, StateMachine},
	snapshot::{SnapshotMeta, SnapshotStore},
	storage::{FileLogStore, InMemoryLogStore, Storage},
};
