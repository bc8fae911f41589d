use {
	super::{
		cursor::{Cursor, Index, Term},
		rsm::StateMachine,
		storage::Storage,
	},
	core::ops::Range,
};

/// Owns the log storage and the state machine and keeps the two in lock
/// step: entries are appended by the roles, committed when the leader
/// establishes quorum, and applied to the state machine strictly in commit
/// order on the single worker task that owns this driver.
pub struct Driver<S, M>
where
	S: Storage<M::Command>,
	M: StateMachine,
{
	/// The underlying log entries storage.
	storage: S,

	/// The state machine that committed entries are applied to.
	machine: M,

	/// Index of the latest committed (and applied) log entry.
	committed: Index,
}

impl<S, M> Driver<S, M>
where
	S: Storage<M::Command>,
	M: StateMachine,
{
	pub fn new(storage: S, machine: M) -> Self {
		Self {
			storage,
			machine,
			committed: 0,
		}
	}

	/// Restores the state machine from local snapshot data at startup.
	/// The persisted log tail above the snapshot is kept: entries that
	/// were committed before the restart re-commit (and re-apply) once a
	/// leader confirms the commit index again.
	pub fn restore_snapshot(
		&mut self,
		position: Cursor,
		data: &[u8],
	) -> Result<(), super::rsm::RestoreError> {
		self.machine.restore(position.index(), data)?;
		self.storage.compact(position.index(), position.term());
		self.committed = position.index();
		Ok(())
	}

	/// Installs a snapshot streamed by the leader. Unlike the startup
	/// restore, the whole local log is discarded: the follower was so far
	/// behind that nothing it holds is known good.
	pub fn install_snapshot(
		&mut self,
		position: Cursor,
		data: &[u8],
	) -> Result<(), super::rsm::RestoreError> {
		self.machine.restore(position.index(), data)?;
		self.storage.truncate(self.storage.first_index());
		self.storage.compact(position.index(), position.term());
		self.committed = position.index();
		Ok(())
	}

	/// Serializes the state machine at the current applied index.
	pub fn take_snapshot(&self) -> (Cursor, bytes::Bytes) {
		let term = self.term_at(self.committed).unwrap_or(0);
		(Cursor::new(term, self.committed), self.machine.snapshot())
	}

	/// Drops log entries already captured by a snapshot at `position`.
	pub fn compact_to(&mut self, position: Cursor) {
		self.storage.compact(position.index(), position.term());
	}

	/// The term and index of the last log entry.
	pub fn last(&self) -> Cursor {
		let (term, index) = self.storage.last();
		Cursor::new(term, index)
	}

	/// The index of the earliest entry still present in the log.
	pub fn first_index(&self) -> Index {
		self.storage.first_index()
	}

	/// Index of the latest committed log entry.
	pub const fn committed(&self) -> Index {
		self.committed
	}

	/// Number of committed entries not yet folded into a snapshot.
	pub fn uncompacted(&self) -> usize {
		self
			.committed
			.saturating_sub(self.first_index().saturating_sub(1)) as usize
	}

	/// Retrieves the entry at the given index.
	pub fn get(&self, index: Index) -> Option<(M::Command, Term)> {
		self.storage.get(index)
	}

	/// Retrieves the entries in `range` (end exclusive).
	pub fn get_range(
		&self,
		range: Range<Index>,
	) -> impl Iterator<Item = (Term, Index, M::Command)> + '_ {
		self.storage.get_range(range)
	}

	/// Returns the term of the entry at the given index. Entries are
	/// indexed starting from 1, so `term_at(0)` always returns `Some(0)`;
	/// positions below the compaction floor are unknown and return `None`
	/// unless they are the floor itself.
	pub fn term_at(&self, index: Index) -> Option<Term> {
		if index == 0 {
			return Some(0);
		}

		let (floor_term, floor_index) = self.storage.floor();
		if index == floor_index {
			return Some(floor_term);
		}

		self.storage.get(index).map(|(_, term)| term)
	}

	/// Truncates the log from `at` onward (inclusive).
	pub fn truncate(&mut self, at: Index) {
		self.storage.truncate(at);
	}

	/// Appends a new entry received from or proposed by the leader.
	pub fn append(&mut self, command: M::Command, term: Term) -> Index {
		self.storage.append(command, term)
	}

	/// Commits log entries up to `index` and applies them to the state
	/// machine, returning the `(index, outcome)` of every applied entry so
	/// the worker can resolve pending acknowledgements.
	///
	/// Must only be called with indices known to be replicated to a quorum;
	/// the roles guarantee this.
	pub fn commit_up_to(
		&mut self,
		index: Index,
	) -> Vec<(Index, M::Outcome)> {
		let target = index.min(self.last().index());
		let mut applied = Vec::new();

		for i in self.committed + 1..=target {
			if let Some((command, _)) = self.storage.get(i) {
				let outcome = self.machine.apply(i, command);
				applied.push((i, outcome));
			}
		}

		self.committed = self.committed.max(target);
		applied
	}
}
