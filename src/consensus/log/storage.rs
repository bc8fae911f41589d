use {
	super::cursor::{Index, Term},
	crate::primitives::{deserialize, serialize},
	core::ops::Range,
	std::{
		collections::VecDeque,
		fs::{File, OpenOptions},
		io::{BufReader, Read, Seek, SeekFrom, Write},
		path::{Path, PathBuf},
	},
};

/// Defines the storage interface for the consensus log.
///
/// This trait abstracts over the underlying storage mechanism used to
/// persist log entries. The log driver uses it to append new entries,
/// retrieve existing entries, truncate conflicting suffixes, and compact
/// prefixes that have been folded into a snapshot.
///
/// Entries are indexed starting from 1; `first_index` may be greater than 1
/// after compaction.
pub trait Storage<C: super::Command>: Send + Sync + Unpin + 'static {
	/// Appends a new log entry and returns its index.
	fn append(&mut self, command: C, term: Term) -> Index;

	/// Retrieves the entry at the given index, if present.
	fn get(&self, index: Index) -> Option<(C, Term)>;

	/// Retrieves the entries in `range` (end exclusive). Indices outside
	/// the stored window are skipped.
	fn get_range(
		&self,
		range: Range<Index>,
	) -> impl Iterator<Item = (Term, Index, C)> + '_;

	/// Removes all entries from `at` (inclusive) to the end of the log.
	/// Used when a follower's suffix conflicts with the leader's log.
	fn truncate(&mut self, at: Index);

	/// Drops all entries up to and including `up_to`, recording the term of
	/// the last dropped entry. Used after the prefix has been captured in a
	/// snapshot.
	fn compact(&mut self, up_to: Index, term: Term);

	/// The index of the first entry still present, or the index after the
	/// compaction floor when the log is empty.
	fn first_index(&self) -> Index;

	/// The term and index of the compaction floor: the last entry dropped
	/// by `compact`, `(0, 0)` if the log was never compacted. Needed for
	/// consistency checks right above a snapshot boundary.
	fn floor(&self) -> (Term, Index);

	/// The term and index of the last entry (or of the compaction floor
	/// when the log is empty). `(0, 0)` for a pristine log.
	fn last(&self) -> (Term, Index);

	/// Number of entries currently stored.
	fn len(&self) -> usize;
}

/// Volatile log storage, used in tests and by read replicas that rebuild
/// from a snapshot on start.
pub struct InMemoryLogStore<C> {
	entries: VecDeque<(Term, C)>,
	/// Index and term of the entry immediately before `entries[0]`.
	floor: (Term, Index),
}

impl<C> Default for InMemoryLogStore<C> {
	fn default() -> Self {
		Self {
			entries: VecDeque::new(),
			floor: (0, 0),
		}
	}
}

impl<C: super::Command> Storage<C> for InMemoryLogStore<C> {
	fn append(&mut self, command: C, term: Term) -> Index {
		self.entries.push_back((term, command));
		self.floor.1 + self.entries.len() as Index
	}

	fn get(&self, index: Index) -> Option<(C, Term)> {
		let offset = index.checked_sub(self.floor.1 + 1)?;
		let (term, command) = self.entries.get(offset as usize)?;
		Some((command.clone(), *term))
	}

	fn get_range(
		&self,
		range: Range<Index>,
	) -> impl Iterator<Item = (Term, Index, C)> + '_ {
		range
			.filter_map(|index| self.get(index).map(|(c, t)| (t, index, c)))
	}

	fn truncate(&mut self, at: Index) {
		let Some(offset) = at.checked_sub(self.floor.1 + 1) else {
			self.entries.clear();
			return;
		};
		self.entries.truncate(offset as usize);
	}

	fn compact(&mut self, up_to: Index, term: Term) {
		while self.floor.1 < up_to {
			if self.entries.pop_front().is_none() {
				break;
			}
			self.floor.1 += 1;
		}
		self.floor = (term, self.floor.1.max(up_to));
	}

	fn first_index(&self) -> Index {
		self.floor.1 + 1
	}

	fn floor(&self) -> (Term, Index) {
		self.floor
	}

	fn last(&self) -> (Term, Index) {
		match self.entries.back() {
			Some((term, _)) => {
				(*term, self.floor.1 + self.entries.len() as Index)
			}
			None => self.floor,
		}
	}

	fn len(&self) -> usize {
		self.entries.len()
	}
}

/// Durable log storage: an append-only file of length-prefixed frames under
/// the agent data directory, with the full window mirrored in memory for
/// reads. Truncation and compaction rewrite the file; both are rare
/// (conflicting suffixes and snapshot floors respectively).
pub struct FileLogStore<C> {
	path: PathBuf,
	file: File,
	inner: InMemoryLogStore<C>,
}

impl<C: super::Command> FileLogStore<C> {
	/// Opens (or creates) the log file and replays it into memory.
	pub fn open(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
		let path = path.as_ref().to_path_buf();
		let mut file = OpenOptions::new()
			.read(true)
			.append(true)
			.create(true)
			.open(&path)?;

		let mut inner = InMemoryLogStore::default();
		let mut reader = BufReader::new(&mut file);
		loop {
			let mut len_buf = [0u8; 4];
			match reader.read_exact(&mut len_buf) {
				Ok(()) => {}
				Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
				Err(e) => return Err(e),
			}

			let len = u32::from_le_bytes(len_buf) as usize;
			let mut frame = vec![0u8; len];
			reader.read_exact(&mut frame)?;

			let record: Record<C> = deserialize(&frame).map_err(|e| {
				std::io::Error::new(std::io::ErrorKind::InvalidData, e)
			})?;

			match record {
				Record::Entry { term, command } => {
					inner.append(command, term);
				}
				Record::Truncate { at } => inner.truncate(at),
				Record::Compact { up_to, term } => inner.compact(up_to, term),
			}
		}

		file.seek(SeekFrom::End(0))?;
		Ok(Self { path, file, inner })
	}

	fn write_record(&mut self, record: &Record<C>) {
		let frame = serialize(record);
		let len = (frame.len() as u32).to_le_bytes();

		// an unwritable log is unrecoverable; the supervisor treats the
		// resulting panic as a fatal error and drains
		let write = (|| -> Result<(), std::io::Error> {
			self.file.write_all(&len)?;
			self.file.write_all(&frame)?;
			self.file.sync_data()
		})();

		if let Err(e) = write {
			panic!("consensus log write failed at {:?}: {e}", self.path);
		}
	}
}

/// On-disk frame. Truncations and compactions are recorded as frames too,
/// so replay reproduces the exact in-memory window without rewrites on the
/// hot path.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound(deserialize = "C: serde::de::DeserializeOwned"))]
enum Record<C> {
	Entry { term: Term, command: C },
	Truncate { at: Index },
	Compact { up_to: Index, term: Term },
}

impl<C: super::Command> Storage<C> for FileLogStore<C> {
	fn append(&mut self, command: C, term: Term) -> Index {
		self.write_record(&Record::Entry {
			term,
			command: command.clone(),
		});
		self.inner.append(command, term)
	}

	fn get(&self, index: Index) -> Option<(C, Term)> {
		self.inner.get(index)
	}

	fn get_range(
		&self,
		range: Range<Index>,
	) -> impl Iterator<Item = (Term, Index, C)> + '_ {
		self.inner.get_range(range)
	}

	fn truncate(&mut self, at: Index) {
		self.write_record(&Record::Truncate { at });
		self.inner.truncate(at);
	}

	fn compact(&mut self, up_to: Index, term: Term) {
		self.write_record(&Record::Compact { up_to, term });
		self.inner.compact(up_to, term);
	}

	fn first_index(&self) -> Index {
		self.inner.first_index()
	}

	fn floor(&self) -> (Term, Index) {
		self.inner.floor()
	}

	fn last(&self) -> (Term, Index) {
		self.inner.last()
	}

	fn len(&self) -> usize {
		self.inner.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn append_get_truncate() {
		let mut store = InMemoryLogStore::<u32>::default();
		assert_eq!(store.last(), (0, 0));
		assert_eq!(store.first_index(), 1);

		assert_eq!(store.append(10, 1), 1);
		assert_eq!(store.append(20, 1), 2);
		assert_eq!(store.append(30, 2), 3);

		assert_eq!(store.get(2), Some((20, 1)));
		assert_eq!(store.last(), (2, 3));

		store.truncate(2);
		assert_eq!(store.last(), (1, 1));
		assert_eq!(store.get(2), None);
	}

	#[test]
	fn compact_preserves_floor_term() {
		let mut store = InMemoryLogStore::<u32>::default();
		for i in 0..5 {
			store.append(i, 3);
		}

		store.compact(3, 3);
		assert_eq!(store.first_index(), 4);
		assert_eq!(store.get(3), None);
		assert_eq!(store.get(4), Some((3, 3)));
		assert_eq!(store.last(), (3, 5));

		// compacting everything leaves the floor as the last position
		store.compact(5, 3);
		assert_eq!(store.last(), (3, 5));
		assert_eq!(store.len(), 0);
	}

	#[test]
	fn file_store_replays_after_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("log");

		{
			let mut store = FileLogStore::<u32>::open(&path).unwrap();
			store.append(10, 1);
			store.append(20, 1);
			store.append(30, 1);
			store.truncate(3);
			store.append(31, 2);
		}

		let store = FileLogStore::<u32>::open(&path).unwrap();
		assert_eq!(store.last(), (2, 3));
		assert_eq!(store.get(3), Some((31, 2)));
		assert_eq!(store.get(2), Some((20, 1)));
	}
}
