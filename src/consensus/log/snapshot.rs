use {
	super::cursor::{Cursor, Index, Term},
	bytes::Bytes,
	std::{
		fs,
		io::Write,
		path::{Path, PathBuf},
	},
};

/// Number of snapshot files kept on disk. Older ones are removed after a
/// newer snapshot lands.
const RETAIN: usize = 2;

/// On-disk snapshot store under `<data_dir>/raft/snapshots/`.
///
/// Each snapshot is one file named `<term>-<index>.snap` containing the
/// serialized state-machine state at that committed index. Writes go
/// through a temp file and an atomic rename so a crash mid-write never
/// corrupts the newest usable snapshot.
pub struct SnapshotStore {
	dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
	pub position: Cursor,
	pub path: PathBuf,
}

impl SnapshotStore {
	pub fn open(dir: impl AsRef<Path>) -> Result<Self, std::io::Error> {
		let dir = dir.as_ref().to_path_buf();
		fs::create_dir_all(&dir)?;
		Ok(Self { dir })
	}

	/// Writes a snapshot taken at the given position and prunes older ones.
	pub fn write(
		&self,
		position: Cursor,
		data: &[u8],
	) -> Result<SnapshotMeta, std::io::Error> {
		let name = format!("{}-{}.snap", position.term(), position.index());
		let path = self.dir.join(&name);
		let tmp = self.dir.join(format!(".{name}.tmp"));

		let mut file = fs::File::create(&tmp)?;
		file.write_all(data)?;
		file.sync_data()?;
		drop(file);
		fs::rename(&tmp, &path)?;

		self.prune()?;
		Ok(SnapshotMeta { position, path })
	}

	/// The newest snapshot on disk, if any.
	pub fn latest(&self) -> Result<Option<SnapshotMeta>, std::io::Error> {
		Ok(self.list()?.into_iter().max_by_key(|meta| meta.position))
	}

	/// Reads the data of a snapshot.
	pub fn read(&self, meta: &SnapshotMeta) -> Result<Bytes, std::io::Error> {
		fs::read(&meta.path).map(Bytes::from)
	}

	fn list(&self) -> Result<Vec<SnapshotMeta>, std::io::Error> {
		let mut found = Vec::new();
		for entry in fs::read_dir(&self.dir)? {
			let entry = entry?;
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			let Some(stem) = name.strip_suffix(".snap") else {
				continue;
			};
			let Some((term, index)) = stem.split_once('-') else {
				continue;
			};
			let (Ok(term), Ok(index)) =
				(term.parse::<Term>(), index.parse::<Index>())
			else {
				continue;
			};

			found.push(SnapshotMeta {
				position: Cursor::new(term, index),
				path: entry.path(),
			});
		}
		Ok(found)
	}

	fn prune(&self) -> Result<(), std::io::Error> {
		let mut all = self.list()?;
		all.sort_by_key(|meta| std::cmp::Reverse(meta.position));
		for stale in all.into_iter().skip(RETAIN) {
			fs::remove_file(&stale.path)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn write_latest_prune() {
		let dir = tempfile::tempdir().unwrap();
		let store = SnapshotStore::open(dir.path()).unwrap();
		assert_eq!(store.latest().unwrap(), None);

		store.write(Cursor::new(1, 10), b"one").unwrap();
		store.write(Cursor::new(1, 20), b"two").unwrap();
		store.write(Cursor::new(2, 25), b"three").unwrap();

		let latest = store.latest().unwrap().unwrap();
		assert_eq!(latest.position, Cursor::new(2, 25));
		assert_eq!(store.read(&latest).unwrap().as_ref(), b"three");

		// only RETAIN snapshots survive
		let files = std::fs::read_dir(dir.path())
			.unwrap()
			.filter(|e| {
				e.as_ref()
					.unwrap()
					.file_name()
					.to_str()
					.unwrap()
					.ends_with(".snap")
			})
			.count();
		assert_eq!(files, RETAIN);
	}
}
