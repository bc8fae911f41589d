use {
	crate::consensus::Index,
	im::OrdMap,
	serde::{Deserialize, Serialize},
};

/// A versioned row in a state-store table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row<V> {
	pub value: V,

	/// Index of the log entry that first created this row.
	pub create_index: Index,

	/// Index of the log entry that last touched this row.
	pub modify_index: Index,
}

/// One MVCC table: an ordered persistent map of rows plus tombstones for
/// deleted keys.
///
/// Notes:
///
/// - Backed by [`OrdMap`], so cloning a table is cheap and yields an
///   immutable snapshot; readers never block the writer.
///
/// - `max_index` is the highest log index that touched the table, including
///   deletions. It is the index blocking queries compare against, so a
///   deletion wakes watchers even though the row is gone.
///
/// - Tombstones carry the deletion index and are garbage-collected by the
///   periodic tombstone reaper once every server has seen them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table<K, V>
where
	K: Ord + Clone,
	V: Clone,
{
	rows: OrdMap<K, Row<V>>,
	tombstones: OrdMap<K, Index>,
	max_index: Index,
}

impl<K: Ord + Clone, V: Clone> Default for Table<K, V> {
	fn default() -> Self {
		Self {
			rows: OrdMap::new(),
			tombstones: OrdMap::new(),
			max_index: 0,
		}
	}
}

impl<K, V> Table<K, V>
where
	K: Ord + Clone,
	V: Clone,
{
	/// Inserts or replaces a row at the given log index. The create index
	/// is preserved across updates of an existing row.
	pub fn insert(&mut self, key: K, value: V, index: Index) {
		let create_index = self
			.rows
			.get(&key)
			.map(|row| row.create_index)
			.unwrap_or(index);

		self.tombstones.remove(&key);
		self.rows.insert(key, Row {
			value,
			create_index,
			modify_index: index,
		});
		self.max_index = self.max_index.max(index);
	}

	/// Removes a row, leaving a tombstone at the given log index. Returns
	/// the removed row, or `None` if the key was absent (the tombstone and
	/// index advance happen regardless, so re-applied deletions stay
	/// idempotent).
	pub fn remove(&mut self, key: &K, index: Index) -> Option<Row<V>> {
		let removed = self.rows.remove(key);
		self.tombstones.insert(key.clone(), index);
		self.max_index = self.max_index.max(index);
		removed
	}

	pub fn get(&self, key: &K) -> Option<&Row<V>> {
		self.rows.get(key)
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.rows.contains_key(key)
	}

	/// Iterates rows in key order.
	pub fn iter(&self) -> impl Iterator<Item = (&K, &Row<V>)> {
		self.rows.iter()
	}

	/// Iterates rows whose keys are at or after `from`, in key order.
	pub fn range_from<'a>(
		&'a self,
		from: &K,
	) -> impl Iterator<Item = (&'a K, &'a Row<V>)> {
		self.rows.range(from.clone()..)
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// The highest log index that touched this table, deletions included.
	pub const fn max_index(&self) -> Index {
		self.max_index
	}

	/// Drops tombstones recorded at or below `before`.
	pub fn reap_tombstones(&mut self, before: Index) {
		self.tombstones.retain(|_, index| *index > before);
	}

	/// Number of live tombstones, used by the reaper to decide when a pass
	/// is worth proposing.
	pub fn tombstone_count(&self) -> usize {
		self.tombstones.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn create_index_survives_updates() {
		let mut table = Table::<String, u32>::default();
		table.insert("a".into(), 1, 5);
		table.insert("a".into(), 2, 9);

		let row = table.get(&"a".to_string()).unwrap();
		assert_eq!(row.create_index, 5);
		assert_eq!(row.modify_index, 9);
		assert_eq!(table.max_index(), 9);
	}

	#[test]
	fn create_index_resets_after_delete() {
		let mut table = Table::<String, u32>::default();
		table.insert("a".into(), 1, 5);
		table.remove(&"a".to_string(), 7);
		table.insert("a".into(), 3, 9);

		let row = table.get(&"a".to_string()).unwrap();
		assert_eq!(row.create_index, 9);
		assert_eq!(row.modify_index, 9);
	}

	#[test]
	fn deletion_advances_max_index() {
		let mut table = Table::<String, u32>::default();
		table.insert("a".into(), 1, 5);
		assert_eq!(table.max_index(), 5);

		table.remove(&"a".to_string(), 8);
		assert_eq!(table.max_index(), 8);
		assert_eq!(table.tombstone_count(), 1);

		table.reap_tombstones(8);
		assert_eq!(table.tombstone_count(), 0);
		// reaping tombstones never regresses the table index
		assert_eq!(table.max_index(), 8);
	}

	#[test]
	fn snapshot_isolation() {
		let mut table = Table::<String, u32>::default();
		table.insert("a".into(), 1, 1);

		let snapshot = table.clone();
		table.insert("b".into(), 2, 2);

		assert_eq!(snapshot.len(), 1);
		assert_eq!(table.len(), 2);
	}
}
