use {
	crate::consensus::Index,
	core::time::Duration,
	std::sync::Arc,
	strum::{EnumIter, IntoEnumIterator},
	tokio::sync::watch,
};

/// Identifies a state-store table for watch registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum TableId {
	Nodes,
	Services,
	Checks,
	Kv,
	Sessions,
	Tokens,
	Policies,
	Roles,
	ConfigEntries,
	Coordinates,
	PreparedQueries,
	Intentions,
}

/// The blocking-query primitive: one watch channel per table, carrying the
/// highest log index that touched it.
///
/// A reader atomically observes the current index and, if it has not passed
/// its `min_index` yet, parks on the channel with a deadline. The FSM apply
/// loop publishes the new index after every apply that touched the table,
/// waking all parked readers, which then re-evaluate their query against a
/// fresh snapshot.
#[derive(Clone)]
pub struct WatchSet {
	channels: Arc<Vec<watch::Sender<Index>>>,
}

impl Default for WatchSet {
	fn default() -> Self {
		let channels = TableId::iter()
			.map(|_| watch::Sender::new(0))
			.collect::<Vec<_>>();
		Self {
			channels: Arc::new(channels),
		}
	}
}

impl WatchSet {
	/// Publishes a new index for a table. Called only from the FSM apply
	/// loop after the store mutation is visible.
	pub(crate) fn notify(&self, table: TableId, index: Index) {
		let sender = &self.channels[table as usize];
		sender.send_if_modified(|current| {
			if index > *current {
				*current = index;
				true
			} else {
				false
			}
		});
	}

	/// The highest index published for a table so far.
	pub fn current(&self, table: TableId) -> Index {
		*self.channels[table as usize].borrow()
	}

	/// Waits until the table index passes `min_index` or the deadline
	/// fires. Returns the observed index; the index is greater than
	/// `min_index` unless the wait timed out.
	pub async fn wait(
		&self,
		table: TableId,
		min_index: Index,
		deadline: Duration,
	) -> Index {
		self.wait_any(&[table], min_index, deadline).await
	}

	/// Waits until any of the tables passes `min_index` or the deadline
	/// fires. Returns the highest index observed across the tables.
	pub async fn wait_any(
		&self,
		tables: &[TableId],
		min_index: Index,
		deadline: Duration,
	) -> Index {
		let mut receivers: Vec<watch::Receiver<Index>> = tables
			.iter()
			.map(|table| self.channels[*table as usize].subscribe())
			.collect();
		if receivers.is_empty() {
			return 0;
		}

		let wait = async {
			loop {
				let current = receivers
					.iter_mut()
					.map(|rx| *rx.borrow_and_update())
					.max()
					.unwrap_or(0);
				if current > min_index {
					return;
				}

				// park until any watched table changes
				let changed = receivers
					.iter_mut()
					.map(|rx| Box::pin(rx.changed()));
				if futures::future::select_all(changed).await.0.is_err() {
					return;
				}
			}
		};

		let _ = tokio::time::timeout(deadline, wait).await;
		receivers
			.iter()
			.map(|rx| *rx.borrow())
			.max()
			.unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn wait_returns_immediately_when_index_already_passed() {
		let watch = WatchSet::default();
		watch.notify(TableId::Kv, 10);

		let index = watch
			.wait(TableId::Kv, 5, Duration::from_secs(10))
			.await;
		assert_eq!(index, 10);
	}

	#[tokio::test]
	async fn wait_wakes_on_notify() {
		let watch = WatchSet::default();
		let waiter = watch.clone();

		let handle = tokio::spawn(async move {
			waiter.wait(TableId::Kv, 3, Duration::from_secs(10)).await
		});

		// an unrelated table does not wake the waiter
		watch.notify(TableId::Nodes, 9);
		tokio::task::yield_now().await;
		assert!(!handle.is_finished());

		watch.notify(TableId::Kv, 4);
		assert_eq!(handle.await.unwrap(), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn wait_times_out_at_deadline() {
		let watch = WatchSet::default();
		watch.notify(TableId::Kv, 2);

		let index = watch
			.wait(TableId::Kv, 2, Duration::from_millis(50))
			.await;

		// timed out without the index passing min_index
		assert_eq!(index, 2);
	}

	#[tokio::test]
	async fn stale_notify_does_not_regress() {
		let watch = WatchSet::default();
		watch.notify(TableId::Kv, 10);
		watch.notify(TableId::Kv, 4);
		assert_eq!(watch.current(TableId::Kv), 10);
	}
}
