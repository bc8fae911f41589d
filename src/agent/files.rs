use {
	crate::{Error, types::NodeId},
	parking_lot::Mutex,
	std::{
		fs,
		path::{Path, PathBuf},
	},
	uuid::Uuid,
};

/// The agent's on-disk layout under `data_dir`:
///
/// ```text
/// <data_dir>/
///   node-id            stable node identity
///   transport-key      endpoint secret key
///   serf/keyring       gossip encryption keys, primary first
///   raft/log           consensus log
///   raft/snapshots/    state snapshots
/// ```
pub struct DataDir {
	root: PathBuf,
}

impl DataDir {
	/// Opens the data directory. It must already exist and be writable;
	/// a non-empty legacy store directory is refused as unmigratable.
	pub fn prepare(root: impl AsRef<Path>) -> Result<Self, Error> {
		let root = root.as_ref().to_path_buf();

		if !root.is_dir() {
			return Err(Error::Config(format!(
				"data_dir {root:?} does not exist or is not a directory"
			)));
		}

		// refuse data dirs left behind by the legacy storage backend
		let legacy = root.join("mdb");
		if legacy.is_dir()
			&& fs::read_dir(&legacy)
				.map(|mut entries| entries.next().is_some())
				.unwrap_or(false)
		{
			return Err(Error::Config(format!(
				"data_dir contains a non-empty legacy {legacy:?} directory; \
				 refusing to start"
			)));
		}

		// writability probe
		let probe = root.join(".probe");
		fs::write(&probe, b"")
			.and_then(|()| fs::remove_file(&probe))
			.map_err(|e| {
				Error::Config(format!("data_dir {root:?} is not writable: {e}"))
			})?;

		for sub in ["raft", "raft/snapshots", "serf"] {
			fs::create_dir_all(root.join(sub)).map_err(|e| {
				Error::Fatal(format!("cannot create {sub:?} under data_dir: {e}"))
			})?;
		}

		Ok(Self { root })
	}

	/// Loads the persisted node id, generating one on first start.
	/// A corrupt file is fatal rather than silently regenerated: a node
	/// that changes identity underneath the cluster wreaks havoc on the
	/// catalog.
	pub fn node_id(&self) -> Result<NodeId, Error> {
		let path = self.root.join("node-id");

		if path.exists() {
			let raw = fs::read_to_string(&path)
				.map_err(|e| Error::Fatal(format!("node-id unreadable: {e}")))?;
			return raw.trim().parse::<Uuid>().map_err(|e| {
				Error::Fatal(format!("node-id file corrupt: {e}"))
			});
		}

		let id = Uuid::new_v4();
		fs::write(&path, id.to_string())
			.map_err(|e| Error::Fatal(format!("cannot persist node-id: {e}")))?;
		Ok(id)
	}

	/// Loads the transport secret key, generating one on first start.
	pub fn secret_key(&self) -> Result<iroh::SecretKey, Error> {
		let path = self.root.join("transport-key");

		if path.exists() {
			let raw = fs::read_to_string(&path).map_err(|e| {
				Error::Fatal(format!("transport-key unreadable: {e}"))
			})?;
			let bytes: [u8; 32] = hex::decode(raw.trim())
				.ok()
				.and_then(|b| b.try_into().ok())
				.ok_or_else(|| {
					Error::Fatal("transport-key file corrupt".to_string())
				})?;
			return Ok(iroh::SecretKey::from_bytes(&bytes));
		}

		let key = iroh::SecretKey::generate();
		fs::write(&path, hex::encode(key.to_bytes())).map_err(|e| {
			Error::Fatal(format!("cannot persist transport-key: {e}"))
		})?;
		Ok(key)
	}

	/// Opens the gossip keyring, seeding it with `initial` when the file
	/// does not exist yet.
	pub fn keyring(
		&self,
		initial: Option<[u8; 32]>,
	) -> Result<Keyring, Error> {
		Keyring::open(self.root.join("serf").join("keyring"), initial)
	}

	pub fn raft_log_path(&self) -> PathBuf {
		self.root.join("raft").join("log")
	}

	pub fn snapshots_dir(&self) -> PathBuf {
		self.root.join("raft").join("snapshots")
	}
}

/// The gossip encryption keyring: an ordered list of keys, primary first.
/// Read-mostly; rotation (install / use / remove) is serialized behind a
/// lock and persisted atomically.
pub struct Keyring {
	path: PathBuf,
	keys: Mutex<Vec<[u8; 32]>>,
}

impl Keyring {
	fn open(
		path: PathBuf,
		initial: Option<[u8; 32]>,
	) -> Result<Self, Error> {
		let keys: Vec<[u8; 32]> = if path.exists() {
			let raw = fs::read_to_string(&path)
				.map_err(|e| Error::Fatal(format!("keyring unreadable: {e}")))?;
			let listed: Vec<String> =
				serde_json::from_str(&raw).map_err(|e| {
					Error::Fatal(format!("keyring file corrupt: {e}"))
				})?;
			listed
				.iter()
				.map(|k| {
					hex::decode(k)
						.ok()
						.and_then(|b| b.try_into().ok())
						.ok_or_else(|| {
							Error::Fatal("keyring key corrupt".to_string())
						})
				})
				.collect::<Result<_, _>>()?
		} else {
			initial.into_iter().collect()
		};

		let keyring = Self {
			path,
			keys: Mutex::new(keys),
		};
		keyring.persist()?;
		Ok(keyring)
	}

	/// The primary key, if any. Feeds the cluster identity so peers with
	/// mismatched keys fail join validation.
	pub fn primary(&self) -> Option<[u8; 32]> {
		self.keys.lock().first().copied()
	}

	/// Installs a key at the end of the ring.
	pub fn install(&self, key: [u8; 32]) -> Result<(), Error> {
		{
			let mut keys = self.keys.lock();
			if !keys.contains(&key) {
				keys.push(key);
			}
		}
		self.persist()
	}

	/// Promotes an installed key to primary.
	pub fn use_key(&self, key: [u8; 32]) -> Result<(), Error> {
		{
			let mut keys = self.keys.lock();
			let Some(position) = keys.iter().position(|k| *k == key) else {
				return Err(Error::ConsistencyViolation(
					"key is not installed".to_string(),
				));
			};
			keys.swap(0, position);
		}
		self.persist()
	}

	/// Removes a non-primary key.
	pub fn remove(&self, key: [u8; 32]) -> Result<(), Error> {
		{
			let mut keys = self.keys.lock();
			if keys.first() == Some(&key) {
				return Err(Error::ConsistencyViolation(
					"cannot remove the primary key".to_string(),
				));
			}
			keys.retain(|k| *k != key);
		}
		self.persist()
	}

	pub fn len(&self) -> usize {
		self.keys.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn persist(&self) -> Result<(), Error> {
		let listed: Vec<String> = self
			.keys
			.lock()
			.iter()
			.map(hex::encode)
			.collect();
		let raw = serde_json::to_string_pretty(&listed)
			.map_err(|e| Error::Fatal(format!("keyring encode: {e}")))?;

		let tmp = self.path.with_extension("tmp");
		fs::write(&tmp, raw)
			.and_then(|()| fs::rename(&tmp, &self.path))
			.map_err(|e| Error::Fatal(format!("cannot persist keyring: {e}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn node_id_is_stable_across_restarts() {
		let dir = tempfile::tempdir().unwrap();
		let data = DataDir::prepare(dir.path()).unwrap();

		let first = data.node_id().unwrap();
		let second = data.node_id().unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn corrupt_node_id_is_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let data = DataDir::prepare(dir.path()).unwrap();
		fs::write(dir.path().join("node-id"), "not-a-uuid").unwrap();

		assert!(matches!(data.node_id(), Err(Error::Fatal(_))));
	}

	#[test]
	fn missing_data_dir_is_a_config_error() {
		assert!(matches!(
			DataDir::prepare("/definitely/not/here"),
			Err(Error::Config(_))
		));
	}

	#[test]
	fn legacy_subdirectory_is_refused() {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir(dir.path().join("mdb")).unwrap();
		fs::write(dir.path().join("mdb").join("data"), b"x").unwrap();

		assert!(matches!(
			DataDir::prepare(dir.path()),
			Err(Error::Config(_))
		));
	}

	#[test]
	fn keyring_rotation() {
		let dir = tempfile::tempdir().unwrap();
		let data = DataDir::prepare(dir.path()).unwrap();

		let first = [1u8; 32];
		let second = [2u8; 32];

		let keyring = data.keyring(Some(first)).unwrap();
		assert_eq!(keyring.primary(), Some(first));

		keyring.install(second).unwrap();
		assert_eq!(keyring.len(), 2);
		assert_eq!(keyring.primary(), Some(first));

		keyring.use_key(second).unwrap();
		assert_eq!(keyring.primary(), Some(second));

		// the primary cannot be removed
		assert!(keyring.remove(second).is_err());
		keyring.remove(first).unwrap();
		assert_eq!(keyring.len(), 1);

		// rotation survives a reopen
		let reopened = data.keyring(None).unwrap();
		assert_eq!(reopened.primary(), Some(second));
	}
}
