use {
	super::session::SessionId,
	bytes::Bytes,
	serde::{Deserialize, Serialize},
};

/// One key/value entry.
///
/// `lock_session` is the session currently holding the lock on this entry,
/// if any. A session appears as the lock holder of at most one entry per
/// path; lock transitions happen only through committed acquire/release
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
	pub key: String,
	pub value: Bytes,

	/// Opaque caller-owned bits stored with the entry.
	#[serde(default)]
	pub flags: u64,

	#[serde(default)]
	pub lock_session: Option<SessionId>,

	/// Number of times this entry has been locked. Bumped on every
	/// successful acquire by a different session, which lets lock holders
	/// detect that a lock was lost and re-acquired in between reads.
	#[serde(default)]
	pub lock_index: u64,
}

impl KvEntry {
	pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
			flags: 0,
			lock_session: None,
			lock_index: 0,
		}
	}
}
