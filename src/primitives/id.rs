use {
	crate::primitives::Short,
	core::{convert::Infallible, fmt, str::FromStr},
	derive_more::Deref,
	serde::{Deserialize, Deserializer, Serialize, de},
};

/// Identifies a cluster (a gossip pool domain). It is a 32-byte array derived
/// as the Blake3 hash of the cluster name, so two agents configured with the
/// same datacenter and cluster name independently derive the same id.
///
/// Pool membership messages carry this id and peers with a mismatching id are
/// rejected during join validation.
///
/// Notes:
///  - when serialized to human readable formats (e.g., JSON), ids are
///    represented as hex-encoded strings.
///  - when serialized to binary formats, ids are raw 32-byte arrays.
#[derive(Clone, Copy, Deref)]
pub struct ClusterId(blake3::Hash);

impl<T: AsRef<str>> From<T> for ClusterId {
	fn from(s: T) -> Self {
		let s = s.as_ref();
		// if the string is already a 32-byte hex string, decode it directly
		// otherwise, hash it to produce the id
		match hex::decode(s) {
			Ok(b) if b.len() == 32 => {
				ClusterId(blake3::Hash::from_slice(&b).expect("slice is 32 bytes"))
			}
			_ => ClusterId(blake3::hash(s.as_bytes())),
		}
	}
}

impl PartialEq for ClusterId {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}
impl Eq for ClusterId {}

impl PartialOrd for ClusterId {
	fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for ClusterId {
	fn cmp(&self, other: &Self) -> core::cmp::Ordering {
		self.0.as_bytes().cmp(other.0.as_bytes())
	}
}

impl core::hash::Hash for ClusterId {
	fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
		self.0.as_bytes().hash(state);
	}
}

impl AsRef<[u8]> for ClusterId {
	fn as_ref(&self) -> &[u8] {
		self.0.as_bytes()
	}
}

impl From<ClusterId> for [u8; 32] {
	fn from(id: ClusterId) -> Self {
		*id.0.as_bytes()
	}
}

impl FromStr for ClusterId {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(ClusterId::from(s))
	}
}

impl fmt::Debug for ClusterId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.to_hex())
	}
}

impl fmt::Display for ClusterId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", Short(self.0.as_bytes()))
	}
}

impl Serialize for ClusterId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		if serializer.is_human_readable() {
			serializer.serialize_str(self.0.to_hex().as_str())
		} else {
			self.0.serialize(serializer)
		}
	}
}

impl<'de> Deserialize<'de> for ClusterId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		if deserializer.is_human_readable() {
			let s = String::deserialize(deserializer)?;
			Ok(ClusterId(
				blake3::Hash::from_hex(&s).map_err(de::Error::custom)?,
			))
		} else {
			let bytes = <[u8; 32]>::deserialize(deserializer)?;
			Ok(ClusterId(blake3::Hash::from_bytes(bytes)))
		}
	}
}

impl ClusterId {
	/// Returns the byte representation of the cluster id.
	pub fn as_bytes(&self) -> &[u8; 32] {
		self.0.as_bytes()
	}

	/// Creates a cluster id from the given bytes.
	pub fn from_bytes(bytes: impl Into<[u8; 32]>) -> Self {
		ClusterId(blake3::Hash::from_bytes(bytes.into()))
	}

	/// Generates a random cluster id.
	pub fn random() -> Self {
		ClusterId(blake3::Hash::from_bytes(rand::random()))
	}
}
