use {
	iroh::EndpointAddr,
	serde::{Deserialize, Serialize},
	std::collections::BTreeMap,
	uuid::Uuid,
};

/// Stable node identity. Generated once per agent, persisted in the data
/// directory and reused across restarts. Two cluster members with the same
/// id are a fatal configuration error.
pub type NodeId = Uuid;

/// Human-readable node name, unique within a datacenter.
pub type NodeName = String;

/// A named partition of the LAN gossip pool. Every node belongs to exactly
/// one segment; servers are present in all segments. The empty string is the
/// default segment.
pub type Segment = String;

/// Lookup keys for per-node tagged addresses, in the fixed resolution order
/// used by the catalog when a caller asks for a specific address kind.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaggedAddressKey {
	Wan,
	LanIpv4,
	LanIpv6,
	Lan,
}

impl TaggedAddressKey {
	/// The order in which tagged addresses are consulted when resolving a
	/// node address for a caller.
	pub const LOOKUP_ORDER: [TaggedAddressKey; 4] = [
		TaggedAddressKey::Wan,
		TaggedAddressKey::LanIpv4,
		TaggedAddressKey::LanIpv6,
		TaggedAddressKey::Lan,
	];
}

/// A catalog node: one registered agent.
///
/// The transport address is the node's dialable endpoint address; tagged
/// addresses carry alternative addresses (e.g. the WAN-facing one) that the
/// catalog resolves through [`TaggedAddressKey::LOOKUP_ORDER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
	pub id: NodeId,
	pub name: NodeName,
	pub datacenter: String,
	pub segment: Segment,
	pub address: EndpointAddr,
	pub tagged_addresses: BTreeMap<TaggedAddressKey, String>,
	pub meta: BTreeMap<String, String>,
}

/// Limits on user-supplied node metadata.
pub const MAX_META_KEYS: usize = 64;
pub const MAX_META_KEY_LEN: usize = 128;
pub const MAX_META_VALUE_LEN: usize = 512;

/// Validates a node/service meta map against the size limits.
pub fn validate_meta(
	meta: &BTreeMap<String, String>,
) -> Result<(), InvalidMeta> {
	if meta.len() > MAX_META_KEYS {
		return Err(InvalidMeta::TooManyKeys(meta.len()));
	}
	for (key, value) in meta {
		if key.len() > MAX_META_KEY_LEN {
			return Err(InvalidMeta::KeyTooLong(key.clone()));
		}
		if value.len() > MAX_META_VALUE_LEN {
			return Err(InvalidMeta::ValueTooLong(key.clone()));
		}
	}
	Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidMeta {
	#[error("meta map has {0} keys, limit is {MAX_META_KEYS}")]
	TooManyKeys(usize),

	#[error("meta key {0:?} exceeds {MAX_META_KEY_LEN} bytes")]
	KeyTooLong(String),

	#[error("meta value for key {0:?} exceeds {MAX_META_VALUE_LEN} bytes")]
	ValueTooLong(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn meta_limits() {
		let mut meta = BTreeMap::new();
		for i in 0..MAX_META_KEYS {
			meta.insert(format!("key-{i}"), "value".to_string());
		}
		assert_eq!(validate_meta(&meta), Ok(()));

		meta.insert("one-too-many".to_string(), "value".to_string());
		assert!(matches!(
			validate_meta(&meta),
			Err(InvalidMeta::TooManyKeys(_))
		));

		let mut meta = BTreeMap::new();
		meta.insert("k".repeat(MAX_META_KEY_LEN + 1), String::new());
		assert!(matches!(validate_meta(&meta), Err(InvalidMeta::KeyTooLong(_))));

		let mut meta = BTreeMap::new();
		meta.insert("k".to_string(), "v".repeat(MAX_META_VALUE_LEN + 1));
		assert!(matches!(
			validate_meta(&meta),
			Err(InvalidMeta::ValueTooLong(_))
		));
	}
}
