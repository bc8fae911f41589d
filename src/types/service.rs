use {
	super::node::TaggedAddressKey,
	serde::{Deserialize, Serialize},
	std::collections::BTreeMap,
};

/// Identifies one service instance on one node. Unique per node; the same
/// id may exist on many nodes.
pub type ServiceId = String;

/// The logical service name shared by all instances of a service.
pub type ServiceName = String;

/// One service instance registered against a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
	pub id: ServiceId,
	pub name: ServiceName,
	pub port: u16,

	/// Instance address. Empty means "use the node address".
	#[serde(default)]
	pub address: String,

	#[serde(default)]
	pub tags: Vec<String>,

	#[serde(default)]
	pub meta: BTreeMap<String, String>,

	#[serde(default)]
	pub tagged_addresses: BTreeMap<TaggedAddressKey, ServiceAddress>,

	/// When set, external registrations may update this instance's tags
	/// without the anti-entropy syncer reverting them.
	#[serde(default)]
	pub enable_tag_override: bool,

	/// The service speaks the mesh protocol natively and needs no sidecar.
	#[serde(default)]
	pub connect_native: bool,

	/// Present when this instance is a sidecar proxy for another service.
	#[serde(default)]
	pub proxy: Option<ServiceProxy>,
}

/// An address override for a specific tagged-address kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddress {
	pub address: String,
	pub port: u16,
}

/// The subset of proxy registration data the catalog tracks. Protocol
/// translation and sidecar lifecycle live outside this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProxy {
	pub destination_service_name: ServiceName,

	#[serde(default)]
	pub destination_service_id: Option<ServiceId>,
}

impl Service {
	/// Resolves the effective address and port for a caller asking for a
	/// specific tagged-address kind, falling back through the fixed lookup
	/// order and finally to the plain instance address.
	pub fn address_for(
		&self,
		key: Option<TaggedAddressKey>,
	) -> (String, u16) {
		let keys: &[TaggedAddressKey] = match key {
			Some(key) => &[key],
			None => &TaggedAddressKey::LOOKUP_ORDER,
		};

		for key in keys {
			if let Some(tagged) = self.tagged_addresses.get(key) {
				return (tagged.address.clone(), tagged.port);
			}
		}

		(self.address.clone(), self.port)
	}

	/// Returns true if this instance carries the given tag.
	pub fn has_tag(&self, tag: &str) -> bool {
		self.tags.iter().any(|t| t == tag)
	}
}
