use {
	super::service::ServiceName,
	serde::{Deserialize, Serialize},
	uuid::Uuid,
};

/// A stored service query: a reusable, named resolution of a service with
/// a fixed filter, executable by name or id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedQuery {
	pub id: Uuid,
	pub name: String,
	pub service: ServiceName,

	#[serde(default)]
	pub tag: Option<String>,

	/// Restrict results to passing instances.
	#[serde(default)]
	pub only_passing: bool,
}

/// A mesh intention: whether connections from `source` to `destination`
/// are permitted. The most specific match wins; absent intentions fall
/// back to the ACL default policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intention {
	pub id: Uuid,
	pub source: ServiceName,
	pub destination: ServiceName,
	pub action: IntentionAction,

	#[serde(default)]
	pub description: String,
}

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum IntentionAction {
	Allow,
	Deny,
}
