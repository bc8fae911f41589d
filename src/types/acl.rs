use {
	crate::primitives::Redacted,
	core::fmt,
	serde::{Deserialize, Serialize},
	uuid::Uuid,
};

/// Public token identity, safe to log and list.
pub type AclTokenId = Uuid;

/// An ACL token. The secret id authenticates requests; the accessor id
/// names the token in management APIs without exposing the secret.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
	pub accessor_id: AclTokenId,
	pub secret_id: Uuid,

	#[serde(default)]
	pub description: String,

	/// Names of the policies granted to this token directly, resolved at
	/// authorization time.
	#[serde(default)]
	pub policies: Vec<String>,

	/// Names of the roles granted to this token; each role expands into
	/// its own policy list at authorization time.
	#[serde(default)]
	pub roles: Vec<String>,

	/// Service identities: each grants write on the named service and
	/// read on the catalog around it, without a hand-written policy.
	#[serde(default)]
	pub service_identities: Vec<ServiceIdentity>,

	/// Node identities: each grants write on the named node and read on
	/// the services it hosts.
	#[serde(default)]
	pub node_identities: Vec<NodeIdentity>,

	/// Local tokens are readable only in the datacenter that created them;
	/// global tokens are replicated from the primary datacenter.
	#[serde(default)]
	pub local: bool,
}

impl Token {
	/// The rules implied by the token's service and node identities,
	/// synthesized at resolution time and merged with the policy rules.
	pub fn identity_rules(&self) -> Vec<AclRule> {
		let mut rules = Vec::new();

		for identity in &self.service_identities {
			rules.push(AclRule {
				resource: Resource::Service,
				prefix: identity.service_name.clone(),
				permission: Permission::Write,
			});
			// registering an instance requires reading the nodes it may
			// land on
			rules.push(AclRule {
				resource: Resource::Node,
				prefix: String::new(),
				permission: Permission::Read,
			});
		}

		for identity in &self.node_identities {
			rules.push(AclRule {
				resource: Resource::Node,
				prefix: identity.node_name.clone(),
				permission: Permission::Write,
			});
			rules.push(AclRule {
				resource: Resource::Service,
				prefix: String::new(),
				permission: Permission::Read,
			});
		}

		rules
	}
}

impl fmt::Debug for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Token")
			.field("accessor_id", &self.accessor_id)
			.field("secret_id", &Redacted(&self.secret_id))
			.field("policies", &self.policies)
			.field("roles", &self.roles)
			.field("service_identities", &self.service_identities)
			.field("node_identities", &self.node_identities)
			.field("local", &self.local)
			.finish_non_exhaustive()
	}
}

/// Grants a token the permissions a service instance needs, scoped by
/// datacenter when the list is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
	pub service_name: String,

	#[serde(default)]
	pub datacenters: Vec<String>,
}

/// Grants a token the permissions an agent needs for its own node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
	pub node_name: String,

	#[serde(default)]
	pub datacenter: Option<String>,
}

/// The resource kinds rules can be written against.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
	Acl,
	Agent,
	Key,
	Node,
	Service,
	Session,
}

/// Access level granted by a rule. `Deny` always wins over grants from
/// other matching rules.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
	Deny,
	Read,
	Write,
}

/// One rule: resource kind + name prefix + granted access. The most
/// specific (longest) matching prefix decides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
	pub resource: Resource,
	pub prefix: String,
	pub permission: Permission,
}

/// A named, reusable set of rules referenced by tokens and roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPolicy {
	pub name: String,

	#[serde(default)]
	pub rules: Vec<AclRule>,
}

/// A named bundle of policies. Tokens reference roles to pick up whole
/// policy sets at once; the role expands into its policies at
/// authorization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRole {
	pub name: String,

	#[serde(default)]
	pub policies: Vec<String>,
}

impl AclPolicy {
	/// Returns the permission the policy grants for `name` under
	/// `resource`, if any rule matches.
	pub fn permission_for(
		&self,
		resource: Resource,
		name: &str,
	) -> Option<Permission> {
		self.rules
			.iter()
			.filter(|rule| {
				rule.resource == resource && name.starts_with(&rule.prefix)
			})
			.max_by_key(|rule| rule.prefix.len())
			.map(|rule| rule.permission)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn longest_prefix_wins() {
		let policy = AclPolicy {
			name: "kv".to_string(),
			rules: vec![
				AclRule {
					resource: Resource::Key,
					prefix: String::new(),
					permission: Permission::Read,
				},
				AclRule {
					resource: Resource::Key,
					prefix: "private/".to_string(),
					permission: Permission::Deny,
				},
			],
		};

		assert_eq!(
			policy.permission_for(Resource::Key, "public/x"),
			Some(Permission::Read)
		);
		assert_eq!(
			policy.permission_for(Resource::Key, "private/x"),
			Some(Permission::Deny)
		);
		assert_eq!(policy.permission_for(Resource::Service, "web"), None);
	}

	#[test]
	fn debug_redacts_secret() {
		let token = Token {
			accessor_id: Uuid::new_v4(),
			secret_id: Uuid::new_v4(),
			description: String::new(),
			policies: vec![],
			roles: vec![],
			service_identities: vec![],
			node_identities: vec![],
			local: false,
		};

		let formatted = format!("{token:?}");
		assert!(formatted.contains("<redacted>"));
		assert!(!formatted.contains(&token.secret_id.to_string()));
	}

	#[test]
	fn identity_rules_cover_their_subjects() {
		let token = Token {
			accessor_id: Uuid::new_v4(),
			secret_id: Uuid::new_v4(),
			description: String::new(),
			policies: vec![],
			roles: vec![],
			service_identities: vec![ServiceIdentity {
				service_name: "web".to_string(),
				datacenters: vec![],
			}],
			node_identities: vec![NodeIdentity {
				node_name: "n1".to_string(),
				datacenter: None,
			}],
			local: false,
		};

		let rules = token.identity_rules();
		assert!(rules.iter().any(|r| r.resource == Resource::Service
			&& r.prefix == "web"
			&& r.permission == Permission::Write));
		assert!(rules.iter().any(|r| r.resource == Resource::Node
			&& r.prefix == "n1"
			&& r.permission == Permission::Write));
		// identities also read around their subject
		assert!(rules.iter().any(|r| r.resource == Resource::Node
			&& r.prefix.is_empty()
			&& r.permission == Permission::Read));
	}
}
