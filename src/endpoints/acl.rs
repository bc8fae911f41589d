//! ACL token resolution and enforcement.
//!
//! Resolution walks `secret → token → policies + roles → rules` against
//! the replicated state: the token's direct policies, the policies of
//! each of its roles, and the rules synthesized from its service/node
//! identities all merge into one authorizer. Each tier is cached under
//! its own TTL (`token_ttl`, `policy_ttl`, `role_ttl`). When a token
//! cannot be resolved locally and this datacenter is not the primary
//! (replication may lag or the primary may be partitioned away), the
//! configured down-policy decides.

use {
	crate::{
		rpc::{RequestPayload, RpcError},
		state::StoreState,
		types::{AclRule, Permission, Resource},
	},
	core::time::Duration,
	parking_lot::Mutex,
	serde::{Deserialize, Serialize},
	std::{
		collections::HashMap,
		time::Instant,
	},
	uuid::Uuid,
};

/// Behavior when a token cannot be resolved because the primary
/// datacenter is unreachable.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DownPolicy {
	/// Refuse all requests.
	Deny,

	/// Allow all requests.
	Allow,

	/// Keep serving cached resolutions past their TTL.
	#[default]
	ExtendCache,

	/// Like extend-cache, refreshing in the background when possible.
	AsyncCache,
}

#[derive(Debug, Clone)]
pub struct AclConfig {
	pub enabled: bool,

	/// Policy applied to requests without a matching rule (and to
	/// anonymous requests).
	pub default_allow: bool,

	pub down_policy: DownPolicy,

	/// How long a fully resolved token (its merged authorizer) stays
	/// fresh.
	pub token_ttl: Duration,

	/// How long a policy's rule set stays fresh in the policy tier.
	pub policy_ttl: Duration,

	/// How long a role's policy list stays fresh in the role tier.
	pub role_ttl: Duration,

	/// Whether this datacenter is the primary (the authority for global
	/// tokens).
	pub primary: bool,
}

impl Default for AclConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			default_allow: true,
			down_policy: DownPolicy::default(),
			token_ttl: Duration::from_secs(30),
			policy_ttl: Duration::from_secs(30),
			role_ttl: Duration::from_secs(30),
			primary: true,
		}
	}
}

/// The merged rule set of one resolved token.
#[derive(Debug, Clone)]
pub struct Authorizer {
	default_allow: bool,
	rules: Vec<AclRule>,
}

impl Authorizer {
	fn allow_all() -> Self {
		Self {
			default_allow: true,
			rules: Vec::new(),
		}
	}

	fn with_default(default_allow: bool) -> Self {
		Self {
			default_allow,
			rules: Vec::new(),
		}
	}

	/// Whether the token grants at least `needed` on `name` under
	/// `resource`. The longest matching prefix across all rules decides;
	/// an explicit deny always refuses.
	pub fn allows(
		&self,
		resource: Resource,
		name: &str,
		needed: Permission,
	) -> bool {
		let decided = self
			.rules
			.iter()
			.filter(|rule| {
				rule.resource == resource && name.starts_with(&rule.prefix)
			})
			.max_by_key(|rule| rule.prefix.len())
			.map(|rule| rule.permission);

		match decided {
			Some(Permission::Deny) => false,
			Some(granted) => granted >= needed,
			None => self.default_allow,
		}
	}
}

struct Cached<T> {
	value: T,
	resolved_at: Instant,
}

impl<T: Clone> Cached<T> {
	fn fresh(&self, ttl: Duration) -> Option<T> {
		(self.resolved_at.elapsed() < ttl).then(|| self.value.clone())
	}
}

/// The resolver, shared by the RPC dispatcher.
///
/// Three cache tiers, each with its own TTL: resolved tokens (the merged
/// authorizer, `token_ttl`), policy rule sets (`policy_ttl`) and role
/// policy lists (`role_ttl`). A token refresh within its roles' and
/// policies' TTLs reuses those tiers instead of re-reading the state.
pub struct Acl {
	config: AclConfig,
	tokens: Mutex<HashMap<Uuid, Cached<Authorizer>>>,
	policies: Mutex<HashMap<String, Cached<Vec<AclRule>>>>,
	roles: Mutex<HashMap<String, Cached<Vec<String>>>>,
}

impl Acl {
	pub fn new(config: AclConfig) -> Self {
		Self {
			config,
			tokens: Mutex::new(HashMap::new()),
			policies: Mutex::new(HashMap::new()),
			roles: Mutex::new(HashMap::new()),
		}
	}

	pub const fn enabled(&self) -> bool {
		self.config.enabled
	}

	/// Resolves a request token into an authorizer.
	pub fn resolve(
		&self,
		state: &StoreState,
		secret: Option<Uuid>,
	) -> Result<Authorizer, RpcError> {
		if !self.config.enabled {
			return Ok(Authorizer::allow_all());
		}

		let Some(secret) = secret else {
			// anonymous requests get the default policy
			return Ok(Authorizer::with_default(self.config.default_allow));
		};

		self.sweep_cache();

		// fast path: the merged authorizer is still within the token TTL
		if let Some(cached) = self
			.tokens
			.lock()
			.get(&secret)
			.and_then(|c| c.fresh(self.config.token_ttl))
		{
			return Ok(cached);
		}

		if let Some(token) = state.token_by_secret(&secret) {
			// direct policies, then each role expanded into its policies
			let mut policy_names: Vec<String> = token.policies.clone();
			for role_name in &token.roles {
				match self.role_policies(state, role_name) {
					Some(policies) => policy_names.extend(policies),
					None => {
						tracing::warn!(
							role = %role_name,
							"token references unknown role",
						);
					}
				}
			}

			let mut rules = Vec::new();
			for policy_name in &policy_names {
				match self.policy_rules(state, policy_name) {
					Some(policy_rules) => rules.extend(policy_rules),
					None => {
						tracing::warn!(
							policy = %policy_name,
							"token references unknown policy",
						);
					}
				}
			}

			// permissions implied by service/node identities
			rules.extend(token.identity_rules());

			let authorizer = Authorizer {
				default_allow: self.config.default_allow,
				rules,
			};
			self.tokens.lock().insert(secret, Cached {
				value: authorizer.clone(),
				resolved_at: Instant::now(),
			});
			return Ok(authorizer);
		}

		// unknown secret: authoritative refusal in the primary, the
		// down-policy elsewhere
		if self.config.primary {
			return Err(RpcError::PermissionDenied);
		}

		match self.config.down_policy {
			DownPolicy::Deny => Err(RpcError::PermissionDenied),
			DownPolicy::Allow => Ok(Authorizer::allow_all()),
			DownPolicy::ExtendCache | DownPolicy::AsyncCache => self
				.tokens
				.lock()
				.get(&secret)
				.map(|cached| cached.value.clone())
				.ok_or(RpcError::PermissionDenied),
		}
	}

	/// The role tier: a role's policy list, served from cache within
	/// `role_ttl` and refreshed from the state otherwise. A role that
	/// vanished from the state keeps serving its cached expansion until
	/// the TTL lapses.
	fn role_policies(
		&self,
		state: &StoreState,
		name: &str,
	) -> Option<Vec<String>> {
		if let Some(cached) = self
			.roles
			.lock()
			.get(name)
			.and_then(|c| c.fresh(self.config.role_ttl))
		{
			return Some(cached);
		}

		let policies = state.role(name).map(|role| role.policies.clone());
		if let Some(policies) = &policies {
			self.roles.lock().insert(name.to_string(), Cached {
				value: policies.clone(),
				resolved_at: Instant::now(),
			});
		}
		policies
	}

	/// The policy tier: a policy's rule set, served from cache within
	/// `policy_ttl` and refreshed from the state otherwise.
	fn policy_rules(
		&self,
		state: &StoreState,
		name: &str,
	) -> Option<Vec<AclRule>> {
		if let Some(cached) = self
			.policies
			.lock()
			.get(name)
			.and_then(|c| c.fresh(self.config.policy_ttl))
		{
			return Some(cached);
		}

		let rules = state.policy(name).map(|policy| policy.rules.clone());
		if let Some(rules) = &rules {
			self.policies.lock().insert(name.to_string(), Cached {
				value: rules.clone(),
				resolved_at: Instant::now(),
			});
		}
		rules
	}

	/// Evicts expired entries from every cache tier. With a down-policy
	/// of extend-cache/async-cache the token tier is kept past its TTL
	/// and only replaced on successful resolution.
	pub fn sweep_cache(&self) {
		let keep_stale_tokens = matches!(
			self.config.down_policy,
			DownPolicy::ExtendCache | DownPolicy::AsyncCache
		);

		if !keep_stale_tokens {
			let ttl = self.config.token_ttl;
			self
				.tokens
				.lock()
				.retain(|_, cached| cached.resolved_at.elapsed() < ttl);
		}

		let ttl = self.config.policy_ttl;
		self
			.policies
			.lock()
			.retain(|_, cached| cached.resolved_at.elapsed() < ttl);

		let ttl = self.config.role_ttl;
		self
			.roles
			.lock()
			.retain(|_, cached| cached.resolved_at.elapsed() < ttl);
	}
}

/// The permission a request needs, as `(resource, name, permission)`.
/// `None` means the operation is not ACL-gated (e.g. chain compilation
/// reads are service reads).
pub fn required(
	payload: &RequestPayload,
) -> Option<(Resource, String, Permission)> {
	use RequestPayload::*;

	Some(match payload {
		Register { node, .. } => {
			(Resource::Node, node.name.clone(), Permission::Write)
		}
		DeregisterNode { node }
		| DeregisterService { node, .. }
		| DeregisterCheck { node, .. }
		| UpdateCheck { node, .. } => {
			(Resource::Node, node.clone(), Permission::Write)
		}
		ListNodes => (Resource::Node, String::new(), Permission::Read),
		NodeServices { node } | NodeChecks { node } => {
			(Resource::Node, node.clone(), Permission::Read)
		}
		ListServices => {
			(Resource::Service, String::new(), Permission::Read)
		}
		ServiceNodes { service, .. } | ServiceHealth { service, .. } => {
			(Resource::Service, service.clone(), Permission::Read)
		}
		CompileChain { service } => {
			(Resource::Service, service.clone(), Permission::Read)
		}

		KvGet { key } | KvList { prefix: key } => {
			(Resource::Key, key.clone(), Permission::Read)
		}
		KvPut { entry }
		| KvCas { entry, .. }
		| KvAcquire { entry, .. } => {
			(Resource::Key, entry.key.clone(), Permission::Write)
		}
		KvDelete { key }
		| KvDeleteCas { key, .. }
		| KvRelease { key, .. } => {
			(Resource::Key, key.clone(), Permission::Write)
		}

		SessionCreate { session } => {
			(Resource::Session, session.node.clone(), Permission::Write)
		}
		SessionRenew { .. } | SessionDestroy { .. } => {
			(Resource::Session, String::new(), Permission::Write)
		}
		SessionGet { .. } | SessionList => {
			(Resource::Session, String::new(), Permission::Read)
		}

		AclTokenUpsert { .. }
		| AclTokenDelete { .. }
		| AclPolicyUpsert { .. }
		| AclPolicyDelete { .. }
		| AclRoleUpsert { .. }
		| AclRoleDelete { .. } => {
			(Resource::Acl, String::new(), Permission::Write)
		}

		ConfigApply { entry } => (
			Resource::Service,
			entry.name().to_string(),
			Permission::Write,
		),
		ConfigDelete { name, .. } => {
			(Resource::Service, name.clone(), Permission::Write)
		}
		ConfigGet { name, .. } => {
			(Resource::Service, name.clone(), Permission::Read)
		}
		ConfigList { .. } => {
			(Resource::Service, String::new(), Permission::Read)
		}

		CoordinateUpdate { node, .. } => {
			(Resource::Node, node.clone(), Permission::Write)
		}
		CoordinateGet { node } => {
			(Resource::Node, node.clone(), Permission::Read)
		}

		PreparedQueryUpsert { query } => (
			Resource::Service,
			query.service.clone(),
			Permission::Write,
		),
		PreparedQueryDelete { .. } => {
			(Resource::Service, String::new(), Permission::Write)
		}
		PreparedQueryExecute { .. } => {
			(Resource::Service, String::new(), Permission::Read)
		}

		IntentionUpsert { intention } => (
			Resource::Service,
			intention.destination.clone(),
			Permission::Write,
		),
		IntentionDelete { .. } => {
			(Resource::Service, String::new(), Permission::Write)
		}
		IntentionList => {
			(Resource::Service, String::new(), Permission::Read)
		}
		IntentionCheck { destination, .. } => {
			(Resource::Service, destination.clone(), Permission::Read)
		}
	})
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::types::{AclPolicy, AclRole, ServiceIdentity, Token},
	};

	fn token(secret: Uuid, policies: Vec<&str>, roles: Vec<&str>) -> Token {
		Token {
			accessor_id: Uuid::new_v4(),
			secret_id: secret,
			description: String::new(),
			policies: policies.into_iter().map(str::to_string).collect(),
			roles: roles.into_iter().map(str::to_string).collect(),
			service_identities: vec![],
			node_identities: vec![],
			local: false,
		}
	}

	fn state_with_token(
		secret: Uuid,
		policies: Vec<&str>,
	) -> StoreState {
		let mut state = StoreState::default();
		state.acl_policy_upsert(
			AclPolicy {
				name: "kv-read".to_string(),
				rules: vec![AclRule {
					resource: Resource::Key,
					prefix: "app/".to_string(),
					permission: Permission::Read,
				}],
			},
			1,
		);
		state.acl_token_upsert(token(secret, policies, vec![]), 2);
		state
	}

	fn acl(default_allow: bool, primary: bool) -> Acl {
		Acl::new(AclConfig {
			enabled: true,
			default_allow,
			primary,
			..AclConfig::default()
		})
	}

	#[test]
	fn resolution_walks_token_policies_rules() {
		let secret = Uuid::new_v4();
		let state = state_with_token(secret, vec!["kv-read"]);
		let acl = acl(false, true);

		let authz = acl.resolve(&state, Some(secret)).unwrap();
		assert!(authz.allows(Resource::Key, "app/config", Permission::Read));
		assert!(!authz.allows(
			Resource::Key,
			"app/config",
			Permission::Write
		));
		assert!(!authz.allows(Resource::Key, "other", Permission::Read));
	}

	#[test]
	fn roles_expand_into_their_policies() {
		let secret = Uuid::new_v4();
		let mut state = StoreState::default();
		state.acl_policy_upsert(
			AclPolicy {
				name: "kv-write".to_string(),
				rules: vec![AclRule {
					resource: Resource::Key,
					prefix: "app/".to_string(),
					permission: Permission::Write,
				}],
			},
			1,
		);
		state.acl_role_upsert(
			AclRole {
				name: "operator".to_string(),
				policies: vec!["kv-write".to_string()],
			},
			2,
		);
		// the token carries no direct policies, only the role
		state.acl_token_upsert(token(secret, vec![], vec!["operator"]), 3);

		let acl = acl(false, true);
		let authz = acl.resolve(&state, Some(secret)).unwrap();
		assert!(authz.allows(Resource::Key, "app/k", Permission::Write));
		assert!(!authz.allows(Resource::Key, "other", Permission::Read));
	}

	#[test]
	fn service_identity_grants_without_policies() {
		let secret = Uuid::new_v4();
		let mut state = StoreState::default();
		let mut t = token(secret, vec![], vec![]);
		t.service_identities = vec![ServiceIdentity {
			service_name: "web".to_string(),
			datacenters: vec![],
		}];
		state.acl_token_upsert(t, 1);

		let acl = acl(false, true);
		let authz = acl.resolve(&state, Some(secret)).unwrap();
		assert!(authz.allows(Resource::Service, "web", Permission::Write));
		assert!(authz.allows(Resource::Node, "n1", Permission::Read));
		assert!(!authz.allows(Resource::Key, "k", Permission::Read));
	}

	#[test]
	fn tiered_caches_survive_entity_loss_within_ttl() {
		let secret = Uuid::new_v4();
		let mut state = StoreState::default();
		state.acl_policy_upsert(
			AclPolicy {
				name: "kv-read".to_string(),
				rules: vec![AclRule {
					resource: Resource::Key,
					prefix: "app/".to_string(),
					permission: Permission::Read,
				}],
			},
			1,
		);
		state.acl_role_upsert(
			AclRole {
				name: "reader".to_string(),
				policies: vec!["kv-read".to_string()],
			},
			2,
		);
		state.acl_token_upsert(token(secret, vec![], vec!["reader"]), 3);

		let acl = Acl::new(AclConfig {
			enabled: true,
			default_allow: false,
			// force the token walk to repeat while the role and policy
			// tiers stay warm
			token_ttl: Duration::ZERO,
			..AclConfig::default()
		});

		// warm the role and policy tiers
		acl.resolve(&state, Some(secret)).unwrap();

		// the role and policy rows vanish (replication churn); the token
		// row stays, and the warm tiers keep resolution working
		let mut churned = state.clone();
		churned.acl_role_delete("reader", 4);
		churned.acl_policy_delete("kv-read", 5);

		let authz = acl.resolve(&churned, Some(secret)).unwrap();
		assert!(authz.allows(Resource::Key, "app/k", Permission::Read));
	}

	#[test]
	fn unknown_secret_denied_in_primary() {
		let state = StoreState::default();
		let acl = acl(true, true);

		assert!(matches!(
			acl.resolve(&state, Some(Uuid::new_v4())),
			Err(RpcError::PermissionDenied)
		));
	}

	#[test]
	fn down_policy_extend_cache_serves_cached() {
		let secret = Uuid::new_v4();
		let state = state_with_token(secret, vec!["kv-read"]);
		let acl = Acl::new(AclConfig {
			enabled: true,
			default_allow: false,
			primary: false,
			down_policy: DownPolicy::ExtendCache,
			..AclConfig::default()
		});

		// warm the cache while the token is resolvable
		acl.resolve(&state, Some(secret)).unwrap();

		// the token disappears locally (replication gap)
		let empty = StoreState::default();
		let authz = acl.resolve(&empty, Some(secret)).unwrap();
		assert!(authz.allows(Resource::Key, "app/x", Permission::Read));

		// a never-seen token still fails
		assert!(matches!(
			acl.resolve(&empty, Some(Uuid::new_v4())),
			Err(RpcError::PermissionDenied)
		));
	}

	#[test]
	fn anonymous_requests_get_default_policy() {
		let state = StoreState::default();

		let allow = acl(true, true);
		assert!(allow
			.resolve(&state, None)
			.unwrap()
			.allows(Resource::Key, "x", Permission::Write));

		let deny = acl(false, true);
		assert!(!deny
			.resolve(&state, None)
			.unwrap()
			.allows(Resource::Key, "x", Permission::Read));
	}
}
