//! Mutation API of the state store. Every function here is called from the
//! FSM apply loop only, with the log index of the entry being applied, and
//! must be deterministic and idempotent: applying the same entry at the
//! same index twice yields the same state.

use {
	super::{StoreState, TableId},
	crate::{
		chain::ConfigEntry,
		consensus::Index,
		types::{
			AclPolicy,
			AclTokenId,
			Check,
			CheckId,
			CheckStatus,
			Coordinate,
			KvEntry,
			Node,
			NodeName,
			ServiceId,
			Session,
			SessionBehavior,
			SessionId,
			Token,
			validate_meta,
		},
	},
	std::time::Instant,
};

/// Rejected state transitions. These surface to callers as consistency
/// violations and are never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
	#[error("node {0:?} is not registered")]
	NodeMissing(NodeName),

	#[error("service {1:?} is not registered on node {0:?}")]
	ServiceMissing(NodeName, ServiceId),

	#[error("check {1:?} is not registered on node {0:?}")]
	CheckMissing(NodeName, CheckId),

	#[error("session {0} not found")]
	SessionMissing(SessionId),

	#[error("session gated by critical check {0:?}")]
	SessionCheckCritical(CheckId),

	#[error("compare-and-set index mismatch on {0:?}")]
	CasMismatch(String),

	#[error("{0}")]
	InvalidMeta(#[from] crate::types::InvalidMeta),

	#[error("config entry rejected: {0}")]
	InvalidConfigEntry(String),
}

/// Tables touched by each log-entry family; the FSM hands these to the
/// watch set after an apply so only affected watchers wake.
pub(crate) mod tables {
	use super::TableId;

	pub(crate) const REGISTRATION: &[TableId] =
		&[TableId::Nodes, TableId::Services, TableId::Checks];
	pub(crate) const DEREGISTRATION: &[TableId] = &[
		TableId::Nodes,
		TableId::Services,
		TableId::Checks,
		TableId::Sessions,
		TableId::Kv,
		TableId::Coordinates,
	];
	pub(crate) const SERVICES: &[TableId] =
		&[TableId::Services, TableId::Checks];
	pub(crate) const CHECKS: &[TableId] = &[TableId::Checks];
	pub(crate) const KV: &[TableId] = &[TableId::Kv];
	pub(crate) const SESSIONS: &[TableId] = &[TableId::Sessions];
	pub(crate) const SESSION_DESTROY: &[TableId] =
		&[TableId::Sessions, TableId::Kv];
	pub(crate) const TOKENS: &[TableId] = &[TableId::Tokens];
	pub(crate) const POLICIES: &[TableId] = &[TableId::Policies];
	pub(crate) const ROLES: &[TableId] = &[TableId::Roles];
	pub(crate) const CONFIG_ENTRIES: &[TableId] = &[TableId::ConfigEntries];
	pub(crate) const COORDINATES: &[TableId] = &[TableId::Coordinates];
	pub(crate) const PREPARED_QUERIES: &[TableId] =
		&[TableId::PreparedQueries];
	pub(crate) const INTENTIONS: &[TableId] = &[TableId::Intentions];
}

impl StoreState {
	/// Registers or updates a node together with any services and checks in
	/// one atomic transition.
	pub(crate) fn ensure_registration(
		&mut self,
		node: Node,
		services: Vec<crate::types::Service>,
		checks: Vec<Check>,
		index: Index,
	) -> Result<(), Violation> {
		validate_meta(&node.meta)?;
		for service in &services {
			validate_meta(&service.meta)?;
		}

		let name = node.name.clone();
		self.upsert_node(node, index);

		for service in services {
			self.ensure_service(&name, service, index)?;
		}
		for check in checks {
			self.ensure_check(&name, check, index)?;
		}

		Ok(())
	}

	/// Inserts the node row, preserving the existing row's indices when the
	/// content is unchanged so idempotent re-registrations do not churn
	/// blocking queries.
	fn upsert_node(&mut self, node: Node, index: Index) {
		if let Some(existing) = self.nodes.get(&node.name) {
			if existing.value == node {
				return;
			}
		}
		self.nodes.insert(node.name.clone(), node, index);
	}

	/// Registers a service instance. The owning node must exist.
	pub(crate) fn ensure_service(
		&mut self,
		node: &NodeName,
		service: crate::types::Service,
		index: Index,
	) -> Result<(), Violation> {
		if !self.nodes.contains_key(node) {
			return Err(Violation::NodeMissing(node.clone()));
		}

		let key = (node.clone(), service.id.clone());
		if let Some(existing) = self.services.get(&key) {
			if existing.value == service {
				return Ok(());
			}
		}
		self.services.insert(key, service, index);
		Ok(())
	}

	/// Registers a health check. The owning node (and service, if scoped)
	/// must exist.
	pub(crate) fn ensure_check(
		&mut self,
		node: &NodeName,
		check: Check,
		index: Index,
	) -> Result<(), Violation> {
		if !self.nodes.contains_key(node) {
			return Err(Violation::NodeMissing(node.clone()));
		}
		if let Some(service_id) = &check.service_id {
			let key = (node.clone(), service_id.clone());
			if !self.services.contains_key(&key) {
				return Err(Violation::ServiceMissing(
					node.clone(),
					service_id.clone(),
				));
			}
		}

		let key = (node.clone(), check.id.clone());
		if let Some(existing) = self.checks.get(&key) {
			if existing.value == check {
				return Ok(());
			}
		}
		self.checks.insert(key, check, index);
		Ok(())
	}

	/// Updates only the status/output of an existing check.
	pub(crate) fn set_check_status(
		&mut self,
		node: &NodeName,
		check_id: &CheckId,
		status: CheckStatus,
		output: String,
		index: Index,
	) -> Result<(), Violation> {
		let key = (node.clone(), check_id.clone());
		let Some(row) = self.checks.get(&key) else {
			return Err(Violation::CheckMissing(node.clone(), check_id.clone()));
		};

		if row.value.status == status && row.value.output == output {
			return Ok(());
		}

		let mut check = row.value.clone();
		check.status = status;
		check.output = output;
		self.checks.insert(key, check, index);
		Ok(())
	}

	/// Deregisters a node and cascades over its services, checks,
	/// coordinate and sessions.
	pub(crate) fn deregister_node(&mut self, node: &NodeName, index: Index) {
		if self.nodes.remove(node, index).is_none() {
			return;
		}

		let services: Vec<_> = self
			.services
			.iter()
			.filter(|((n, _), _)| n == node)
			.map(|(key, _)| key.clone())
			.collect();
		for key in services {
			self.services.remove(&key, index);
		}

		let checks: Vec<_> = self
			.checks
			.iter()
			.filter(|((n, _), _)| n == node)
			.map(|(key, _)| key.clone())
			.collect();
		for key in checks {
			self.checks.remove(&key, index);
		}

		self.coordinates.remove(node, index);

		let sessions: Vec<_> = self
			.sessions
			.iter()
			.filter(|(_, row)| row.value.node == *node)
			.map(|(id, _)| *id)
			.collect();
		for id in sessions {
			self.session_destroy(&id, index);
		}
	}

	/// Deregisters one service instance and the checks scoped to it.
	pub(crate) fn deregister_service(
		&mut self,
		node: &NodeName,
		service_id: &ServiceId,
		index: Index,
	) {
		self.services.remove(&(node.clone(), service_id.clone()), index);

		let checks: Vec<_> = self
			.checks
			.iter()
			.filter(|((n, _), row)| {
				n == node && row.value.service_id.as_ref() == Some(service_id)
			})
			.map(|(key, _)| key.clone())
			.collect();
		for key in checks {
			self.checks.remove(&key, index);
		}
	}

	pub(crate) fn deregister_check(
		&mut self,
		node: &NodeName,
		check_id: &CheckId,
		index: Index,
	) {
		self.checks.remove(&(node.clone(), check_id.clone()), index);
	}

	pub(crate) fn kv_set(&mut self, mut entry: KvEntry, index: Index) {
		// a plain set never touches lock state; preserve it from the
		// existing entry so writes under a held lock do not release it.
		if let Some(existing) = self.kv.get(&entry.key) {
			entry.lock_session = existing.value.lock_session;
			entry.lock_index = existing.value.lock_index;
		}
		self.kv.insert(entry.key.clone(), entry, index);
	}

	/// Compare-and-set: succeeds only when the entry's current modify index
	/// equals `expected`. `expected == 0` means "only if absent".
	pub(crate) fn kv_cas(
		&mut self,
		entry: KvEntry,
		expected: Index,
		index: Index,
	) -> bool {
		let current = self.kv.get(&entry.key).map(|row| row.modify_index);
		let matches = match current {
			None => expected == 0,
			Some(modify) => modify == expected,
		};

		if matches {
			self.kv_set(entry, index);
		}
		matches
	}

	pub(crate) fn kv_delete(&mut self, key: &str, index: Index) {
		self.kv.remove(&key.to_string(), index);
		self.lock_delays.remove(key);
	}

	pub(crate) fn kv_delete_cas(
		&mut self,
		key: &str,
		expected: Index,
		index: Index,
	) -> bool {
		let matches = self
			.kv
			.get(&key.to_string())
			.is_some_and(|row| row.modify_index == expected);
		if matches {
			self.kv_delete(key, index);
		}
		matches
	}

	/// Attempts to acquire the lock on a key for a session. Succeeds when
	/// the key is unlocked or already held by the same session; fails when
	/// held by another session or still inside a lock-delay window.
	pub(crate) fn kv_acquire(
		&mut self,
		mut entry: KvEntry,
		session: SessionId,
		index: Index,
	) -> Result<bool, Violation> {
		if !self.sessions.contains_key(&session) {
			return Err(Violation::SessionMissing(session));
		}

		if let Some(deadline) = self.lock_delays.get(&entry.key) {
			if Instant::now() < *deadline {
				return Ok(false);
			}
			self.lock_delays.remove(&entry.key);
		}

		let existing = self.kv.get(&entry.key).map(|row| row.value.clone());
		match existing.as_ref().and_then(|e| e.lock_session) {
			Some(holder) if holder != session => return Ok(false),
			Some(_) => {
				// already held by this session: refresh the value, keep the
				// lock index
				entry.lock_session = Some(session);
				entry.lock_index =
					existing.as_ref().map(|e| e.lock_index).unwrap_or(0);
			}
			None => {
				entry.lock_session = Some(session);
				entry.lock_index =
					existing.as_ref().map(|e| e.lock_index).unwrap_or(0) + 1;
			}
		}

		self.kv.insert(entry.key.clone(), entry, index);
		Ok(true)
	}

	/// Releases a lock held by the session. The value stays.
	pub(crate) fn kv_release(
		&mut self,
		key: &str,
		session: SessionId,
		index: Index,
	) -> Result<bool, Violation> {
		if !self.sessions.contains_key(&session) {
			return Err(Violation::SessionMissing(session));
		}

		let Some(row) = self.kv.get(&key.to_string()) else {
			return Ok(false);
		};
		if row.value.lock_session != Some(session) {
			return Ok(false);
		}

		let mut entry = row.value.clone();
		entry.lock_session = None;
		self.kv.insert(entry.key.clone(), entry, index);
		Ok(true)
	}

	/// Creates a session. The owning node must exist and none of the
	/// gating checks may be critical.
	pub(crate) fn session_create(
		&mut self,
		session: Session,
		index: Index,
	) -> Result<(), Violation> {
		if !self.nodes.contains_key(&session.node) {
			return Err(Violation::NodeMissing(session.node.clone()));
		}

		for check_id in &session.checks {
			let key = (session.node.clone(), check_id.clone());
			let Some(row) = self.checks.get(&key) else {
				return Err(Violation::CheckMissing(
					session.node.clone(),
					check_id.clone(),
				));
			};
			if row.value.status == CheckStatus::Critical {
				return Err(Violation::SessionCheckCritical(check_id.clone()));
			}
		}

		self.sessions.insert(session.id, session, index);
		Ok(())
	}

	/// Bumps the session row so watchers (and the leader's expiry tracker)
	/// observe the renewal.
	pub(crate) fn session_renew(
		&mut self,
		id: &SessionId,
		index: Index,
	) -> Result<(), Violation> {
		let Some(row) = self.sessions.get(id) else {
			return Err(Violation::SessionMissing(*id));
		};
		let session = row.value.clone();
		self.sessions.insert(*id, session, index);
		Ok(())
	}

	/// Destroys a session and fires its behavior over all held locks in
	/// this single apply: `release` frees the locks (and arms their
	/// lock-delay), `delete` removes the locked entries outright.
	pub(crate) fn session_destroy(&mut self, id: &SessionId, index: Index) {
		let Some(row) = self.sessions.remove(id, index) else {
			return;
		};
		let session = row.value;

		let locked = self.session_locks(id);
		for key in locked {
			match session.behavior {
				SessionBehavior::Release => {
					if let Some(row) = self.kv.get(&key) {
						let mut entry = row.value.clone();
						entry.lock_session = None;
						self.kv.insert(key.clone(), entry, index);
					}
					if !session.lock_delay.is_zero() {
						self
							.lock_delays
							.insert(key, Instant::now() + session.lock_delay);
					}
				}
				SessionBehavior::Delete => {
					self.kv.remove(&key, index);
				}
			}
		}
	}

	pub(crate) fn acl_token_upsert(&mut self, token: Token, index: Index) {
		self.tokens.insert(token.accessor_id, token, index);
	}

	pub(crate) fn acl_token_delete(&mut self, id: &AclTokenId, index: Index) {
		self.tokens.remove(id, index);
	}

	pub(crate) fn acl_policy_upsert(
		&mut self,
		policy: AclPolicy,
		index: Index,
	) {
		self.policies.insert(policy.name.clone(), policy, index);
	}

	pub(crate) fn acl_policy_delete(&mut self, name: &str, index: Index) {
		self.policies.remove(&name.to_string(), index);
	}

	pub(crate) fn acl_role_upsert(
		&mut self,
		role: crate::types::AclRole,
		index: Index,
	) {
		self.roles.insert(role.name.clone(), role, index);
	}

	pub(crate) fn acl_role_delete(&mut self, name: &str, index: Index) {
		self.roles.remove(&name.to_string(), index);
	}

	pub(crate) fn config_entry_upsert(
		&mut self,
		entry: ConfigEntry,
		index: Index,
	) {
		let key = (entry.kind().to_string(), entry.name().to_string());
		self.config_entries.insert(key, entry, index);
	}

	pub(crate) fn config_entry_delete(
		&mut self,
		kind: &str,
		name: &str,
		index: Index,
	) {
		self
			.config_entries
			.remove(&(kind.to_string(), name.to_string()), index);
	}

	pub(crate) fn prepared_query_upsert(
		&mut self,
		query: crate::types::PreparedQuery,
		index: Index,
	) {
		self.prepared_queries.insert(query.id, query, index);
	}

	pub(crate) fn prepared_query_delete(
		&mut self,
		id: &uuid::Uuid,
		index: Index,
	) {
		self.prepared_queries.remove(id, index);
	}

	pub(crate) fn intention_upsert(
		&mut self,
		intention: crate::types::Intention,
		index: Index,
	) {
		self.intentions.insert(intention.id, intention, index);
	}

	pub(crate) fn intention_delete(
		&mut self,
		id: &uuid::Uuid,
		index: Index,
	) {
		self.intentions.remove(id, index);
	}

	pub(crate) fn coordinate_update(
		&mut self,
		node: &NodeName,
		coordinate: Coordinate,
		index: Index,
	) -> Result<(), Violation> {
		if !self.nodes.contains_key(node) {
			return Err(Violation::NodeMissing(node.clone()));
		}
		if !coordinate.is_valid() {
			// silently dropped rather than failing the apply; a bad
			// coordinate must not poison the log
			return Ok(());
		}
		self.coordinates.insert(node.clone(), coordinate, index);
		Ok(())
	}

	/// Drops tombstones at or below `before` across every table.
	pub(crate) fn reap_tombstones(&mut self, before: Index) {
		self.nodes.reap_tombstones(before);
		self.services.reap_tombstones(before);
		self.checks.reap_tombstones(before);
		self.kv.reap_tombstones(before);
		self.sessions.reap_tombstones(before);
		self.tokens.reap_tombstones(before);
		self.policies.reap_tombstones(before);
		self.roles.reap_tombstones(before);
		self.config_entries.reap_tombstones(before);
		self.coordinates.reap_tombstones(before);
		self.prepared_queries.reap_tombstones(before);
		self.intentions.reap_tombstones(before);
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::types::{Service, TaggedAddressKey},
		core::time::Duration,
		std::collections::BTreeMap,
		uuid::Uuid,
	};

	fn node(name: &str) -> Node {
		Node {
			id: Uuid::new_v4(),
			name: name.to_string(),
			datacenter: "dc1".to_string(),
			segment: String::new(),
			address: iroh::EndpointAddr::new(
				iroh::SecretKey::generate(&mut rand::rng()).public(),
			),
			tagged_addresses: BTreeMap::new(),
			meta: BTreeMap::new(),
		}
	}

	fn service(id: &str, name: &str) -> Service {
		Service {
			id: id.to_string(),
			name: name.to_string(),
			port: 8080,
			address: String::new(),
			tags: vec![],
			meta: BTreeMap::new(),
			tagged_addresses: BTreeMap::new(),
			enable_tag_override: false,
			connect_native: false,
			proxy: None,
		}
	}

	#[test]
	fn service_requires_node() {
		let mut state = StoreState::default();
		let err = state
			.ensure_service(&"n1".to_string(), service("web", "web"), 1)
			.unwrap_err();
		assert_eq!(err, Violation::NodeMissing("n1".to_string()));
	}

	#[test]
	fn deregister_node_cascades() {
		let mut state = StoreState::default();
		state
			.ensure_registration(
				node("n1"),
				vec![service("web", "web")],
				vec![Check {
					id: "web-check".to_string(),
					name: "web liveness".to_string(),
					status: CheckStatus::Passing,
					notes: String::new(),
					output: String::new(),
					service_id: Some("web".to_string()),
					definition: None,
					deregister_critical_after: None,
				}],
				1,
			)
			.unwrap();

		assert_eq!(state.services.len(), 1);
		assert_eq!(state.checks.len(), 1);

		state.deregister_node(&"n1".to_string(), 2);
		assert!(state.nodes.is_empty());
		assert!(state.services.is_empty());
		assert!(state.checks.is_empty());
		assert_eq!(state.services.max_index(), 2);
	}

	#[test]
	fn reregistration_is_idempotent() {
		let mut state = StoreState::default();
		let n = node("n1");
		let s = service("web", "web");

		state
			.ensure_registration(n.clone(), vec![s.clone()], vec![], 1)
			.unwrap();
		let before = state
			.services
			.get(&("n1".to_string(), "web".to_string()))
			.unwrap()
			.clone();

		// identical registration at a later index changes nothing
		state
			.ensure_registration(n, vec![s], vec![], 5)
			.unwrap();
		let after = state
			.services
			.get(&("n1".to_string(), "web".to_string()))
			.unwrap();
		assert_eq!(*after, before);
	}

	#[test]
	fn cas_semantics() {
		let mut state = StoreState::default();
		let entry = KvEntry::new("k", "v1");

		// expected=0 means "create only"
		assert!(state.kv_cas(entry.clone(), 0, 1));
		assert!(!state.kv_cas(KvEntry::new("k", "v2"), 0, 2));

		let modify = state.kv_get("k").unwrap().modify_index;
		assert!(state.kv_cas(KvEntry::new("k", "v2"), modify, 3));
		assert_eq!(state.kv_get("k").unwrap().value.value.as_ref(), b"v2");
	}

	#[test]
	fn acquire_and_session_invalidation_release() {
		let mut state = StoreState::default();
		state
			.ensure_registration(node("n1"), vec![], vec![], 1)
			.unwrap();

		let session = Session {
			id: Uuid::new_v4(),
			node: "n1".to_string(),
			ttl: Some(Duration::from_secs(10)),
			behavior: SessionBehavior::Release,
			checks: vec![],
			lock_delay: Duration::ZERO,
		};
		state.session_create(session.clone(), 2).unwrap();

		state.kv_set(KvEntry::new("k", "v"), 3);
		assert!(state
			.kv_acquire(KvEntry::new("k", "v"), session.id, 4)
			.unwrap());

		// a rival session cannot steal the lock
		let rival = Session {
			id: Uuid::new_v4(),
			..session.clone()
		};
		state.session_create(rival.clone(), 5).unwrap();
		assert!(!state
			.kv_acquire(KvEntry::new("k", "stolen"), rival.id, 6)
			.unwrap());

		// invalidation releases the lock but keeps the value
		state.session_destroy(&session.id, 7);
		let row = state.kv_get("k").unwrap();
		assert_eq!(row.value.lock_session, None);
		assert_eq!(row.value.value.as_ref(), b"v");

		// now the rival can acquire, and the lock index bumps
		assert!(state
			.kv_acquire(KvEntry::new("k", "taken"), rival.id, 8)
			.unwrap());
		assert_eq!(state.kv_get("k").unwrap().value.lock_index, 2);
	}

	#[test]
	fn session_delete_behavior_removes_keys() {
		let mut state = StoreState::default();
		state
			.ensure_registration(node("n1"), vec![], vec![], 1)
			.unwrap();

		let session = Session {
			id: Uuid::new_v4(),
			node: "n1".to_string(),
			ttl: None,
			behavior: SessionBehavior::Delete,
			checks: vec![],
			lock_delay: Duration::ZERO,
		};
		state.session_create(session.clone(), 2).unwrap();
		assert!(state
			.kv_acquire(KvEntry::new("k", "v"), session.id, 3)
			.unwrap());

		state.session_destroy(&session.id, 4);
		assert!(state.kv_get("k").is_none());
	}

	#[test]
	fn session_gated_by_critical_check() {
		let mut state = StoreState::default();
		state
			.ensure_registration(
				node("n1"),
				vec![],
				vec![Check {
					id: "c1".to_string(),
					name: "c1".to_string(),
					status: CheckStatus::Critical,
					notes: String::new(),
					output: String::new(),
					service_id: None,
					definition: None,
					deregister_critical_after: None,
				}],
				1,
			)
			.unwrap();

		let session = Session {
			id: Uuid::new_v4(),
			node: "n1".to_string(),
			ttl: None,
			behavior: SessionBehavior::Release,
			checks: vec!["c1".to_string()],
			lock_delay: Duration::ZERO,
		};
		assert_eq!(
			state.session_create(session, 2),
			Err(Violation::SessionCheckCritical("c1".to_string()))
		);
	}

	#[test]
	fn tagged_address_resolution_order() {
		let mut svc = service("web", "web");
		svc.address = "10.0.0.5".to_string();
		svc.tagged_addresses.insert(
			TaggedAddressKey::Wan,
			crate::types::ServiceAddress {
				address: "203.0.113.9".to_string(),
				port: 443,
			},
		);

		// explicit key
		assert_eq!(
			svc.address_for(Some(TaggedAddressKey::Wan)),
			("203.0.113.9".to_string(), 443)
		);
		// lookup order prefers wan when present
		assert_eq!(
			svc.address_for(None),
			("203.0.113.9".to_string(), 443)
		);
		// absent tagged addresses fall back to the instance address
		svc.tagged_addresses.clear();
		assert_eq!(svc.address_for(None), ("10.0.0.5".to_string(), 8080));
	}
}
