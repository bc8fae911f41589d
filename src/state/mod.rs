//! The replicated state store: in-memory MVCC tables keyed by the
//! monotonically increasing log index, plus the watch-set primitive that
//! backs blocking queries.
//!
//! Ownership rules:
//!
//! - Only the FSM apply loop mutates the store (single writer); everything
//!   else reads immutable snapshots.
//!
//! - Every row carries `(create_index, modify_index)`; deletions leave
//!   tombstones so that blocking queries observe them as index advances.

mod mutate;
mod table;
mod watch;

pub use {
	mutate::Violation,
	table::{Row, Table},
	watch::{TableId, WatchSet},
};

pub(crate) use mutate::tables as mutate_tables;

use {
	crate::{
		chain::ConfigEntry,
		consensus::Index,
		types::{
			AclPolicy,
			AclRole,
			AclTokenId,
			Check,
			CheckId,
			CheckStatus,
			Coordinate,
			Intention,
			IntentionAction,
			KvEntry,
			Node,
			NodeName,
			PreparedQuery,
			Service,
			ServiceId,
			ServiceName,
			Session,
			SessionId,
			Token,
		},
	},
	parking_lot::RwLock,
	serde::{Deserialize, Serialize},
	std::{
		collections::BTreeMap,
		sync::Arc,
		time::Instant,
	},
	uuid::Uuid,
};

/// The complete replicated state at one log index. Cloning is cheap (all
/// tables are persistent maps), and a clone is an immutable snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
	/// Index of the last applied log entry.
	pub last_index: Index,

	pub nodes: Table<NodeName, Node>,
	pub services: Table<(NodeName, ServiceId), Service>,
	pub checks: Table<(NodeName, CheckId), Check>,
	pub kv: Table<String, KvEntry>,
	pub sessions: Table<SessionId, Session>,
	pub tokens: Table<AclTokenId, Token>,
	pub policies: Table<String, AclPolicy>,
	pub roles: Table<String, AclRole>,
	pub config_entries: Table<(String, String), ConfigEntry>,
	pub coordinates: Table<NodeName, Coordinate>,
	pub prepared_queries: Table<Uuid, PreparedQuery>,
	pub intentions: Table<Uuid, Intention>,

	/// Node-local lock-delay deadlines for recently invalidated locks.
	/// Wall-clock state, deliberately excluded from snapshots: every
	/// server enforces its own delay window, like the original system.
	#[serde(skip)]
	lock_delays: BTreeMap<String, Instant>,
}

/// Shared handle to the store: a single writer (the FSM apply loop) behind
/// a lock that readers only take long enough to clone a snapshot out of.
#[derive(Clone)]
pub struct Store {
	state: Arc<RwLock<StoreState>>,
	watch: WatchSet,
}

impl Default for Store {
	fn default() -> Self {
		Self {
			state: Arc::new(RwLock::new(StoreState::default())),
			watch: WatchSet::default(),
		}
	}
}

impl Store {
	/// Returns an immutable snapshot of the entire state.
	pub fn snapshot(&self) -> StoreState {
		self.state.read().clone()
	}

	/// The watch set for blocking queries.
	pub fn watch(&self) -> &WatchSet {
		&self.watch
	}

	/// Index of the last applied log entry.
	pub fn last_index(&self) -> Index {
		self.state.read().last_index
	}

	/// Runs a mutation under the write lock and publishes watch
	/// notifications for the touched tables afterwards. FSM-only.
	pub(crate) fn mutate<R>(
		&self,
		index: Index,
		tables: &[TableId],
		f: impl FnOnce(&mut StoreState) -> R,
	) -> R {
		let result = {
			let mut state = self.state.write();
			let result = f(&mut state);
			state.last_index = state.last_index.max(index);
			result
		};

		for table in tables {
			self.watch.notify(*table, index);
		}

		result
	}

	/// Replaces the whole state from a restored snapshot. FSM-only.
	pub(crate) fn reset(&self, restored: StoreState) {
		let index = restored.last_index;
		*self.state.write() = restored;

		// wake every parked watcher; whatever they were waiting on either
		// happened before the snapshot or never will on this log.
		use strum::IntoEnumIterator;
		for table in TableId::iter() {
			self.watch.notify(table, index);
		}
	}
}

/// Read API, available on any snapshot.
impl StoreState {
	pub fn node(&self, name: &str) -> Option<&Row<Node>> {
		self.nodes.get(&name.to_string())
	}

	pub fn list_nodes(&self) -> Vec<Node> {
		self.nodes.iter().map(|(_, row)| row.value.clone()).collect()
	}

	/// All service instances on one node.
	pub fn node_services(&self, node: &str) -> Vec<Service> {
		self.services
			.iter()
			.filter(|((n, _), _)| n == node)
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	/// All `(node, service)` pairs offering the named service, optionally
	/// filtered by tag.
	pub fn service_nodes(
		&self,
		service: &ServiceName,
		tag: Option<&str>,
	) -> Vec<(Node, Service)> {
		self.services
			.iter()
			.filter(|(_, row)| row.value.name == *service)
			.filter(|(_, row)| tag.is_none_or(|t| row.value.has_tag(t)))
			.filter_map(|((node, _), row)| {
				let node = self.node(node)?.value.clone();
				Some((node, row.value.clone()))
			})
			.collect()
	}

	/// Service name → union of tags across all instances.
	pub fn list_services(&self) -> BTreeMap<ServiceName, Vec<String>> {
		let mut services: BTreeMap<ServiceName, Vec<String>> = BTreeMap::new();
		for (_, row) in self.services.iter() {
			let tags = services.entry(row.value.name.clone()).or_default();
			for tag in &row.value.tags {
				if !tags.contains(tag) {
					tags.push(tag.clone());
				}
			}
		}
		services
	}

	pub fn node_checks(&self, node: &str) -> Vec<Check> {
		self.checks
			.iter()
			.filter(|((n, _), _)| n == node)
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	/// Checks attached to one service instance on one node, including the
	/// node-level checks that gate every service on the node.
	pub fn service_checks(
		&self,
		node: &str,
		service_id: &ServiceId,
	) -> Vec<Check> {
		self.checks
			.iter()
			.filter(|((n, _), _)| n == node)
			.filter(|(_, row)| {
				row.value
					.service_id
					.as_ref()
					.is_none_or(|id| id == service_id)
			})
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	/// Health view of a service: each instance with its effective checks.
	pub fn service_health(
		&self,
		service: &ServiceName,
		tag: Option<&str>,
	) -> Vec<(Node, Service, Vec<Check>)> {
		self.service_nodes(service, tag)
			.into_iter()
			.map(|(node, svc)| {
				let checks = self.service_checks(&node.name, &svc.id);
				(node, svc, checks)
			})
			.collect()
	}

	pub fn kv_get(&self, key: &str) -> Option<&Row<KvEntry>> {
		self.kv.get(&key.to_string())
	}

	pub fn kv_prefix(&self, prefix: &str) -> Vec<Row<KvEntry>> {
		self.kv
			.range_from(&prefix.to_string())
			.take_while(|(key, _)| key.starts_with(prefix))
			.map(|(_, row)| row.clone())
			.collect()
	}

	pub fn session(&self, id: &SessionId) -> Option<&Row<Session>> {
		self.sessions.get(id)
	}

	pub fn list_sessions(&self) -> Vec<Session> {
		self.sessions
			.iter()
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	pub fn node_sessions(&self, node: &str) -> Vec<Session> {
		self.sessions
			.iter()
			.filter(|(_, row)| row.value.node == node)
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	/// Keys currently locked by the given session.
	pub fn session_locks(&self, session: &SessionId) -> Vec<String> {
		self.kv
			.iter()
			.filter(|(_, row)| row.value.lock_session.as_ref() == Some(session))
			.map(|(key, _)| key.clone())
			.collect()
	}

	/// Looks up a token by its secret. Linear scan; the token table is
	/// small and the resolution result is cached by the ACL layer.
	pub fn token_by_secret(&self, secret: &Uuid) -> Option<&Token> {
		self.tokens
			.iter()
			.map(|(_, row)| &row.value)
			.find(|token| token.secret_id == *secret)
	}

	pub fn policy(&self, name: &str) -> Option<&AclPolicy> {
		self.policies.get(&name.to_string()).map(|row| &row.value)
	}

	pub fn role(&self, name: &str) -> Option<&AclRole> {
		self.roles.get(&name.to_string()).map(|row| &row.value)
	}

	pub fn config_entry(
		&self,
		kind: &str,
		name: &str,
	) -> Option<&Row<ConfigEntry>> {
		self
			.config_entries
			.get(&(kind.to_string(), name.to_string()))
	}

	pub fn config_entries_of_kind(&self, kind: &str) -> Vec<ConfigEntry> {
		self.config_entries
			.iter()
			.filter(|((k, _), _)| k == kind)
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	pub fn all_config_entries(&self) -> Vec<ConfigEntry> {
		self.config_entries
			.iter()
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	pub fn coordinate(&self, node: &str) -> Option<&Coordinate> {
		self.coordinates
			.get(&node.to_string())
			.map(|row| &row.value)
	}

	/// Looks up a stored query by id or by name.
	pub fn prepared_query(&self, name_or_id: &str) -> Option<&PreparedQuery> {
		if let Ok(id) = name_or_id.parse::<Uuid>() {
			if let Some(row) = self.prepared_queries.get(&id) {
				return Some(&row.value);
			}
		}
		self
			.prepared_queries
			.iter()
			.map(|(_, row)| &row.value)
			.find(|query| query.name == name_or_id)
	}

	pub fn list_intentions(&self) -> Vec<Intention> {
		self
			.intentions
			.iter()
			.map(|(_, row)| row.value.clone())
			.collect()
	}

	/// Whether connections from `source` to `destination` are permitted.
	/// The most specific matching intention decides; `None` when no
	/// intention matches (the caller falls back to the default policy).
	pub fn intention_allowed(
		&self,
		source: &str,
		destination: &str,
	) -> Option<bool> {
		self
			.intentions
			.iter()
			.map(|(_, row)| &row.value)
			.filter(|intention| {
				(intention.source == source || intention.source == "*")
					&& (intention.destination == destination
						|| intention.destination == "*")
			})
			// exact matches outrank wildcards
			.max_by_key(|intention| {
				(intention.source != "*") as u8
					+ (intention.destination != "*") as u8
			})
			.map(|intention| intention.action == IntentionAction::Allow)
	}

	/// The highest index across a set of tables, used as the response index
	/// of reads that span tables.
	pub fn index_of(&self, tables: &[TableId]) -> Index {
		tables
			.iter()
			.map(|table| match table {
				TableId::Nodes => self.nodes.max_index(),
				TableId::Services => self.services.max_index(),
				TableId::Checks => self.checks.max_index(),
				TableId::Kv => self.kv.max_index(),
				TableId::Sessions => self.sessions.max_index(),
				TableId::Tokens => self.tokens.max_index(),
				TableId::Policies => self.policies.max_index(),
				TableId::Roles => self.roles.max_index(),
				TableId::ConfigEntries => self.config_entries.max_index(),
				TableId::Coordinates => self.coordinates.max_index(),
				TableId::PreparedQueries => {
					self.prepared_queries.max_index()
				}
				TableId::Intentions => self.intentions.max_index(),
			})
			.max()
			.unwrap_or(0)
	}

	/// Worst status across the given checks; passing when there are none.
	pub fn aggregate_status(checks: &[Check]) -> CheckStatus {
		checks
			.iter()
			.map(|check| check.status)
			.max()
			.unwrap_or(CheckStatus::Passing)
	}
}
