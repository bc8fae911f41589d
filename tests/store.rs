//! State store and FSM behavior: apply determinism, register round
//! trips, blocking-query index contracts, session invalidation and
//! snapshot restore.

mod utils;

use {
	core::time::Duration,
	meridian::{
		consensus::{Membership, log::StateMachine},
		fsm::{ApplyOutcome, Fsm, LogEntry},
		state::{Store, TableId},
		types::{
			Check,
			CheckStatus,
			KvEntry,
			Node,
			Service,
			Session,
			SessionBehavior,
		},
	},
	std::collections::BTreeMap,
	tokio::sync::watch,
	uuid::Uuid,
};

fn fsm() -> (Fsm, Store) {
	let store = Store::default();
	let (membership_tx, _) = watch::channel(Membership::default());
	(Fsm::new(store.clone(), membership_tx), store)
}

fn node(name: &str) -> Node {
	let mut seed = [7u8; 32];
	seed[..name.len().min(32)].copy_from_slice(
		&name.as_bytes()[..name.len().min(32)],
	);

	Node {
		id: Uuid::new_v4(),
		name: name.to_string(),
		datacenter: "dc1".to_string(),
		segment: String::new(),
		address: iroh::EndpointAddr::new(
			iroh::SecretKey::from_bytes(&seed).public(),
		),
		tagged_addresses: BTreeMap::new(),
		meta: BTreeMap::new(),
	}
}

fn service(id: &str, name: &str, port: u16) -> Service {
	Service {
		id: id.to_string(),
		name: name.to_string(),
		port,
		address: String::new(),
		tags: vec![],
		meta: BTreeMap::new(),
		tagged_addresses: BTreeMap::new(),
		enable_tag_override: false,
		connect_native: false,
		proxy: None,
	}
}

fn register(node: Node, services: Vec<Service>) -> LogEntry {
	LogEntry::Register {
		node,
		services,
		checks: vec![],
	}
}

#[test]
fn identical_log_prefixes_yield_identical_states() {
	let entries = vec![
		register(node("n1"), vec![service("web", "web", 80)]),
		LogEntry::KvSet {
			entry: KvEntry::new("config/a", "1"),
		},
		LogEntry::KvCas {
			entry: KvEntry::new("config/a", "2"),
			expected: 2,
		},
		LogEntry::KvDelete {
			key: "config/a".to_string(),
		},
		LogEntry::DeregisterService {
			node: "n1".to_string(),
			service_id: "web".to_string(),
		},
	];

	let (mut a, store_a) = fsm();
	let (mut b, store_b) = fsm();

	for (i, entry) in entries.iter().enumerate() {
		a.apply(i as u64 + 1, entry.clone());
	}
	for (i, entry) in entries.iter().enumerate() {
		b.apply(i as u64 + 1, entry.clone());
	}

	// byte-identical serialized state
	assert_eq!(a.snapshot(), b.snapshot());
	assert_eq!(
		store_a.snapshot().last_index,
		store_b.snapshot().last_index
	);
}

#[test]
fn register_deregister_register_round_trip() {
	let (mut fsm, store) = fsm();
	let n = node("n1");
	let web = service("web", "web", 80);

	fsm.apply(1, register(n.clone(), vec![web.clone()]));
	let first = store.snapshot();
	let original = first
		.services
		.get(&("n1".to_string(), "web".to_string()))
		.unwrap()
		.clone();

	fsm.apply(2, LogEntry::DeregisterService {
		node: "n1".to_string(),
		service_id: "web".to_string(),
	});
	fsm.apply(3, register(n, vec![web]));

	let second = store.snapshot();
	let recreated = second
		.services
		.get(&("n1".to_string(), "web".to_string()))
		.unwrap();

	// equal modulo the index pair
	assert_eq!(recreated.value, original.value);
	assert_eq!(recreated.create_index, 3);
	assert_eq!(recreated.modify_index, 3);
}

#[test]
fn service_registration_requires_node() {
	let (mut fsm, _) = fsm();
	let outcome = fsm.apply(1, LogEntry::RegisterService {
		node: "ghost".to_string(),
		service: service("web", "web", 80),
	});

	assert!(matches!(outcome, ApplyOutcome::Rejected(_)));
}

#[test]
fn session_invalidation_releases_locks_atomically() {
	let (mut fsm, store) = fsm();
	fsm.apply(1, register(node("n1"), vec![]));

	let session = Session {
		id: Uuid::new_v4(),
		node: "n1".to_string(),
		ttl: Some(Duration::from_secs(10)),
		behavior: SessionBehavior::Release,
		checks: vec![],
		lock_delay: Duration::ZERO,
	};
	fsm.apply(2, LogEntry::SessionCreate {
		session: session.clone(),
	});

	assert_eq!(
		fsm.apply(3, LogEntry::KvAcquire {
			entry: KvEntry::new("leader-lock", "n1"),
			session: session.id,
		}),
		ApplyOutcome::Bool(true)
	);

	fsm.apply(4, LogEntry::SessionDestroy { id: session.id });

	let state = store.snapshot();
	let row = state.kv_get("leader-lock").unwrap();
	// the lock is gone, the value is unchanged
	assert_eq!(row.value.lock_session, None);
	assert_eq!(row.value.value.as_ref(), b"n1");
	assert!(state.session(&session.id).is_none());

	// a new session can acquire again
	let rival = Session {
		id: Uuid::new_v4(),
		..session
	};
	fsm.apply(5, LogEntry::SessionCreate {
		session: rival.clone(),
	});
	assert_eq!(
		fsm.apply(6, LogEntry::KvAcquire {
			entry: KvEntry::new("leader-lock", "n2"),
			session: rival.id,
		}),
		ApplyOutcome::Bool(true)
	);
}

#[test]
fn snapshot_restore_round_trips() {
	let (mut fsm, _) = fsm();
	fsm.apply(1, register(node("n1"), vec![service("web", "web", 80)]));
	fsm.apply(2, LogEntry::KvSet {
		entry: KvEntry::new("k", "v"),
	});

	let snapshot = fsm.snapshot();

	let (mut restored, store) = self::fsm();
	restored.restore(2, &snapshot).unwrap();

	let state = store.snapshot();
	assert_eq!(state.last_index, 2);
	assert_eq!(state.kv_get("k").unwrap().value.value.as_ref(), b"v");
	assert_eq!(state.service_nodes(&"web".to_string(), None).len(), 1);

	// restored state serializes identically
	assert_eq!(restored.snapshot(), snapshot);
}

#[tokio::test]
async fn blocking_queries_never_return_at_or_below_min_index() {
	let (mut fsm, store) = fsm();
	fsm.apply(1, LogEntry::KvSet {
		entry: KvEntry::new("k", "v1"),
	});

	let watch = store.watch().clone();

	// already-passed index resolves immediately
	let index = watch
		.wait(TableId::Kv, 0, Duration::from_secs(5))
		.await;
	assert!(index > 0);

	// parked waiter wakes on the next write
	let waiter = tokio::spawn({
		let watch = watch.clone();
		async move { watch.wait(TableId::Kv, 1, Duration::from_secs(5)).await }
	});
	tokio::task::yield_now().await;

	fsm.apply(2, LogEntry::KvSet {
		entry: KvEntry::new("k", "v2"),
	});
	let index = utils::timeout_s(5, waiter).await.unwrap().unwrap();
	assert!(index > 1);

	// a timed-out wait reports the unchanged index, never a lie
	let index = watch
		.wait(TableId::Kv, 99, Duration::from_millis(50))
		.await;
	assert!(index <= 99);
}

#[test]
fn intentions_decide_by_specificity() {
	use meridian::types::{Intention, IntentionAction};

	let (mut fsm, store) = fsm();
	fsm.apply(1, LogEntry::IntentionUpsert {
		intention: Intention {
			id: Uuid::new_v4(),
			source: "*".to_string(),
			destination: "db".to_string(),
			action: IntentionAction::Deny,
			description: String::new(),
		},
	});
	fsm.apply(2, LogEntry::IntentionUpsert {
		intention: Intention {
			id: Uuid::new_v4(),
			source: "api".to_string(),
			destination: "db".to_string(),
			action: IntentionAction::Allow,
			description: String::new(),
		},
	});

	let state = store.snapshot();
	// the exact source match outranks the wildcard deny
	assert_eq!(state.intention_allowed("api", "db"), Some(true));
	assert_eq!(state.intention_allowed("web", "db"), Some(false));
	// nothing matches: the caller falls back to the default policy
	assert_eq!(state.intention_allowed("web", "cache"), None);
}

#[test]
fn prepared_queries_resolve_by_name_or_id() {
	use meridian::types::PreparedQuery;

	let (mut fsm, store) = fsm();
	let id = Uuid::new_v4();
	fsm.apply(1, LogEntry::PreparedQueryUpsert {
		query: PreparedQuery {
			id,
			name: "nearest-web".to_string(),
			service: "web".to_string(),
			tag: None,
			only_passing: true,
		},
	});

	let state = store.snapshot();
	assert!(state.prepared_query("nearest-web").is_some());
	assert!(state.prepared_query(&id.to_string()).is_some());
	assert!(state.prepared_query("missing").is_none());
}

#[test]
fn check_status_transitions_only_through_the_log() {
	let (mut fsm, store) = fsm();
	let n = node("n1");

	fsm.apply(1, LogEntry::Register {
		node: n,
		services: vec![service("web", "web", 80)],
		checks: vec![Check {
			id: "web-alive".to_string(),
			name: "web alive".to_string(),
			status: CheckStatus::Passing,
			notes: String::new(),
			output: String::new(),
			service_id: Some("web".to_string()),
			definition: None,
			deregister_critical_after: None,
		}],
	});

	let outcome = fsm.apply(2, LogEntry::CheckStatusUpdate {
		node: "n1".to_string(),
		check_id: "web-alive".to_string(),
		from: CheckStatus::Passing,
		to: CheckStatus::Critical,
		output: "connection refused".to_string(),
	});
	assert_eq!(outcome, ApplyOutcome::Ok);

	let state = store.snapshot();
	let checks = state.service_checks(
		&"n1".to_string(),
		&"web".to_string(),
	);
	assert_eq!(checks.len(), 1);
	assert_eq!(checks[0].status, CheckStatus::Critical);
	assert_eq!(checks[0].output, "connection refused");
}
