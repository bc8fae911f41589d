//! Deterministic application of committed log entries into the state
//! store. This is the only writer the store has; everything else reads
//! snapshots.

mod entry;

pub use entry::{ApplyOutcome, LogEntry};

use {
	crate::{
		consensus::{
			Index,
			Membership,
			log::{RestoreError, StateMachine},
		},
		primitives::{deserialize, serialize},
		state::{Store, StoreState, Violation},
	},
	bytes::Bytes,
	tokio::sync::watch,
};

/// The agent FSM: applies committed entries into the shared [`Store`] and
/// publishes membership changes carried by autopilot entries.
pub struct Fsm {
	store: Store,
	membership: watch::Sender<Membership>,
}

impl Fsm {
	pub fn new(store: Store, membership: watch::Sender<Membership>) -> Self {
		Self { store, membership }
	}

	/// The store this FSM writes into.
	pub fn store(&self) -> &Store {
		&self.store
	}

	fn apply_entry(
		&mut self,
		index: Index,
		entry: LogEntry,
	) -> ApplyOutcome {
		use crate::state::mutate_tables::*;

		match entry {
			LogEntry::Barrier => ApplyOutcome::Ok,

			LogEntry::Register {
				node,
				services,
				checks,
			} => self.store.mutate(index, REGISTRATION, |state| {
				outcome(state.ensure_registration(node, services, checks, index))
			}),

			LogEntry::RegisterService { node, service } => {
				self.store.mutate(index, SERVICES, |state| {
					outcome(state.ensure_service(&node, service, index))
				})
			}

			LogEntry::RegisterCheck { node, check } => {
				self.store.mutate(index, CHECKS, |state| {
					outcome(state.ensure_check(&node, check, index))
				})
			}

			LogEntry::DeregisterNode { node } => {
				self.store.mutate(index, DEREGISTRATION, |state| {
					state.deregister_node(&node, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::DeregisterService { node, service_id } => {
				self.store.mutate(index, SERVICES, |state| {
					state.deregister_service(&node, &service_id, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::DeregisterCheck { node, check_id } => {
				self.store.mutate(index, CHECKS, |state| {
					state.deregister_check(&node, &check_id, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::CheckStatusUpdate {
				node,
				check_id,
				from,
				to,
				output,
			} => self.store.mutate(index, CHECKS, |state| {
				tracing::debug!(
					node = %node,
					check = %check_id,
					%from,
					%to,
					"health status transition",
				);
				outcome(state.set_check_status(
					&node, &check_id, to, output, index,
				))
			}),

			LogEntry::KvSet { entry } => {
				self.store.mutate(index, KV, |state| {
					state.kv_set(entry, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::KvCas { entry, expected } => {
				self.store.mutate(index, KV, |state| {
					ApplyOutcome::Bool(state.kv_cas(entry, expected, index))
				})
			}

			LogEntry::KvDelete { key } => {
				self.store.mutate(index, KV, |state| {
					state.kv_delete(&key, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::KvDeleteCas { key, expected } => {
				self.store.mutate(index, KV, |state| {
					ApplyOutcome::Bool(state.kv_delete_cas(
						&key, expected, index,
					))
				})
			}

			LogEntry::KvAcquire { entry, session } => {
				self.store.mutate(index, KV, |state| {
					match state.kv_acquire(entry, session, index) {
						Ok(acquired) => ApplyOutcome::Bool(acquired),
						Err(violation) => ApplyOutcome::Rejected(violation),
					}
				})
			}

			LogEntry::KvRelease { key, session } => {
				self.store.mutate(index, KV, |state| {
					match state.kv_release(&key, session, index) {
						Ok(released) => ApplyOutcome::Bool(released),
						Err(violation) => ApplyOutcome::Rejected(violation),
					}
				})
			}

			LogEntry::SessionCreate { session } => {
				self.store.mutate(index, SESSIONS, |state| {
					outcome(state.session_create(session, index))
				})
			}

			LogEntry::SessionRenew { id } => {
				self.store.mutate(index, SESSIONS, |state| {
					outcome(state.session_renew(&id, index))
				})
			}

			LogEntry::SessionDestroy { id } => {
				self.store.mutate(index, SESSION_DESTROY, |state| {
					state.session_destroy(&id, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::AclTokenUpsert { token } => {
				self.store.mutate(index, TOKENS, |state| {
					state.acl_token_upsert(token, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::AclTokenDelete { id } => {
				self.store.mutate(index, TOKENS, |state| {
					state.acl_token_delete(&id, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::AclPolicyUpsert { policy } => {
				self.store.mutate(index, POLICIES, |state| {
					state.acl_policy_upsert(policy, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::AclPolicyDelete { name } => {
				self.store.mutate(index, POLICIES, |state| {
					state.acl_policy_delete(&name, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::AclRoleUpsert { role } => {
				self.store.mutate(index, ROLES, |state| {
					state.acl_role_upsert(role, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::AclRoleDelete { name } => {
				self.store.mutate(index, ROLES, |state| {
					state.acl_role_delete(&name, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::ConfigEntryUpsert { entry } => {
				self.store.mutate(index, CONFIG_ENTRIES, |state| {
					state.config_entry_upsert(entry, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::ConfigEntryDelete { kind, name } => {
				self.store.mutate(index, CONFIG_ENTRIES, |state| {
					state.config_entry_delete(&kind, &name, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::CoordinateUpdate { node, coordinate } => {
				self.store.mutate(index, COORDINATES, |state| {
					outcome(state.coordinate_update(&node, coordinate, index))
				})
			}

			LogEntry::PreparedQueryUpsert { query } => {
				self.store.mutate(index, PREPARED_QUERIES, |state| {
					state.prepared_query_upsert(query, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::PreparedQueryDelete { id } => {
				self.store.mutate(index, PREPARED_QUERIES, |state| {
					state.prepared_query_delete(&id, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::IntentionUpsert { intention } => {
				self.store.mutate(index, INTENTIONS, |state| {
					state.intention_upsert(intention, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::IntentionDelete { id } => {
				self.store.mutate(index, INTENTIONS, |state| {
					state.intention_delete(&id, index);
					ApplyOutcome::Ok
				})
			}

			LogEntry::TombstoneReap { before } => {
				self.store.mutate(index, &[], |state| {
					state.reap_tombstones(before);
					ApplyOutcome::Ok
				})
			}

			LogEntry::Autopilot { membership } => {
				self.membership.send_replace(membership);
				// the index advance must still land in the store so blocking
				// queries see monotone indices
				self.store.mutate(index, &[], |_| ApplyOutcome::Ok)
			}
		}
	}
}

fn outcome(result: Result<(), Violation>) -> ApplyOutcome {
	match result {
		Ok(()) => ApplyOutcome::Ok,
		Err(violation) => ApplyOutcome::Rejected(violation),
	}
}

impl StateMachine for Fsm {
	type Command = LogEntry;
	type Outcome = ApplyOutcome;

	fn barrier_command() -> LogEntry {
		LogEntry::Barrier
	}

	fn apply(&mut self, index: Index, command: LogEntry) -> ApplyOutcome {
		let result = self.apply_entry(index, command);
		if let ApplyOutcome::Rejected(violation) = &result {
			tracing::debug!(index, %violation, "log entry rejected");
		}
		result
	}

	fn snapshot(&self) -> Bytes {
		serialize(&self.store.snapshot())
	}

	fn restore(
		&mut self,
		index: Index,
		data: &[u8],
	) -> Result<(), RestoreError> {
		let mut restored: StoreState =
			deserialize(data).map_err(|e| RestoreError::Decode(e.to_string()))?;
		restored.last_index = restored.last_index.max(index);

		// membership travels inside autopilot entries, which the snapshot
		// has already folded in; the voter view resumes from bootstrap and
		// subsequent entries
		self.store.reset(restored);
		Ok(())
	}
}
