use {
	crate::types::{
		Check,
		CheckDefinition,
		CheckId,
		CheckStatus,
		Service,
		ServiceId,
	},
	parking_lot::Mutex,
	std::{collections::BTreeMap, sync::Arc},
	tokio::sync::watch,
};

/// The agent-local registry of services and checks.
///
/// These registrations are owned by the agent process, not by the
/// cluster: the anti-entropy syncer projects them into the replicated
/// catalog and converges the two views. Check statuses are fed in by the
/// local check runners (or by TTL renewals) and only ever reach the
/// cluster through the syncer.
pub struct LocalRegistry {
	inner: Arc<Inner>,
}

impl Clone for LocalRegistry {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

struct Inner {
	state: Mutex<State>,

	/// Bumped on every local change; the syncer watches it.
	version: watch::Sender<u64>,

	/// Truncation limit applied to check output before it is synced.
	output_max_size: usize,
}

#[derive(Default)]
struct State {
	services: BTreeMap<ServiceId, Service>,
	checks: BTreeMap<CheckId, Check>,
}

impl LocalRegistry {
	pub fn new(output_max_size: usize) -> Self {
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(State::default()),
				version: watch::Sender::new(0),
				output_max_size: output_max_size.max(1),
			}),
		}
	}

	/// Registers (or replaces) a local service.
	pub fn add_service(&self, service: Service) {
		let mut state = self.inner.state.lock();
		state.services.insert(service.id.clone(), service);
		drop(state);
		self.touch();
	}

	/// Removes a local service and the checks scoped to it.
	pub fn remove_service(&self, id: &ServiceId) {
		let mut state = self.inner.state.lock();
		let existed = state.services.remove(id).is_some();
		state
			.checks
			.retain(|_, check| check.service_id.as_ref() != Some(id));
		drop(state);
		if existed {
			self.touch();
		}
	}

	/// Registers (or replaces) a local check. Fresh probe-driven checks
	/// start critical until their first successful round.
	pub fn add_check(&self, mut check: Check) {
		check.status = Check::initial_status(check.definition.as_ref());
		let mut state = self.inner.state.lock();
		state.checks.insert(check.id.clone(), check);
		drop(state);
		self.touch();
	}

	pub fn remove_check(&self, id: &CheckId) {
		let existed = self.inner.state.lock().checks.remove(id).is_some();
		if existed {
			self.touch();
		}
	}

	/// Feeds an observed status into a check, truncating the output.
	/// No-ops (and does not wake the syncer) when nothing changed.
	pub fn update_check(
		&self,
		id: &CheckId,
		status: CheckStatus,
		output: impl Into<String>,
	) {
		let mut output: String = output.into();
		if output.len() > self.inner.output_max_size {
			output.truncate(self.inner.output_max_size);
		}

		let mut state = self.inner.state.lock();
		let Some(check) = state.checks.get_mut(id) else {
			return;
		};
		if check.status == status && check.output == output {
			return;
		}
		check.status = status;
		check.output = output;
		drop(state);
		self.touch();
	}

	/// Current snapshot of local services and checks.
	pub fn snapshot(&self) -> (Vec<Service>, Vec<Check>) {
		let state = self.inner.state.lock();
		(
			state.services.values().cloned().collect(),
			state.checks.values().cloned().collect(),
		)
	}

	pub fn service(&self, id: &ServiceId) -> Option<Service> {
		self.inner.state.lock().services.get(id).cloned()
	}

	pub fn check(&self, id: &CheckId) -> Option<Check> {
		self.inner.state.lock().checks.get(id).cloned()
	}

	/// Checks carrying runnable definitions, for the check runners.
	pub fn runnable_checks(&self) -> Vec<(CheckId, CheckDefinition)> {
		self
			.inner
			.state
			.lock()
			.checks
			.iter()
			.filter_map(|(id, check)| {
				check.definition.clone().map(|d| (id.clone(), d))
			})
			.collect()
	}

	/// Watch receiver bumped on every local change.
	pub fn changes(&self) -> watch::Receiver<u64> {
		self.inner.version.subscribe()
	}

	fn touch(&self) {
		self.inner.version.send_modify(|v| *v += 1);
	}
}

#[cfg(test)]
mod tests {
	use {super::*, core::time::Duration};

	fn service(id: &str) -> Service {
		Service {
			id: id.to_string(),
			name: id.to_string(),
			port: 80,
			address: String::new(),
			tags: vec![],
			meta: BTreeMap::new(),
			tagged_addresses: BTreeMap::new(),
			enable_tag_override: false,
			connect_native: false,
			proxy: None,
		}
	}

	fn ttl_check(id: &str, service: Option<&str>) -> Check {
		Check {
			id: id.to_string(),
			name: id.to_string(),
			status: CheckStatus::Passing,
			notes: String::new(),
			output: String::new(),
			service_id: service.map(str::to_string),
			definition: Some(CheckDefinition::Ttl {
				ttl: Duration::from_secs(10),
			}),
			deregister_critical_after: None,
		}
	}

	#[test]
	fn removing_service_cascades_its_checks() {
		let registry = LocalRegistry::new(4096);
		registry.add_service(service("web"));
		registry.add_check(ttl_check("web-ttl", Some("web")));
		registry.add_check(ttl_check("node-ttl", None));

		registry.remove_service(&"web".to_string());
		let (services, checks) = registry.snapshot();
		assert!(services.is_empty());
		assert_eq!(checks.len(), 1);
		assert_eq!(checks[0].id, "node-ttl");
	}

	#[test]
	fn fresh_checks_start_critical_and_output_truncates() {
		let registry = LocalRegistry::new(8);
		registry.add_check(ttl_check("t", None));
		assert_eq!(
			registry.check(&"t".to_string()).unwrap().status,
			CheckStatus::Critical
		);

		registry.update_check(
			&"t".to_string(),
			CheckStatus::Passing,
			"a very long output that will be cut",
		);
		let check = registry.check(&"t".to_string()).unwrap();
		assert_eq!(check.status, CheckStatus::Passing);
		assert_eq!(check.output.len(), 8);
	}

	#[test]
	fn identical_updates_do_not_wake_the_syncer() {
		let registry = LocalRegistry::new(64);
		registry.add_check(ttl_check("t", None));
		let mut changes = registry.changes();
		changes.mark_unchanged();

		registry.update_check(&"t".to_string(), CheckStatus::Passing, "ok");
		assert!(changes.has_changed().unwrap());
		changes.mark_unchanged();

		// same status and output again: no wake
		registry.update_check(&"t".to_string(), CheckStatus::Passing, "ok");
		assert!(!changes.has_changed().unwrap());
	}
}
