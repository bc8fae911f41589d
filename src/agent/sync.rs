use {
	super::local::LocalRegistry,
	crate::{
		primitives::jittered,
		rpc::{
			Dispatcher,
			QueryOptions,
			RequestPayload,
			ResponsePayload,
			RpcRequest,
		},
		types::{Check, CheckId, Node, Service, ServiceId},
	},
	backoff::{ExponentialBackoffBuilder, backoff::Backoff},
	core::time::Duration,
	std::{
		collections::{BTreeMap, HashMap},
		time::Instant,
	},
	tokio_util::sync::CancellationToken,
};

/// How often a check-output-only difference may be pushed to the cluster.
/// Status transitions always sync immediately; a rapidly flapping output
/// with a stable status is deferred so it cannot flood the log.
const OUTPUT_DEFERRAL: Duration = Duration::from_secs(30);

/// Reconciles the agent-local registry with the replicated catalog.
///
/// Runs on change events from the registry and on a jittered full-sync
/// interval; failures back off exponentially with a cap. Identical
/// consecutive syncs coalesce into no-ops because the diff is empty.
pub struct Syncer {
	node: Node,
	registry: LocalRegistry,
	dispatcher: Dispatcher,
	interval: Duration,
	cancel: CancellationToken,

	/// Last time an output-only change was synced, per check.
	output_synced: HashMap<CheckId, Instant>,
}

impl Syncer {
	pub fn new(
		node: Node,
		registry: LocalRegistry,
		dispatcher: Dispatcher,
		interval: Duration,
		cancel: CancellationToken,
	) -> Self {
		Self {
			node,
			registry,
			dispatcher,
			interval,
			cancel,
			output_synced: HashMap::new(),
		}
	}

	pub async fn run(mut self) {
		let mut changes = self.registry.changes();
		let mut backoff = ExponentialBackoffBuilder::default()
			.with_max_interval(Duration::from_secs(60))
			.with_max_elapsed_time(None)
			.build();

		loop {
			let wait = jittered(self.interval, self.interval / 8);

			tokio::select! {
				_ = self.cancel.cancelled() => {
					tracing::debug!("anti-entropy syncer terminated");
					return;
				}

				changed = changes.changed() => {
					if changed.is_err() {
						return;
					}
				}

				_ = tokio::time::sleep(wait) => {}
			}

			// drain the failure backoff before re-contacting the servers
			while let Err(e) = self.sync().await {
				tracing::debug!(error = %e, "anti-entropy sync failed");
				let Some(delay) = backoff.next_backoff() else {
					break;
				};
				tokio::select! {
					_ = self.cancel.cancelled() => return,
					_ = tokio::time::sleep(delay) => {}
				}
			}
			backoff.reset();

			// coalesce change storms that arrived while syncing
			changes.mark_unchanged();
		}
	}

	/// One reconciliation round: diff local vs remote and emit the
	/// register/deregister/update RPCs that make the remote view equal.
	pub async fn sync(&mut self) -> Result<(), crate::Error> {
		let (local_services, local_checks) = self.registry.snapshot();

		let remote_services = self.remote_services().await?;
		let remote_checks = self.remote_checks().await?;

		// the node itself plus anything locally changed
		let mut register_services = Vec::new();
		for service in &local_services {
			match remote_services.get(&service.id) {
				Some(remote) if services_equal(remote, service) => {}
				_ => register_services.push(service.clone()),
			}
		}

		let mut register_checks = Vec::new();
		let mut update_checks = Vec::new();
		for check in &local_checks {
			match remote_checks.get(&check.id) {
				None => register_checks.push(check.clone()),
				Some(remote)
					if remote.status == check.status
						&& remote.output == check.output => {}
				Some(remote) if checks_structurally_equal(remote, check) => {
					// only status/output drifted
					if self.should_sync_status(remote, check) {
						update_checks.push((remote.status, check.clone()));
					}
				}
				Some(_) => register_checks.push(check.clone()),
			}
		}

		let node_in_sync = self.node_registered().await?;

		if !register_services.is_empty()
			|| !register_checks.is_empty()
			|| !node_in_sync
		{
			self
				.call(RequestPayload::Register {
					node: self.node.clone(),
					services: register_services,
					checks: register_checks,
				})
				.await?;
		}

		for (from, check) in update_checks {
			self
				.call(RequestPayload::UpdateCheck {
					node: self.node.name.clone(),
					check_id: check.id.clone(),
					from,
					to: check.status,
					output: check.output.clone(),
				})
				.await?;
			self.output_synced.insert(check.id, Instant::now());
		}

		// remote leftovers this agent no longer owns
		let local_service_ids: Vec<&ServiceId> =
			local_services.iter().map(|s| &s.id).collect();
		for id in remote_services.keys() {
			if !local_service_ids.contains(&id) {
				self
					.call(RequestPayload::DeregisterService {
						node: self.node.name.clone(),
						service_id: id.clone(),
					})
					.await?;
			}
		}

		let local_check_ids: Vec<&CheckId> =
			local_checks.iter().map(|c| &c.id).collect();
		for (id, check) in &remote_checks {
			let owner_departed = check
				.service_id
				.as_ref()
				.is_some_and(|sid| !local_service_ids.contains(&sid));
			if !local_check_ids.contains(&id) && !owner_departed {
				self
					.call(RequestPayload::DeregisterCheck {
						node: self.node.name.clone(),
						check_id: id.clone(),
					})
					.await?;
			}
		}

		Ok(())
	}

	/// A status transition syncs immediately; an output-only change is
	/// rate limited.
	fn should_sync_status(&self, remote: &Check, local: &Check) -> bool {
		if remote.status != local.status {
			return true;
		}
		match self.output_synced.get(&local.id) {
			Some(at) => at.elapsed() >= OUTPUT_DEFERRAL,
			None => true,
		}
	}

	async fn node_registered(&self) -> Result<bool, crate::Error> {
		let response = self
			.call(RequestPayload::ListNodes)
			.await?;
		match response {
			ResponsePayload::Nodes(nodes) => Ok(nodes
				.iter()
				.any(|n| n.name == self.node.name && *n == self.node)),
			_ => Ok(false),
		}
	}

	async fn remote_services(
		&self,
	) -> Result<BTreeMap<ServiceId, Service>, crate::Error> {
		let response = self
			.call(RequestPayload::NodeServices {
				node: self.node.name.clone(),
			})
			.await?;
		match response {
			ResponsePayload::NodeServices(services) => Ok(services
				.into_iter()
				.map(|s| (s.id.clone(), s))
				.collect()),
			_ => Ok(BTreeMap::new()),
		}
	}

	async fn remote_checks(
		&self,
	) -> Result<BTreeMap<CheckId, Check>, crate::Error> {
		let response = self
			.call(RequestPayload::NodeChecks {
				node: self.node.name.clone(),
			})
			.await?;
		match response {
			ResponsePayload::Checks(checks) => Ok(checks
				.into_iter()
				.map(|c| (c.id.clone(), c))
				.collect()),
			_ => Ok(BTreeMap::new()),
		}
	}

	async fn call(
		&self,
		payload: RequestPayload,
	) -> Result<ResponsePayload, crate::Error> {
		let response = self
			.dispatcher
			.serve(RpcRequest {
				options: QueryOptions {
					allow_stale: false,
					..QueryOptions::default()
				},
				payload,
			})
			.await;

		response.payload.map_err(crate::Error::from)
	}
}

/// Service equality for sync purposes: when the cluster side has tag
/// override enabled, external tag edits are not reverted.
fn services_equal(remote: &Service, local: &Service) -> bool {
	if !remote.enable_tag_override {
		return remote == local;
	}

	let mut remote = remote.clone();
	remote.tags = local.tags.clone();
	remote == *local
}

/// Check equality ignoring the volatile status/output pair.
fn checks_structurally_equal(remote: &Check, local: &Check) -> bool {
	let mut remote = remote.clone();
	remote.status = local.status;
	remote.output = local.output.clone();
	remote == *local
}

#[cfg(test)]
mod tests {
	use {super::*, crate::types::CheckStatus};

	fn check(id: &str, status: CheckStatus, output: &str) -> Check {
		Check {
			id: id.to_string(),
			name: id.to_string(),
			status,
			notes: String::new(),
			output: output.to_string(),
			service_id: None,
			definition: None,
			deregister_critical_after: None,
		}
	}

	#[test]
	fn tag_override_suppresses_tag_drift() {
		let mut remote = Service {
			id: "web".to_string(),
			name: "web".to_string(),
			port: 80,
			address: String::new(),
			tags: vec!["external-edit".to_string()],
			meta: BTreeMap::new(),
			tagged_addresses: BTreeMap::new(),
			enable_tag_override: true,
			connect_native: false,
			proxy: None,
		};
		let mut local = remote.clone();
		local.tags = vec!["local".to_string()];

		assert!(services_equal(&remote, &local));

		remote.enable_tag_override = false;
		local.enable_tag_override = false;
		assert!(!services_equal(&remote, &local));
	}

	#[test]
	fn structural_equality_ignores_volatile_fields() {
		let remote = check("c", CheckStatus::Passing, "old output");
		let local = check("c", CheckStatus::Critical, "new output");
		assert!(checks_structurally_equal(&remote, &local));

		let mut renamed = local.clone();
		renamed.name = "different".to_string();
		assert!(!checks_structurally_equal(&remote, &renamed));
	}
}
