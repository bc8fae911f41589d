use {
	super::local::LocalRegistry,
	crate::types::{CheckDefinition, CheckId, CheckStatus},
	parking_lot::Mutex,
	std::{collections::HashMap, sync::Arc, time::Instant},
	tokio::{net::TcpStream, sync::watch, time::sleep},
	tokio_util::sync::CancellationToken,
};

/// Runs the agent-local health checks and feeds observed statuses into
/// the registry (from where the anti-entropy syncer picks them up).
///
/// TTL checks only track renewals; HTTP, TCP and gRPC checks actively
/// probe. An alias check mirrors the worst status of another local
/// service's checks.
pub struct CheckRunners {
	registry: LocalRegistry,
	cancel: CancellationToken,
	http: reqwest::Client,
	running: Mutex<HashMap<CheckId, Running>>,
	ttl_renewals: Arc<Mutex<HashMap<CheckId, watch::Sender<u64>>>>,
}

struct Running {
	definition: CheckDefinition,
	cancel: CancellationToken,
}

impl CheckRunners {
	pub fn new(registry: LocalRegistry, cancel: CancellationToken) -> Self {
		Self {
			registry,
			cancel,
			http: reqwest::Client::new(),
			running: Mutex::new(HashMap::new()),
			ttl_renewals: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Watches the registry and keeps one runner task per runnable check.
	pub async fn run(self: Arc<Self>) {
		let mut changes = self.registry.changes();
		self.reconcile();

		loop {
			tokio::select! {
				_ = self.cancel.cancelled() => return,
				changed = changes.changed() => {
					if changed.is_err() {
						return;
					}
					self.reconcile();
				}
			}
		}
	}

	/// Renews a TTL check with the given status. Resets the expiry timer.
	pub fn renew_ttl(
		&self,
		id: &CheckId,
		status: CheckStatus,
		output: impl Into<String>,
	) {
		self.registry.update_check(id, status, output);
		if let Some(renewals) = self.ttl_renewals.lock().get(id) {
			renewals.send_modify(|v| *v += 1);
		}
	}

	/// Starts missing runners, stops orphaned ones, restarts changed
	/// ones.
	fn reconcile(&self) {
		let desired: HashMap<CheckId, CheckDefinition> =
			self.registry.runnable_checks().into_iter().collect();

		let mut running = self.running.lock();

		running.retain(|id, task| {
			let keep = desired.get(id) == Some(&task.definition);
			if !keep {
				task.cancel.cancel();
				self.ttl_renewals.lock().remove(id);
			}
			keep
		});

		for (id, definition) in desired {
			if running.contains_key(&id) {
				continue;
			}

			let cancel = self.cancel.child_token();
			running.insert(id.clone(), Running {
				definition: definition.clone(),
				cancel: cancel.clone(),
			});

			self.spawn_runner(id, definition, cancel);
		}
	}

	fn spawn_runner(
		&self,
		id: CheckId,
		definition: CheckDefinition,
		cancel: CancellationToken,
	) {
		let registry = self.registry.clone();

		match definition {
			CheckDefinition::Ttl { ttl } => {
				let (renew_tx, renew_rx) = watch::channel(0u64);
				self.ttl_renewals.lock().insert(id.clone(), renew_tx);
				tokio::spawn(run_ttl(registry, id, ttl, renew_rx, cancel));
			}

			CheckDefinition::Http {
				url,
				interval,
				timeout,
				method,
			} => {
				let client = self.http.clone();
				tokio::spawn(async move {
					let probe = || {
						let client = client.clone();
						let url = url.clone();
						let method = method.clone();
						async move {
							probe_http(&client, &url, method.as_deref(), timeout)
								.await
						}
					};
					run_probe(registry, id, interval, cancel, probe).await;
				});
			}

			CheckDefinition::Tcp {
				address,
				interval,
				timeout,
			} => {
				tokio::spawn(async move {
					let probe = || {
						let address = address.clone();
						async move { probe_tcp(&address, timeout).await }
					};
					run_probe(registry, id, interval, cancel, probe).await;
				});
			}

			// the gRPC health protocol needs a live stream to the
			// endpoint; this probes reachability of the listener
			CheckDefinition::Grpc {
				endpoint,
				interval,
				timeout,
			} => {
				tokio::spawn(async move {
					let probe = || {
						let endpoint = endpoint.clone();
						async move { probe_tcp(&endpoint, timeout).await }
					};
					run_probe(registry, id, interval, cancel, probe).await;
				});
			}

			CheckDefinition::Alias { service_id } => {
				tokio::spawn(run_alias(registry, id, service_id, cancel));
			}
		}
	}
}

/// TTL check: passing while renewals arrive within the TTL, critical when
/// the TTL lapses. The grace window is twice the TTL, matching renewal
/// traffic that may be in flight.
async fn run_ttl(
	registry: LocalRegistry,
	id: CheckId,
	ttl: core::time::Duration,
	mut renewals: watch::Receiver<u64>,
	cancel: CancellationToken,
) {
	let grace = ttl * 2;
	let mut deadline = Instant::now() + grace;

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return,

			changed = renewals.changed() => {
				if changed.is_err() {
					return;
				}
				deadline = Instant::now() + grace;
			}

			_ = tokio::time::sleep_until(deadline.into()) => {
				registry.update_check(
					&id,
					CheckStatus::Critical,
					"ttl expired",
				);
				// rearm so a later renewal can bring it back
				deadline = Instant::now() + grace;
			}
		}
	}
}

/// Shared probe loop: runs the probe every interval and feeds the
/// outcome into the registry.
async fn run_probe<F, Fut>(
	registry: LocalRegistry,
	id: CheckId,
	interval: core::time::Duration,
	cancel: CancellationToken,
	probe: F,
) where
	F: Fn() -> Fut,
	Fut: Future<Output = (CheckStatus, String)>,
{
	loop {
		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = sleep(crate::primitives::jittered(interval, interval / 8)) => {
				let (status, output) = probe().await;
				registry.update_check(&id, status, output);
			}
		}
	}
}

async fn probe_http(
	client: &reqwest::Client,
	url: &str,
	method: Option<&str>,
	timeout: core::time::Duration,
) -> (CheckStatus, String) {
	let method = method
		.and_then(|m| m.parse::<reqwest::Method>().ok())
		.unwrap_or(reqwest::Method::GET);

	let response = client
		.request(method, url)
		.timeout(timeout)
		.send()
		.await;

	match response {
		Ok(response) => {
			let status = response.status();
			let verdict = if status.is_success() {
				CheckStatus::Passing
			} else if status.as_u16() == 429 {
				CheckStatus::Warning
			} else {
				CheckStatus::Critical
			};
			(verdict, format!("HTTP {status}"))
		}
		Err(e) => (CheckStatus::Critical, e.to_string()),
	}
}

async fn probe_tcp(
	address: &str,
	timeout: core::time::Duration,
) -> (CheckStatus, String) {
	match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
		Ok(Ok(_)) => (CheckStatus::Passing, format!("connect {address}: ok")),
		Ok(Err(e)) => (CheckStatus::Critical, e.to_string()),
		Err(_) => (CheckStatus::Critical, "connect timed out".to_string()),
	}
}

/// Alias check: mirrors the worst status of the aliased service's checks
/// in the local registry.
async fn run_alias(
	registry: LocalRegistry,
	id: CheckId,
	service_id: crate::types::ServiceId,
	cancel: CancellationToken,
) {
	let mut changes = registry.changes();

	loop {
		let (_, checks) = registry.snapshot();
		let worst = checks
			.iter()
			.filter(|check| {
				check.id != id
					&& check.service_id.as_ref() == Some(&service_id)
			})
			.map(|check| check.status)
			.max()
			.unwrap_or(CheckStatus::Passing);

		registry.update_check(
			&id,
			worst,
			format!("aliasing checks of {service_id:?}"),
		);

		tokio::select! {
			_ = cancel.cancelled() => return,
			changed = changes.changed() => {
				if changed.is_err() {
					return;
				}
			}
		}
	}
}
