use {
	super::entries::{
		ConfigEntry,
		Failover,
		MatchKind,
		PathMatch,
		ProxyDefaults,
		Route,
		RouteDestination,
		RouteMatch,
		ServiceDefaults,
		ServiceResolver,
		ServiceRouter,
		ServiceSplitter,
		is_http_class,
	},
	core::time::Duration,
	serde::{Deserialize, Serialize},
	std::collections::{BTreeMap, HashMap, HashSet},
};

/// The fallback subset name used when none is configured.
pub const DEFAULT_SUBSET: &str = "default";

/// Input to one compilation: the destination being resolved and the
/// committed config-entry set to compile against.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
	pub service: &'a str,
	pub datacenter: &'a str,
	pub entries: &'a [ConfigEntry],
}

/// A compiled discovery chain: the executable router → splitter → resolver
/// graph for one destination service in one datacenter.
///
/// The graph is finite and acyclic; compilation rejects cycles. Nodes are
/// keyed `"<kind>:<service>"` (resolvers `"<kind>:<subset>.<service>"`),
/// targets `"<subset>.<service>.<datacenter>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledChain {
	pub service: String,
	pub datacenter: String,

	/// Effective protocol of the root service.
	pub protocol: String,

	/// Id of the entry node.
	pub start: String,

	pub nodes: BTreeMap<String, ChainNode>,
	pub targets: BTreeMap<String, Target>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainNode {
	Router {
		service: String,
		routes: Vec<CompiledRoute>,
	},
	Splitter {
		service: String,
		splits: Vec<CompiledSplit>,
	},
	Resolver {
		/// Id of the target this resolver produces.
		target: String,
		connect_timeout: Option<Duration>,
		request_timeout: Option<Duration>,
	},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRoute {
	/// `None` on the synthesized catch-all.
	pub matches: Option<RouteMatch>,
	pub destination: RouteDestination,

	/// Id of the next node.
	pub next: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledSplit {
	pub weight: f32,
	pub next: String,
}

/// A concrete resolution target: one `(service, subset, datacenter)` plus
/// the filter that selects its instances and its failover datacenters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
	pub id: String,
	pub service: String,
	pub subset: String,
	pub datacenter: String,

	/// Tag instances must carry to belong to this subset.
	pub tag: Option<String>,

	/// Whether only passing instances qualify.
	pub only_passing: bool,

	/// Datacenters to fail over to, in order.
	pub failover: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
	#[error(
		"service {service:?} has protocol {protocol:?}; routers require an \
		 http-class protocol"
	)]
	NonHttpRouter { service: String, protocol: String },

	#[error("discovery chain contains a cycle: {}", _0.join(" -> "))]
	Cycle(Vec<String>),

	#[error("{0}")]
	InvalidEntry(#[from] super::entries::InvalidConfigEntry),
}

/// Compiles the discovery chain for a destination. Pure: the output is a
/// function of the request and the entry set alone, so recompiling the
/// same committed set always yields an identical chain.
pub fn compile(req: CompileRequest<'_>) -> Result<CompiledChain, CompileError> {
	Compiler::new(req).run()
}

struct Compiler<'a> {
	req: CompileRequest<'a>,
	routers: HashMap<&'a str, &'a ServiceRouter>,
	splitters: HashMap<&'a str, &'a ServiceSplitter>,
	resolvers: HashMap<&'a str, &'a ServiceResolver>,
	service_defaults: HashMap<&'a str, &'a ServiceDefaults>,
	proxy_defaults: Option<&'a ProxyDefaults>,

	nodes: BTreeMap<String, ChainNode>,
	targets: BTreeMap<String, Target>,

	/// DFS visiting set for cycle detection.
	visiting: Vec<String>,
}

impl<'a> Compiler<'a> {
	fn new(req: CompileRequest<'a>) -> Self {
		let mut routers = HashMap::new();
		let mut splitters = HashMap::new();
		let mut resolvers = HashMap::new();
		let mut service_defaults = HashMap::new();
		let mut proxy_defaults = None;

		for entry in req.entries {
			match entry {
				ConfigEntry::ServiceRouter(router) => {
					routers.insert(router.name.as_str(), router);
				}
				ConfigEntry::ServiceSplitter(splitter) => {
					splitters.insert(splitter.name.as_str(), splitter);
				}
				ConfigEntry::ServiceResolver(resolver) => {
					resolvers.insert(resolver.name.as_str(), resolver);
				}
				ConfigEntry::ServiceDefaults(defaults) => {
					service_defaults.insert(defaults.name.as_str(), defaults);
				}
				ConfigEntry::ProxyDefaults(defaults) => {
					proxy_defaults = Some(defaults);
				}
			}
		}

		Self {
			req,
			routers,
			splitters,
			resolvers,
			service_defaults,
			proxy_defaults,
			nodes: BTreeMap::new(),
			targets: BTreeMap::new(),
			visiting: Vec::new(),
		}
	}

	fn run(mut self) -> Result<CompiledChain, CompileError> {
		// re-validate the involved entries; entries land in the store
		// individually validated, but compilation is the authority
		for entry in self.req.entries {
			entry.validate()?;
		}

		let protocol = self.protocol_of(self.req.service);
		let start = self.compile_service(self.req.service, None, true)?;

		Ok(CompiledChain {
			service: self.req.service.to_string(),
			datacenter: self.req.datacenter.to_string(),
			protocol,
			start,
			nodes: self.nodes,
			targets: self.targets,
		})
	}

	/// The effective protocol: service-defaults, then proxy-defaults, then
	/// tcp.
	fn protocol_of(&self, service: &str) -> String {
		self
			.service_defaults
			.get(service)
			.and_then(|d| d.protocol.clone())
			.or_else(|| {
				self.proxy_defaults.and_then(|d| d.protocol.clone())
			})
			.unwrap_or_else(|| "tcp".to_string())
	}

	/// Compiles the sub-chain for `(service, subset)` and returns the id
	/// of its entry node. Routers only apply at the chain root.
	fn compile_service(
		&mut self,
		service: &str,
		subset: Option<&str>,
		at_root: bool,
	) -> Result<String, CompileError> {
		if at_root && subset.is_none() {
			if let Some(router) = self.routers.get(service) {
				let protocol = self.protocol_of(service);
				if !is_http_class(&protocol) {
					return Err(CompileError::NonHttpRouter {
						service: service.to_string(),
						protocol,
					});
				}
				let router = *router;
				return self.compile_router(router);
			}
		}

		if subset.is_none() {
			if let Some(splitter) = self.splitters.get(service) {
				let splitter = *splitter;
				return self.compile_splitter(splitter);
			}
		}

		self.compile_resolver(service, subset)
	}

	fn compile_router(
		&mut self,
		router: &'a ServiceRouter,
	) -> Result<String, CompileError> {
		let id = format!("router:{}", router.name);
		if self.nodes.contains_key(&id) {
			return Ok(id);
		}
		self.enter(&id)?;

		let mut routes = Vec::with_capacity(router.routes.len() + 1);
		for route in &router.routes {
			let next = self.compile_service(
				&route.destination.service,
				route.destination.subset.as_deref(),
				false,
			)?;
			routes.push(CompiledRoute {
				matches: route.matches.clone(),
				destination: route.destination.clone(),
				next,
			});
		}

		// unmatched traffic falls through to the router's own service
		let default_next =
			self.compile_service(&router.name, None, false)?;
		routes.push(CompiledRoute {
			matches: None,
			destination: RouteDestination {
				service: router.name.clone(),
				subset: None,
				prefix_rewrite: None,
				request_timeout: None,
				num_retries: 0,
				retry_on_connect_failure: false,
				retry_on_status_codes: Vec::new(),
			},
			next: default_next,
		});

		self.leave();
		self.nodes.insert(id.clone(), ChainNode::Router {
			service: router.name.clone(),
			routes,
		});
		Ok(id)
	}

	fn compile_splitter(
		&mut self,
		splitter: &'a ServiceSplitter,
	) -> Result<String, CompileError> {
		let id = format!("splitter:{}", splitter.name);
		if self.nodes.contains_key(&id) {
			return Ok(id);
		}
		self.enter(&id)?;

		let mut splits = Vec::with_capacity(splitter.splits.len());
		for split in &splitter.splits {
			let service =
				split.service.as_deref().unwrap_or(&splitter.name);
			let next = if service == splitter.name {
				// same-service splits go straight to the resolver to avoid
				// re-entering this splitter
				self.compile_resolver(service, split.subset.as_deref())?
			} else {
				self.compile_service(
					service,
					split.subset.as_deref(),
					false,
				)?
			};
			splits.push(CompiledSplit {
				weight: split.weight,
				next,
			});
		}

		self.leave();
		self.nodes.insert(id.clone(), ChainNode::Splitter {
			service: splitter.name.clone(),
			splits,
		});
		Ok(id)
	}

	fn compile_resolver(
		&mut self,
		service: &str,
		subset: Option<&str>,
	) -> Result<String, CompileError> {
		let resolver = self.resolvers.get(service).copied();

		// a redirect diverts the whole resolution elsewhere
		if let Some(redirect) =
			resolver.and_then(|r| r.redirect.as_ref())
		{
			let target_service = redirect
				.service
				.clone()
				.unwrap_or_else(|| service.to_string());
			let target_subset =
				redirect.subset.as_deref().or(subset);

			if target_service != service
				&& redirect.datacenter.is_none()
			{
				// same-datacenter redirect to another service follows that
				// service's own chain (cycles are caught by the visiting
				// set)
				let id = format!(
					"redirect:{service}->{target_service}"
				);
				self.enter(&id)?;
				let next = self.compile_service(
					&target_service,
					target_subset,
					false,
				)?;
				self.leave();
				return Ok(next);
			}

			let datacenter = redirect
				.datacenter
				.clone()
				.unwrap_or_else(|| self.req.datacenter.to_string());
			return Ok(self.resolver_node(
				&target_service,
				target_subset,
				&datacenter,
			));
		}

		Ok(self.resolver_node(
			service,
			subset,
			&self.req.datacenter.to_string(),
		))
	}

	/// Materializes the resolver node and its target.
	fn resolver_node(
		&mut self,
		service: &str,
		subset: Option<&str>,
		datacenter: &str,
	) -> String {
		let resolver = self.resolvers.get(service).copied();

		let subset = subset
			.map(str::to_string)
			.or_else(|| {
				resolver.and_then(|r| r.default_subset.clone())
			})
			.unwrap_or_else(|| DEFAULT_SUBSET.to_string());

		let target_id = format!("{subset}.{service}.{datacenter}");
		let node_id = format!("resolver:{target_id}");
		if self.nodes.contains_key(&node_id) {
			return node_id;
		}

		let subset_def = resolver
			.and_then(|r| r.subsets.get(&subset))
			.cloned()
			.unwrap_or_default();

		let failover = resolver
			.and_then(|r| {
				r.failover
					.get(&subset)
					.or_else(|| r.failover.get("*"))
			})
			.map(|f: &Failover| f.datacenters.clone())
			.unwrap_or_default();

		self.targets.insert(target_id.clone(), Target {
			id: target_id.clone(),
			service: service.to_string(),
			subset: subset.clone(),
			datacenter: datacenter.to_string(),
			tag: subset_def.tag,
			only_passing: subset_def.only_passing,
			failover,
		});

		self.nodes.insert(node_id.clone(), ChainNode::Resolver {
			target: target_id,
			connect_timeout: resolver.and_then(|r| r.connect_timeout),
			request_timeout: resolver.and_then(|r| r.request_timeout),
		});

		node_id
	}

	fn enter(&mut self, id: &str) -> Result<(), CompileError> {
		if self.visiting.iter().any(|v| v == id) {
			let mut path = self.visiting.clone();
			path.push(id.to_string());
			return Err(CompileError::Cycle(path));
		}
		self.visiting.push(id.to_string());
		Ok(())
	}

	fn leave(&mut self) {
		self.visiting.pop();
	}
}

/// Request criteria evaluated against compiled routes.
#[derive(Debug, Clone, Default)]
pub struct RequestCriteria<'a> {
	pub path: &'a str,
	pub method: &'a str,
	pub headers: BTreeMap<String, String>,
	pub query_params: BTreeMap<String, String>,
}

impl CompiledChain {
	/// Walks the chain for a request and returns the selected target.
	/// `split_pick` in `[0, 100)` selects the branch at splitters.
	pub fn select(
		&self,
		request: &RequestCriteria<'_>,
		split_pick: f32,
	) -> Option<&Target> {
		let mut current = self.start.as_str();
		let mut seen = HashSet::new();

		loop {
			// compiled chains are acyclic; this guards evaluation against
			// a corrupted chain
			if !seen.insert(current.to_string()) {
				return None;
			}

			match self.nodes.get(current)? {
				ChainNode::Router { routes, .. } => {
					let route = routes.iter().find(|route| {
						route
							.matches
							.as_ref()
							.is_none_or(|m| matches_request(m, request))
					})?;
					current = route.next.as_str();
				}

				ChainNode::Splitter { splits, .. } => {
					let mut remaining = split_pick;
					let mut chosen = splits.last()?;
					for split in splits {
						if remaining < split.weight {
							chosen = split;
							break;
						}
						remaining -= split.weight;
					}
					current = chosen.next.as_str();
				}

				ChainNode::Resolver { target, .. } => {
					return self.targets.get(target);
				}
			}
		}
	}
}

/// Evaluates one route's match block against a request.
fn matches_request(
	matches: &RouteMatch,
	request: &RequestCriteria<'_>,
) -> bool {
	if let Some(path) = &matches.path {
		let ok = match path {
			PathMatch::Exact(exact) => request.path == exact,
			PathMatch::Prefix(prefix) => request.path.starts_with(prefix),
			PathMatch::Regex(pattern) => regex::Regex::new(pattern)
				.map(|re| re.is_match(request.path))
				.unwrap_or(false),
		};
		if !ok {
			return false;
		}
	}

	if !matches.methods.is_empty()
		&& !matches
			.methods
			.iter()
			.any(|m| m.eq_ignore_ascii_case(request.method))
	{
		return false;
	}

	for header in &matches.headers {
		let value = request.headers.get(&header.name);
		if !field_matches(&header.kind, value) ^ header.invert {
			return false;
		}
	}

	for param in &matches.query_params {
		let value = request.query_params.get(&param.name);
		if !field_matches(&param.kind, value) ^ param.invert {
			return false;
		}
	}

	true
}

fn field_matches(kind: &MatchKind, value: Option<&String>) -> bool {
	let Some(value) = value else {
		return false;
	};

	match kind {
		MatchKind::Present => true,
		MatchKind::Exact(exact) => value == exact,
		MatchKind::Prefix(prefix) => value.starts_with(prefix),
		MatchKind::Suffix(suffix) => value.ends_with(suffix),
		MatchKind::Regex(pattern) => regex::Regex::new(pattern)
			.map(|re| re.is_match(value))
			.unwrap_or(false),
	}
}
