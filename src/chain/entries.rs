use {
	core::time::Duration,
	serde::{Deserialize, Serialize},
	std::collections::BTreeMap,
};

/// Config entry kind discriminators, also the `kind` half of the state
/// store key.
pub const KIND_SERVICE_ROUTER: &str = "service-router";
pub const KIND_SERVICE_SPLITTER: &str = "service-splitter";
pub const KIND_SERVICE_RESOLVER: &str = "service-resolver";
pub const KIND_SERVICE_DEFAULTS: &str = "service-defaults";
pub const KIND_PROXY_DEFAULTS: &str = "proxy-defaults";

/// The name under which global proxy defaults are stored.
pub const PROXY_DEFAULTS_NAME: &str = "global";

/// User-authored configuration entries replicated through the log. The
/// traffic-management kinds (router/splitter/resolver) compile into
/// discovery chains; the defaults kinds supply per-service and global
/// protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ConfigEntry {
	#[serde(rename = "service-router")]
	ServiceRouter(ServiceRouter),

	#[serde(rename = "service-splitter")]
	ServiceSplitter(ServiceSplitter),

	#[serde(rename = "service-resolver")]
	ServiceResolver(ServiceResolver),

	#[serde(rename = "service-defaults")]
	ServiceDefaults(ServiceDefaults),

	#[serde(rename = "proxy-defaults")]
	ProxyDefaults(ProxyDefaults),
}

impl ConfigEntry {
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::ServiceRouter(_) => KIND_SERVICE_ROUTER,
			Self::ServiceSplitter(_) => KIND_SERVICE_SPLITTER,
			Self::ServiceResolver(_) => KIND_SERVICE_RESOLVER,
			Self::ServiceDefaults(_) => KIND_SERVICE_DEFAULTS,
			Self::ProxyDefaults(_) => KIND_PROXY_DEFAULTS,
		}
	}

	pub fn name(&self) -> &str {
		match self {
			Self::ServiceRouter(entry) => &entry.name,
			Self::ServiceSplitter(entry) => &entry.name,
			Self::ServiceResolver(entry) => &entry.name,
			Self::ServiceDefaults(entry) => &entry.name,
			Self::ProxyDefaults(entry) => &entry.name,
		}
	}

	/// Structural validation applied before an entry is proposed to the
	/// log. Cross-entry rules (protocol compatibility, cycles) are checked
	/// at compile time.
	pub fn validate(&self) -> Result<(), InvalidConfigEntry> {
		match self {
			Self::ServiceRouter(router) => router.validate(),
			Self::ServiceSplitter(splitter) => splitter.validate(),
			Self::ServiceResolver(resolver) => resolver.validate(),
			Self::ServiceDefaults(_) => Ok(()),
			Self::ProxyDefaults(_) => Ok(()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidConfigEntry {
	#[error("router {0:?}: route {1} has an invalid regex: {2}")]
	BadRegex(String, usize, String),

	#[error(
		"router {0:?}: route {1} sets prefix_rewrite without a path \
		 exact/prefix match"
	)]
	RewriteWithoutPathMatch(String, usize),

	#[error("splitter {0:?}: weights sum to {1}, expected 100")]
	BadWeightSum(String, f32),

	#[error("splitter {0:?}: split {1} has a negative weight")]
	NegativeWeight(String, usize),

	#[error("splitter {0:?} references itself without a subset change")]
	SelfSplit(String),

	#[error("resolver {0:?}: default subset {1:?} is not defined")]
	UnknownDefaultSubset(String, String),
}

/// Routes HTTP-class traffic addressed to one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRouter {
	pub name: String,

	/// Ordered routes; the first match wins. Unmatched traffic falls
	/// through to an implicit catch-all targeting the router's own
	/// service.
	#[serde(default)]
	pub routes: Vec<Route>,
}

impl ServiceRouter {
	fn validate(&self) -> Result<(), InvalidConfigEntry> {
		for (i, route) in self.routes.iter().enumerate() {
			if let Some(m) = &route.matches {
				if let Some(PathMatch::Regex(pattern)) = &m.path {
					regex::Regex::new(pattern).map_err(|e| {
						InvalidConfigEntry::BadRegex(
							self.name.clone(),
							i,
							e.to_string(),
						)
					})?;
				}
				for header in &m.headers {
					if let MatchKind::Regex(pattern) = &header.kind {
						regex::Regex::new(pattern).map_err(|e| {
							InvalidConfigEntry::BadRegex(
								self.name.clone(),
								i,
								e.to_string(),
							)
						})?;
					}
				}
			}

			if route.destination.prefix_rewrite.is_some() {
				let has_prefix_or_exact = route
					.matches
					.as_ref()
					.and_then(|m| m.path.as_ref())
					.is_some_and(|p| {
						matches!(
							p,
							PathMatch::Exact(_) | PathMatch::Prefix(_)
						)
					});
				if !has_prefix_or_exact {
					return Err(InvalidConfigEntry::RewriteWithoutPathMatch(
						self.name.clone(),
						i,
					));
				}
			}
		}
		Ok(())
	}
}

/// One route: match criteria plus a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
	/// `None` matches everything.
	#[serde(default)]
	pub matches: Option<RouteMatch>,

	pub destination: RouteDestination,
}

/// HTTP match criteria. All present criteria must match.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteMatch {
	#[serde(default)]
	pub path: Option<PathMatch>,

	/// Accepted methods; empty means any.
	#[serde(default)]
	pub methods: Vec<String>,

	#[serde(default)]
	pub headers: Vec<FieldMatch>,

	#[serde(default)]
	pub query_params: Vec<FieldMatch>,
}

/// Path matching forms. Mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMatch {
	Exact(String),
	Prefix(String),
	Regex(String),
}

/// Header or query-parameter matcher: a field name, one match form, and an
/// optional inversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
	pub name: String,

	#[serde(flatten)]
	pub kind: MatchKind,

	#[serde(default)]
	pub invert: bool,
}

/// One match form per matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
	Present,
	Exact(String),
	Prefix(String),
	Suffix(String),
	Regex(String),
}

/// Where matched traffic goes and how the request is shaped on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDestination {
	pub service: String,

	#[serde(default)]
	pub subset: Option<String>,

	/// Rewrites the matched path prefix before forwarding. Requires a path
	/// exact/prefix match.
	#[serde(default)]
	pub prefix_rewrite: Option<String>,

	#[serde(default)]
	pub request_timeout: Option<Duration>,

	#[serde(default)]
	pub num_retries: u32,

	#[serde(default)]
	pub retry_on_connect_failure: bool,

	#[serde(default)]
	pub retry_on_status_codes: Vec<u16>,
}

/// Distributes traffic for one service across weighted targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSplitter {
	pub name: String,
	pub splits: Vec<Split>,
}

/// Tolerance on the weight sum.
const WEIGHT_SUM_EPSILON: f32 = 0.01;

impl ServiceSplitter {
	fn validate(&self) -> Result<(), InvalidConfigEntry> {
		let mut sum = 0.0f32;
		for (i, split) in self.splits.iter().enumerate() {
			if split.weight < 0.0 {
				return Err(InvalidConfigEntry::NegativeWeight(
					self.name.clone(),
					i,
				));
			}
			sum += split.weight;

			let target_service =
				split.service.as_deref().unwrap_or(&self.name);
			if target_service == self.name && split.subset.is_none() {
				return Err(InvalidConfigEntry::SelfSplit(self.name.clone()));
			}
		}

		if (sum - 100.0).abs() > WEIGHT_SUM_EPSILON {
			return Err(InvalidConfigEntry::BadWeightSum(
				self.name.clone(),
				sum,
			));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
	/// Share of traffic in percent. All weights of a splitter sum to 100
	/// within a small tolerance.
	pub weight: f32,

	/// Target service; `None` means the splitter's own service.
	#[serde(default)]
	pub service: Option<String>,

	#[serde(default)]
	pub subset: Option<String>,
}

/// Resolves one service to concrete instances: subsets, redirects,
/// failover datacenters and connection behavior.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceResolver {
	pub name: String,

	#[serde(default)]
	pub default_subset: Option<String>,

	/// Named subsets; instances are filtered by tag.
	#[serde(default)]
	pub subsets: BTreeMap<String, Subset>,

	/// Diverts all traffic to another service/subset/datacenter instead of
	/// resolving locally.
	#[serde(default)]
	pub redirect: Option<Redirect>,

	/// Per-subset failover datacenter lists; the key `"*"` applies to all
	/// subsets.
	#[serde(default)]
	pub failover: BTreeMap<String, Failover>,

	#[serde(default)]
	pub connect_timeout: Option<Duration>,

	#[serde(default)]
	pub request_timeout: Option<Duration>,
}

impl ServiceResolver {
	fn validate(&self) -> Result<(), InvalidConfigEntry> {
		if let Some(subset) = &self.default_subset {
			if !self.subsets.contains_key(subset) {
				return Err(InvalidConfigEntry::UnknownDefaultSubset(
					self.name.clone(),
					subset.clone(),
				));
			}
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Subset {
	/// Tag the instances of this subset must carry.
	#[serde(default)]
	pub tag: Option<String>,

	/// Whether only passing instances belong to the subset.
	#[serde(default)]
	pub only_passing: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Redirect {
	#[serde(default)]
	pub service: Option<String>,

	#[serde(default)]
	pub subset: Option<String>,

	#[serde(default)]
	pub datacenter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Failover {
	/// Datacenters to try, in order, when the local subset has no healthy
	/// instances.
	#[serde(default)]
	pub datacenters: Vec<String>,
}

/// Per-service defaults (protocol and mesh behavior).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefaults {
	pub name: String,

	#[serde(default)]
	pub protocol: Option<String>,
}

/// Global proxy defaults. Stored under the fixed name `"global"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDefaults {
	pub name: String,

	#[serde(default)]
	pub protocol: Option<String>,
}

/// Whether a protocol name counts as HTTP-class for routing purposes.
pub fn is_http_class(protocol: &str) -> bool {
	matches!(protocol, "http" | "http2" | "grpc")
}
