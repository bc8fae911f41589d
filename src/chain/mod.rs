//! The discovery-chain compiler: turns committed `service-router`,
//! `service-splitter`, `service-resolver` and defaults config entries into
//! an executable routing graph for one destination.
//!
//! Compilation is a pure function of the committed entry set at one
//! index: recompiling the same set always yields an equal chain. The
//! result is a finite acyclic graph; cycles are rejected as validation
//! errors.

mod compile;
mod entries;

pub use {
	compile::{
		ChainNode,
		CompileError,
		CompileRequest,
		CompiledChain,
		CompiledRoute,
		CompiledSplit,
		DEFAULT_SUBSET,
		RequestCriteria,
		Target,
		compile,
	},
	entries::{
		ConfigEntry,
		Failover,
		FieldMatch,
		InvalidConfigEntry,
		KIND_PROXY_DEFAULTS,
		KIND_SERVICE_DEFAULTS,
		KIND_SERVICE_RESOLVER,
		KIND_SERVICE_ROUTER,
		KIND_SERVICE_SPLITTER,
		MatchKind,
		PROXY_DEFAULTS_NAME,
		PathMatch,
		ProxyDefaults,
		Redirect,
		Route,
		RouteDestination,
		RouteMatch,
		ServiceDefaults,
		ServiceResolver,
		ServiceRouter,
		ServiceSplitter,
		Split,
		Subset,
		is_http_class,
	},
};

#[cfg(test)]
mod tests {
	use {super::*, core::time::Duration, std::collections::BTreeMap};

	fn http_defaults(service: &str) -> ConfigEntry {
		ConfigEntry::ServiceDefaults(ServiceDefaults {
			name: service.to_string(),
			protocol: Some("http".to_string()),
		})
	}

	fn route(path_prefix: &str, service: &str) -> Route {
		Route {
			matches: Some(RouteMatch {
				path: Some(PathMatch::Prefix(path_prefix.to_string())),
				..RouteMatch::default()
			}),
			destination: RouteDestination {
				service: service.to_string(),
				subset: None,
				prefix_rewrite: None,
				request_timeout: None,
				num_retries: 0,
				retry_on_connect_failure: false,
				retry_on_status_codes: Vec::new(),
			},
		}
	}

	#[test]
	fn default_chain_is_single_resolver() {
		let chain = compile(CompileRequest {
			service: "web",
			datacenter: "dc1",
			entries: &[],
		})
		.unwrap();

		assert_eq!(chain.protocol, "tcp");
		assert_eq!(chain.start, "resolver:default.web.dc1");
		assert_eq!(chain.targets.len(), 1);

		let target = chain.targets.get("default.web.dc1").unwrap();
		assert_eq!(target.service, "web");
		assert_eq!(target.subset, DEFAULT_SUBSET);
		assert_eq!(target.datacenter, "dc1");
	}

	#[test]
	fn router_matches_and_falls_through() {
		let entries = vec![
			http_defaults("web"),
			http_defaults("admin"),
			ConfigEntry::ServiceRouter(ServiceRouter {
				name: "web".to_string(),
				routes: vec![route("/admin", "admin")],
			}),
			ConfigEntry::ServiceResolver(ServiceResolver {
				name: "admin".to_string(),
				..ServiceResolver::default()
			}),
		];

		let chain = compile(CompileRequest {
			service: "web",
			datacenter: "dc1",
			entries: &entries,
		})
		.unwrap();

		// /admin/users routes to admin:default
		let target = chain
			.select(
				&RequestCriteria {
					path: "/admin/users",
					method: "GET",
					..RequestCriteria::default()
				},
				0.0,
			)
			.unwrap();
		assert_eq!(target.service, "admin");
		assert_eq!(target.subset, "default");

		// anything else falls through to web:default
		let target = chain
			.select(
				&RequestCriteria {
					path: "/",
					method: "GET",
					..RequestCriteria::default()
				},
				0.0,
			)
			.unwrap();
		assert_eq!(target.service, "web");
		assert_eq!(target.subset, "default");
	}

	#[test]
	fn router_requires_http_protocol() {
		let entries = vec![ConfigEntry::ServiceRouter(ServiceRouter {
			name: "web".to_string(),
			routes: vec![],
		})];

		let err = compile(CompileRequest {
			service: "web",
			datacenter: "dc1",
			entries: &entries,
		})
		.unwrap_err();

		assert!(matches!(err, CompileError::NonHttpRouter { .. }));
	}

	#[test]
	fn splitter_distributes_by_weight() {
		let entries = vec![
			http_defaults("web"),
			ConfigEntry::ServiceSplitter(ServiceSplitter {
				name: "web".to_string(),
				splits: vec![
					Split {
						weight: 90.0,
						service: None,
						subset: Some("v1".to_string()),
					},
					Split {
						weight: 10.0,
						service: None,
						subset: Some("v2".to_string()),
					},
				],
			}),
			ConfigEntry::ServiceResolver(ServiceResolver {
				name: "web".to_string(),
				subsets: BTreeMap::from([
					("v1".to_string(), Subset {
						tag: Some("v1".to_string()),
						only_passing: false,
					}),
					("v2".to_string(), Subset {
						tag: Some("v2".to_string()),
						only_passing: false,
					}),
				]),
				..ServiceResolver::default()
			}),
		];

		let chain = compile(CompileRequest {
			service: "web",
			datacenter: "dc1",
			entries: &entries,
		})
		.unwrap();

		let criteria = RequestCriteria::default();
		let low = chain.select(&criteria, 10.0).unwrap();
		assert_eq!(low.subset, "v1");

		let high = chain.select(&criteria, 95.0).unwrap();
		assert_eq!(high.subset, "v2");
		assert_eq!(high.tag.as_deref(), Some("v2"));
	}

	#[test]
	fn splitter_weights_must_sum_to_100() {
		let entries = vec![
			http_defaults("web"),
			ConfigEntry::ServiceSplitter(ServiceSplitter {
				name: "web".to_string(),
				splits: vec![Split {
					weight: 60.0,
					service: Some("other".to_string()),
					subset: None,
				}],
			}),
		];

		let err = compile(CompileRequest {
			service: "web",
			datacenter: "dc1",
			entries: &entries,
		})
		.unwrap_err();
		assert!(matches!(
			err,
			CompileError::InvalidEntry(InvalidConfigEntry::BadWeightSum(_, _))
		));
	}

	#[test]
	fn cyclic_redirects_are_rejected() {
		let entries = vec![
			ConfigEntry::ServiceResolver(ServiceResolver {
				name: "a".to_string(),
				redirect: Some(Redirect {
					service: Some("b".to_string()),
					subset: None,
					datacenter: None,
				}),
				..ServiceResolver::default()
			}),
			ConfigEntry::ServiceResolver(ServiceResolver {
				name: "b".to_string(),
				redirect: Some(Redirect {
					service: Some("a".to_string()),
					subset: None,
					datacenter: None,
				}),
				..ServiceResolver::default()
			}),
		];

		let err = compile(CompileRequest {
			service: "a",
			datacenter: "dc1",
			entries: &entries,
		})
		.unwrap_err();
		assert!(matches!(err, CompileError::Cycle(_)));
	}

	#[test]
	fn failover_and_redirect_to_other_datacenter() {
		let entries = vec![ConfigEntry::ServiceResolver(ServiceResolver {
			name: "db".to_string(),
			failover: BTreeMap::from([("*".to_string(), Failover {
				datacenters: vec!["dc2".to_string(), "dc3".to_string()],
			})]),
			connect_timeout: Some(Duration::from_secs(5)),
			..ServiceResolver::default()
		})];

		let chain = compile(CompileRequest {
			service: "db",
			datacenter: "dc1",
			entries: &entries,
		})
		.unwrap();

		let target = chain.targets.get("default.db.dc1").unwrap();
		assert_eq!(target.failover, vec!["dc2", "dc3"]);
	}

	#[test]
	fn recompilation_of_reparsed_entries_is_equal() {
		let entries = vec![
			http_defaults("web"),
			http_defaults("admin"),
			ConfigEntry::ServiceRouter(ServiceRouter {
				name: "web".to_string(),
				routes: vec![route("/admin", "admin")],
			}),
		];

		let chain1 = compile(CompileRequest {
			service: "web",
			datacenter: "dc1",
			entries: &entries,
		})
		.unwrap();

		// serialize, re-parse, re-compile: the chain must be identical
		let json = serde_json::to_string(&entries).unwrap();
		let reparsed: Vec<ConfigEntry> =
			serde_json::from_str(&json).unwrap();
		let chain2 = compile(CompileRequest {
			service: "web",
			datacenter: "dc1",
			entries: &reparsed,
		})
		.unwrap();

		assert_eq!(chain1, chain2);
	}
}
