//! Discovery-chain compilation against realistic config-entry sets,
//! including the serialize → re-parse → re-compile equality contract.

mod utils;

use {
	meridian::chain::{
		CompileRequest,
		ConfigEntry,
		PathMatch,
		RequestCriteria,
		Route,
		RouteDestination,
		RouteMatch,
		ServiceDefaults,
		ServiceResolver,
		ServiceRouter,
		compile,
	},
	std::collections::BTreeMap,
};

fn entries() -> Vec<ConfigEntry> {
	vec![
		ConfigEntry::ServiceDefaults(ServiceDefaults {
			name: "web".to_string(),
			protocol: Some("http".to_string()),
		}),
		ConfigEntry::ServiceDefaults(ServiceDefaults {
			name: "admin".to_string(),
			protocol: Some("http".to_string()),
		}),
		ConfigEntry::ServiceRouter(ServiceRouter {
			name: "web".to_string(),
			routes: vec![Route {
				matches: Some(RouteMatch {
					path: Some(PathMatch::Prefix("/admin".to_string())),
					..RouteMatch::default()
				}),
				destination: RouteDestination {
					service: "admin".to_string(),
					subset: None,
					prefix_rewrite: Some("/".to_string()),
					request_timeout: None,
					num_retries: 2,
					retry_on_connect_failure: true,
					retry_on_status_codes: vec![503],
				},
			}],
		}),
		ConfigEntry::ServiceResolver(ServiceResolver {
			name: "admin".to_string(),
			default_subset: Some("default".to_string()),
			subsets: BTreeMap::from([(
				"default".to_string(),
				meridian::chain::Subset {
					tag: None,
					only_passing: true,
				},
			)]),
			..ServiceResolver::default()
		}),
	]
}

#[test]
fn admin_routes_and_root_falls_through() {
	let entries = entries();
	let chain = compile(CompileRequest {
		service: "web",
		datacenter: "dc1",
		entries: &entries,
	})
	.unwrap();

	assert_eq!(chain.protocol, "http");

	let admin = chain
		.select(
			&RequestCriteria {
				path: "/admin/users",
				method: "GET",
				..RequestCriteria::default()
			},
			0.0,
		)
		.unwrap();
	assert_eq!(admin.service, "admin");
	assert_eq!(admin.subset, "default");
	assert!(admin.only_passing);

	let root = chain
		.select(
			&RequestCriteria {
				path: "/",
				method: "GET",
				..RequestCriteria::default()
			},
			0.0,
		)
		.unwrap();
	assert_eq!(root.service, "web");
	assert_eq!(root.subset, "default");
}

#[test]
fn chain_compile_is_pure_over_reserialization() {
	let original = entries();
	let chain_a = compile(CompileRequest {
		service: "web",
		datacenter: "dc1",
		entries: &original,
	})
	.unwrap();

	// the committed entry set round-trips through its wire encoding
	let encoded = serde_json::to_vec(&original).unwrap();
	let decoded: Vec<ConfigEntry> =
		serde_json::from_slice(&encoded).unwrap();
	assert_eq!(original, decoded);

	let chain_b = compile(CompileRequest {
		service: "web",
		datacenter: "dc1",
		entries: &decoded,
	})
	.unwrap();

	assert_eq!(chain_a, chain_b);
}

#[test]
fn matcher_forms_are_mutually_exclusive_by_construction() {
	// the path matcher is a tagged variant: an entry can carry exactly
	// one of exact/prefix/regex, malformed JSON with two forms fails to
	// parse rather than silently picking one
	let malformed = r#"{
		"exact": "/a",
		"prefix": "/b"
	}"#;
	assert!(serde_json::from_str::<PathMatch>(malformed).is_err());

	let valid = r#"{"prefix": "/admin"}"#;
	let parsed: PathMatch = serde_json::from_str(valid).unwrap();
	assert_eq!(parsed, PathMatch::Prefix("/admin".to_string()));
}
