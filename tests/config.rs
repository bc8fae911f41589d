//! End-to-end configuration pipeline: files, flags, merging laws and the
//! validation boundary behaviors.

mod utils;

use {
	meridian::config::{self, Source},
	serde_json::json,
};

fn write(dir: &std::path::Path, name: &str, contents: &str) {
	std::fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn sources_merge_in_order_files_then_flags() {
	let dir = tempfile::tempdir().unwrap();
	write(
		dir.path(),
		"00-base.json",
		r#"{
			"datacenter": "dc1",
			"server": true,
			"data_dir": "/var/lib/meridian",
			"retry_join": [],
			"ports": {"serf_lan": 8301}
		}"#,
	);
	write(
		dir.path(),
		"10-tuning.conf",
		"performance.raft_multiplier = 2\nports.http = 9500\n",
	);

	let raw = config::load(&[
		Source::File(dir.path().to_path_buf()),
		Source::Flags(json!({"node_name": "edge-1", "server": true})),
	])
	.unwrap();
	let runtime = config::build(raw).unwrap();

	assert_eq!(runtime.datacenter, "dc1");
	assert_eq!(runtime.node_name, "edge-1");
	assert_eq!(runtime.raft_multiplier, 2);
	assert_eq!(runtime.ports.http, Some(9500));
	assert_eq!(runtime.ports.serf_lan, Some(8301));
	assert!(runtime.server_mode);
}

#[test]
fn scalar_conflicts_are_last_wins_and_sequences_concat() {
	let raw = config::load(&[
		Source::Override(json!({
			"dev": true,
			"datacenter": "one",
			"retry_join": ["a@127.0.0.1:1"],
		})),
		Source::Override(json!({
			"datacenter": "two",
			"retry_join": ["b@127.0.0.1:2"],
		})),
	]);

	// the ids above are not valid endpoint ids, so building fails, but
	// the merged raw layer proves the laws
	let raw = raw.unwrap();
	assert_eq!(raw.datacenter.as_deref(), Some("two"));
	assert_eq!(raw.retry_join.len(), 2);
}

#[test]
fn validation_failures_are_config_errors() {
	// missing data_dir outside dev mode
	let raw = config::load(&[Source::Override(json!({"server": true}))])
		.unwrap();
	let err = config::build(raw).unwrap_err();
	assert!(matches!(err, meridian::Error::Config(_)));

	// malformed kv file
	let dir = tempfile::tempdir().unwrap();
	write(dir.path(), "bad.conf", "this line has no equals sign\n");
	let err = config::load(&[Source::File(dir.path().to_path_buf())])
		.unwrap_err();
	assert!(matches!(err, meridian::Error::Config(_)));
}

#[test]
fn dev_mode_defaults_are_serviceable() {
	let raw =
		config::load(&[Source::Override(json!({"dev": true}))]).unwrap();
	let runtime = config::build(raw).unwrap();

	assert!(runtime.dev_mode);
	assert!(runtime.server_mode);
	assert!(runtime.data_dir.is_none());
	assert_eq!(runtime.datacenter, "dc1");
	assert!(runtime.check_output_max_size > 0);
}
