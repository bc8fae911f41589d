//! Single-agent end-to-end: dev-mode bootstrap, catalog registration,
//! blocking queries, KV and sessions through the full RPC dispatch path.

mod utils;

use {
	meridian::{
		agent::Agent,
		config::{self, Source},
		rpc::{QueryOptions, RequestPayload, ResponsePayload},
		types::{KvEntry, Service},
	},
	serde_json::json,
	std::collections::BTreeMap,
	utils::timeout_s,
};

async fn dev_agent() -> anyhow::Result<Agent> {
	let raw = config::load(&[Source::Override(json!({
		"dev": true,
		"node_name": "dev-1",
	}))])?;
	let runtime = config::build(raw)?;
	Ok(Agent::start(runtime).await?)
}

fn web_service() -> Service {
	Service {
		id: "web".to_string(),
		name: "web".to_string(),
		port: 80,
		address: String::new(),
		tags: vec!["primary".to_string()],
		meta: BTreeMap::new(),
		tagged_addresses: BTreeMap::new(),
		enable_tag_override: false,
		connect_native: false,
		proxy: None,
	}
}

#[tokio::test]
async fn bootstrap_register_and_blocking_query() -> anyhow::Result<()> {
	let agent = dev_agent().await?;

	// within the election budget a leader exists
	let consensus = agent.consensus().expect("dev mode runs a server");
	let leader = timeout_s(15, consensus.wait_for_leader()).await?;
	assert_eq!(leader, Some(agent.node().id));

	// register the local node with a service through the write path
	let response = timeout_s(
		10,
		agent.call(RequestPayload::Register {
			node: agent.node().clone(),
			services: vec![web_service()],
			checks: vec![],
		}),
	)
	.await??;
	let index = match response {
		ResponsePayload::Applied { index } => index,
		other => anyhow::bail!("unexpected response: {other:?}"),
	};
	assert!(index > 0);

	// a non-blocking read sees the service
	let response = timeout_s(
		10,
		agent.call(RequestPayload::ServiceNodes {
			service: "web".to_string(),
			tag: None,
		}),
	)
	.await??;
	let nodes = match response {
		ResponsePayload::ServiceNodes(nodes) => nodes,
		other => anyhow::bail!("unexpected response: {other:?}"),
	};
	assert_eq!(nodes.len(), 1);
	assert_eq!(nodes[0].1.port, 80);

	// a blocking query parked below the write index returns immediately
	// with an index above it
	let response = timeout_s(
		10,
		agent.rpc(
			RequestPayload::ServiceNodes {
				service: "web".to_string(),
				tag: None,
			},
			QueryOptions {
				min_query_index: Some(0),
				..QueryOptions::default()
			},
		),
	)
	.await?;
	assert!(response.meta.index > 0);
	assert!(response.payload.is_ok());

	// a blocking query above the current index waits and then times out
	// against the clipped deadline
	let response = timeout_s(
		10,
		agent.rpc(
			RequestPayload::ServiceNodes {
				service: "web".to_string(),
				tag: None,
			},
			QueryOptions {
				min_query_index: Some(response.meta.index + 1000),
				max_query_time: Some(utils::millis(200)),
				..QueryOptions::default()
			},
		),
	)
	.await?;
	assert!(response.payload.is_ok());

	agent.shutdown();
	Ok(())
}

#[tokio::test]
async fn kv_cas_and_verdicts() -> anyhow::Result<()> {
	let agent = dev_agent().await?;
	let consensus = agent.consensus().expect("dev mode runs a server");
	timeout_s(15, consensus.wait_for_leader()).await?;

	// create-only CAS succeeds once
	let response = timeout_s(
		10,
		agent.call(RequestPayload::KvCas {
			entry: KvEntry::new("locks/init", "a"),
			expected: 0,
		}),
	)
	.await??;
	let ResponsePayload::Verdict { ok: true, .. } = response else {
		anyhow::bail!("first create-only cas must succeed: {response:?}");
	};

	let response = timeout_s(
		10,
		agent.call(RequestPayload::KvCas {
			entry: KvEntry::new("locks/init", "b"),
			expected: 0,
		}),
	)
	.await??;
	let ResponsePayload::Verdict { ok: false, .. } = response else {
		anyhow::bail!("second create-only cas must fail: {response:?}");
	};

	// the stored value is the first writer's
	let response = timeout_s(
		10,
		agent.call(RequestPayload::KvGet {
			key: "locks/init".to_string(),
		}),
	)
	.await??;
	let ResponsePayload::KvEntry(Some(row)) = response else {
		anyhow::bail!("kv entry must exist");
	};
	assert_eq!(row.value.value.as_ref(), b"a");

	agent.shutdown();
	Ok(())
}
