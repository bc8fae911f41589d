//! Health reads: check listings and aggregated service health.

use crate::{
	rpc::{ResponsePayload, RpcError},
	state::StoreState,
	types::{NodeName, ServiceName},
};

pub fn node_checks(
	state: &StoreState,
	node: &NodeName,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::Checks(state.node_checks(node)))
}

pub fn service_health(
	state: &StoreState,
	service: &ServiceName,
	tag: Option<&str>,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::ServiceHealth(
		state.service_health(service, tag),
	))
}
