//! Catalog reads: nodes, services and where they run.

use {
	crate::{
		rpc::{ResponsePayload, RpcError},
		state::StoreState,
		types::{NodeName, ServiceName},
	},
};

pub fn list_nodes(state: &StoreState) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::Nodes(state.list_nodes()))
}

pub fn list_services(
	state: &StoreState,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::Services(state.list_services()))
}

pub fn service_nodes(
	state: &StoreState,
	service: &ServiceName,
	tag: Option<&str>,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::ServiceNodes(
		state.service_nodes(service, tag),
	))
}

pub fn node_services(
	state: &StoreState,
	node: &NodeName,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::NodeServices(state.node_services(node)))
}
