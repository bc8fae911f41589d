use {
	super::{
		dispatcher::Dispatcher,
		proto::{RpcRequest, RpcResponse},
	},
	crate::{
		primitives::Short,
		transport::{CloseReason, Link},
	},
	iroh::{
		endpoint::Connection,
		protocol::{AcceptError, ProtocolHandler},
	},
};

/// Handles inbound RPC streams: decodes requests, runs them through the
/// dispatcher, and writes the responses back. One stream serves requests
/// sequentially; concurrent requests ride parallel streams of the same
/// pooled connection.
pub struct RpcProtocol {
	dispatcher: Dispatcher,
}

impl RpcProtocol {
	pub fn new(dispatcher: Dispatcher) -> Self {
		Self { dispatcher }
	}
}

impl ProtocolHandler for RpcProtocol {
	fn accept(
		&self,
		connection: Connection,
	) -> impl Future<Output = Result<(), AcceptError>> + Send {
		let dispatcher = self.dispatcher.clone();

		async move {
			let remote = connection.remote_id();

			// per-client connection cap
			let Some(_permit) = dispatcher.clients().acquire(remote) else {
				tracing::debug!(
					peer = %Short(remote),
					"refusing rpc connection over per-client limit",
				);
				let link = Link::accept(connection)
					.await
					.map_err(AcceptError::from_err)?;
				let _ =
					link.close_with_reason(CloseReason::ConnectionLimit).await;
				return Ok(());
			};

			let mut link = Link::accept(connection)
				.await
				.map_err(AcceptError::from_err)?;

			while let Ok(request) = link.recv::<RpcRequest>().await {
				let response: RpcResponse = dispatcher.serve(request).await;
				if let Err(e) = link.send(&response).await {
					tracing::trace!(
						peer = %Short(remote),
						error = %e,
						"failed to write rpc response",
					);
					break;
				}
			}

			Ok(())
		}
	}
}

impl core::fmt::Debug for RpcProtocol {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "RpcProtocol")
	}
}
