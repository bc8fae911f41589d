//! Session reads and write-side normalization.

use crate::{
	rpc::{ResponsePayload, RpcError},
	state::StoreState,
	types::{Session, SessionId},
};

pub fn get(
	state: &StoreState,
	id: &SessionId,
) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::Session(state.session(id).cloned()))
}

pub fn list(state: &StoreState) -> Result<ResponsePayload, RpcError> {
	Ok(ResponsePayload::Sessions(state.list_sessions()))
}

/// Leader-side normalization before a session-create is proposed: assign
/// the id and clamp the TTL into the supported range.
pub fn normalize_create(mut session: Session) -> Session {
	if session.id.is_nil() {
		session.id = SessionId::new_v4();
	}
	if let Some(ttl) = session.ttl {
		session.ttl = Some(Session::clamp_ttl(ttl));
	}
	session
}
