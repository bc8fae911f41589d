use {
	super::roster::Event,
	crate::types::NodeId,
	core::{
		pin::Pin,
		task::{Context, Poll},
	},
	futures::{Stream, StreamExt},
	std::collections::HashMap,
	tokio::sync::broadcast,
	tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};

/// A stream of roster events that coalesces consecutive events for the
/// same member, so a slow consumer sees one final event per member instead
/// of every intermediate hop.
///
/// Coalescing rules: the latest event for a member replaces any buffered
/// one, except that a buffered `Joined` followed by `Left` cancels out
/// (the consumer never saw the member at all). A lagging receiver yields
/// [`Event::Resync`] and drops its buffer; the consumer re-reads the
/// roster.
pub struct Events {
	receiver: BroadcastStream<Event>,
	buffer: HashMap<NodeId, Event>,
}

impl Events {
	pub(super) fn new(receiver: broadcast::Receiver<Event>) -> Self {
		Self {
			receiver: BroadcastStream::new(receiver),
			buffer: HashMap::new(),
		}
	}
}

fn subject(event: &Event) -> Option<NodeId> {
	match event {
		Event::Joined(m)
		| Event::Updated(m)
		| Event::Failed(m)
		| Event::Left(m) => Some(m.node),
		Event::Resync => None,
	}
}

impl Stream for Events {
	type Item = Event;

	fn poll_next(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Self::Item>> {
		let this = self.get_mut();

		// drain everything immediately available into the buffer
		loop {
			match this.receiver.poll_next_unpin(cx) {
				Poll::Ready(Some(Ok(event))) => {
					let Some(node) = subject(&event) else {
						this.buffer.clear();
						return Poll::Ready(Some(Event::Resync));
					};

					match (this.buffer.get(&node), &event) {
						// never-delivered join followed by a departure
						// cancels out
						(Some(Event::Joined(_)), Event::Left(_)) => {
							this.buffer.remove(&node);
						}
						// a join must stay a join until delivered, even
						// if the details changed in between
						(Some(Event::Joined(_)), Event::Updated(m)) => {
							this
								.buffer
								.insert(node, Event::Joined(m.clone()));
						}
						_ => {
							this.buffer.insert(node, event);
						}
					}
				}
				Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => {
					this.buffer.clear();
					return Poll::Ready(Some(Event::Resync));
				}
				Poll::Ready(None) => {
					if let Some(node) =
						this.buffer.keys().next().copied()
					{
						let event = this.buffer.remove(&node);
						return Poll::Ready(event);
					}
					return Poll::Ready(None);
				}
				Poll::Pending => {
					if let Some(node) =
						this.buffer.keys().next().copied()
					{
						let event = this.buffer.remove(&node);
						return Poll::Ready(event);
					}
					return Poll::Pending;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::gossip::{Member, MemberRole, MemberState, Roster},
		uuid::Uuid,
	};

	fn member(node: NodeId, incarnation: u64, state: MemberState) -> Member {
		// the address must be deterministic per node so the equality
		// assertions below hold
		let mut seed = [0u8; 32];
		seed[..16].copy_from_slice(node.as_bytes());

		Member {
			node,
			name: "m".to_string(),
			datacenter: "dc1".to_string(),
			segment: String::new(),
			role: MemberRole::Client,
			address: iroh::EndpointAddr::new(
				iroh::SecretKey::from_bytes(&seed).public(),
			),
			incarnation,
			state,
		}
	}

	fn roster() -> Roster {
		Roster::new(member(Uuid::new_v4(), 1, MemberState::Alive))
	}

	#[tokio::test]
	async fn emits_membership_transitions() {
		let roster = roster();
		let mut events = roster.watch();
		let node = Uuid::new_v4();

		roster.apply(member(node, 1, MemberState::Alive));
		assert_eq!(
			events.next().await,
			Some(Event::Joined(member(node, 1, MemberState::Alive)))
		);

		roster.apply(member(node, 1, MemberState::Suspect));
		assert_eq!(
			events.next().await,
			Some(Event::Updated(member(node, 1, MemberState::Suspect)))
		);

		roster.apply(member(node, 1, MemberState::Failed));
		assert_eq!(
			events.next().await,
			Some(Event::Failed(member(node, 1, MemberState::Failed)))
		);
	}

	#[tokio::test]
	async fn join_then_leave_coalesces_to_nothing() {
		let roster = roster();
		let mut events = roster.watch();
		let node = Uuid::new_v4();

		roster.apply(member(node, 1, MemberState::Alive));
		roster.apply(member(node, 1, MemberState::Left));

		tokio::time::timeout(
			std::time::Duration::from_millis(50),
			events.next(),
		)
		.await
		.unwrap_err();
	}

	#[tokio::test]
	async fn join_then_update_stays_a_join() {
		let roster = roster();
		let mut events = roster.watch();
		let node = Uuid::new_v4();

		roster.apply(member(node, 1, MemberState::Alive));
		roster.apply(member(node, 2, MemberState::Alive));

		assert_eq!(
			events.next().await,
			Some(Event::Joined(member(node, 2, MemberState::Alive)))
		);
	}
}
