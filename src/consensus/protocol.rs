use {
	super::log::{Command, Cursor, Index, Term},
	crate::types::NodeId,
	bytes::Bytes,
	derive_more::Display,
	serde::{Deserialize, Serialize, de::DeserializeOwned},
};

/// Consensus messages exchanged between servers of one datacenter.
#[derive(Debug, Clone, Display, Serialize, Deserialize)]
#[serde(bound(deserialize = "C: DeserializeOwned"))]
pub enum Message<C: Command> {
	/// Sent by leaders to assert authority (heartbeat) and replicate log
	/// entries. When `entries` is empty, this is a pure heartbeat.
	#[display(
		"AppendEntries[t={}/pos={}/n={}/c={}]",
		_0.term, _0.prev_log_position, _0.entries.len(), _0.leader_commit
	)]
	AppendEntries(AppendEntries<C>),

	/// Response to an `AppendEntries` message.
	#[display("AppendEntriesResponse[t={}/{}]", _0.term, _0.vote)]
	AppendEntriesResponse(AppendEntriesResponse),

	/// Sent by candidates to gather votes during an election.
	#[display("RequestVote[t={}/log={}]", _0.term, _0.log_position)]
	RequestVote(RequestVote),

	/// Response to a `RequestVote` message.
	#[display("RequestVoteResponse[t={}/{}]", _0.term, _0.vote)]
	RequestVoteResponse(RequestVoteResponse),

	/// Sent by the leader to a follower whose needed entries have already
	/// been compacted below the leader's snapshot floor.
	#[display("InstallSnapshot[t={}/pos={}]", _0.term, _0.position)]
	InstallSnapshot(InstallSnapshot),

	/// Response to an `InstallSnapshot` message.
	#[display("InstallSnapshotResponse[t={_0}/i={_1}]")]
	InstallSnapshotResponse(Term, Index),
}

impl<C: Command> Message<C> {
	/// Returns the term carried by the message.
	pub const fn term(&self) -> Term {
		match self {
			Self::AppendEntries(msg) => msg.term,
			Self::AppendEntriesResponse(msg) => msg.term,
			Self::RequestVote(msg) => msg.term,
			Self::RequestVoteResponse(msg) => msg.term,
			Self::InstallSnapshot(msg) => msg.term,
			Self::InstallSnapshotResponse(term, _) => *term,
		}
	}

	/// If the message was sent by a leader, returns its id.
	pub const fn leader(&self) -> Option<NodeId> {
		match self {
			Self::AppendEntries(msg) => Some(msg.leader),
			Self::InstallSnapshot(msg) => Some(msg.leader),
			_ => None,
		}
	}
}

/// Log entry as shipped inside `AppendEntries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "C: DeserializeOwned"))]
pub struct LogEntry<C: Command> {
	/// Term when the entry was received by the leader.
	pub term: Term,

	/// The replicated state transition.
	pub command: C,
}

/// Sent by the leader to replicate log entries and as heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "C: DeserializeOwned"))]
pub struct AppendEntries<C: Command> {
	/// Leader's term.
	pub term: Term,

	/// Leader's id, so followers can redirect clients.
	pub leader: NodeId,

	/// Term and index of the log entry immediately preceding the new ones.
	pub prev_log_position: Cursor,

	/// Log entries to store (empty for heartbeat).
	pub entries: Vec<LogEntry<C>>,

	/// Leader's commit index.
	pub leader_commit: Index,
}

/// Follower verdict on an `AppendEntries` (and on election requests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Vote {
	/// The entries were appended (or the candidate's log qualifies it to
	/// lead).
	Granted,

	/// Explicit refusal.
	Denied,

	/// The follower's log does not line up with `prev_log_position`; it
	/// abstains from the quorum until the leader backs up `next_index` (or
	/// ships a snapshot) and brings it into sync.
	Abstained,
}

/// `AppendEntries` message response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
	/// Current term, for the leader to update itself.
	pub term: Term,

	pub vote: Vote,

	/// The index of the follower's last log entry after processing the
	/// message. With `Granted` this drives commit tracking; with
	/// `Abstained` it is the hint the leader uses to back up `next_index`.
	pub last_log_index: Index,
}

/// Sent by candidates to gather votes during an election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVote {
	/// Candidate's term.
	pub term: Term,

	/// Candidate requesting the vote.
	pub candidate: NodeId,

	/// Term and index of the candidate's last log entry.
	pub log_position: Cursor,
}

/// `RequestVote` message response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
	/// Current term, for the candidate to update itself.
	pub term: Term,

	pub vote: Vote,
}

/// Complete snapshot transfer for a follower that cannot be caught up from
/// the log alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshot {
	pub term: Term,
	pub leader: NodeId,

	/// Term and index the snapshot was taken at.
	pub position: Cursor,

	/// Serialized state machine contents.
	pub data: Bytes,
}
