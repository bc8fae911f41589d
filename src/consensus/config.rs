use {core::time::Duration, derive_builder::Builder};

/// Timing and sizing options for the consensus subsystem.
///
/// All durations here are already scaled by the configured performance
/// multiplier; the invariant `leader_lease_timeout < heartbeat_interval <
/// election_timeout` is enforced when the runtime configuration is built.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(prefix = "with"))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// The interval at which the leader sends empty `AppendEntries`
	/// heartbeats to followers when no entries are being replicated.
	#[builder(default = "Duration::from_millis(500)")]
	pub heartbeat_interval: Duration,

	/// Base election timeout. A follower that hears nothing from a leader
	/// for this long (plus jitter) starts an election.
	#[builder(default = "Duration::from_millis(1000)")]
	pub election_timeout: Duration,

	/// Maximum random jitter added to the election timeout so rival
	/// candidates do not start elections in lockstep.
	#[builder(default = "Duration::from_millis(1000)")]
	pub election_timeout_jitter: Duration,

	/// How long a leader considers its lease valid without having heard
	/// from a quorum. Used to fence consistent reads.
	#[builder(default = "Duration::from_millis(250)")]
	pub leader_lease_timeout: Duration,

	/// Extra delay added to the very first election timeout after start so
	/// all peers get a chance to come up and be discovered before anyone
	/// triggers elections.
	#[builder(default = "Duration::from_secs(3)")]
	pub bootstrap_delay: Duration,

	/// A snapshot is taken once this many committed entries accumulate
	/// above the last snapshot.
	#[builder(default = "8192")]
	pub snapshot_threshold: usize,

	/// A snapshot is also taken when this much time has passed since the
	/// last one, regardless of entry count.
	#[builder(default = "Duration::from_secs(120)")]
	pub snapshot_interval: Duration,

	/// Maximum number of log entries shipped in one `AppendEntries`.
	#[builder(default = "512")]
	pub max_append_entries: usize,
}

impl Config {
	/// Creates a new config builder with default values.
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder::default()
	}

	/// A randomized election timeout in
	/// `[election_timeout, election_timeout + jitter]`.
	pub fn random_election_timeout(&self) -> Duration {
		if self.election_timeout_jitter.is_zero() {
			return self.election_timeout;
		}
		let extra = rand::random_range(
			0..=self.election_timeout_jitter.as_millis() as u64,
		);
		self.election_timeout + Duration::from_millis(extra)
	}
}

impl Default for Config {
	fn default() -> Self {
		Config::builder()
			.build()
			.expect("all fields have defaults")
	}
}
