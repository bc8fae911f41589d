//! Duration helpers shared by timers across the agent.

use {core::time::Duration, rand::random_range};

/// Returns `base` shortened by a random amount of up to `jitter`.
///
/// Used to desynchronize periodic work (gossip ticks, anti-entropy runs)
/// across a cluster so it does not fire in lockstep.
pub(crate) fn jittered(base: Duration, jitter: Duration) -> Duration {
	if jitter.is_zero() {
		return base;
	}
	let sub = Duration::from_millis(random_range(0..=jitter.as_millis() as u64));
	base.saturating_sub(sub)
}

/// Clips a requested blocking-query wait to `[default, max]` and stretches it
/// by a random fraction of up to 1/16 so that watchers installed together do
/// not all fire together.
pub(crate) fn clipped_wait(
	requested: Option<Duration>,
	default: Duration,
	max: Duration,
) -> Duration {
	let wait = requested.unwrap_or(default).min(max);
	let sixteenth = wait.as_millis() as u64 / 16;
	wait + Duration::from_millis(random_range(0..=sixteenth))
}

/// Scales a base duration by the configured performance multiplier.
pub(crate) fn scaled(base: Duration, multiplier: u32) -> Duration {
	base.saturating_mul(multiplier.max(1))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn jittered_never_exceeds_base() {
		let base = Duration::from_secs(1);
		let jitter = Duration::from_millis(500);
		for _ in 0..64 {
			let d = jittered(base, jitter);
			assert!(d <= base);
			assert!(d >= base - jitter);
		}
	}

	#[test]
	fn clipped_wait_respects_bounds() {
		let default = Duration::from_secs(300);
		let max = Duration::from_secs(600);

		for _ in 0..64 {
			// unspecified waits fall back to the default
			let d = clipped_wait(None, default, max);
			assert!(d >= default);
			assert!(d <= default + default / 16);

			// oversized waits are clipped to the maximum
			let d = clipped_wait(Some(Duration::from_secs(3600)), default, max);
			assert!(d >= max);
			assert!(d <= max + max / 16);
		}
	}

	#[test]
	fn scaled_floors_multiplier_at_one() {
		let base = Duration::from_secs(1);
		assert_eq!(scaled(base, 0), base);
		assert_eq!(scaled(base, 5), Duration::from_secs(5));
	}
}
