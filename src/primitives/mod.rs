//! Traits, helpers and types used across the agent.

mod encoding;
mod fmt;
mod id;
mod time;

/// Public API re-exported primitives.
pub use {
	fmt::{FmtIter, Redacted, Short},
	id::ClusterId,
};
/// Internal primitives.
pub(crate) use {
	encoding::{deserialize, serialize, try_serialize},
	time::{clipped_wait, jittered, scaled},
};
