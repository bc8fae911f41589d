use {
	core::time::Duration,
	serde::{Deserialize, Serialize},
};

/// Network coordinate in the Vivaldi model: a point in a low-dimensional
/// euclidean space plus a non-euclidean height, updated from observed
/// round-trip times. The distance between two coordinates estimates the rtt
/// between their nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
	pub vec: Vec<f64>,
	pub error: f64,
	pub adjustment: f64,
	pub height: f64,
}

/// Dimensionality of the coordinate space.
pub const COORDINATE_DIMENSIONS: usize = 8;

impl Default for Coordinate {
	fn default() -> Self {
		Self {
			vec: vec![0.0; COORDINATE_DIMENSIONS],
			error: 1.5,
			adjustment: 0.0,
			height: 1.0e-5,
		}
	}
}

impl Coordinate {
	/// Estimated rtt between the nodes owning `self` and `other`.
	pub fn distance_to(&self, other: &Coordinate) -> Duration {
		let sum: f64 = self
			.vec
			.iter()
			.zip(other.vec.iter())
			.map(|(a, b)| (a - b).powi(2))
			.sum();

		let mut dist = sum.sqrt() + self.height + other.height;
		let adjusted = dist + self.adjustment + other.adjustment;
		if adjusted > 0.0 {
			dist = adjusted;
		}

		Duration::from_secs_f64(dist.max(0.0))
	}

	/// Returns true if the coordinate contains only finite components.
	/// Coordinates received over the wire are rejected otherwise.
	pub fn is_valid(&self) -> bool {
		self.vec.iter().all(|c| c.is_finite())
			&& self.error.is_finite()
			&& self.adjustment.is_finite()
			&& self.height.is_finite()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn distance_is_symmetric() {
		let mut a = Coordinate::default();
		let mut b = Coordinate::default();
		a.vec[0] = 0.010;
		b.vec[0] = 0.025;

		assert_eq!(a.distance_to(&b), b.distance_to(&a));
		assert!(a.distance_to(&b) > Duration::ZERO);
	}

	#[test]
	fn rejects_non_finite_components() {
		let mut c = Coordinate::default();
		assert!(c.is_valid());
		c.vec[2] = f64::NAN;
		assert!(!c.is_valid());
	}
}
