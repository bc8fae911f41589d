use {
	core::{fmt, net::IpAddr, str::FromStr},
	serde::{Deserialize, Serialize},
};

/// A source-address filter entry in CIDR notation. Incoming connections
/// from addresses outside every configured block are rejected and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
	addr: IpAddr,
	prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR block {0:?}")]
pub struct InvalidCidr(String);

impl Cidr {
	pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, InvalidCidr> {
		let max = match addr {
			IpAddr::V4(_) => 32,
			IpAddr::V6(_) => 128,
		};
		if prefix > max {
			return Err(InvalidCidr(format!("{addr}/{prefix}")));
		}
		Ok(Self { addr, prefix })
	}

	/// Whether the block contains the given address. Families never mix.
	pub fn contains(&self, addr: IpAddr) -> bool {
		match (self.addr, addr) {
			(IpAddr::V4(net), IpAddr::V4(addr)) => {
				let bits = 32 - u32::from(self.prefix);
				let net = u32::from(net);
				let addr = u32::from(addr);
				bits >= 32 || (net >> bits) == (addr >> bits)
			}
			(IpAddr::V6(net), IpAddr::V6(addr)) => {
				let bits = 128 - u32::from(self.prefix);
				let net = u128::from(net);
				let addr = u128::from(addr);
				bits >= 128 || (net >> bits) == (addr >> bits)
			}
			_ => false,
		}
	}
}

/// Whether `addr` is allowed by the filter. An empty filter allows
/// everything.
pub fn allowed(filter: &[Cidr], addr: IpAddr) -> bool {
	filter.is_empty() || filter.iter().any(|cidr| cidr.contains(addr))
}

impl FromStr for Cidr {
	type Err = InvalidCidr;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || InvalidCidr(s.to_string());

		match s.split_once('/') {
			Some((addr, prefix)) => {
				let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
				let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
				Cidr::new(addr, prefix).map_err(|_| invalid())
			}
			// a bare address is a host block
			None => {
				let addr: IpAddr = s.parse().map_err(|_| invalid())?;
				let prefix = match addr {
					IpAddr::V4(_) => 32,
					IpAddr::V6(_) => 128,
				};
				Ok(Self { addr, prefix })
			}
		}
	}
}

impl fmt::Display for Cidr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.addr, self.prefix)
	}
}

impl Serialize for Cidr {
	fn serialize<S: serde::Serializer>(
		&self,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Cidr {
	fn deserialize<D: serde::Deserializer<'de>>(
		deserializer: D,
	) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn v4_membership() {
		let cidr: Cidr = "10.0.0.0/8".parse().unwrap();
		assert!(cidr.contains("10.1.2.3".parse().unwrap()));
		assert!(!cidr.contains("11.0.0.1".parse().unwrap()));
		assert!(!cidr.contains("::1".parse().unwrap()));
	}

	#[test]
	fn bare_address_is_host_block() {
		let cidr: Cidr = "192.168.1.5".parse().unwrap();
		assert!(cidr.contains("192.168.1.5".parse().unwrap()));
		assert!(!cidr.contains("192.168.1.6".parse().unwrap()));
	}

	#[test]
	fn zero_prefix_matches_all() {
		let cidr: Cidr = "0.0.0.0/0".parse().unwrap();
		assert!(cidr.contains("203.0.113.9".parse().unwrap()));
	}

	#[test]
	fn empty_filter_allows_everything() {
		assert!(allowed(&[], "203.0.113.9".parse().unwrap()));

		let filter = vec!["10.0.0.0/8".parse().unwrap()];
		assert!(allowed(&filter, "10.9.9.9".parse().unwrap()));
		assert!(!allowed(&filter, "203.0.113.9".parse().unwrap()));
	}

	#[test]
	fn invalid_blocks_are_rejected() {
		assert!("10.0.0.0/33".parse::<Cidr>().is_err());
		assert!("not-an-addr/8".parse::<Cidr>().is_err());
	}
}
