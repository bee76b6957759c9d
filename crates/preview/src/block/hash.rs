use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::BlockId;

/// Fingerprints block text into a [`BlockId`].
///
/// Implementations must be deterministic for the lifetime of a cache: equal
/// input always yields equal ids.
pub trait BlockHasher: Send + Sync + fmt::Debug {
	fn name(&self) -> &'static str;
	fn hash(&self, content: &str) -> BlockId;
}

/// Which [`BlockHasher`] a pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashStrategy {
	/// XXH3-128. Requires the `fast-hash` feature.
	Xxh3,
	/// SHA-256 truncated to 128 bits. Always available.
	Sha256,
}

impl Default for HashStrategy {
	fn default() -> Self {
		if cfg!(feature = "fast-hash") { Self::Xxh3 } else { Self::Sha256 }
	}
}

impl HashStrategy {
	/// Builds the hasher for this strategy, falling back to SHA-256 when XXH3
	/// was not compiled in.
	pub fn hasher(self) -> Arc<dyn BlockHasher> {
		match self {
			#[cfg(feature = "fast-hash")]
			Self::Xxh3 => Arc::new(Xxh3Hasher),
			#[cfg(not(feature = "fast-hash"))]
			Self::Xxh3 => {
				tracing::warn!("xxh3 block hashing requested without the fast-hash feature; using sha256");
				Arc::new(Sha256Hasher)
			}
			Self::Sha256 => Arc::new(Sha256Hasher),
		}
	}
}

#[cfg(feature = "fast-hash")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3Hasher;

#[cfg(feature = "fast-hash")]
impl BlockHasher for Xxh3Hasher {
	fn name(&self) -> &'static str {
		"xxh3"
	}

	fn hash(&self, content: &str) -> BlockId {
		BlockId::from_u128(xxhash_rust::xxh3::xxh3_128(content.as_bytes()))
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl BlockHasher for Sha256Hasher {
	fn name(&self) -> &'static str {
		"sha256"
	}

	fn hash(&self, content: &str) -> BlockId {
		let digest = Sha256::digest(content.as_bytes());
		let mut prefix = [0_u8; 16];
		prefix.copy_from_slice(&digest[..16]);
		BlockId::from_u128(u128::from_be_bytes(prefix))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sha256_prefix_is_stable() {
		// sha256("") = e3b0c44298fc1c149afbf4c8996fb924...
		let id = Sha256Hasher.hash("");
		assert_eq!(id.to_string(), "e3b0c44298fc1c149afbf4c8996fb924");
	}

	#[test]
	fn strategies_agree_with_themselves() {
		for strategy in [HashStrategy::Xxh3, HashStrategy::Sha256] {
			let hasher = strategy.hasher();
			assert_eq!(hasher.hash("== A\nbody\n"), hasher.hash("== A\nbody\n"));
			assert_ne!(hasher.hash("== A\nbody\n"), hasher.hash("== A\nbody!\n"));
		}
	}

	#[cfg(feature = "fast-hash")]
	#[test]
	fn default_strategy_is_xxh3() {
		assert_eq!(HashStrategy::default(), HashStrategy::Xxh3);
		assert_eq!(HashStrategy::default().hasher().name(), "xxh3");
	}

	#[test]
	fn strategy_names_round_trip_through_config() {
		#[derive(Deserialize)]
		struct Wrapper {
			hash: HashStrategy,
		}
		let parsed: Wrapper = toml::from_str("hash = \"sha256\"").unwrap();
		assert_eq!(parsed.hash, HashStrategy::Sha256);
	}
}
