//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so registry and
//! descriptor documents stay readable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Opaque environment identifier of the form `capsule-<8 hex>`, fixed at creation.
    EnvId
);

string_newtype!(
    /// Container-engine-level name bound 1:1 to an environment record.
    ContainerName
);

string_newtype!(
    /// Algorithm-prefixed content digest, e.g. `sha256:<hex>`.
    ContentHash
);

const ENV_ID_PREFIX: &str = "capsule-";

impl EnvId {
    /// Derive a fresh identifier from a seed string (name, clock, pid).
    ///
    /// The seed is hashed with blake3 and truncated to 8 hex characters.
    pub fn generate(seed: &str) -> Self {
        let hex = blake3::hash(seed.as_bytes()).to_hex();
        Self(format!("{ENV_ID_PREFIX}{}", &hex[..8]))
    }
}

impl ContentHash {
    pub fn sha256(hex: &str) -> Self {
        Self(format!("sha256:{hex}"))
    }

    /// The algorithm prefix, or `None` for an unprefixed digest.
    pub fn algorithm(&self) -> Option<&str> {
        self.0.split_once(':').map(|(algo, _)| algo)
    }

    pub fn digest(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, hex)| hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_id_generate_has_prefix_and_length() {
        let id = EnvId::generate("demo:1700000000:42");
        assert!(id.starts_with("capsule-"));
        assert_eq!(id.len(), "capsule-".len() + 8);
    }

    #[test]
    fn env_id_generate_differs_per_seed() {
        assert_ne!(EnvId::generate("a"), EnvId::generate("b"));
    }

    #[test]
    fn env_id_serde_is_plain_string() {
        let id = EnvId::new("capsule-deadbeef");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"capsule-deadbeef\"");
        let back: EnvId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn content_hash_parts() {
        let h = ContentHash::sha256("abc123");
        assert_eq!(h.as_str(), "sha256:abc123");
        assert_eq!(h.algorithm(), Some("sha256"));
        assert_eq!(h.digest(), "abc123");
    }

    #[test]
    fn content_hash_without_prefix() {
        let h = ContentHash::new("abc123");
        assert_eq!(h.algorithm(), None);
        assert_eq!(h.digest(), "abc123");
    }

    #[test]
    fn container_name_compares_with_str() {
        let name = ContainerName::from("capsule-0011aabb");
        assert_eq!(name, "capsule-0011aabb");
    }
}
