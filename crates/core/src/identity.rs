//! Identity of a versioned resource
//!
//! An [`Identity`] is a two-part key: the domain model name and a local key
//! unique inside that domain. Its canonical string form is `domain:key`.
//! Domain names are case-insensitive and stored lowercase.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Composite key addressing one versioned resource
///
/// # Examples
///
/// ```
/// use hyperstore_core::Identity;
///
/// let id = Identity::new("Library", "book-1");
/// assert_eq!(id.to_string(), "library:book-1");
/// assert_eq!("library:book-1".parse::<Identity>().unwrap(), id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    domain: String,
    key: String,
}

impl Identity {
    /// Create an identity from a domain name and a local key
    ///
    /// The parts are not checked. An empty domain, a domain containing `:`
    /// or an empty key gives an identity whose string form does not parse
    /// back; see [`Identity::is_valid`] and [`Identity::try_new`].
    pub fn new(domain: impl AsRef<str>, key: impl Into<String>) -> Self {
        Self {
            domain: domain.as_ref().to_lowercase(),
            key: key.into(),
        }
    }

    /// Create an identity, rejecting parts with no canonical string form
    pub fn try_new(domain: impl AsRef<str>, key: impl Into<String>) -> Result<Self> {
        let id = Identity::new(domain, key);
        if !id.is_valid() {
            return Err(Error::InvalidIdentity(id.to_string()));
        }
        Ok(id)
    }

    /// Check that the string form parses back to this identity
    pub fn is_valid(&self) -> bool {
        !self.domain.is_empty()
            && !self.domain.contains(':')
            && self.domain.trim() == self.domain
            && !self.key.is_empty()
    }

    /// Domain model name (lowercase)
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Local key inside the domain
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parse the canonical `domain:key` form
    ///
    /// The domain is everything before the first `:`; the key may itself
    /// contain `:`. Both parts must be non-empty.
    pub fn parse(s: &str) -> Result<Self> {
        let (domain, key) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidIdentity(s.to_string()))?;
        Identity::try_new(domain.trim(), key).map_err(|_| Error::InvalidIdentity(s.to_string()))
    }

    /// Derive a child identity in the same domain (`key/suffix`)
    pub fn child(&self, suffix: &str) -> Identity {
        Identity {
            domain: self.domain.clone(),
            key: format!("{}/{}", self.key, suffix),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.domain, self.key)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Identity::parse(s)
    }
}

/// Producer of new identities on demand
pub trait IdGenerator: Send + Sync {
    /// Generate a fresh identity in `domain`
    fn next_id(&self, domain: &str) -> Identity;
}

/// UUID v4 keys, unique without coordination
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self, domain: &str) -> Identity {
        Identity::new(domain, Uuid::new_v4().to_string())
    }
}

/// Per-domain counters producing `1`, `2`, `3`, ...
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counters: Mutex<FxHashMap<String, u64>>,
}

impl SequentialIdGenerator {
    /// Create a generator with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a domain's counter forward so the next key is above `at_least`
    pub fn observe(&self, domain: &str, at_least: u64) {
        let mut counters = self.counters.lock();
        let counter = counters.entry(domain.to_lowercase()).or_insert(0);
        if *counter < at_least {
            *counter = at_least;
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self, domain: &str) -> Identity {
        let mut counters = self.counters.lock();
        let counter = counters.entry(domain.to_lowercase()).or_insert(0);
        *counter += 1;
        Identity::new(domain, counter.to_string())
    }
}
