//! Case-insensitive metadata maps carried alongside every Payload Object.
//!
//! The reference storage layer normalizes key casing inconsistently between
//! writes and reads, so every read site in this pipeline goes through
//! [`Metadata::get`] rather than indexing a `HashMap` directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const CHECKSUM: &str = "checksum";
pub const CHECKSUM_ALGORITHM: &str = "checksumAlgorithm";
pub const VESSEL_ID: &str = "vesselId";
pub const TIMESTAMP: &str = "timestamp";
pub const VALIDATION_STATUS: &str = "validationStatus";
pub const VALIDATION_TIMESTAMP: &str = "validationTimestamp";
pub const TRANSFER_STATUS: &str = "transferStatus";
pub const TRANSFER_TIMESTAMP: &str = "transferTimestamp";
pub const REMOTE_DESTINATION: &str = "remoteDestination";
pub const REMOTE_ETAG: &str = "remoteEtag";

pub const VALIDATION_STATUS_VALID: &str = "valid";
pub const VALIDATION_STATUS_INVALID: &str = "invalid";
pub const TRANSFER_STATUS_TRANSFERRED: &str = "transferred";

/// A case-preserving, case-insensitive-on-read map of object attributes.
///
/// Writers should use the canonical casing of the constants above so the
/// object looks sane to anything inspecting it directly (e.g. via the
/// status surface), but every read in this crate goes through `get`, which
/// never cares about casing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata(HashMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Case-insensitive lookup. Returns the first value whose key matches
    /// `key` ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key_ci(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn into_inner(self) -> HashMap<String, String> {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl From<HashMap<String, String>> for Metadata {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
