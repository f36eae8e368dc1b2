// ABOUTME: Phantom-typed identifiers for compile-time type safety.
// ABOUTME: Prevents accidental swapping of worker ids and hostnames in store keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use thiserror::Error;

/// Marker types for phantom type parameters.
/// Using empty enums prevents instantiation and requires no trait bounds.
pub enum WorkerMarker {}
pub enum HostnameMarker {}

/// Longest worker id that still yields a valid 63 character namespace.
pub const MAX_WORKER_ID_LEN: usize = 63 - super::namespace::NAMESPACE_PREFIX.len();

/// A type-safe identifier that prevents accidental mixing of different ID types.
///
/// A `WorkerId` can never be passed where a `Hostname` is expected, which
/// matters because both end up as suffixes of otherwise similar store keys.
#[must_use = "IDs reference resources and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("worker id cannot be empty")]
    Empty,

    #[error("worker id exceeds maximum length of {MAX_WORKER_ID_LEN} characters")]
    TooLong,

    #[error("worker id cannot start or end with a hyphen")]
    EdgeHyphen,

    #[error("invalid character in worker id: '{0}'")]
    InvalidChar(char),

    #[error("invalid hostname: {0:?}")]
    InvalidHostname(String),
}

impl Id<WorkerMarker> {
    /// Validate a worker id as received from the config API.
    ///
    /// Worker ids become namespace suffixes, so they follow RFC 1123 label
    /// rules: lowercase alphanumerics and inner hyphens only.
    pub fn parse(value: &str) -> Result<Self, IdError> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() > MAX_WORKER_ID_LEN {
            return Err(IdError::TooLong);
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(IdError::EdgeHyphen);
        }
        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-')
        {
            return Err(IdError::InvalidChar(c));
        }
        Ok(Self::new(value))
    }
}

impl Id<HostnameMarker> {
    /// Normalize a public hostname (trimmed, lowercase, no trailing dot).
    pub fn parse(value: &str) -> Result<Self, IdError> {
        let normalized = value.trim().trim_end_matches('.').to_ascii_lowercase();
        let valid = !normalized.is_empty()
            && normalized.len() <= 253
            && normalized.split('.').all(|label| {
                !label.is_empty()
                    && label.len() <= 63
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            });
        if !valid {
            return Err(IdError::InvalidHostname(value.to_string()));
        }
        Ok(Self::new(normalized))
    }
}

// Manual trait implementations that don't require T to implement the trait.
// This is necessary because T is only used as a phantom type marker.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

pub type WorkerId = Id<WorkerMarker>;
pub type Hostname = Id<HostnameMarker>;
