//! Keys and value encodings of the denormalization cache.
//!
//! All records share one keyspace. Node keys are the plain decimal id, way
//! keys are prefixed with `W` and relation keys with `R`, so the three kinds
//! never collide. Node values hold only the coordinates; way and relation
//! values are `bincode` snapshots.

use std::fmt;

use denorm_core::{Relation, Way};
use geo::Coord;
use thiserror::Error;

/// Encoded length of a node location.
pub const LOCATION_LEN: usize = 16;

/// Key of one cache record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key of a node coordinate record.
    #[must_use]
    pub fn node(id: i64) -> Self {
        Self(id.to_string())
    }

    /// Key of a way snapshot.
    #[must_use]
    pub fn way(id: i64) -> Self {
        Self(format!("W{id}"))
    }

    /// Key of a relation snapshot.
    #[must_use]
    pub fn relation(id: i64) -> Self {
        Self(format!("R{id}"))
    }

    /// Raw key bytes as stored.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while encoding or decoding cache values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A location record did not hold exactly sixteen bytes.
    #[error("location record holds {found} bytes, expected 16")]
    LocationLength {
        /// Number of bytes found.
        found: usize,
    },
    /// A way or relation snapshot could not be serialized.
    #[error("failed to encode {kind} snapshot")]
    Encode {
        /// Record kind.
        kind: &'static str,
        /// Source error from `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// A way or relation snapshot could not be deserialized.
    #[error("failed to decode {kind} snapshot")]
    Decode {
        /// Record kind.
        kind: &'static str,
        /// Source error from `bincode`.
        #[source]
        source: bincode::Error,
    },
}

/// Encode a location as big-endian latitude followed by big-endian longitude.
#[must_use]
pub fn encode_location(location: Coord<f64>) -> [u8; LOCATION_LEN] {
    let mut bytes = [0_u8; LOCATION_LEN];
    let (lat, lon) = bytes.split_at_mut(LOCATION_LEN / 2);
    lat.copy_from_slice(&location.y.to_be_bytes());
    lon.copy_from_slice(&location.x.to_be_bytes());
    bytes
}

/// Decode a location written by [`encode_location`].
pub fn decode_location(bytes: &[u8]) -> Result<Coord<f64>, CodecError> {
    let invalid = || CodecError::LocationLength { found: bytes.len() };
    let (lat, rest) = bytes.split_first_chunk::<8>().ok_or_else(invalid)?;
    let lon: &[u8; 8] = rest.try_into().map_err(|_| invalid())?;
    Ok(Coord {
        x: f64::from_be_bytes(*lon),
        y: f64::from_be_bytes(*lat),
    })
}

/// Snapshot a way for the secondary lookup of relation members.
pub fn encode_way(way: &Way) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(way).map_err(|source| CodecError::Encode {
        kind: "way",
        source,
    })
}

/// Restore a way snapshot.
pub fn decode_way(bytes: &[u8]) -> Result<Way, CodecError> {
    bincode::deserialize(bytes).map_err(|source| CodecError::Decode {
        kind: "way",
        source,
    })
}

/// Snapshot a relation for the secondary lookup of nested members.
pub fn encode_relation(relation: &Relation) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(relation).map_err(|source| CodecError::Encode {
        kind: "relation",
        source,
    })
}

/// Restore a relation snapshot.
pub fn decode_relation(bytes: &[u8]) -> Result<Relation, CodecError> {
    bincode::deserialize(bytes).map_err(|source| CodecError::Decode {
        kind: "relation",
        source,
    })
}
