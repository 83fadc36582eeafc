//! Sparse membership set over 64-bit primitive identifiers.
//!
//! OpenStreetMap ids run into the billions, so a flat bit vector sized to the
//! largest id would waste gigabytes on an extract that only touches a few
//! million of them. [`Bitmask`] splits the id space into fixed 1024-bit
//! segments and only allocates the segments that contain at least one marked
//! id.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use bincode::{deserialize_from, serialize_into};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of low id bits addressed inside one segment.
const SEGMENT_SHIFT: u32 = 10;
/// Mask selecting the in-segment offset of an id.
const SEGMENT_MASK: i64 = (1 << SEGMENT_SHIFT) - 1;
/// Words of 64 bits needed to cover one segment.
const WORDS_PER_SEGMENT: usize = 16;

/// File identifier for persisted bitmasks.
pub(crate) const BITMASK_MAGIC: [u8; 4] = *b"DNBM";

/// Supported version of the persisted bitmask format.
pub(crate) const BITMASK_VERSION: u16 = 1;

type Segment = [u64; WORDS_PER_SEGMENT];

/// Append-only set of `i64` identifiers.
///
/// # Examples
/// ```
/// use denorm_core::Bitmask;
///
/// let mut mask = Bitmask::new();
/// assert!(mask.insert(4_200_000_000));
/// assert!(!mask.insert(4_200_000_000));
/// assert!(mask.has(4_200_000_000));
/// assert!(!mask.has(7));
/// assert_eq!(mask.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmask {
    segments: BTreeMap<i64, Box<Segment>>,
    count: u64,
}

/// Position of one id inside the segmented storage.
#[derive(Debug, Clone, Copy)]
struct Slot {
    key: i64,
    word: usize,
    bit: u64,
}

impl Slot {
    #[expect(
        clippy::cast_sign_loss,
        reason = "the masked offset always lies in 0..1024"
    )]
    const fn of(id: i64) -> Self {
        let offset = (id & SEGMENT_MASK) as usize;
        Self {
            key: id >> SEGMENT_SHIFT,
            word: offset >> 6,
            bit: 1 << (offset & 63),
        }
    }
}

impl Bitmask {
    /// Create an empty bitmask.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
            count: 0,
        }
    }

    /// Mark `id`, returning `true` when it was not marked before.
    pub fn insert(&mut self, id: i64) -> bool {
        let slot = Slot::of(id);
        let segment = self
            .segments
            .entry(slot.key)
            .or_insert_with(|| Box::new([0; WORDS_PER_SEGMENT]));
        let Some(word) = segment.get_mut(slot.word) else {
            return false;
        };
        if *word & slot.bit != 0 {
            return false;
        }
        *word |= slot.bit;
        self.count += 1;
        true
    }

    /// Report whether `id` has been marked.
    #[must_use]
    pub fn has(&self, id: i64) -> bool {
        let slot = Slot::of(id);
        self.segments
            .get(&slot.key)
            .and_then(|segment| segment.get(slot.word))
            .is_some_and(|word| word & slot.bit != 0)
    }

    /// Number of distinct marked ids.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.count
    }

    /// Return whether no id has been marked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of allocated segments; each covers 1024 consecutive ids.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Iterate over the marked ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.segments.iter().flat_map(|(key, segment)| {
            let base = key << SEGMENT_SHIFT;
            (0_i64..)
                .step_by(64)
                .zip(segment.iter())
                .flat_map(move |(word_base, word)| {
                    (0_u32..64)
                        .filter(move |bit| word & (1_u64 << bit) != 0)
                        .map(move |bit| base + word_base + i64::from(bit))
                })
        })
    }

    /// Serialise the bitmask to `writer`.
    ///
    /// The stream starts with the `DNBM` magic followed by a `bincode`
    /// payload holding the format version, the distinct count and every
    /// allocated segment.
    ///
    /// # Errors
    ///
    /// Returns [`BitmaskError::Io`] when the writer fails and
    /// [`BitmaskError::Encode`] when the payload cannot be encoded.
    ///
    /// # Examples
    /// ```
    /// use denorm_core::Bitmask;
    ///
    /// # fn main() -> Result<(), denorm_core::BitmaskError> {
    /// let mask: Bitmask = [1, 5, -3].into_iter().collect();
    /// let mut bytes = Vec::new();
    /// mask.write_to(&mut bytes)?;
    ///
    /// let restored = Bitmask::read_from(bytes.as_slice())?;
    /// assert_eq!(restored, mask);
    /// # Ok(())
    /// # }
    /// ```
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), BitmaskError> {
        writer
            .write_all(&BITMASK_MAGIC)
            .map_err(|source| BitmaskError::Io { source })?;
        let file = BitmaskFile {
            version: BITMASK_VERSION,
            payload: self.to_payload(),
        };
        serialize_into(&mut writer, &file).map_err(|source| BitmaskError::Encode { source })?;
        writer.flush().map_err(|source| BitmaskError::Io { source })
    }

    /// Restore a bitmask previously written by [`Bitmask::write_to`].
    ///
    /// # Errors
    ///
    /// Fails when the stream cannot be read, does not start with the bitmask
    /// header, was written by another format version, or holds segments that
    /// disagree with the recorded count.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, BitmaskError> {
        let mut magic = [0_u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|source| BitmaskError::Io { source })?;
        if magic != BITMASK_MAGIC {
            return Err(BitmaskError::InvalidMagic {
                expected: BITMASK_MAGIC,
                found: magic,
            });
        }
        let file: BitmaskFile =
            deserialize_from(&mut reader).map_err(|source| BitmaskError::Decode { source })?;
        if file.version != BITMASK_VERSION {
            return Err(BitmaskError::UnsupportedVersion {
                found: file.version,
                supported: BITMASK_VERSION,
            });
        }
        Self::from_payload(file.payload)
    }

    pub(crate) fn to_payload(&self) -> BitmaskPayload {
        BitmaskPayload {
            count: self.count,
            segments: self
                .segments
                .iter()
                .map(|(key, segment)| (*key, segment.to_vec()))
                .collect(),
        }
    }

    pub(crate) fn from_payload(payload: BitmaskPayload) -> Result<Self, BitmaskError> {
        let mut segments = BTreeMap::new();
        let mut actual = 0_u64;
        for (key, words) in payload.segments {
            let found = words.len();
            let segment: Segment = words
                .try_into()
                .map_err(|_| BitmaskError::CorruptSegment { key, words: found })?;
            actual += segment
                .iter()
                .map(|word| u64::from(word.count_ones()))
                .sum::<u64>();
            if segments.insert(key, Box::new(segment)).is_some() {
                return Err(BitmaskError::DuplicateSegment { key });
            }
        }
        if actual != payload.count {
            return Err(BitmaskError::CountMismatch {
                recorded: payload.count,
                actual,
            });
        }
        Ok(Self {
            segments,
            count: actual,
        })
    }
}

impl Extend<i64> for Bitmask {
    fn extend<T: IntoIterator<Item = i64>>(&mut self, iter: T) {
        for id in iter {
            self.insert(id);
        }
    }
}

impl FromIterator<i64> for Bitmask {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        let mut mask = Self::new();
        mask.extend(iter);
        mask
    }
}

/// Serialisable body of a bitmask, shared with the index-marks file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BitmaskPayload {
    count: u64,
    segments: Vec<(i64, Vec<u64>)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BitmaskFile {
    version: u16,
    payload: BitmaskPayload,
}

/// Errors raised while persisting or restoring a [`Bitmask`].
#[derive(Debug, Error)]
pub enum BitmaskError {
    /// Reading or writing the underlying stream failed.
    #[error("failed to transfer bitmask bytes")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The bitmask could not be encoded.
    #[error("failed to encode bitmask")]
    Encode {
        /// Encoder failure from `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// The persisted payload could not be decoded.
    #[error("failed to decode bitmask")]
    Decode {
        /// Decoder failure from `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// The stream did not start with the bitmask header.
    #[error("invalid bitmask magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected byte sequence identifying a bitmask.
        expected: [u8; 4],
        /// Sequence read from the stream.
        found: [u8; 4],
    },
    /// The stream was written by an unsupported format version.
    #[error("unsupported bitmask version {found}; supported version is {supported}")]
    UnsupportedVersion {
        /// Version present in the stream.
        found: u16,
        /// Version understood by this build.
        supported: u16,
    },
    /// A segment carried the wrong number of words.
    #[error("segment {key} holds {words} words")]
    CorruptSegment {
        /// Segment key as stored.
        key: i64,
        /// Number of words found.
        words: usize,
    },
    /// The same segment was stored more than once.
    #[error("segment {key} is stored more than once")]
    DuplicateSegment {
        /// Segment key as stored.
        key: i64,
    },
    /// The recorded distinct count disagrees with the stored bits.
    #[error("bitmask records {recorded} ids but its segments hold {actual}")]
    CountMismatch {
        /// Count written in the payload.
        recorded: u64,
        /// Count recomputed from the segments.
        actual: u64,
    },
}
