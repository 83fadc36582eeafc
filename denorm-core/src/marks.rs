//! The seven index marks shared by every pass of a denormalization run.

use std::fmt;
use std::io::{BufReader, BufWriter, Read, Write};

use bincode::{deserialize_from, serialize_into};
use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitmask::{Bitmask, BitmaskError, BitmaskPayload};

/// File identifier for persisted index marks.
pub(crate) const MARKS_MAGIC: [u8; 4] = *b"DNIM";

/// Supported version of the persisted index marks format.
pub(crate) const MARKS_VERSION: u16 = 1;

/// Selects one of the seven bitmasks held by [`IndexMarks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkKind {
    /// Tagged nodes, emitted as leaves.
    Nodes,
    /// Tagged ways, resolved and emitted.
    Ways,
    /// Tagged relations with at least one way member, resolved and emitted.
    Relations,
    /// Nodes referenced by tagged ways.
    WayRefs,
    /// Nodes referenced by relations, directly or through a member way.
    RelNodes,
    /// Ways referenced by relations.
    RelWays,
    /// Relations referenced by relations.
    RelRelations,
}

impl MarkKind {
    /// Every kind, in the order used by persistence and summaries.
    pub const ALL: [Self; 7] = [
        Self::Nodes,
        Self::Ways,
        Self::Relations,
        Self::WayRefs,
        Self::RelNodes,
        Self::RelWays,
        Self::RelRelations,
    ];

    /// Stable display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Ways => "ways",
            Self::Relations => "relations",
            Self::WayRefs => "way_refs",
            Self::RelNodes => "rel_nodes",
            Self::RelWays => "rel_ways",
            Self::RelRelations => "rel_relations",
        }
    }
}

impl fmt::Display for MarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Membership records produced by the indexing passes.
///
/// The marks are mutated while the two indexers run and are read-only from
/// the cache-population pass onward.
///
/// # Examples
/// ```
/// use denorm_core::{IndexMarks, MarkKind};
///
/// let mut marks = IndexMarks::new();
/// marks.get_mut(MarkKind::Ways).insert(10);
/// assert!(marks.ways().has(10));
/// assert_eq!(marks.summary().count(MarkKind::Ways), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMarks {
    nodes: Bitmask,
    ways: Bitmask,
    relations: Bitmask,
    way_refs: Bitmask,
    rel_nodes: Bitmask,
    rel_ways: Bitmask,
    rel_relations: Bitmask,
}

impl IndexMarks {
    /// Create a record with all seven bitmasks empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Bitmask::new(),
            ways: Bitmask::new(),
            relations: Bitmask::new(),
            way_refs: Bitmask::new(),
            rel_nodes: Bitmask::new(),
            rel_ways: Bitmask::new(),
            rel_relations: Bitmask::new(),
        }
    }

    /// Borrow the bitmask selected by `kind`.
    #[must_use]
    pub const fn get(&self, kind: MarkKind) -> &Bitmask {
        match kind {
            MarkKind::Nodes => &self.nodes,
            MarkKind::Ways => &self.ways,
            MarkKind::Relations => &self.relations,
            MarkKind::WayRefs => &self.way_refs,
            MarkKind::RelNodes => &self.rel_nodes,
            MarkKind::RelWays => &self.rel_ways,
            MarkKind::RelRelations => &self.rel_relations,
        }
    }

    /// Mutably borrow the bitmask selected by `kind`.
    pub const fn get_mut(&mut self, kind: MarkKind) -> &mut Bitmask {
        match kind {
            MarkKind::Nodes => &mut self.nodes,
            MarkKind::Ways => &mut self.ways,
            MarkKind::Relations => &mut self.relations,
            MarkKind::WayRefs => &mut self.way_refs,
            MarkKind::RelNodes => &mut self.rel_nodes,
            MarkKind::RelWays => &mut self.rel_ways,
            MarkKind::RelRelations => &mut self.rel_relations,
        }
    }

    /// Tagged nodes.
    #[must_use]
    pub const fn nodes(&self) -> &Bitmask {
        &self.nodes
    }

    /// Tagged ways.
    #[must_use]
    pub const fn ways(&self) -> &Bitmask {
        &self.ways
    }

    /// Tagged relations with at least one way member.
    #[must_use]
    pub const fn relations(&self) -> &Bitmask {
        &self.relations
    }

    /// Nodes referenced by tagged ways.
    #[must_use]
    pub const fn way_refs(&self) -> &Bitmask {
        &self.way_refs
    }

    /// Nodes needed by relations.
    #[must_use]
    pub const fn rel_nodes(&self) -> &Bitmask {
        &self.rel_nodes
    }

    /// Ways referenced by relations.
    #[must_use]
    pub const fn rel_ways(&self) -> &Bitmask {
        &self.rel_ways
    }

    /// Relations referenced by relations.
    #[must_use]
    pub const fn rel_relations(&self) -> &Bitmask {
        &self.rel_relations
    }

    /// Whether a node must be written to the denormalization cache.
    #[must_use]
    pub fn caches_node(&self, id: i64) -> bool {
        self.way_refs.has(id) || self.rel_nodes.has(id)
    }

    /// Distinct counts for every mark.
    #[must_use]
    pub fn summary(&self) -> MarkSummary {
        MarkSummary {
            counts: MarkKind::ALL.map(|kind| self.get(kind).len()),
        }
    }

    /// Serialise all seven bitmasks to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`MarksError::Bitmask`] when writing or encoding fails.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), MarksError> {
        writer
            .write_all(&MARKS_MAGIC)
            .map_err(|source| MarksError::Bitmask(BitmaskError::Io { source }))?;
        let file = MarksFile {
            version: MARKS_VERSION,
            masks: MarkKind::ALL
                .iter()
                .map(|kind| self.get(*kind).to_payload())
                .collect(),
        };
        serialize_into(&mut writer, &file)
            .map_err(|source| MarksError::Bitmask(BitmaskError::Encode { source }))?;
        writer
            .flush()
            .map_err(|source| MarksError::Bitmask(BitmaskError::Io { source }))
    }

    /// Restore marks previously written by [`IndexMarks::write_to`].
    ///
    /// # Errors
    ///
    /// Fails when the stream cannot be read or decoded, carries the wrong
    /// header or version, or does not hold exactly seven valid bitmasks.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, MarksError> {
        let mut magic = [0_u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|source| MarksError::Bitmask(BitmaskError::Io { source }))?;
        if magic != MARKS_MAGIC {
            return Err(MarksError::InvalidMagic {
                expected: MARKS_MAGIC,
                found: magic,
            });
        }
        let file: MarksFile = deserialize_from(&mut reader)
            .map_err(|source| MarksError::Bitmask(BitmaskError::Decode { source }))?;
        if file.version != MARKS_VERSION {
            return Err(MarksError::UnsupportedVersion {
                found: file.version,
                supported: MARKS_VERSION,
            });
        }
        if file.masks.len() != MarkKind::ALL.len() {
            return Err(MarksError::MaskCount {
                found: file.masks.len(),
            });
        }

        let mut marks = Self::new();
        for (kind, payload) in MarkKind::ALL.into_iter().zip(file.masks) {
            *marks.get_mut(kind) = Bitmask::from_payload(payload)?;
        }
        Ok(marks)
    }

    /// Persist the marks to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`MarksError::File`] when the file cannot be created and
    /// [`MarksError::Bitmask`] when writing fails.
    pub fn save(&self, path: &Utf8Path) -> Result<(), MarksError> {
        let file = denorm_fs::create_file(path).map_err(|source| MarksError::File {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_to(BufWriter::new(file))?;
        info!("wrote index marks to {path} ({})", self.summary());
        Ok(())
    }

    /// Load marks persisted by [`IndexMarks::save`].
    ///
    /// # Errors
    ///
    /// Returns [`MarksError::File`] when the file cannot be opened, or any
    /// error raised by [`IndexMarks::read_from`].
    pub fn load(path: &Utf8Path) -> Result<Self, MarksError> {
        let file = denorm_fs::open_file(path).map_err(|source| MarksError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let marks = Self::read_from(BufReader::new(file))?;
        info!("read index marks from {path} ({})", marks.summary());
        Ok(marks)
    }
}

/// Distinct id counts for each mark, printable for progress logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkSummary {
    counts: [u64; 7],
}

impl MarkSummary {
    /// Count for the selected mark.
    #[must_use]
    pub fn count(&self, kind: MarkKind) -> u64 {
        MarkKind::ALL
            .iter()
            .zip(self.counts)
            .find_map(|(candidate, count)| (*candidate == kind).then_some(count))
            .unwrap_or_default()
    }
}

impl fmt::Display for MarkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (kind, count)) in MarkKind::ALL.iter().zip(self.counts).enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{kind}={count}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MarksFile {
    version: u16,
    masks: Vec<BitmaskPayload>,
}

/// Errors raised while persisting or restoring [`IndexMarks`].
#[derive(Debug, Error)]
pub enum MarksError {
    /// Opening or creating the marks file failed.
    #[error("failed to access index marks file {path}")]
    File {
        /// Location of the marks file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Encoding or decoding one of the bitmasks failed.
    #[error(transparent)]
    Bitmask(#[from] BitmaskError),
    /// The stream did not start with the marks header.
    #[error("invalid index marks magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected byte sequence identifying a marks file.
        expected: [u8; 4],
        /// Sequence read from the stream.
        found: [u8; 4],
    },
    /// The stream was written by an unsupported format version.
    #[error("unsupported index marks version {found}; supported version is {supported}")]
    UnsupportedVersion {
        /// Version present in the stream.
        found: u16,
        /// Version understood by this build.
        supported: u16,
    },
    /// The stream did not hold exactly seven bitmasks.
    #[error("index marks file holds {found} bitmasks, expected 7")]
    MaskCount {
        /// Number of bitmasks found.
        found: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn populated() -> IndexMarks {
        let mut marks = IndexMarks::new();
        for (offset, kind) in (0_i64..).zip(MarkKind::ALL) {
            let mask = marks.get_mut(kind);
            mask.insert(offset);
            mask.insert(offset + 1_000_000);
        }
        marks.get_mut(MarkKind::RelNodes).insert(-17);
        marks
    }

    #[rstest]
    fn marks_are_independent() {
        let mut marks = IndexMarks::new();
        marks.get_mut(MarkKind::WayRefs).insert(5);
        assert!(marks.way_refs().has(5));
        for kind in MarkKind::ALL {
            if kind != MarkKind::WayRefs {
                assert!(!marks.get(kind).has(5), "{kind} should not contain 5");
            }
        }
    }

    #[rstest]
    fn caches_nodes_from_either_reference_mark() {
        let mut marks = IndexMarks::new();
        marks.get_mut(MarkKind::WayRefs).insert(1);
        marks.get_mut(MarkKind::RelNodes).insert(2);
        assert!(marks.caches_node(1));
        assert!(marks.caches_node(2));
        assert!(!marks.caches_node(3));
    }

    #[rstest]
    fn summary_reports_each_count(populated: IndexMarks) {
        let summary = populated.summary();
        assert_eq!(summary.count(MarkKind::Nodes), 2);
        assert_eq!(summary.count(MarkKind::RelNodes), 3);
        let rendered = summary.to_string();
        assert!(rendered.starts_with("nodes=2, ways=2"));
        assert!(rendered.ends_with("rel_relations=2"));
    }

    #[rstest]
    fn stream_round_trip(populated: IndexMarks) {
        let mut bytes = Vec::new();
        populated.write_to(&mut bytes).expect("write marks");
        let restored = IndexMarks::read_from(bytes.as_slice()).expect("read marks");
        assert_eq!(restored, populated);
    }

    #[rstest]
    fn file_round_trip(populated: IndexMarks) {
        let dir = TempDir::new().expect("create temp dir");
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("nested/marks.bin")).expect("utf-8 path");
        populated.save(&path).expect("save marks");
        let restored = IndexMarks::load(&path).expect("load marks");
        assert_eq!(restored, populated);
    }

    #[rstest]
    fn load_reports_missing_file() {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.bin")).expect("utf-8 path");
        let err = IndexMarks::load(&path).expect_err("missing file should fail");
        assert!(matches!(err, MarksError::File { .. }));
        assert!(err.to_string().ends_with("absent.bin"));
    }

    #[rstest]
    fn rejects_bitmask_stream_as_marks() {
        let mut bytes = Vec::new();
        Bitmask::new().write_to(&mut bytes).expect("write bitmask");
        let err = IndexMarks::read_from(bytes.as_slice()).expect_err("magic should mismatch");
        assert!(matches!(err, MarksError::InvalidMagic { .. }));
    }
}
