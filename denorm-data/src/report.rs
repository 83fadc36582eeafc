//! Per-pass statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The four file passes of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Marks tagged primitives and their direct references.
    PrimaryIndex,
    /// Marks the nodes of ways referenced by relations.
    RelationMemberIndex,
    /// Writes the records resolution needs into the cache.
    CachePopulation,
    /// Emits denormalized elements.
    Resolution,
}

impl PassKind {
    /// Short human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PrimaryIndex => "primary index",
            Self::RelationMemberIndex => "relation member index",
            Self::CachePopulation => "cache population",
            Self::Resolution => "resolution",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one pass.
///
/// `selected` counts what the pass acted on: primitives that received at
/// least one mark, records written to the cache, or elements emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Pass this report describes.
    pub pass: PassKind,
    /// Primitives handled by the workers.
    pub primitives: u64,
    /// Primitives marked, cached or emitted.
    pub selected: u64,
    /// Primitives dropped because they could not be resolved.
    pub skipped: u64,
    /// Relation members omitted because they closed a cycle.
    pub cycles_omitted: u64,
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: primitives={}, selected={}, skipped={}, cycles_omitted={}",
            self.pass, self.primitives, self.selected, self.skipped, self.cycles_omitted
        )
    }
}

/// Reports of the passes executed by [`Parser::run`](crate::Parser::run).
///
/// Passes skipped because the parser resumed from persisted marks are
/// `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Primary indexing pass.
    pub primary_index: Option<PassReport>,
    /// Relation-member indexing pass.
    pub relation_member_index: Option<PassReport>,
    /// Cache population pass.
    pub cache_population: PassReport,
    /// Resolution pass.
    pub resolution: PassReport,
}

impl RunReport {
    /// Elements emitted by the resolution pass.
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.resolution.selected
    }
}

/// Lock-free counters shared by the workers of one pass.
#[derive(Debug, Default)]
pub(crate) struct PassCounters {
    primitives: AtomicU64,
    selected: AtomicU64,
    skipped: AtomicU64,
    cycles_omitted: AtomicU64,
}

impl PassCounters {
    pub(crate) fn primitive(&self) {
        self.primitives.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn selected(&self) {
        self.selected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cycles_omitted(&self, count: u64) {
        if count > 0 {
            self.cycles_omitted.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn report(&self, pass: PassKind) -> PassReport {
        PassReport {
            pass,
            primitives: self.primitives.load(Ordering::Relaxed),
            selected: self.selected.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cycles_omitted: self.cycles_omitted.load(Ordering::Relaxed),
        }
    }
}
