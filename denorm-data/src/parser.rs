//! Orchestrates the four passes of a denormalization run.

use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};

use crossbeam_channel::{Sender, unbounded};
use denorm_core::{Element, IndexMarks, Primitive, PrimitiveSource};
use log::{info, warn};

use crate::cache::DenormCache;
use crate::cache::codec::{self, CacheKey};
use crate::config::ParserConfig;
use crate::error::DenormError;
use crate::indexer::{PrimaryIndexer, RelationMemberIndexer};
use crate::pipeline::Stage;
use crate::report::{PassCounters, PassKind, PassReport, RunReport};
use crate::resolver::{Resolution, Resolver};

/// Progress of a run. Each transition is one full pass over the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No pass has run yet.
    Unindexed,
    /// Tagged primitives and their direct references are marked.
    PrimaryIndexed,
    /// Nodes of relation member ways are marked.
    RelationMemberIndexed,
    /// The cache holds every record resolution needs.
    CachePopulated,
    /// Every marked primitive was resolved and emitted.
    Resolved,
    /// A pass failed; the run cannot continue.
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unindexed => "unindexed",
            Self::PrimaryIndexed => "primary indexed",
            Self::RelationMemberIndexed => "relation member indexed",
            Self::CachePopulated => "cache populated",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        })
    }
}

/// Drives a denormalization run over one [`PrimitiveSource`].
///
/// The parser owns the index marks and the cache handle and lends them to
/// each pass. Passes must run in order; [`Parser::run`] executes whatever is
/// left.
///
/// # Examples
///
/// ```
/// use denorm_core::test_support::{node, way, MemorySource};
/// use denorm_data::{Parser, ParserConfig};
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = ParserConfig::default()
///     .with_cache_dir(dir.path().to_str().unwrap())
///     .with_workers(2);
/// let source = MemorySource::new([
///     node(1, 1.0, 2.0, &[]),
///     node(2, 3.0, 4.0, &[]),
///     way(10, &[("highway", "residential")], &[1, 2]),
/// ]);
///
/// let mut parser = Parser::new(source, config).unwrap();
/// let (elements, report) = parser.run_collect().unwrap();
/// assert_eq!(elements.len(), 1);
/// assert_eq!(elements[0].children.len(), 2);
/// assert_eq!(report.emitted(), 1);
/// ```
#[derive(Debug)]
pub struct Parser<S> {
    source: S,
    config: ParserConfig,
    cache: DenormCache,
    marks: IndexMarks,
    state: RunState,
}

impl<S: PrimitiveSource> Parser<S> {
    /// Validate `config` and open the cache for a fresh run.
    pub fn new(source: S, config: ParserConfig) -> Result<Self, DenormError> {
        Self::build(source, config, IndexMarks::new(), RunState::Unindexed)
    }

    /// Resume from marks persisted by an earlier run over the same input,
    /// skipping both indexing passes.
    pub fn with_marks(
        source: S,
        config: ParserConfig,
        marks: IndexMarks,
    ) -> Result<Self, DenormError> {
        Self::build(source, config, marks, RunState::RelationMemberIndexed)
    }

    fn build(
        source: S,
        config: ParserConfig,
        marks: IndexMarks,
        state: RunState,
    ) -> Result<Self, DenormError> {
        config.validate()?;
        let cache = DenormCache::open(config.cache_dir(), config.clear_cache)?;
        Ok(Self {
            source,
            config,
            cache,
            marks,
            state,
        })
    }

    /// Current progress.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Marks collected so far.
    #[must_use]
    pub const fn marks(&self) -> &IndexMarks {
        &self.marks
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Cache handle of this run.
    #[must_use]
    pub const fn cache(&self) -> &DenormCache {
        &self.cache
    }

    /// Give up the parser, keeping its marks (for persistence, say).
    #[must_use]
    pub fn into_marks(self) -> IndexMarks {
        self.marks
    }

    fn stage(&self, pass: PassKind) -> Stage {
        Stage::new(pass, self.config.workers, self.config.queue_capacity)
    }

    fn begin(&self, pass: PassKind, expected: RunState) -> Result<(), DenormError> {
        if self.state != expected {
            return Err(DenormError::OutOfOrder {
                pass,
                state: self.state,
            });
        }
        info!("starting {pass} pass");
        Ok(())
    }

    fn finish(
        &mut self,
        outcome: Result<PassReport, DenormError>,
        next: RunState,
    ) -> Result<PassReport, DenormError> {
        self.state = if outcome.is_ok() {
            next
        } else {
            RunState::Failed
        };
        outcome
    }

    /// First pass: mark tagged primitives and their direct references.
    pub fn index_primary(&mut self) -> Result<PassReport, DenormError> {
        self.begin(PassKind::PrimaryIndex, RunState::Unindexed)?;
        let stage = self.stage(PassKind::PrimaryIndex);
        let outcome = self.with_shared_marks(|src, marks| PrimaryIndexer.run(src, stage, marks));
        self.finish(outcome, RunState::PrimaryIndexed)
    }

    /// Second pass: mark the nodes of ways referenced by relations.
    pub fn index_relation_members(&mut self) -> Result<PassReport, DenormError> {
        self.begin(PassKind::RelationMemberIndex, RunState::PrimaryIndexed)?;
        let stage = self.stage(PassKind::RelationMemberIndex);
        let outcome =
            self.with_shared_marks(|src, marks| RelationMemberIndexer.run(src, stage, marks));
        if outcome.is_ok() {
            info!("index marks: {}", self.marks.summary());
        }
        self.finish(outcome, RunState::RelationMemberIndexed)
    }

    fn with_shared_marks<F>(&mut self, pass: F) -> Result<PassReport, DenormError>
    where
        F: FnOnce(&S, &RwLock<IndexMarks>) -> Result<PassReport, DenormError>,
    {
        let shared = RwLock::new(std::mem::take(&mut self.marks));
        let outcome = pass(&self.source, &shared);
        self.marks = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
        outcome
    }

    /// Third pass: write every record resolution will look up.
    pub fn populate_cache(&mut self) -> Result<PassReport, DenormError> {
        self.begin(PassKind::CachePopulation, RunState::RelationMemberIndexed)?;
        let outcome = self.populate();
        self.finish(outcome, RunState::CachePopulated)
    }

    fn populate(&self) -> Result<PassReport, DenormError> {
        let writer = Mutex::new(self.cache.writer(self.config.batch_size)?);
        let counters = PassCounters::default();
        let (marks, writer_ref, counters_ref) = (&self.marks, &writer, &counters);

        let stage = self.stage(PassKind::CachePopulation);
        stage.run(&self.source, |_| {
            Ok(move |primitive: Primitive| -> Result<(), DenormError> {
                counters_ref.primitive();
                let Some((key, value)) = cache_record(marks, &primitive)? else {
                    return Ok(());
                };
                writer_ref.lock().map_err(writer_poisoned)?.put(key, value)?;
                counters_ref.selected();
                Ok(())
            })
        })?;

        let written = writer.into_inner().map_err(writer_poisoned)?.finish()?;
        let report = counters.report(PassKind::CachePopulation);
        info!("{report}; {written} records committed");
        Ok(report)
    }

    /// Fourth pass: resolve every marked primitive and send it to `output`.
    ///
    /// `output` is consumed; the stream closes once this pass returns, after
    /// every worker has finished. Primitives that cannot be resolved are
    /// logged, counted as skipped and dropped.
    pub fn resolve(&mut self, output: Sender<Element>) -> Result<PassReport, DenormError> {
        self.begin(PassKind::Resolution, RunState::CachePopulated)?;
        let outcome = self.resolve_into(output);
        self.finish(outcome, RunState::Resolved)
    }

    fn resolve_into(&self, output: Sender<Element>) -> Result<PassReport, DenormError> {
        let counters = PassCounters::default();
        let (marks, cache, counters_ref, output_ref) =
            (&self.marks, &self.cache, &counters, &output);
        let max_depth = self.config.max_depth;

        let stage = self.stage(PassKind::Resolution);
        stage.run(&self.source, |_| {
            let resolver = Resolver::new(marks, cache.reader()?, max_depth);
            let sink = output_ref.clone();
            Ok(move |primitive: Primitive| -> Result<(), DenormError> {
                counters_ref.primitive();
                let (id, kind) = (primitive.id(), primitive.kind());
                match resolver.resolve(primitive) {
                    Ok(Resolution::Emit {
                        element,
                        cycles_omitted,
                    }) => {
                        counters_ref.cycles_omitted(cycles_omitted);
                        sink.send(element).map_err(|_| DenormError::OutputClosed)?;
                        counters_ref.selected();
                    }
                    Ok(Resolution::Unmarked) => {}
                    Err(err) => {
                        warn!("skipping {kind:?} {id}: {err}");
                        counters_ref.skipped();
                    }
                }
                Ok(())
            })
        })?;
        drop(output);

        let report = counters.report(PassKind::Resolution);
        info!("{report}");
        Ok(report)
    }

    /// Run every pass that has not run yet, streaming elements to `output`.
    pub fn run(&mut self, output: Sender<Element>) -> Result<RunReport, DenormError> {
        let primary_index = match self.state {
            RunState::Unindexed => Some(self.index_primary()?),
            _ => None,
        };
        let relation_member_index = match self.state {
            RunState::PrimaryIndexed => Some(self.index_relation_members()?),
            _ => None,
        };
        let cache_population = self.populate_cache()?;
        let resolution = self.resolve(output)?;
        Ok(RunReport {
            primary_index,
            relation_member_index,
            cache_population,
            resolution,
        })
    }

    /// Run every remaining pass and collect the emitted elements.
    ///
    /// Elements are buffered in memory, so this is meant for small inputs
    /// and tests; stream through [`Parser::run`] otherwise.
    pub fn run_collect(&mut self) -> Result<(Vec<Element>, RunReport), DenormError> {
        let (sender, receiver) = unbounded();
        let report = self.run(sender)?;
        Ok((receiver.into_iter().collect(), report))
    }
}

fn writer_poisoned<T>(_: PoisonError<T>) -> DenormError {
    DenormError::LockPoisoned {
        what: "cache writer",
    }
}

/// Cache record for `primitive`, if resolution will need one.
fn cache_record(
    marks: &IndexMarks,
    primitive: &Primitive,
) -> Result<Option<(CacheKey, Vec<u8>)>, DenormError> {
    let record = match primitive {
        Primitive::Node(node) if marks.caches_node(node.id) => (
            CacheKey::node(node.id),
            codec::encode_location(node.location).to_vec(),
        ),
        Primitive::Way(way) if marks.rel_ways().has(way.id) => {
            let key = CacheKey::way(way.id);
            let value = codec::encode_way(way).map_err(|source| DenormError::Encode {
                key: key.clone(),
                source,
            })?;
            (key, value)
        }
        Primitive::Relation(relation) if marks.rel_relations().has(relation.id) => {
            let key = CacheKey::relation(relation.id);
            let value = codec::encode_relation(relation).map_err(|source| DenormError::Encode {
                key: key.clone(),
                source,
            })?;
            (key, value)
        }
        Primitive::Node(_) | Primitive::Way(_) | Primitive::Relation(_) => return Ok(None),
    };
    Ok(Some(record))
}
