//! Decoding, caching and resolution for the OSM denormalizer.
//!
//! Responsibilities:
//! - Stream primitives out of OSM PBF files.
//! - Run the two indexing passes, the cache-population pass and the
//!   resolution pass over a bounded worker pipeline.
//! - Own the SQLite-backed scratch cache and its record encodings.
//!
//! Boundaries:
//! - Do not define domain types (live in `denorm-core`).
//! - Never install a logger; emit through the `log` facade only.
//!
//! Invariants:
//! - Marks are only mutated by the indexing passes.
//! - Resolution performs no cache writes.
//! - The output stream of a run is closed exactly once.

pub mod cache;
pub mod config;
pub mod error;
pub mod indexer;
pub mod parser;
pub mod pbf;
mod pipeline;
pub mod report;
pub mod resolver;

pub use cache::{CacheError, CacheKey, CacheReader, CacheWriter, CodecError, DenormCache};
pub use config::{ConfigError, ParserConfig};
pub use error::DenormError;
pub use indexer::{PrimaryIndexer, RelationMemberIndexer};
pub use parser::{Parser, RunState};
pub use pbf::PbfSource;
pub use report::{PassKind, PassReport, RunReport};
pub use resolver::{Resolution, ResolveError, Resolver};
