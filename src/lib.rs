//! Facade crate for the OSM denormalizer.
//!
//! This crate re-exports the domain model from `denorm-core` and the PBF
//! reader, cache and run orchestration from `denorm-data`, so consumers
//! depend on a single crate.
//!
//! ```no_run
//! use osm_denorm::{Parser, ParserConfig, PbfSource};
//!
//! let (sender, receiver) = crossbeam_channel::bounded(1024);
//! let consumer = std::thread::spawn(move || receiver.iter().count());
//!
//! let mut parser = Parser::new(PbfSource::new("extract.osm.pbf"), ParserConfig::default())?;
//! let report = parser.run(sender)?;
//! assert_eq!(consumer.join().unwrap() as u64, report.emitted());
//! # Ok::<(), osm_denorm::DenormError>(())
//! ```

#![forbid(unsafe_code)]

pub use denorm_core::{
    Bitmask, BitmaskError, Element, IndexMarks, MarkKind, MarkSummary, MarksError, Member,
    MemberKind, Node, Primitive, PrimitiveSource, Relation, SourceError, Tags, Way,
};

pub use denorm_data::{
    CacheError, CacheKey, CodecError, ConfigError, DenormCache, DenormError, Parser, ParserConfig,
    PassKind, PassReport, PbfSource, Resolution, ResolveError, RunReport, RunState,
};

#[cfg(feature = "test-support")]
pub use denorm_core::test_support;
