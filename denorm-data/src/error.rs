//! Errors that abort a denormalization run.

use denorm_core::SourceError;
use thiserror::Error;

use crate::cache::{CacheError, CacheKey, CodecError};
use crate::config::ConfigError;
use crate::parser::RunState;
use crate::report::PassKind;

/// Fatal failures of a [`Parser`](crate::Parser) run.
///
/// Per-primitive resolution failures are not represented here; they are
/// logged, counted in the [`PassReport`](crate::PassReport) and the
/// primitive is dropped.
#[derive(Debug, Error)]
pub enum DenormError {
    /// The configuration was rejected.
    #[error("invalid parser configuration")]
    Config(#[from] ConfigError),
    /// The input could not be opened or decoded.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The cache store failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// A record could not be encoded for the cache.
    #[error("failed to encode cache record {key}")]
    Encode {
        /// Key of the record.
        key: CacheKey,
        /// Encoding failure.
        #[source]
        source: CodecError,
    },
    /// A pass was requested before the passes it depends on.
    #[error("{pass} cannot run while the parser is {state}")]
    OutOfOrder {
        /// Requested pass.
        pass: PassKind,
        /// State the parser was in.
        state: RunState,
    },
    /// The consumer dropped its receiver before resolution finished.
    #[error("output receiver was dropped before resolution finished")]
    OutputClosed,
    /// A worker thread panicked.
    #[error("a {pass} worker panicked")]
    WorkerPanicked {
        /// Pass the worker belonged to.
        pass: PassKind,
    },
    /// A lock was poisoned by a panicking worker.
    #[error("{what} lock was poisoned")]
    LockPoisoned {
        /// Guarded state.
        what: &'static str,
    },
}
