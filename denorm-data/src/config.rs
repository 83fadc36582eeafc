//! Tuning knobs for a denormalization run.

use std::num::NonZeroUsize;
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default directory holding the scratch cache database.
pub const DEFAULT_CACHE_DIR: &str = "denorm-cache";
/// Default number of buffered cache writes per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 5000;
/// Default capacity of the queue between the decoder and the workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default bound on relation nesting during resolution.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Configuration for [`Parser`](crate::Parser).
///
/// Every field has a default, so partial documents deserialize cleanly:
///
/// ```
/// use denorm_data::ParserConfig;
///
/// let config: ParserConfig = serde_json::from_str(r#"{"batch_size": 10}"#).unwrap();
/// assert_eq!(config.batch_size, 10);
/// assert_eq!(config.max_depth, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Directory holding the cache database.
    pub cache_dir: Utf8PathBuf,
    /// Delete any cache left over from a previous run before populating.
    pub clear_cache: bool,
    /// Buffered writes are committed once their count exceeds this value.
    pub batch_size: usize,
    /// Worker threads per pass.
    pub workers: usize,
    /// Primitives buffered between the decoder and the workers.
    pub queue_capacity: usize,
    /// Deepest relation nesting resolved before giving up on a relation.
    pub max_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            cache_dir: Utf8PathBuf::from(DEFAULT_CACHE_DIR),
            clear_cache: true,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ParserConfig {
    /// Place the cache database under `dir`.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Keep or discard an existing cache database.
    #[must_use]
    pub const fn with_clear_cache(mut self, clear: bool) -> Self {
        self.clear_cache = clear;
        self
    }

    /// Set the write batch threshold.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the decoder queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the relation nesting bound.
    #[must_use]
    pub const fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Cache directory as configured.
    #[must_use]
    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    /// Reject settings that would stall or disable a pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("batch_size", self.batch_size),
            ("workers", self.workers),
            ("queue_capacity", self.queue_capacity),
            ("max_depth", self.max_depth),
        ];
        match checks.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field }),
            None if self.cache_dir.as_str().is_empty() => Err(ConfigError::EmptyCacheDir),
            None => Ok(()),
        }
    }
}

/// Invalid [`ParserConfig`] settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A count that must be positive was zero.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Offending field name.
        field: &'static str,
    },
    /// No cache directory was given.
    #[error("cache_dir must not be empty")]
    EmptyCacheDir,
}
