//! Core domain types for the OSM denormalizer.
//!
//! Responsibilities:
//! - Model primitives (nodes, ways, relations) and their resolved form.
//! - Provide the sparse [`Bitmask`] and the seven [`IndexMarks`] built by the
//!   indexing passes, including their binary persistence.
//! - Define the [`PrimitiveSource`] seam through which inputs are streamed.
//!
//! Boundaries:
//! - No file-format decoding and no storage engines (live in `denorm-data`).
//!
//! Invariants:
//! - Bitmasks are append-only: once marked, an id stays marked.
//! - No global mutable state.
#![forbid(unsafe_code)]

pub mod bitmask;
pub mod element;
pub mod marks;
pub mod source;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use bitmask::{Bitmask, BitmaskError};
pub use element::{Element, Member, MemberKind, Node, Primitive, Relation, Tags, Way};
pub use marks::{IndexMarks, MarkKind, MarkSummary, MarksError};
pub use source::{PrimitiveSource, SourceError};
