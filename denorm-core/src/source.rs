//! Streaming access to the primitives of an input extract.

use std::error::Error as StdError;
use std::ops::ControlFlow;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::Primitive;

/// A closed, static collection of primitives that can be streamed repeatedly.
///
/// Every call to [`PrimitiveSource::for_each_primitive`] is an independent
/// pass starting from the beginning of the input. Implementations yield
/// primitives in file order (nodes, then ways, then relations for a sorted
/// extract) and stop early when the visitor returns [`ControlFlow::Break`].
///
/// # Examples
///
/// ```rust
/// use std::ops::ControlFlow;
/// use denorm_core::{Node, Primitive, PrimitiveSource, SourceError, Tags};
///
/// struct OneNode;
///
/// impl PrimitiveSource for OneNode {
///     fn for_each_primitive(
///         &self,
///         visit: &mut dyn FnMut(Primitive) -> ControlFlow<()>,
///     ) -> Result<(), SourceError> {
///         let _ = visit(Primitive::Node(Node::new(1, 0.0, 0.0, Tags::new())));
///         Ok(())
///     }
/// }
///
/// let mut seen = 0;
/// OneNode
///     .for_each_primitive(&mut |_| {
///         seen += 1;
///         ControlFlow::Continue(())
///     })
///     .unwrap();
/// assert_eq!(seen, 1);
/// ```
pub trait PrimitiveSource: Sync {
    /// Stream every primitive to `visit`, stopping when it breaks.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Open`] when the input cannot be opened and
    /// [`SourceError::Decode`] when its contents cannot be decoded.
    fn for_each_primitive(
        &self,
        visit: &mut dyn FnMut(Primitive) -> ControlFlow<()>,
    ) -> Result<(), SourceError>;
}

impl<S: PrimitiveSource + ?Sized> PrimitiveSource for &S {
    fn for_each_primitive(
        &self,
        visit: &mut dyn FnMut(Primitive) -> ControlFlow<()>,
    ) -> Result<(), SourceError> {
        (**self).for_each_primitive(visit)
    }
}

/// Errors raised while streaming a [`PrimitiveSource`].
///
/// Both variants are fatal for a denormalization run: every later pass
/// depends on having seen the whole input.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The input could not be opened.
    #[error("failed to open input at {path}")]
    Open {
        /// Location of the input.
        path: Utf8PathBuf,
        /// Decoder or I/O failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// The input was opened but its contents could not be decoded.
    #[error("failed to decode input at {path}")]
    Decode {
        /// Location of the input.
        path: Utf8PathBuf,
        /// Decoder failure.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}
