//! Test-only, in-memory `PrimitiveSource` implementation used by unit and
//! behaviour tests.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8PathBuf;

use crate::{
    Member, MemberKind, Node, Primitive, PrimitiveSource, Relation, SourceError, Tags, Way,
};

/// Vector-backed source that replays the same primitives on every pass.
#[derive(Debug, Default)]
pub struct MemorySource {
    primitives: Vec<Primitive>,
    fail_after: Option<usize>,
    passes: AtomicUsize,
}

impl MemorySource {
    /// Create a source streaming `primitives` in the given order.
    pub fn new<I>(primitives: I) -> Self
    where
        I: IntoIterator<Item = Primitive>,
    {
        Self {
            primitives: primitives.into_iter().collect(),
            fail_after: None,
            passes: AtomicUsize::new(0),
        }
    }

    /// Report a decode error after `count` primitives on every pass.
    #[must_use]
    pub const fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Number of passes started so far.
    #[must_use]
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

impl PrimitiveSource for MemorySource {
    fn for_each_primitive(
        &self,
        visit: &mut dyn FnMut(Primitive) -> ControlFlow<()>,
    ) -> Result<(), SourceError> {
        self.passes.fetch_add(1, Ordering::SeqCst);
        for (index, primitive) in self.primitives.iter().enumerate() {
            if self.fail_after == Some(index) {
                return Err(SourceError::Decode {
                    path: Utf8PathBuf::from("memory"),
                    source: format!("injected failure after {index} primitives").into(),
                });
            }
            if visit(primitive.clone()).is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Build a tag map from string pairs.
#[must_use]
pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

/// Build a node primitive.
#[must_use]
pub fn node(id: i64, lat: f64, lon: f64, pairs: &[(&str, &str)]) -> Primitive {
    Primitive::Node(Node::new(id, lat, lon, tags(pairs)))
}

/// Build a way primitive.
#[must_use]
pub fn way(id: i64, pairs: &[(&str, &str)], node_ids: &[i64]) -> Primitive {
    Primitive::Way(Way {
        id,
        tags: tags(pairs),
        node_ids: node_ids.to_vec(),
    })
}

/// Build a relation primitive from `(kind, id, role)` member references.
#[must_use]
pub fn relation(id: i64, pairs: &[(&str, &str)], refs: &[(MemberKind, i64, &str)]) -> Primitive {
    Primitive::Relation(Relation {
        id,
        tags: tags(pairs),
        members: refs
            .iter()
            .map(|(kind, member_id, role)| Member::new(*kind, *member_id, *role))
            .collect(),
    })
}
