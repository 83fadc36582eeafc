//! Turns marked primitives into self-contained element trees.
//!
//! Every lookup goes through the cache populated by the previous pass.
//! Relation members are resolved depth first; the ids of the relations on
//! the current path are threaded through the recursion so a member that
//! closes a cycle is recognised and left out instead of recursing forever.

use std::collections::HashSet;

use denorm_core::{Element, IndexMarks, MemberKind, Node, Primitive, Relation, Tags, Way};
use log::debug;
use thiserror::Error;

use crate::cache::codec::{self, CacheKey, CodecError};
use crate::cache::{CacheError, CacheReader};

/// Reasons a single primitive could not be resolved.
///
/// These never abort a run: the primitive is dropped and counted.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A referenced node has no cached location.
    #[error("node {id} is missing from the cache")]
    MissingNode {
        /// Node identifier.
        id: i64,
    },
    /// A member way has no cached snapshot.
    #[error("way {id} is missing from the cache")]
    MissingWay {
        /// Way identifier.
        id: i64,
    },
    /// A member relation has no cached snapshot.
    #[error("relation {id} is missing from the cache")]
    MissingRelation {
        /// Relation identifier.
        id: i64,
    },
    /// A cached record could not be decoded.
    #[error("cache record {key} is corrupt")]
    Codec {
        /// Key of the record.
        key: CacheKey,
        /// Decoding failure.
        #[source]
        source: CodecError,
    },
    /// Relation nesting exceeded the configured bound.
    #[error("relation nesting exceeds {max_depth} levels")]
    DepthExceeded {
        /// Configured bound.
        max_depth: usize,
    },
    /// The cache could not be read.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result of resolving one primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The primitive was marked for output and fully resolved.
    Emit {
        /// Resolved element.
        element: Element,
        /// Members left out because they closed a cycle.
        cycles_omitted: u64,
    },
    /// The primitive is not an output element.
    Unmarked,
}

/// Resolves primitives against frozen marks and one cache connection.
#[derive(Debug)]
pub struct Resolver<'m> {
    marks: &'m IndexMarks,
    cache: CacheReader,
    max_depth: usize,
}

impl<'m> Resolver<'m> {
    /// Build a resolver reading through `cache`.
    #[must_use]
    pub const fn new(marks: &'m IndexMarks, cache: CacheReader, max_depth: usize) -> Self {
        Self {
            marks,
            cache,
            max_depth,
        }
    }

    /// Resolve `primitive` if it is marked for output.
    ///
    /// Tagged nodes are emitted as they are. Ways receive one child per node
    /// reference. Relations receive one child per member, ways among them
    /// carrying their own node children, each labelled with its role.
    pub fn resolve(&self, primitive: Primitive) -> Result<Resolution, ResolveError> {
        let mut cycles_omitted = 0;
        let element = match primitive {
            Primitive::Node(node) if self.marks.nodes().has(node.id) => {
                Element::new(Primitive::Node(node))
            }
            Primitive::Way(way) if self.marks.ways().has(way.id) => {
                let children = self.way_children(&way)?;
                Element::new(Primitive::Way(way)).with_children(children)
            }
            Primitive::Relation(relation) if self.marks.relations().has(relation.id) => {
                let mut ancestors = HashSet::from([relation.id]);
                let children =
                    self.relation_children(&relation, &mut ancestors, 1, &mut cycles_omitted)?;
                Element::new(Primitive::Relation(relation)).with_children(children)
            }
            Primitive::Node(_) | Primitive::Way(_) | Primitive::Relation(_) => {
                return Ok(Resolution::Unmarked);
            }
        };
        Ok(Resolution::Emit {
            element,
            cycles_omitted,
        })
    }

    fn fetch(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, ResolveError> {
        Ok(self.cache.get(key)?)
    }

    fn node(&self, id: i64) -> Result<Element, ResolveError> {
        let key = CacheKey::node(id);
        let bytes = self.fetch(&key)?.ok_or(ResolveError::MissingNode { id })?;
        let location =
            codec::decode_location(&bytes).map_err(|source| ResolveError::Codec { key, source })?;
        Ok(Element::new(Primitive::Node(Node {
            id,
            location,
            tags: Tags::new(),
        })))
    }

    fn way_children(&self, way: &Way) -> Result<Vec<Element>, ResolveError> {
        way.node_ids.iter().map(|id| self.node(*id)).collect()
    }

    fn member_way(&self, id: i64) -> Result<Element, ResolveError> {
        let key = CacheKey::way(id);
        let bytes = self.fetch(&key)?.ok_or(ResolveError::MissingWay { id })?;
        let way = codec::decode_way(&bytes).map_err(|source| ResolveError::Codec { key, source })?;
        let children = self.way_children(&way)?;
        Ok(Element::new(Primitive::Way(way)).with_children(children))
    }

    fn member_relation(
        &self,
        id: i64,
        ancestors: &mut HashSet<i64>,
        depth: usize,
        cycles_omitted: &mut u64,
    ) -> Result<Element, ResolveError> {
        let key = CacheKey::relation(id);
        let bytes = self
            .fetch(&key)?
            .ok_or(ResolveError::MissingRelation { id })?;
        let relation =
            codec::decode_relation(&bytes).map_err(|source| ResolveError::Codec { key, source })?;

        ancestors.insert(id);
        let children = self.relation_children(&relation, ancestors, depth, cycles_omitted);
        ancestors.remove(&id);
        Ok(Element::new(Primitive::Relation(relation)).with_children(children?))
    }

    fn relation_children(
        &self,
        relation: &Relation,
        ancestors: &mut HashSet<i64>,
        depth: usize,
        cycles_omitted: &mut u64,
    ) -> Result<Vec<Element>, ResolveError> {
        if depth > self.max_depth {
            return Err(ResolveError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }
        let mut children = Vec::with_capacity(relation.members.len());
        for member in &relation.members {
            let child = match member.kind {
                MemberKind::Node => self.node(member.id)?,
                MemberKind::Way => self.member_way(member.id)?,
                MemberKind::Relation if ancestors.contains(&member.id) => {
                    debug!(
                        "relation {} omits member relation {}: cycle",
                        relation.id, member.id
                    );
                    *cycles_omitted += 1;
                    continue;
                }
                MemberKind::Relation => {
                    self.member_relation(member.id, ancestors, depth + 1, cycles_omitted)?
                }
            };
            children.push(child.with_role(member.role.as_str()));
        }
        Ok(children)
    }
}
