//! The two indexing passes that decide what must be cached and emitted.
//!
//! Marks are shared by the workers behind a [`RwLock`]: membership tests take
//! the read lock, inserts take the write lock, and primitives that need no
//! mark never touch the lock at all.

use std::sync::{PoisonError, RwLock};

use denorm_core::{IndexMarks, MarkKind, MemberKind, Primitive, PrimitiveSource};
use log::info;

use crate::error::DenormError;
use crate::pipeline::Stage;
use crate::report::{PassCounters, PassKind, PassReport};

fn poisoned<T>(_: PoisonError<T>) -> DenormError {
    DenormError::LockPoisoned {
        what: "index marks",
    }
}

/// First pass: marks tagged primitives and what they reference directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryIndexer;

impl PrimaryIndexer {
    /// Whether `primitive` receives any mark in this pass.
    ///
    /// Untagged primitives are never selected. Tagged relations without a
    /// single way member are skipped as well: they carry no geometry worth
    /// resolving.
    #[must_use]
    pub fn selects(primitive: &Primitive) -> bool {
        match primitive {
            Primitive::Relation(relation) => {
                primitive.is_tagged() && relation.count_members(MemberKind::Way) > 0
            }
            Primitive::Node(_) | Primitive::Way(_) => primitive.is_tagged(),
        }
    }

    /// Apply the marking rules for one primitive, returning whether it was
    /// selected.
    ///
    /// A tagged node is marked in `nodes`. A tagged way is marked in `ways`
    /// and every node it references, tagged or not, in `way_refs`. A selected
    /// relation is marked in `relations` and each member in `rel_nodes`,
    /// `rel_ways` or `rel_relations` according to its kind.
    pub fn mark(primitive: &Primitive, marks: &mut IndexMarks) -> bool {
        if !Self::selects(primitive) {
            return false;
        }
        match primitive {
            Primitive::Node(node) => {
                marks.get_mut(MarkKind::Nodes).insert(node.id);
            }
            Primitive::Way(way) => {
                marks.get_mut(MarkKind::Ways).insert(way.id);
                marks
                    .get_mut(MarkKind::WayRefs)
                    .extend(way.node_ids.iter().copied());
            }
            Primitive::Relation(relation) => {
                marks.get_mut(MarkKind::Relations).insert(relation.id);
                for member in &relation.members {
                    let kind = match member.kind {
                        MemberKind::Node => MarkKind::RelNodes,
                        MemberKind::Way => MarkKind::RelWays,
                        MemberKind::Relation => MarkKind::RelRelations,
                    };
                    marks.get_mut(kind).insert(member.id);
                }
            }
        }
        true
    }

    pub(crate) fn run<S>(
        self,
        source: &S,
        stage: Stage,
        marks: &RwLock<IndexMarks>,
    ) -> Result<PassReport, DenormError>
    where
        S: PrimitiveSource + ?Sized,
    {
        let counters = PassCounters::default();
        let counters_ref = &counters;
        stage.run(source, |_| {
            Ok(move |primitive: Primitive| -> Result<(), DenormError> {
                counters_ref.primitive();
                if Self::selects(&primitive) {
                    let mut guard = marks.write().map_err(poisoned)?;
                    Self::mark(&primitive, &mut guard);
                    counters_ref.selected();
                }
                Ok(())
            })
        })?;
        let report = counters.report(PassKind::PrimaryIndex);
        info!("{report}");
        Ok(report)
    }
}

/// Second pass: marks the nodes of every way a relation references.
///
/// Ways precede relations in a sorted extract, so the primary pass cannot
/// know which way nodes relations will need until it has seen them all.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationMemberIndexer;

impl RelationMemberIndexer {
    /// Mark the nodes of `primitive` in `rel_nodes` when it is a way
    /// referenced by a relation, returning whether anything was marked.
    pub fn mark(primitive: &Primitive, marks: &mut IndexMarks) -> bool {
        match primitive {
            Primitive::Way(way) if marks.rel_ways().has(way.id) => {
                marks
                    .get_mut(MarkKind::RelNodes)
                    .extend(way.node_ids.iter().copied());
                true
            }
            Primitive::Node(_) | Primitive::Way(_) | Primitive::Relation(_) => false,
        }
    }

    pub(crate) fn run<S>(
        self,
        source: &S,
        stage: Stage,
        marks: &RwLock<IndexMarks>,
    ) -> Result<PassReport, DenormError>
    where
        S: PrimitiveSource + ?Sized,
    {
        let counters = PassCounters::default();
        let counters_ref = &counters;
        stage.run(source, |_| {
            Ok(move |primitive: Primitive| -> Result<(), DenormError> {
                counters_ref.primitive();
                let Primitive::Way(way) = &primitive else {
                    return Ok(());
                };
                let referenced = marks.read().map_err(poisoned)?.rel_ways().has(way.id);
                if referenced {
                    let mut guard = marks.write().map_err(poisoned)?;
                    Self::mark(&primitive, &mut guard);
                    counters_ref.selected();
                }
                Ok(())
            })
        })?;
        let report = counters.report(PassKind::RelationMemberIndex);
        info!("{report}");
        Ok(report)
    }
}
