//! Streaming primitives out of OSM PBF files.

use std::ops::ControlFlow;

use camino::{Utf8Path, Utf8PathBuf};
use denorm_core::{
    Member, MemberKind, Node, Primitive, PrimitiveSource, Relation, SourceError, Tags, Way,
};
use osmpbf::{BlobDecode, BlobReader, Element, RelMemberType};

/// A PBF file opened anew for every pass.
///
/// Blobs are decoded sequentially on the calling thread, so the reader is
/// never shared between threads.
///
/// # Examples
///
/// ```rust,no_run
/// use std::ops::ControlFlow;
/// use denorm_core::PrimitiveSource;
/// use denorm_data::PbfSource;
///
/// let source = PbfSource::new("extract.osm.pbf");
/// let mut count = 0_u64;
/// source.for_each_primitive(&mut |_| {
///     count += 1;
///     ControlFlow::Continue(())
/// })?;
/// # Ok::<(), denorm_core::SourceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbfSource {
    path: Utf8PathBuf,
}

impl PbfSource {
    /// Stream the file at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the input file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn decode_error(&self, source: osmpbf::Error) -> SourceError {
        SourceError::Decode {
            path: self.path.clone(),
            source: Box::new(source),
        }
    }
}

impl PrimitiveSource for PbfSource {
    fn for_each_primitive(
        &self,
        visit: &mut dyn FnMut(Primitive) -> ControlFlow<()>,
    ) -> Result<(), SourceError> {
        let reader = BlobReader::from_path(self.path.as_std_path()).map_err(|source| {
            SourceError::Open {
                path: self.path.clone(),
                source: Box::new(source),
            }
        })?;

        for blob in reader {
            let blob = blob.map_err(|source| self.decode_error(source))?;
            let BlobDecode::OsmData(block) =
                blob.decode().map_err(|source| self.decode_error(source))?
            else {
                continue;
            };
            for element in block.elements() {
                let primitive = convert(element).map_err(|source| self.decode_error(source))?;
                if visit(primitive).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

fn collect_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> Tags {
    tags.map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

fn make_node<'a>(
    id: i64,
    lat: f64,
    lon: f64,
    tags: impl Iterator<Item = (&'a str, &'a str)>,
) -> Primitive {
    Primitive::Node(Node::new(id, lat, lon, collect_tags(tags)))
}

fn convert(element: Element<'_>) -> Result<Primitive, osmpbf::Error> {
    let primitive = match element {
        Element::Node(node) => make_node(node.id(), node.lat(), node.lon(), node.tags()),
        Element::DenseNode(node) => make_node(node.id(), node.lat(), node.lon(), node.tags()),
        Element::Way(way) => Primitive::Way(Way {
            id: way.id(),
            tags: collect_tags(way.tags()),
            node_ids: way.refs().collect(),
        }),
        Element::Relation(relation) => {
            let members = relation
                .members()
                .map(|member| {
                    let kind = match member.member_type {
                        RelMemberType::Node => MemberKind::Node,
                        RelMemberType::Way => MemberKind::Way,
                        RelMemberType::Relation => MemberKind::Relation,
                    };
                    Ok(Member::new(kind, member.member_id, member.role()?))
                })
                .collect::<Result<Vec<_>, osmpbf::Error>>()?;
            Primitive::Relation(Relation {
                id: relation.id(),
                tags: collect_tags(relation.tags()),
                members,
            })
        }
    };
    Ok(primitive)
}
