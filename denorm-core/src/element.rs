//! Primitive and element model.
//!
//! A [`Primitive`] is one record as decoded from the input: a node, a way or
//! a relation that refers to other primitives only by id. An [`Element`] is
//! a primitive after denormalization, carrying the resolved children in the
//! same order as the references they replace.

use std::collections::BTreeMap;

use geo::Coord;
use serde::{Deserialize, Serialize};

/// OpenStreetMap-style free-form key/value tags.
pub type Tags = BTreeMap<String, String>;

/// A point with tags.
///
/// Coordinates are WGS84 with `x = longitude` and `y = latitude`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Primitive identifier.
    pub id: i64,
    /// Geospatial position.
    pub location: Coord<f64>,
    /// Tags attached to the node.
    pub tags: Tags,
}

impl Node {
    /// Construct a node from latitude and longitude in degrees.
    ///
    /// # Examples
    /// ```
    /// use denorm_core::{Node, Tags};
    ///
    /// let node = Node::new(1, 52.5, 13.4, Tags::new());
    /// assert_eq!(node.lat(), 52.5);
    /// assert_eq!(node.lon(), 13.4);
    /// ```
    #[must_use]
    pub const fn new(id: i64, lat: f64, lon: f64, tags: Tags) -> Self {
        Self {
            id,
            location: Coord { x: lon, y: lat },
            tags,
        }
    }

    /// Latitude in degrees.
    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.location.y
    }

    /// Longitude in degrees.
    #[must_use]
    pub const fn lon(&self) -> f64 {
        self.location.x
    }
}

/// An ordered list of node references with tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Way {
    /// Primitive identifier.
    pub id: i64,
    /// Tags attached to the way.
    pub tags: Tags,
    /// Referenced node ids in drawing order.
    pub node_ids: Vec<i64>,
}

/// Kind of primitive a relation member refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    /// The member is a node.
    Node,
    /// The member is a way.
    Way,
    /// The member is another relation.
    Relation,
}

/// One `(type, id, role)` entry of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Kind of the referenced primitive.
    pub kind: MemberKind,
    /// Identifier of the referenced primitive.
    pub id: i64,
    /// Role declared by the relation, possibly empty.
    pub role: String,
}

impl Member {
    /// Construct a member reference.
    pub fn new(kind: MemberKind, id: i64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }
}

/// An ordered list of member references with tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Primitive identifier.
    pub id: i64,
    /// Tags attached to the relation.
    pub tags: Tags,
    /// Members in declaration order.
    pub members: Vec<Member>,
}

impl Relation {
    /// Number of members whose kind is `kind`.
    #[must_use]
    pub fn count_members(&self, kind: MemberKind) -> usize {
        self.members
            .iter()
            .filter(|member| member.kind == kind)
            .count()
    }
}

/// A decoded primitive of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    /// A node record.
    Node(Node),
    /// A way record.
    Way(Way),
    /// A relation record.
    Relation(Relation),
}

impl Primitive {
    /// Identifier of the wrapped primitive.
    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Node(node) => node.id,
            Self::Way(way) => way.id,
            Self::Relation(relation) => relation.id,
        }
    }

    /// Kind of the wrapped primitive.
    #[must_use]
    pub const fn kind(&self) -> MemberKind {
        match self {
            Self::Node(_) => MemberKind::Node,
            Self::Way(_) => MemberKind::Way,
            Self::Relation(_) => MemberKind::Relation,
        }
    }

    /// Tags of the wrapped primitive.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        match self {
            Self::Node(node) => &node.tags,
            Self::Way(way) => &way.tags,
            Self::Relation(relation) => &relation.tags,
        }
    }

    /// Whether the primitive carries at least one tag.
    #[must_use]
    pub fn is_tagged(&self) -> bool {
        !self.tags().is_empty()
    }
}

impl From<Node> for Primitive {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Way> for Primitive {
    fn from(way: Way) -> Self {
        Self::Way(way)
    }
}

impl From<Relation> for Primitive {
    fn from(relation: Relation) -> Self {
        Self::Relation(relation)
    }
}

/// A denormalized primitive with its resolved children.
///
/// Ways carry one child node per reference; relations carry one child per
/// resolved member, each labelled with the role its parent declared.
///
/// # Examples
/// ```
/// use denorm_core::{Element, Node, Primitive, Tags, Way};
///
/// let way = Way {
///     id: 7,
///     tags: Tags::from([("highway".into(), "residential".into())]),
///     node_ids: vec![1, 2],
/// };
/// let element = Element::new(Primitive::Way(way)).with_children(vec![
///     Element::new(Primitive::Node(Node::new(1, 1.0, 2.0, Tags::new()))),
///     Element::new(Primitive::Node(Node::new(2, 3.0, 4.0, Tags::new()))),
/// ]);
///
/// let coords: Vec<_> = element.locations().collect();
/// assert_eq!(coords.len(), 2);
/// assert_eq!(coords[0].y, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// The primitive as decoded.
    pub primitive: Primitive,
    /// Role declared by the parent relation, when this element is a member.
    pub role: Option<String>,
    /// Resolved children in reference order.
    pub children: Vec<Self>,
}

impl Element {
    /// Wrap a primitive without children or role.
    #[must_use]
    pub const fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            role: None,
            children: Vec::new(),
        }
    }

    /// Attach resolved children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Self>) -> Self {
        self.children = children;
        self
    }

    /// Label the element with the role declared by its parent.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Identifier of the underlying primitive.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.primitive.id()
    }

    /// Kind of the underlying primitive.
    #[must_use]
    pub const fn kind(&self) -> MemberKind {
        self.primitive.kind()
    }

    /// Tags of the underlying primitive.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        self.primitive.tags()
    }

    /// Coordinates of this element's node children in order, or its own
    /// location for a node.
    pub fn locations(&self) -> impl Iterator<Item = Coord<f64>> + '_ {
        self.own_location()
            .into_iter()
            .chain(self.children.iter().filter_map(Self::own_location))
    }

    const fn own_location(&self) -> Option<Coord<f64>> {
        match &self.primitive {
            Primitive::Node(node) => Some(node.location),
            Primitive::Way(_) | Primitive::Relation(_) => None,
        }
    }

    /// Whether a resolved way describes a closed ring.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let Primitive::Way(way) = &self.primitive else {
            return false;
        };
        way.node_ids.len() > 2 && way.node_ids.first() == way.node_ids.last()
    }

    /// Whether the element should be read as an area rather than a line.
    ///
    /// Ways count as areas when tagged `area=yes`, unless they also carry a
    /// `highway` or `barrier` tag. Relations count as areas when they are
    /// multipolygons or boundaries.
    #[must_use]
    pub fn is_area(&self) -> bool {
        match &self.primitive {
            Primitive::Node(_) => false,
            Primitive::Way(way) => {
                way.tags.get("area").is_some_and(|value| value == "yes")
                    && !way.tags.contains_key("highway")
                    && !way.tags.contains_key("barrier")
            }
            Primitive::Relation(relation) => relation
                .tags
                .get("type")
                .is_some_and(|value| value == "multipolygon" || value == "boundary"),
        }
    }
}
