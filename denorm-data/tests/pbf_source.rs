//! Decoding of PBF fixtures into primitives.

use std::ops::ControlFlow;

use camino::Utf8PathBuf;
use denorm_core::{MemberKind, Primitive, PrimitiveSource};
use denorm_data::PbfSource;
use rstest::{fixture, rstest};

mod support;

use support::{assert_close, decode_fixture, utf8_path};

#[fixture]
fn fixtures_dir() -> Utf8PathBuf {
    support::fixtures_dir()
}

fn collect(source: &PbfSource) -> Vec<Primitive> {
    let mut primitives = Vec::new();
    source
        .for_each_primitive(&mut |primitive| {
            primitives.push(primitive);
            ControlFlow::Continue(())
        })
        .expect("stream fixture");
    primitives
}

#[rstest]
fn streams_primitives_in_file_order(fixtures_dir: Utf8PathBuf) {
    let fixture = decode_fixture(&fixtures_dir, "multipolygon");
    let primitives = collect(&PbfSource::new(utf8_path(&fixture)));

    let kinds: Vec<_> = primitives.iter().map(|p| (p.kind(), p.id())).collect();
    assert_eq!(
        kinds,
        vec![
            (MemberKind::Node, 1),
            (MemberKind::Node, 2),
            (MemberKind::Node, 3),
            (MemberKind::Node, 4),
            (MemberKind::Way, 10),
            (MemberKind::Relation, 100),
        ]
    );
}

#[rstest]
fn decodes_coordinates_tags_and_members(fixtures_dir: Utf8PathBuf) {
    let fixture = decode_fixture(&fixtures_dir, "multipolygon");
    let primitives = collect(&PbfSource::new(utf8_path(&fixture)));

    let Some(Primitive::Node(label)) = primitives.get(3) else {
        panic!("expected the label node fourth");
    };
    assert_close(label.lat(), 52.505);
    assert_close(label.lon(), 13.405);
    assert_eq!(label.tags.get("amenity").map(String::as_str), Some("bench"));

    let Some(Primitive::Way(ring)) = primitives.get(4) else {
        panic!("expected the ring way fifth");
    };
    assert_eq!(ring.node_ids, vec![1, 2, 3, 1]);
    assert!(ring.tags.is_empty());

    let Some(Primitive::Relation(relation)) = primitives.get(5) else {
        panic!("expected the relation last");
    };
    let members: Vec<_> = relation
        .members
        .iter()
        .map(|member| (member.kind, member.id, member.role.as_str()))
        .collect();
    assert_eq!(
        members,
        vec![(MemberKind::Way, 10, "outer"), (MemberKind::Node, 4, "label")]
    );
}

#[rstest]
fn stops_when_the_visitor_breaks(fixtures_dir: Utf8PathBuf) {
    let fixture = decode_fixture(&fixtures_dir, "street");
    let source = PbfSource::new(utf8_path(&fixture));
    let mut seen = 0;
    source
        .for_each_primitive(&mut |_| {
            seen += 1;
            ControlFlow::Break(())
        })
        .expect("stream fixture");
    assert_eq!(seen, 1);
}

#[rstest]
fn every_pass_starts_from_the_beginning(fixtures_dir: Utf8PathBuf) {
    let fixture = decode_fixture(&fixtures_dir, "street");
    let source = PbfSource::new(utf8_path(&fixture));
    assert_eq!(collect(&source).len(), 3);
    assert_eq!(collect(&source).len(), 3);
}
