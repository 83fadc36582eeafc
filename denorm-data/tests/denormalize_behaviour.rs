//! Behavioural tests for a full denormalization run over PBF input.

use camino::Utf8PathBuf;
use denorm_core::{Element, MemberKind, Primitive};
use denorm_data::{DenormError, Parser, ParserConfig, PbfSource};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::{cell::RefCell, fs};
use tempfile::{TempDir, TempPath};

mod support;

use support::{assert_close, decode_fixture, utf8_path};

type Outcome = Result<Vec<Element>, DenormError>;

#[fixture]
fn fixtures_dir() -> Utf8PathBuf {
    support::fixtures_dir()
}

enum FixtureTarget {
    Existing(TempPath),
    Missing(Utf8PathBuf),
}

impl FixtureTarget {
    fn path(&self) -> Utf8PathBuf {
        match self {
            FixtureTarget::Existing(temp) => utf8_path(temp),
            FixtureTarget::Missing(path) => path.clone(),
        }
    }
}

#[fixture]
fn target_fixture() -> RefCell<Option<FixtureTarget>> {
    RefCell::new(None)
}

#[fixture]
fn run_outcome() -> RefCell<Option<Outcome>> {
    RefCell::new(None)
}

fn expect_elements(outcome: &RefCell<Option<Outcome>>) -> Vec<Element> {
    outcome
        .borrow()
        .as_ref()
        .expect("denormalization was attempted")
        .as_ref()
        .expect("expected a successful run")
        .clone()
}

fn select(
    target: &RefCell<Option<FixtureTarget>>,
    outcome: &RefCell<Option<Outcome>>,
    selected: FixtureTarget,
) {
    *target.borrow_mut() = Some(selected);
    *outcome.borrow_mut() = None;
}

#[given("a PBF file with a residential street between two untagged nodes")]
fn street_dataset(
    #[from(fixtures_dir)] dir: Utf8PathBuf,
    #[from(target_fixture)] target: &RefCell<Option<FixtureTarget>>,
    #[from(run_outcome)] outcome: &RefCell<Option<Outcome>>,
) {
    let fixture = decode_fixture(&dir, "street");
    select(target, outcome, FixtureTarget::Existing(fixture));
}

#[given("a PBF file with a multipolygon relation and an outer way")]
fn multipolygon_dataset(
    #[from(fixtures_dir)] dir: Utf8PathBuf,
    #[from(target_fixture)] target: &RefCell<Option<FixtureTarget>>,
    #[from(run_outcome)] outcome: &RefCell<Option<Outcome>>,
) {
    let fixture = decode_fixture(&dir, "multipolygon");
    select(target, outcome, FixtureTarget::Existing(fixture));
}

#[given("a path to a missing PBF file")]
fn missing_dataset(
    #[from(fixtures_dir)] dir: Utf8PathBuf,
    #[from(target_fixture)] target: &RefCell<Option<FixtureTarget>>,
    #[from(run_outcome)] outcome: &RefCell<Option<Outcome>>,
) {
    select(
        target,
        outcome,
        FixtureTarget::Missing(dir.join("missing.osm.pbf")),
    );
}

#[given("a path to a file containing invalid PBF data")]
fn invalid_dataset(
    #[from(fixtures_dir)] dir: Utf8PathBuf,
    #[from(target_fixture)] target: &RefCell<Option<FixtureTarget>>,
    #[from(run_outcome)] outcome: &RefCell<Option<Outcome>>,
) {
    let fixture = decode_fixture(&dir, "invalid");
    select(target, outcome, FixtureTarget::Existing(fixture));
}

#[when("I denormalize the PBF file")]
fn denormalize_selected(
    #[from(target_fixture)] target: &RefCell<Option<FixtureTarget>>,
    #[from(run_outcome)] outcome: &RefCell<Option<Outcome>>,
) {
    let path = target
        .borrow()
        .as_ref()
        .expect("target path prepared")
        .path();
    let cache_dir = TempDir::new().expect("create cache dir");
    let config = ParserConfig::default()
        .with_cache_dir(utf8_cache_dir(&cache_dir))
        .with_workers(2)
        .with_batch_size(1);
    let result = Parser::new(PbfSource::new(path), config)
        .and_then(|mut parser| parser.run_collect())
        .map(|(elements, _)| elements);
    *outcome.borrow_mut() = Some(result);
}

fn utf8_cache_dir(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("cache")).expect("utf-8 cache dir")
}

fn find(elements: &[Element], kind: MemberKind, id: i64) -> &Element {
    elements
        .iter()
        .find(|element| element.kind() == kind && element.id() == id)
        .unwrap_or_else(|| panic!("expected {kind:?} {id} among {} elements", elements.len()))
}

#[then("exactly one element is emitted")]
fn single_element(#[from(run_outcome)] outcome: &RefCell<Option<Outcome>>) {
    assert_eq!(
        expect_elements(outcome).len(),
        1,
        "untagged nodes stay hidden"
    );
}

#[then("the street carries both node locations in order")]
fn street_locations(#[from(run_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let elements = expect_elements(outcome);
    let street = find(&elements, MemberKind::Way, 10);
    assert_eq!(
        street.tags().get("name").map(String::as_str),
        Some("Example Street")
    );
    let ids: Vec<_> = street.children.iter().map(Element::id).collect();
    assert_eq!(ids, vec![1, 2]);
    let coords: Vec<_> = street.locations().collect();
    assert_eq!(coords.len(), 2);
    assert_close(coords[0].y, 52.5);
    assert_close(coords[0].x, 13.4);
    assert_close(coords[1].y, 52.501);
    assert_close(coords[1].x, 13.401);
}

#[then("the relation resolves its outer way to a closed ring")]
fn multipolygon_ring(#[from(run_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let elements = expect_elements(outcome);
    let relation = find(&elements, MemberKind::Relation, 100);
    assert!(relation.is_area(), "multipolygons are areas");

    let roles: Vec<_> = relation
        .children
        .iter()
        .map(|child| child.role.as_deref())
        .collect();
    assert_eq!(roles, vec![Some("outer"), Some("label")]);

    let outer = &relation.children[0];
    assert!(matches!(outer.primitive, Primitive::Way(_)));
    assert!(outer.is_closed(), "outer way must close its ring");
    let ring: Vec<_> = outer.locations().collect();
    assert_eq!(ring.len(), 4);
    assert_close(ring[0].x, ring[3].x);
    assert_close(ring[0].y, ring[3].y);
}

#[then("the tagged label node is emitted on its own")]
fn label_node(#[from(run_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let elements = expect_elements(outcome);
    assert_eq!(elements.len(), 2, "one relation and one tagged node");
    let label = find(&elements, MemberKind::Node, 4);
    assert_eq!(label.role, None);
    assert_eq!(
        label.tags().get("amenity").map(String::as_str),
        Some("bench")
    );
}

#[then("an open error is returned")]
fn open_error(#[from(run_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let borrowed = outcome.borrow();
    match borrowed.as_ref().expect("denormalization was attempted") {
        Ok(_) => panic!("expected an error for the missing file"),
        Err(DenormError::Source(denorm_core::SourceError::Open { path, .. })) => {
            assert!(
                path.as_str().ends_with("missing.osm.pbf"),
                "unexpected path in error: {path}"
            );
        }
        Err(other) => panic!("expected an open error, got {other:?}"),
    }
}

#[then("a decode error is returned")]
fn decode_error(#[from(run_outcome)] outcome: &RefCell<Option<Outcome>>) {
    let borrowed = outcome.borrow();
    match borrowed.as_ref().expect("denormalization was attempted") {
        Ok(_) => panic!("expected an error for the invalid data"),
        Err(DenormError::Source(denorm_core::SourceError::Decode { path, source })) => {
            assert_eq!(
                path.extension(),
                Some("pbf"),
                "unexpected path in error: {path}"
            );
            assert!(
                !source.to_string().is_empty(),
                "decode error should preserve the source message"
            );
        }
        Err(other) => panic!("expected a decode error, got {other:?}"),
    }
}

#[test]
fn scenario_indices_follow_feature_order() {
    let feature = Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/features/denormalize_osm_pbf.feature");
    let contents = fs::read_to_string(&feature).unwrap_or_else(|err| {
        panic!("failed to read feature file {feature}: {err}");
    });
    let titles: Vec<String> = contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Scenario: "))
        .map(|title| title.to_owned())
        .collect();
    let expected = [
        "denormalizing a street",
        "denormalizing a multipolygon",
        "reporting a missing file",
        "rejecting a corrupted dataset",
    ];
    assert_eq!(
        titles.len(),
        expected.len(),
        "scenario count changed in feature file: {titles:?}"
    );
    for (index, expected_title) in expected.iter().enumerate() {
        let actual = titles.get(index).map(String::as_str);
        assert_eq!(
            actual,
            Some(*expected_title),
            "scenario at index {index} does not match feature order"
        );
    }
}

#[scenario(path = "tests/features/denormalize_osm_pbf.feature", index = 0)]
fn denormalizing_a_street(
    fixtures_dir: Utf8PathBuf,
    target_fixture: RefCell<Option<FixtureTarget>>,
    run_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (fixtures_dir, target_fixture, run_outcome);
}

#[scenario(path = "tests/features/denormalize_osm_pbf.feature", index = 1)]
fn denormalizing_a_multipolygon(
    fixtures_dir: Utf8PathBuf,
    target_fixture: RefCell<Option<FixtureTarget>>,
    run_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (fixtures_dir, target_fixture, run_outcome);
}

#[scenario(path = "tests/features/denormalize_osm_pbf.feature", index = 2)]
fn reporting_missing_files(
    fixtures_dir: Utf8PathBuf,
    target_fixture: RefCell<Option<FixtureTarget>>,
    run_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (fixtures_dir, target_fixture, run_outcome);
}

#[scenario(path = "tests/features/denormalize_osm_pbf.feature", index = 3)]
fn rejecting_invalid_payloads(
    fixtures_dir: Utf8PathBuf,
    target_fixture: RefCell<Option<FixtureTarget>>,
    run_outcome: RefCell<Option<Outcome>>,
) {
    let _ = (fixtures_dir, target_fixture, run_outcome);
}
