//! Introspection behavior across assembled and live pipelines.

use std::sync::Arc;

use rivulet::scan::GenericAttr;
use rivulet::{Attr, AttrValue, Flow, Scan, StageRef};

static REGION: GenericAttr = GenericAttr::new("region", "global");

#[test]
fn unavailable_sentinel_has_no_answers() {
    let stage = StageRef::unavailable();
    assert!(!stage.is_scan_available());
    assert!(stage.scan(&Attr::Terminated).is_none());
    assert_eq!(stage.parents().count(), 0);
    assert_eq!(stage.actuals().count(), 0);
    assert_eq!(stage.tags(), Vec::<String>::new());
    assert_eq!(stage.name(), "unknown");
}

#[test]
fn generic_default_beats_caller_fallback() {
    let flow = Flow::range(0, 1);
    assert_eq!(
        flow.scan_or_default(&REGION.key(), AttrValue::Str("bar".into()))
            .as_str(),
        Some("global")
    );
}

#[test]
fn tags_accumulate_along_the_assembly_chain() {
    let flow = Flow::range(0, 8)
        .tagged(["1", "One", "Common"])
        .map(|v| v + 1)
        .tagged(["2", "Two", "Common"]);
    assert_eq!(flow.tags(), vec!["2", "Two", "Common", "1", "One"]);
}

#[test]
fn name_defers_to_nearest_named_ancestor() {
    let flow = Flow::range(0, 8).named_as("ranged").hide().map(|v| v * 2);
    assert_eq!(flow.name(), "ranged");

    // A closer name shadows the ancestor's.
    let renamed = flow.named_as("doubled");
    assert_eq!(renamed.name(), "doubled");
}

#[test]
fn unnamed_chain_answers_unknown() {
    let flow = Flow::range(0, 8).map(|v| v * 2).hide();
    assert_eq!(flow.name(), "unknown");
}

#[test]
fn parents_walk_the_assembly_chain() {
    let flow = Flow::range(0, 8).map(|v| v + 1).filter(|v| v % 2 == 0).hide();
    // hide -> filter -> map -> iter source
    assert_eq!(flow.parents().count(), 3);
}

#[test]
fn live_chain_is_walkable_from_the_terminal_stage() {
    let handle = Flow::range(0, 4).map(|v| v + 1).subscribe(|_| {});
    let stage = handle.stage();
    // lambda -> map stage -> iter stage
    let parents: Vec<StageRef> = stage.parents().collect();
    assert_eq!(parents.len(), 2);
    // The source stage saw the terminal.
    let source = parents.last().unwrap();
    assert_eq!(source.scan(&Attr::Terminated).and_then(|v| v.as_bool()), Some(true));
    // The source's downstream walk leads back to the terminal stage.
    assert!(source.actuals().count() >= 1);
    assert_eq!(
        handle.stage().scan(&Attr::Terminated).and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[test]
fn buffered_default_applies_to_plain_stages() {
    let flow = Flow::range(0, 4).map(|v| v + 1);
    assert_eq!(flow.scan(&Attr::Buffered).and_then(|v| v.as_int()), Some(0));
    assert_eq!(
        flow.scan(&Attr::RequestedFromDownstream).and_then(|v| v.as_long()),
        Some(0)
    );
    assert!(flow.scan(&Attr::Cancelled).is_none());
}
