//! Tests for class-based selectors and the in-memory document

use crate::dom::{CssSelector, Document, MemoryDocument, Rect};
use crate::ProbeError;

#[test]
fn test_parse_compound_and_descendant_selectors() {
    let selector = CssSelector::parse("button.btn-lg.relative").unwrap();
    assert_eq!(selector.compounds().len(), 1);
    assert_eq!(selector.compounds()[0].tag.as_deref(), Some("button"));
    assert_eq!(selector.compounds()[0].classes, vec!["btn-lg", "relative"]);

    let nested = CssSelector::parse("div.tooltip.ml-auto  button").unwrap();
    assert_eq!(nested.compounds().len(), 2);
    assert_eq!(nested.as_str(), "div.tooltip.ml-auto  button");

    let class_only = CssSelector::parse(".maplibregl-interactive").unwrap();
    assert!(class_only.compounds()[0].tag.is_none());
}

#[test]
fn test_unsupported_selectors_are_rejected() {
    for bad in ["", "   ", "div > button", "#id", "a..b", "button[type]"] {
        assert!(
            matches!(CssSelector::parse(bad), Err(ProbeError::InvalidSelector(_))),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_query_selector_matches_classes_as_a_subset() {
    let doc = MemoryDocument::new();
    doc.append(None, "div", &["map"], Rect::default());
    let canvas = doc.append(
        None,
        "canvas",
        &["maplibregl-canvas", "maplibregl-interactive"],
        Rect::new(0.0, 64.0, 1280.0, 720.0),
    );

    let found = doc
        .query_selector(&CssSelector::parse(".maplibregl-interactive").unwrap())
        .expect("canvas should match");
    assert_eq!(found.tag_name(), "CANVAS");
    assert_eq!(found.bounding_client_rect().top, 64.0);

    assert!(doc
        .query_selector(&CssSelector::parse("div.maplibregl-interactive").unwrap())
        .is_none());
    assert!(doc.contains(&canvas));
}

#[test]
fn test_descendant_selector_requires_ancestor() {
    let doc = MemoryDocument::new();
    doc.append(None, "button", &["outside"], Rect::default());
    let tooltip = doc.append(None, "div", &["tooltip", "ml-auto"], Rect::default());
    let wrapper = doc.append(Some(&tooltip), "span", &[], Rect::default());
    doc.append(Some(&wrapper), "button", &["inside"], Rect::default());

    let selector = CssSelector::parse("div.tooltip button").unwrap();
    let found = doc.query_selector(&selector).unwrap();
    found.click().unwrap();
    assert_eq!(doc.events()[0].target, "button.inside");

    let container = doc
        .query_selector(&CssSelector::parse("div.tooltip.ml-auto").unwrap())
        .unwrap();
    assert!(container
        .query_selector(&CssSelector::parse("button").unwrap())
        .is_some());
}

#[test]
fn test_removed_nodes_are_not_found() {
    let doc = MemoryDocument::new();
    let button = doc.append(None, "button", &["btn-lg", "relative"], Rect::default());
    let selector = CssSelector::parse("button.btn-lg.relative").unwrap();
    assert!(doc.query_selector(&selector).is_some());

    assert!(doc.remove(&button));
    assert!(doc.query_selector(&selector).is_none());
    assert!(!doc.remove(&button));
}
