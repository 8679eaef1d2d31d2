//! Tests for diff.rs: record shapes, array handling, replay.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use syncable_core::diff::{apply_diff, apply_diffs, diff};
use syncable_core::{ArrayItem, Diff, DiffError, PathSegment};

fn key(key: &str) -> PathSegment {
    PathSegment::Key(key.to_string())
}

// ── diff ────────────────────────────────────────────────────────

#[test]
fn equal_values_have_no_diff() {
    let value = json!({"brief": "x", "tags": [1, 2], "meta": {"a": null}});
    assert!(diff(&value, &value).is_empty());
}

#[test]
fn edited_field() {
    let diffs = diff(&json!({"brief": "x"}), &json!({"brief": "y"}));

    assert_eq!(
        diffs,
        vec![Diff::Edited {
            path: vec![key("brief")],
            lhs: json!("x"),
            rhs: json!("y"),
        }]
    );
}

#[test]
fn new_and_deleted_fields() {
    let diffs = diff(&json!({"a": 1}), &json!({"b": 2}));

    assert_eq!(
        diffs,
        vec![
            Diff::Deleted {
                path: vec![key("a")],
                lhs: json!(1),
            },
            Diff::New {
                path: vec![key("b")],
                rhs: json!(2),
            },
        ]
    );
}

#[test]
fn nested_paths() {
    let diffs = diff(&json!({"meta": {"owner": "alice"}}), &json!({"meta": {"owner": "bob"}}));

    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].path(), &[key("meta"), key("owner")]);
    assert_eq!(diffs[0].field(), Some("meta"));
}

#[test]
fn type_change_is_an_edit() {
    let diffs = diff(&json!({"value": [1]}), &json!({"value": {"0": 1}}));

    assert_eq!(
        diffs,
        vec![Diff::Edited {
            path: vec![key("value")],
            lhs: json!([1]),
            rhs: json!({"0": 1}),
        }]
    );
}

#[test]
fn array_additions_are_ascending() {
    let diffs = diff(&json!({"tags": ["a"]}), &json!({"tags": ["a", "b", "c"]}));

    assert_eq!(
        diffs,
        vec![
            Diff::Array {
                path: vec![key("tags")],
                index: 1,
                item: ArrayItem::New { rhs: json!("b") },
            },
            Diff::Array {
                path: vec![key("tags")],
                index: 2,
                item: ArrayItem::New { rhs: json!("c") },
            },
        ]
    );
}

#[test]
fn array_removals_are_descending() {
    let diffs = diff(&json!({"tags": ["a", "b", "c"]}), &json!({"tags": ["z"]}));

    assert_eq!(
        diffs,
        vec![
            Diff::Edited {
                path: vec![key("tags"), PathSegment::Index(0)],
                lhs: json!("a"),
                rhs: json!("z"),
            },
            Diff::Array {
                path: vec![key("tags")],
                index: 2,
                item: ArrayItem::Deleted { lhs: json!("c") },
            },
            Diff::Array {
                path: vec![key("tags")],
                index: 1,
                item: ArrayItem::Deleted { lhs: json!("b") },
            },
        ]
    );
}

// ── Wire shape ──────────────────────────────────────────────────

#[test]
fn serializes_in_deep_diff_shape() {
    let diffs = diff(&json!({"tags": [], "brief": "x"}), &json!({"tags": [1], "brief": "y"}));
    let value = serde_json::to_value(&diffs).unwrap();

    assert_eq!(
        value,
        json!([
            {"kind": "E", "path": ["brief"], "lhs": "x", "rhs": "y"},
            {"kind": "A", "path": ["tags"], "index": 0, "item": {"kind": "N", "rhs": 1}},
        ])
    );
}

#[test]
fn deserializes_mixed_path_segments() {
    let diff: Diff = serde_json::from_value(json!({
        "kind": "D",
        "path": ["items", 3, "name"],
        "lhs": "old",
    }))
    .unwrap();

    assert_eq!(diff.path(), &[key("items"), PathSegment::Index(3), key("name")]);
}

// ── apply ───────────────────────────────────────────────────────

#[test]
fn apply_reproduces_target() {
    let lhs = json!({"brief": "x", "tags": ["a", "b"], "meta": {"n": 1}});
    let rhs = json!({"brief": "y", "tags": ["a"], "extra": true, "meta": {"n": 2, "m": [1]}});

    let mut value = lhs.clone();
    apply_diffs(&mut value, &diff(&lhs, &rhs)).unwrap();

    assert_eq!(value, rhs);
}

#[test]
fn apply_to_missing_parent_fails() {
    let mut value = json!({"brief": "x"});
    let record = Diff::New {
        path: vec![key("meta"), key("owner")],
        rhs: json!("alice"),
    };

    assert_eq!(
        apply_diff(&mut value, &record),
        Err(DiffError::InvalidPath("meta".to_string()))
    );
    assert_eq!(value, json!({"brief": "x"}));
}

#[test]
fn apply_deleting_absent_key_fails() {
    let mut value = json!({});
    let record = Diff::Deleted {
        path: vec![key("brief")],
        lhs: json!("x"),
    };

    assert!(matches!(
        apply_diff(&mut value, &record),
        Err(DiffError::InvalidPath(_))
    ));
}

#[test]
fn apply_array_item_out_of_bounds_fails() {
    let mut value = json!({"tags": []});
    let record = Diff::Array {
        path: vec![key("tags")],
        index: 3,
        item: ArrayItem::Deleted { lhs: json!("a") },
    };

    assert_eq!(
        apply_diff(&mut value, &record),
        Err(DiffError::IndexOutOfBounds {
            path: "tags".to_string(),
            index: 3,
        })
    );
}

// ── Properties ──────────────────────────────────────────────────

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c]", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn replaying_diff_reproduces_rhs(lhs in json_value(), rhs in json_value()) {
        let mut value = lhs.clone();
        apply_diffs(&mut value, &diff(&lhs, &rhs)).unwrap();
        prop_assert_eq!(value, rhs);
    }

    #[test]
    fn self_diff_is_empty(value in json_value()) {
        prop_assert!(diff(&value, &value).is_empty());
    }
}
