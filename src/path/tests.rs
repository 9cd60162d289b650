use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Value};

use super::*;

#[test]
fn flatten_nested() {
    let flat = flatten(&json!({
        "count": 3,
        "user": { "name": "ann", "tags": ["a", "b"], "address": { "zip": null } },
    }));
    let expected: FlatState = [
        ("count", json!(3)),
        ("user.address.zip", Value::Null),
        ("user.name", json!("ann")),
        ("user.tags", json!(["a", "b"])),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect();
    assert_eq!(flat, expected);
}

#[test]
fn arrays_are_atomic() {
    let flat = flatten(&json!({ "items": [{ "id": 1 }, { "id": 2 }] }));
    assert_eq!(flat.len(), 1);
    assert_eq!(flat["items"], json!([{ "id": 1 }, { "id": 2 }]));
}

#[rstest]
#[case(json!({}))]
#[case(json!({ "a": 1 }))]
#[case(json!({ "a": { "b": { "c": [1, 2, { "d": 3 }] } }, "e": "x" }))]
#[case(json!({ "empty": {}, "n": null, "f": 1.5, "t": true }))]
#[case(json!({ "modal": { "id": 5, "detail": { "title": "t", "body": [] } } }))]
#[case(json!({ "": 1 }))]
#[case(json!({ "a.b": 1, "a": { "b": 2, "": { "c\\d": 3 } } }))]
#[case(json!({ "\\0": 1, "0": 2 }))]
fn round_trip(#[case] value: Value) {
    let flat = flatten(&value);
    assert_eq!(unflatten(&flat), value);
    assert_eq!(flatten(&unflatten(&flat)), flat);
}

#[test]
fn keys_with_path_syntax_are_escaped() {
    let flat = flatten(&json!({ "": 1, "a.b": 2, "c": { "": 3, "d\\e": 4 } }));
    let paths: Vec<_> = flat.keys().map(String::as_str).collect();
    assert_eq!(paths, [r"\0", r"a\.b", r"c.\0", r"c.d\\e"]);

    let value = json!({ "a.b": { "c": 1 } });
    assert_eq!(get_path(&value, r"a\.b.c"), Some(&json!(1)));
    assert_eq!(get_path(&value, "a.b.c"), None);
    assert_eq!(top_level(r"a\.b.c"), r"a\.b");
    let items: Vec<_> = ancestors(r"a\.b.c").collect();
    assert_eq!(items, [r"a\.b", r"a\.b.c"]);
    let keys: Vec<_> = segments(r"a\.b.\0").collect();
    assert_eq!(keys, ["a.b", ""]);
}

#[test]
fn non_object_root_has_no_leaves() {
    assert!(flatten(&json!(5)).is_empty());
    assert!(flatten(&Value::Null).is_empty());
}

#[test]
fn empty_path_never_replaces_the_root() {
    let mut value = json!({ "a": 1 });
    set_path(&mut value, "", json!(5));
    assert_eq!(value, json!({ "a": 1 }));
    assert_eq!(remove_path(&mut value, ""), None);
    assert_eq!(get_path(&value, ""), Some(&json!({ "a": 1 })));
}

#[test]
fn unflatten_deeper_path_wins() {
    let flat: FlatState = [("a".to_owned(), json!(1)), ("a.b".to_owned(), json!(2))]
        .into_iter()
        .collect();
    assert_eq!(unflatten(&flat), json!({ "a": { "b": 2 } }));
}

#[test]
fn get_and_set_path() {
    let mut value = json!({ "a": { "b": 1 } });
    assert_eq!(get_path(&value, "a.b"), Some(&json!(1)));
    assert_eq!(get_path(&value, "a.c"), None);
    assert_eq!(get_path(&value, "a.b.c"), None);

    set_path(&mut value, "a.c.d", json!("x"));
    set_path(&mut value, "a.b.e", json!(true));
    assert_eq!(value, json!({ "a": { "b": { "e": true }, "c": { "d": "x" } } }));
}

#[test]
fn remove_path_nested() {
    let mut value = json!({ "a": { "b": 1, "c": 2 } });
    assert_eq!(remove_path(&mut value, "a.b"), Some(json!(1)));
    assert_eq!(remove_path(&mut value, "a.x"), None);
    let mut dotted = json!({ "a.b": 1, "a": { "b": 2 } });
    assert_eq!(remove_path(&mut dotted, r"a\.b"), Some(json!(1)));
    assert_eq!(dotted, json!({ "a": { "b": 2 } }));
    assert_eq!(value, json!({ "a": { "c": 2 } }));
}

#[test]
fn ancestors_shortest_first() {
    let items: Vec<_> = ancestors("a.b.c").collect();
    assert_eq!(items, ["a", "a.b", "a.b.c"]);
    let items: Vec<_> = ancestors("a").collect();
    assert_eq!(items, ["a"]);
}

#[rstest]
#[case("modal", "modal", true)]
#[case("modal", "modal.title", true)]
#[case("modal.title", "modal", true)]
#[case("modal", "modal_phase", false)]
#[case("a.b", "a.c", false)]
fn touches_cases(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
    assert_eq!(touches(a, b), expected);
}

#[test]
fn top_level_segment() {
    assert_eq!(top_level("user.name"), "user");
    assert_eq!(top_level("count"), "count");
    assert!(is_nested("user.name"));
    assert!(!is_nested(r"user\.name"));
}
