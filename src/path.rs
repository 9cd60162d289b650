//! Dotted-path addressing of nested state snapshots.
//!
//! A nested snapshot is a [`Value::Object`]. Its flat form maps every leaf to
//! the dotted path that reaches it. Arrays, scalars, `null` and empty objects
//! are leaves; only non-empty objects are descended into.
//!
//! Object keys are escaped when they become path segments: `.` and `\` are
//! prefixed with `\`, and the empty key is written as `\0`. A key such as
//! `"a.b"` therefore maps to the path `a\.b`, never to `b` nested in `a`.

use std::{borrow::Cow, collections::BTreeMap};

use serde_json::{Map, Value};

#[cfg(test)]
mod tests;

/// Flat mapping from dotted path to leaf value.
pub type FlatState = BTreeMap<String, Value>;

const EMPTY_KEY: &str = "\\0";

/// Flattens a nested snapshot into dotted paths.
///
/// A non-object root has no leaves.
pub fn flatten(value: &Value) -> FlatState {
    let mut flat = FlatState::new();
    if let Value::Object(map) = value {
        for (key, value) in map {
            flatten_into(escape_key(key).into_owned(), value, &mut flat);
        }
    }
    flat
}

/// Flattens `value` under `prefix`, appending the leaves to `flat`.
///
/// `prefix` is a path, not a key; it is used as is.
pub fn flatten_into(prefix: String, value: &Value, flat: &mut FlatState) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, value) in map {
                flatten_into(join(&prefix, key), value, flat);
            }
        }
        value => {
            flat.insert(prefix, value.clone());
        }
    }
}

/// Rebuilds a nested snapshot from dotted paths.
///
/// Paths are applied in sorted order, so a deeper path replaces a scalar
/// stored at one of its prefixes.
pub fn unflatten(flat: &FlatState) -> Value {
    let mut root = Value::Object(Map::new());
    for (path, value) in flat {
        set_path(&mut root, path, value.clone());
    }
    root
}

/// The path segment naming the object key `key`.
pub fn escape_key(key: &str) -> Cow<'_, str> {
    if key.is_empty() {
        return Cow::Borrowed(EMPTY_KEY);
    }
    if !key.contains(['.', '\\']) {
        return Cow::Borrowed(key);
    }
    let mut escaped = String::with_capacity(key.len() + 1);
    for c in key.chars() {
        if c == '.' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}

/// The object keys along `path`.
pub fn segments(path: &str) -> impl Iterator<Item = Cow<'_, str>> {
    raw_segments(path).map(unescape)
}

/// Looks up the value at `path`. The empty path is the root.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    segments(path).try_fold(value, |value, key| value.as_object()?.get(key.as_ref()))
}

/// Stores `new_value` at `path`, creating (or replacing non-object values
/// with) intermediate objects as needed.
///
/// The empty path is ignored; the root is never replaced.
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    if path.is_empty() {
        return;
    }
    let mut current = value;
    let mut keys = segments(path).peekable();
    while let Some(key) = keys.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if keys.peek().is_none() {
            map.insert(key.into_owned(), new_value);
            return;
        }
        current = map
            .entry(key.into_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Removes the value at `path`, returning it.
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return None;
    }
    let (parent, key) = match separators(path).last() {
        Some(index) => (get_path_mut(value, &path[..index])?, &path[index + 1..]),
        None => (value, path),
    };
    parent.as_object_mut()?.remove(unescape(key).as_ref())
}

fn get_path_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    segments(path).try_fold(value, |value, key| value.as_object_mut()?.get_mut(key.as_ref()))
}

/// Every dotted prefix of `path`, shortest first, ending with `path` itself.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    separators(path)
        .map(move |index| &path[..index])
        .chain(std::iter::once(path))
}

/// The first segment of `path`.
pub fn top_level(path: &str) -> &str {
    separators(path).next().map_or(path, |index| &path[..index])
}

/// Returns `true` if `a` and `b` name the same location or one contains the other.
pub fn touches(a: &str, b: &str) -> bool {
    is_prefix(a, b) || is_prefix(b, a)
}

fn is_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Returns `true` if `path` has more than one segment.
pub fn is_nested(path: &str) -> bool {
    separators(path).next().is_some()
}

pub(crate) fn join(prefix: &str, key: &str) -> String {
    let key = escape_key(key);
    if prefix.is_empty() {
        key.into_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Byte offsets of the unescaped `.` separators in `path`.
fn separators(path: &str) -> impl Iterator<Item = usize> + '_ {
    let mut escaped = false;
    path.char_indices().filter_map(move |(index, c)| {
        let is_separator = !escaped && c == '.';
        escaped = !escaped && c == '\\';
        is_separator.then_some(index)
    })
}

fn raw_segments(path: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    separators(path)
        .chain(std::iter::once(path.len()))
        .map(move |end| {
            let segment = &path[start..end];
            start = end + 1;
            segment
        })
}

fn unescape(segment: &str) -> Cow<'_, str> {
    if segment == EMPTY_KEY {
        return Cow::Borrowed("");
    }
    if !segment.contains('\\') {
        return Cow::Borrowed(segment);
    }
    let mut key = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => key.extend(chars.next()),
            c => key.push(c),
        }
    }
    Cow::Owned(key)
}
