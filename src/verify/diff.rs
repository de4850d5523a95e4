// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field-level JSON diff over flattened dotted paths.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Expected (primary-derived) versus actual (stored) value of one field.
///
/// `None` means the path is absent on that side, which is distinct from a
/// stored `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDrift {
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

/// Flatten nested objects into `a.b.c` paths.
///
/// Arrays, scalars and empty objects are leaves.
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    match value {
        Value::Object(map) if !map.is_empty() => flatten_into(map, "", &mut out),
        other => {
            out.insert(String::new(), other.clone());
        }
    }
    out
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_into(nested, &path, out),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

/// Every path whose values differ, including paths present on one side only.
pub fn diff(expected: &Value, actual: &Value) -> BTreeMap<String, FieldDrift> {
    let expected = flatten(expected);
    let mut actual = flatten(actual);
    let mut drift = BTreeMap::new();

    for (path, want) in expected {
        let got = actual.remove(&path);
        if got.as_ref() != Some(&want) {
            drift.insert(path, FieldDrift { expected: Some(want), actual: got });
        }
    }
    for (path, got) in actual {
        drift.insert(path, FieldDrift { expected: None, actual: Some(got) });
    }
    drift
}
