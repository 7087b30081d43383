//! The instance data bag.
//!
//! Every instance carries a JSON object as its working memory. Steps receive
//! a snapshot of it and return the data for their successors. The engine
//! diffs that output against the snapshot and applies only the difference,
//! so branches running side by side cannot overwrite each other's keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Key→value working memory of a workflow instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBag(Map<String, JsonValue>);

impl DataBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Creates a bag from a JSON value. Returns `None` unless it is an object.
    #[must_use]
    pub fn from_value(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Returns the top-level value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Resolves a dotted path such as `customer.tier` or `tags.0`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&JsonValue> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns the string value for `key`, if it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Option<JsonValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the bag has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over top-level entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Overwrites this bag's keys with every key from `other`.
    pub fn merge(&mut self, other: DataBag) {
        self.0.extend(other.0);
    }

    /// Computes the changes that turn `base` into `self`.
    ///
    /// Nested objects are compared key by key, so a step that adds
    /// `approvals.review` does not claim the whole `approvals` object.
    #[must_use]
    pub fn changes_since(&self, base: &DataBag) -> DataPatch {
        let mut ops = Vec::new();
        diff_maps(&mut Vec::new(), &base.0, &self.0, &mut ops);
        DataPatch { ops }
    }

    /// Applies a patch produced by [`DataBag::changes_since`].
    pub fn apply(&mut self, patch: &DataPatch) {
        for op in &patch.ops {
            match op {
                PatchOp::Set { path, value } => set_path(&mut self.0, path, value.clone()),
                PatchOp::Remove { path } => remove_path(&mut self.0, path),
            }
        }
    }

    /// Returns the bag as a JSON object value.
    #[must_use]
    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.0)
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }
}

impl From<Map<String, JsonValue>> for DataBag {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, JsonValue)> for DataBag {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One change in a [`DataPatch`]. Paths are key segments from the root.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Set the value at `path`, creating parent objects as needed.
    Set { path: Vec<String>, value: JsonValue },
    /// Remove the value at `path`, if present.
    Remove { path: Vec<String> },
}

/// The difference a step made to the data it received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPatch {
    ops: Vec<PatchOp>,
}

impl DataPatch {
    /// Returns true if the step changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the individual changes.
    #[must_use]
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }
}

fn diff_maps(
    path: &mut Vec<String>,
    base: &Map<String, JsonValue>,
    new: &Map<String, JsonValue>,
    ops: &mut Vec<PatchOp>,
) {
    for (key, value) in new {
        match (base.get(key), value) {
            (Some(old), new_value) if old == new_value => {}
            (Some(JsonValue::Object(old)), JsonValue::Object(nested)) => {
                path.push(key.clone());
                diff_maps(path, old, nested, ops);
                path.pop();
            }
            _ => {
                let mut full = path.clone();
                full.push(key.clone());
                ops.push(PatchOp::Set {
                    path: full,
                    value: value.clone(),
                });
            }
        }
    }
    for key in base.keys().filter(|key| !new.contains_key(*key)) {
        let mut full = path.clone();
        full.push(key.clone());
        ops.push(PatchOp::Remove { path: full });
    }
}

fn set_path(map: &mut Map<String, JsonValue>, path: &[String], value: JsonValue) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(Map::new());
        }
        let JsonValue::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

fn remove_path(map: &mut Map<String, JsonValue>, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
    for segment in parents {
        match current.get_mut(segment) {
            Some(JsonValue::Object(next)) => current = next,
            _ => return,
        }
    }
    current.remove(last);
}
