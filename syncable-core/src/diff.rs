//! Structural diff over JSON values.
//!
//! Records are compatible with the `deep-diff` wire shape: `N` (new), `D`
//! (deleted), `E` (edited) and `A` (array item added or removed), each with a
//! path of object keys and array indices from the root.
//!
//! Arrays are compared element-wise over their common prefix; surplus
//! elements are reported as `A` records, additions in ascending and removals
//! in descending index order, so that replaying the records in sequence
//! reproduces the right-hand side.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One step of a diff path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// Change to a single array slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ArrayItem {
    #[serde(rename = "N")]
    New { rhs: Value },
    #[serde(rename = "D")]
    Deleted { lhs: Value },
}

/// A single structural difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Diff {
    #[serde(rename = "N")]
    New {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        path: Vec<PathSegment>,
        rhs: Value,
    },
    #[serde(rename = "D")]
    Deleted {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        path: Vec<PathSegment>,
        lhs: Value,
    },
    #[serde(rename = "E")]
    Edited {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        path: Vec<PathSegment>,
        lhs: Value,
        rhs: Value,
    },
    #[serde(rename = "A")]
    Array {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        path: Vec<PathSegment>,
        index: usize,
        item: ArrayItem,
    },
}

impl Diff {
    pub fn path(&self) -> &[PathSegment] {
        match self {
            Self::New { path, .. }
            | Self::Deleted { path, .. }
            | Self::Edited { path, .. }
            | Self::Array { path, .. } => path,
        }
    }

    /// Top-level field this record touches, if it is below an object key.
    pub fn field(&self) -> Option<&str> {
        match self.path().first() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }
}

/// A diff record could not be replayed onto a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("path `{0}` does not exist")]
    InvalidPath(String),

    #[error("index {index} out of bounds at `{path}`")]
    IndexOutOfBounds { path: String, index: usize },
}

/// Computes the records turning `lhs` into `rhs`.
pub fn diff(lhs: &Value, rhs: &Value) -> Vec<Diff> {
    let mut diffs = Vec::new();
    let mut path = Vec::new();
    diff_into(lhs, rhs, &mut path, &mut diffs);
    diffs
}

fn diff_into(lhs: &Value, rhs: &Value, path: &mut Vec<PathSegment>, diffs: &mut Vec<Diff>) {
    match (lhs, rhs) {
        (Value::Object(lhs), Value::Object(rhs)) => {
            for (key, left) in lhs {
                path.push(PathSegment::Key(key.clone()));

                match rhs.get(key) {
                    Some(right) => diff_into(left, right, path, diffs),
                    None => diffs.push(Diff::Deleted {
                        path: path.clone(),
                        lhs: left.clone(),
                    }),
                }

                path.pop();
            }

            for (key, right) in rhs {
                if lhs.contains_key(key) {
                    continue;
                }

                let mut path = path.clone();
                path.push(PathSegment::Key(key.clone()));

                diffs.push(Diff::New {
                    path,
                    rhs: right.clone(),
                });
            }
        }
        (Value::Array(lhs), Value::Array(rhs)) => {
            let common = lhs.len().min(rhs.len());

            for index in 0..common {
                path.push(PathSegment::Index(index));
                diff_into(&lhs[index], &rhs[index], path, diffs);
                path.pop();
            }

            for (index, right) in rhs.iter().enumerate().skip(common) {
                diffs.push(Diff::Array {
                    path: path.clone(),
                    index,
                    item: ArrayItem::New { rhs: right.clone() },
                });
            }

            for (index, left) in lhs.iter().enumerate().skip(common).rev() {
                diffs.push(Diff::Array {
                    path: path.clone(),
                    index,
                    item: ArrayItem::Deleted { lhs: left.clone() },
                });
            }
        }
        (lhs, rhs) if lhs == rhs => {}
        (lhs, rhs) => diffs.push(Diff::Edited {
            path: path.clone(),
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        }),
    }
}

/// Replays a single record onto `target`.
pub fn apply_diff(target: &mut Value, diff: &Diff) -> Result<(), DiffError> {
    match diff {
        Diff::New { path, rhs } | Diff::Edited { path, rhs, .. } => {
            set(target, path, rhs.clone())
        }
        Diff::Deleted { path, .. } => delete(target, path),
        Diff::Array { path, index, item } => {
            let array = resolve(target, path)?
                .as_array_mut()
                .ok_or_else(|| DiffError::InvalidPath(display_path(path)))?;

            match item {
                ArrayItem::New { rhs } => {
                    if *index > array.len() {
                        return Err(DiffError::IndexOutOfBounds {
                            path: display_path(path),
                            index: *index,
                        });
                    }
                    array.insert(*index, rhs.clone());
                }
                ArrayItem::Deleted { .. } => {
                    if *index >= array.len() {
                        return Err(DiffError::IndexOutOfBounds {
                            path: display_path(path),
                            index: *index,
                        });
                    }
                    array.remove(*index);
                }
            }

            Ok(())
        }
    }
}

/// Replays records in order onto `target`.
pub fn apply_diffs(target: &mut Value, diffs: &[Diff]) -> Result<(), DiffError> {
    for diff in diffs {
        apply_diff(target, diff)?;
    }
    Ok(())
}

fn resolve<'v>(target: &'v mut Value, path: &[PathSegment]) -> Result<&'v mut Value, DiffError> {
    let mut current = target;

    for (depth, segment) in path.iter().enumerate() {
        let next = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key),
            (Value::Array(array), PathSegment::Index(index)) => array.get_mut(*index),
            _ => None,
        };

        current = next.ok_or_else(|| DiffError::InvalidPath(display_path(&path[..=depth])))?;
    }

    Ok(current)
}

fn set(target: &mut Value, path: &[PathSegment], value: Value) -> Result<(), DiffError> {
    let Some((last, parent)) = path.split_last() else {
        *target = value;
        return Ok(());
    };

    match (resolve(target, parent)?, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (Value::Array(array), PathSegment::Index(index)) => match array.get_mut(*index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DiffError::IndexOutOfBounds {
                path: display_path(parent),
                index: *index,
            }),
        },
        _ => Err(DiffError::InvalidPath(display_path(path))),
    }
}

fn delete(target: &mut Value, path: &[PathSegment]) -> Result<(), DiffError> {
    let Some((last, parent)) = path.split_last() else {
        *target = Value::Null;
        return Ok(());
    };

    match (resolve(target, parent)?, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.remove(key)
                .map(|_| ())
                .ok_or_else(|| DiffError::InvalidPath(display_path(path)))
        }
        (Value::Array(array), PathSegment::Index(index)) if *index < array.len() => {
            array.remove(*index);
            Ok(())
        }
        _ => Err(DiffError::InvalidPath(display_path(path))),
    }
}

fn display_path(path: &[PathSegment]) -> String {
    let mut rendered = String::new();

    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !rendered.is_empty() {
                    rendered.push('.');
                }
                rendered.push_str(key);
            }
            PathSegment::Index(index) => rendered.push_str(&format!("[{index}]")),
        }
    }

    rendered
}
