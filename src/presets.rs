//! Named coordinate presets.
//!
//! A [`PresetStore`] holds lists of named positions under store names so that
//! flows can refer to `"home"` instead of repeating coordinates. The store is
//! created by whoever hosts the consumers and handed to them; the connection
//! manager never touches it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

/// Store name used when none is given.
pub const DEFAULT_STORE: &str = "default";

/// A cartesian pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
}

/// Joint angles of a four-axis arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointAngles {
    pub j1: f64,
    pub j2: f64,
    pub j3: f64,
    pub j4: f64,
}

/// The coordinates a preset describes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PresetKind {
    /// A single cartesian target.
    Cartesian(Pose),
    /// A single joint-space target.
    Joint(JointAngles),
    /// An arc through `mid` ending at `end`.
    Arc { mid: Pose, end: Pose },
    /// `count` full circles through `mid` and `end`.
    Circle { count: u32, mid: Pose, end: Pose },
}

impl PresetKind {
    /// Short name of the kind.
    pub fn label(&self) -> &'static str {
        match self {
            PresetKind::Cartesian(_) => "cartesian",
            PresetKind::Joint(_) => "joint",
            PresetKind::Arc { .. } => "arc",
            PresetKind::Circle { .. } => "circle",
        }
    }
}

/// A named preset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    pub name: String,
    #[serde(flatten)]
    pub kind: PresetKind,
}

/// Name and kind of a preset, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresetSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Accept JSON numbers and numeric strings.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field(entry: &Value, key: &str) -> Option<f64> {
    entry.get(key).and_then(number)
}

fn pose(value: &Value) -> Option<Pose> {
    Some(Pose {
        x: field(value, "x")?,
        y: field(value, "y")?,
        z: field(value, "z")?,
        r: field(value, "r")?,
    })
}

fn has_all(entry: &Value, keys: &[&str]) -> bool {
    keys.iter().all(|k| entry.get(*k).is_some_and(|v| !v.is_null()))
}

/// Classify one raw entry. `None` means the entry has no usable shape.
fn parse_kind(entry: &Value) -> Option<PresetKind> {
    if has_all(entry, &["x", "y", "z", "r"]) {
        return pose(entry).map(PresetKind::Cartesian);
    }
    if has_all(entry, &["j1", "j2", "j3", "j4"]) {
        return Some(PresetKind::Joint(JointAngles {
            j1: field(entry, "j1")?,
            j2: field(entry, "j2")?,
            j3: field(entry, "j3")?,
            j4: field(entry, "j4")?,
        }));
    }
    if has_all(entry, &["mid", "end"]) {
        let mid = pose(&entry["mid"])?;
        let end = pose(&entry["end"])?;
        if has_all(entry, &["count"]) {
            let count = field(entry, "count")?;
            if count < 0.0 || count > f64::from(u32::MAX) || count.fract() != 0.0 {
                return None;
            }
            return Some(PresetKind::Circle {
                count: count as u32,
                mid,
                end,
            });
        }
        return Some(PresetKind::Arc { mid, end });
    }
    None
}

/// Parse a JSON array of presets, skipping entries that cannot be used.
pub fn parse_presets(json: &str) -> Result<Vec<Preset>> {
    let entries: Vec<Value> = serde_json::from_str(json)?;
    let mut presets = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let Some(name) = entry.get("name").and_then(Value::as_str).filter(|n| !n.is_empty()) else {
            warn!(index, "coordinate missing name, skipping");
            continue;
        };
        match parse_kind(entry) {
            Some(kind) => presets.push(Preset {
                name: name.to_owned(),
                kind,
            }),
            None => warn!(name, "invalid coordinate format, skipping"),
        }
    }

    Ok(presets)
}

/// Named preset lists, one per store name.
#[derive(Debug, Default)]
pub struct PresetStore {
    stores: RwLock<HashMap<String, Vec<Preset>>>,
}

impl PresetStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `json` and replace the contents of `store` with it.
    ///
    /// Returns the number of presets loaded. On a parse error the store is
    /// left untouched.
    pub fn load_json(&self, store: &str, json: &str) -> Result<usize> {
        let presets = parse_presets(json)?;
        let count = presets.len();
        debug!(store, count, "loading coordinates");
        self.insert(store, presets);
        Ok(count)
    }

    /// Replace the contents of `store`.
    pub fn insert(&self, store: &str, presets: Vec<Preset>) {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(store.to_owned(), presets);
    }

    /// Look up one preset by name.
    pub fn get(&self, store: &str, name: &str) -> Option<Preset> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.get(store)?.iter().find(|p| p.name == name).cloned()
    }

    /// All presets in `store`, in load order. Unknown stores are empty.
    pub fn list(&self, store: &str) -> Vec<Preset> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.get(store).cloned().unwrap_or_default()
    }

    /// Names and kinds of the presets in `store`.
    pub fn summaries(&self, store: &str) -> Vec<PresetSummary> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores
            .get(store)
            .map(|presets| {
                presets
                    .iter()
                    .map(|p| PresetSummary {
                        name: p.name.clone(),
                        kind: p.kind.label(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop a store. Returns its presets if it existed.
    pub fn remove(&self, store: &str) -> Option<Vec<Preset>> {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(store)
    }
}
