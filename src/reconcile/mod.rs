//! Label reconciliation against a target vocabulary.
//!
//! Source datasets name the same thing differently (`person_sitting`,
//! `pedestrian`, `Person`); the target format declares the vocabulary it
//! expects. An [`AliasTable`] maps every accepted alias, case-insensitively,
//! to its canonical label. Tables are built once per run and are read-only
//! afterwards; they are passed by reference rather than read from ambient
//! global state so tests can inject their own.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::LabelportError;
use crate::ir::ImageDetection;

/// Case-insensitive alias → canonical label lookup.
///
/// Construction fails fast on a duplicate alias claimed by two canonical
/// labels; that is a configuration error, never a per-record one. Iteration
/// order is canonical-label order (sorted), then alias order within a label.
#[derive(Clone, Debug)]
pub struct AliasTable {
    lookup: HashMap<String, String>,
}

impl AliasTable {
    pub fn from_expected(
        expected: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, LabelportError> {
        let mut lookup: HashMap<String, String> = HashMap::new();

        for (canonical, aliases) in expected {
            let own = std::iter::once(canonical.as_str());
            for alias in own.chain(aliases.iter().map(String::as_str)) {
                let key = alias.to_lowercase();
                match lookup.get(&key) {
                    Some(existing) if existing != canonical => {
                        return Err(LabelportError::AliasConflict {
                            alias: alias.to_string(),
                            first: existing.clone(),
                            second: canonical.clone(),
                        });
                    }
                    _ => {
                        lookup.insert(key, canonical.clone());
                    }
                }
            }
        }

        Ok(Self { lookup })
    }

    /// The canonical label for `label`, if it is in the vocabulary.
    pub fn resolve(&self, label: &str) -> Option<&str> {
        self.lookup.get(&label.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

/// What reconciliation removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub dropped_detections: usize,
    pub dropped_images: usize,
}

/// Map every detection's label into the target vocabulary.
///
/// Known aliases are rewritten to their canonical label. Unknown labels are
/// dropped when `select_only_known` is set, passed through unchanged
/// otherwise. Units left without detections survive unless
/// `filter_images_without_labels`.
pub fn reconcile_labels(
    records: Vec<ImageDetection>,
    table: &AliasTable,
    select_only_known: bool,
    filter_images_without_labels: bool,
) -> (Vec<ImageDetection>, ReconcileCounts) {
    let mut counts = ReconcileCounts::default();
    let mut kept = Vec::with_capacity(records.len());

    for mut unit in records {
        let before = unit.detections.len();
        unit.detections.retain_mut(|det| {
            match table.resolve(&det.label) {
                Some(canonical) => {
                    det.label = canonical.to_string();
                    true
                }
                None => !select_only_known,
            }
        });
        counts.dropped_detections += before - unit.detections.len();

        if unit.detections.is_empty() && filter_images_without_labels {
            counts.dropped_images += 1;
            continue;
        }
        kept.push(unit);
    }

    if counts.dropped_detections > 0 || counts.dropped_images > 0 {
        debug!(
            dropped_detections = counts.dropped_detections,
            dropped_images = counts.dropped_images,
            "label reconciliation dropped records"
        );
    }

    (kept, counts)
}

/// The built-in output vocabulary shared by the egestors.
///
/// Numeric aliases come from CityCam class ids (1 taxi, 2 black sedan,
/// 3 other cars, 4-6 trucks, 7 van, 8-9 buses, 10 other vehicles).
pub fn builtin_aliases() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        ("person", &["pedestrian", "person_sitting"]),
        ("people", &["pedestrians"]),
        ("wheelchair", &["wheelchairuser"]),
        ("bicycle", &["cyclist", "biker", "tricyclist"]),
        ("car", &["van", "1", "2", "3", "7"]),
        ("motorcycle", &["motorbike", "mopedrider", "motorcyclist"]),
        ("aeroplane", &[]),
        ("bus", &["8", "9"]),
        ("train", &[]),
        ("tram", &[]),
        ("truck", &["4", "5", "6"]),
        ("boat", &[]),
        ("traffic light", &[]),
        ("fire hydrant", &[]),
        ("stop sign", &[]),
        ("parking meter", &[]),
        ("bench", &[]),
        ("bird", &[]),
        ("cat", &[]),
        ("dog", &[]),
        ("sports", &[]),
        ("horse", &[]),
        ("sheep", &[]),
        ("cow", &[]),
        ("elephant", &[]),
        ("bear", &[]),
        ("zebra", &[]),
        ("giraffe", &[]),
        ("bottle", &[]),
        ("chair", &[]),
        ("dining table", &["diningtable"]),
        ("potted plant", &["pottedplant"]),
        ("sofa", &[]),
        ("tvmonitor", &["tv/monitor"]),
        ("non_motorized_vehicle", &["10"]),
    ];

    table
        .iter()
        .map(|(label, aliases)| {
            (
                (*label).to_string(),
                aliases.iter().map(|a| (*a).to_string()).collect(),
            )
        })
        .collect()
}
