//! Weighted change detection between two content snapshots.
//!
//! [`ChangeDetector::detect`] diffs two [`Snapshot`]s key by key using
//! structural equality and sums a per-field weight for every changed field
//! (capped at 1.0). [`ChangeDetector::is_significant`] then gates whether
//! the change is worth an expensive regeneration: frequently-mutating
//! counters and timestamps never qualify on their own.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::config::DetectionConfig;
use crate::snapshot::{values_equal, Snapshot};

/// Outcome of diffing two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeDetection {
    pub has_changes: bool,
    /// Changed keys, sorted.
    pub changed_fields: Vec<String>,
    /// Sum of changed field weights, in `[0, 1]`.
    pub change_score: f64,
}

impl ChangeDetection {
    pub fn unchanged() -> Self {
        Self {
            has_changes: false,
            changed_fields: Vec::new(),
            change_score: 0.0,
        }
    }
}

/// Field-weighted snapshot differ.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    weights: BTreeMap<String, f64>,
    default_weight: f64,
    insignificant: HashSet<String>,
    threshold: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(&DetectionConfig::default())
    }
}

impl ChangeDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            weights: config.weights.clone(),
            default_weight: config.default_weight,
            insignificant: config.insignificant_fields.iter().cloned().collect(),
            threshold: config.significance_threshold,
        }
    }

    pub fn weight(&self, field: &str) -> f64 {
        self.weights
            .get(field)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn detect(&self, old: Option<&Snapshot>, new: Option<&Snapshot>) -> ChangeDetection {
        match (old, new) {
            (None, None) => ChangeDetection::unchanged(),
            (Some(only), None) | (None, Some(only)) => {
                let mut fields: Vec<String> = only.keys().cloned().collect();
                fields.sort();
                ChangeDetection {
                    has_changes: true,
                    changed_fields: fields,
                    change_score: 1.0,
                }
            }
            (Some(old), Some(new)) => {
                let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
                let changed_fields: Vec<String> = keys
                    .into_iter()
                    .filter(|key| match (old.get(*key), new.get(*key)) {
                        (Some(a), Some(b)) => !values_equal(a, b),
                        _ => true,
                    })
                    .cloned()
                    .collect();
                let change_score = changed_fields
                    .iter()
                    .map(|f| self.weight(f))
                    .sum::<f64>()
                    .min(1.0);
                ChangeDetection {
                    has_changes: !changed_fields.is_empty(),
                    changed_fields,
                    change_score,
                }
            }
        }
    }

    /// Whether a detection should trigger regeneration.
    pub fn is_significant(&self, detection: &ChangeDetection) -> bool {
        if !detection.has_changes {
            return false;
        }
        if !detection.changed_fields.is_empty()
            && detection
                .changed_fields
                .iter()
                .all(|f| self.insignificant.contains(f))
        {
            return false;
        }
        detection.change_score >= self.threshold
    }
}

/// Human-readable summary such as `"Metadata: title, description; Images: primary"`.
pub fn change_summary(metadata: &ChangeDetection, images: &ChangeDetection) -> String {
    let mut parts = Vec::new();
    if metadata.has_changes {
        parts.push(format!("Metadata: {}", metadata.changed_fields.join(", ")));
    }
    if images.has_changes {
        parts.push(format!("Images: {}", images.changed_fields.join(", ")));
    }
    if parts.is_empty() {
        "No changes".to_string()
    } else {
        parts.join("; ")
    }
}
