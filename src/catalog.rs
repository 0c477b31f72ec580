//! Signal catalog: column-name mappings and valid numeric ranges.
//!
//! The catalog is the external configuration the standardizer and dataset
//! consume. It can be built in code or parsed from the two JSON documents
//! the deployment ships (`signals_dict.json`, `signals_ranges.json`):
//!
//! ```json
//! { "kelmarsh": { "Wind speed (m/s)": "wind_speed" } }
//! ```
//! ```json
//! { "wind_speed": [0.0, 35.0] }
//! ```

use crate::error::{QcError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Inclusive valid range for one canonical signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRange {
    pub min: f64,
    pub max: f64,
}

impl SignalRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether a value lies within `[min, max]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Column mappings per dataset type plus valid ranges per canonical signal.
#[derive(Debug, Clone, Default)]
pub struct SignalCatalog {
    /// Dataset type (lowercased) -> raw column name -> canonical name.
    mappings: HashMap<String, HashMap<String, String>>,
    /// Canonical signal name -> valid range. Absent means unchecked.
    ranges: HashMap<String, SignalRange>,
}

impl SignalCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a column mapping for one dataset type.
    pub fn with_mapping(mut self, dataset_type: &str, mapping: HashMap<String, String>) -> Self {
        self.mappings.insert(dataset_type.to_lowercase(), mapping);
        self
    }

    /// Register a valid range for one canonical signal.
    pub fn with_range(mut self, signal: &str, min: f64, max: f64) -> Self {
        self.ranges
            .insert(signal.to_string(), SignalRange::new(min, max));
        self
    }

    /// Parse a catalog from the two JSON documents.
    pub fn from_json(mappings_json: &str, ranges_json: &str) -> Result<Self> {
        let raw: HashMap<String, HashMap<String, String>> = serde_json::from_str(mappings_json)
            .map_err(|e| QcError::Configuration(format!("invalid signal mappings: {e}")))?;
        let mappings = raw
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        let raw: HashMap<String, [f64; 2]> = serde_json::from_str(ranges_json)
            .map_err(|e| QcError::Configuration(format!("invalid signal ranges: {e}")))?;
        let ranges = raw
            .into_iter()
            .map(|(k, [min, max])| (k, SignalRange::new(min, max)))
            .collect();

        Ok(Self { mappings, ranges })
    }

    /// Read the catalog from two JSON files. An unreadable file is fatal.
    pub fn from_files<P: AsRef<Path>>(mappings_path: P, ranges_path: P) -> Result<Self> {
        let mappings = std::fs::read_to_string(&mappings_path).map_err(|e| {
            QcError::Configuration(format!(
                "cannot read {}: {e}",
                mappings_path.as_ref().display()
            ))
        })?;
        let ranges = std::fs::read_to_string(&ranges_path).map_err(|e| {
            QcError::Configuration(format!(
                "cannot read {}: {e}",
                ranges_path.as_ref().display()
            ))
        })?;
        Self::from_json(&mappings, &ranges)
    }

    /// Column mapping for a dataset type (case-insensitive). Unknown types
    /// yield an empty mapping, meaning no renaming takes place.
    pub fn mapping(&self, dataset_type: &str) -> HashMap<String, String> {
        self.mappings
            .get(&dataset_type.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Valid range for a canonical signal, if one is configured.
    pub fn range(&self, signal: &str) -> Option<SignalRange> {
        self.ranges.get(signal).copied()
    }

    /// All configured ranges.
    pub fn ranges(&self) -> &HashMap<String, SignalRange> {
        &self.ranges
    }
}
