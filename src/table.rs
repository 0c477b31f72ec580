//! Column-major observation table for multi-turbine SCADA data.
//!
//! Rows are keyed by (timestamp, turbine id). Numeric signal columns store
//! `f64` with NaN marking a missing value. The reserved boolean columns
//! `is_invalid`, `anomaly`, and `event` are kept as dedicated fields so they
//! can never be confused with signals. Identifier columns (`record_id`,
//! `status_type_id`) may be present among the numeric columns but are
//! excluded from numeric analysis.

use crate::error::{QcError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Numeric columns excluded from numeric analysis.
pub const ID_COLUMNS: &[&str] = &["record_id", "status_type_id"];

/// A column-major observation table.
#[derive(Debug, Clone)]
pub struct DataTable {
    timestamps: Vec<DateTime<Utc>>,
    turbine_ids: Vec<String>,
    /// Column insertion order; keys of `columns`.
    names: Vec<String>,
    columns: HashMap<String, Vec<f64>>,
    is_invalid: Vec<bool>,
    anomaly: Vec<bool>,
    event: Vec<bool>,
}

/// Builder for constructing a [`DataTable`].
#[derive(Debug, Clone, Default)]
pub struct DataTableBuilder {
    timestamps: Vec<DateTime<Utc>>,
    turbine_ids: Vec<String>,
    names: Vec<String>,
    columns: HashMap<String, Vec<f64>>,
    event: Option<Vec<bool>>,
}

impl DataTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamps(mut self, timestamps: Vec<DateTime<Utc>>) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn turbine_ids<S: Into<String>>(mut self, ids: Vec<S>) -> Self {
        self.turbine_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Add a numeric signal column. NaN marks a missing value. Re-adding a
    /// name replaces the previous values.
    pub fn column(mut self, name: &str, values: Vec<f64>) -> Self {
        if !self.columns.contains_key(name) {
            self.names.push(name.to_string());
        }
        self.columns.insert(name.to_string(), values);
        self
    }

    /// Set the event flags produced by an upstream event-label source.
    pub fn event(mut self, flags: Vec<bool>) -> Self {
        self.event = Some(flags);
        self
    }

    pub fn build(self) -> Result<DataTable> {
        let n = self.timestamps.len();

        if self.turbine_ids.len() != n {
            return Err(QcError::DimensionMismatch {
                expected: n,
                got: self.turbine_ids.len(),
            });
        }
        for name in &self.names {
            let len = self.columns[name].len();
            if len != n {
                return Err(QcError::DimensionMismatch {
                    expected: n,
                    got: len,
                });
            }
        }
        if let Some(event) = &self.event {
            if event.len() != n {
                return Err(QcError::DimensionMismatch {
                    expected: n,
                    got: event.len(),
                });
            }
        }

        Ok(DataTable {
            timestamps: self.timestamps,
            turbine_ids: self.turbine_ids,
            names: self.names,
            columns: self.columns,
            is_invalid: vec![false; n],
            anomaly: vec![false; n],
            event: self.event.unwrap_or_else(|| vec![false; n]),
        })
    }
}

impl DataTable {
    pub fn builder() -> DataTableBuilder {
        DataTableBuilder::new()
    }

    pub fn n_rows(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Turbine identifier of every row.
    pub fn turbine_column(&self) -> &[String] {
        &self.turbine_ids
    }

    /// Unique turbine identifiers, sorted.
    pub fn unique_turbines(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.turbine_ids.clone();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Map from turbine identifier to the row indices of its group, in row
    /// order. Every per-turbine computation partitions rows through this map.
    pub fn group_rows(&self) -> BTreeMap<String, Vec<usize>> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (row, id) in self.turbine_ids.iter().enumerate() {
            groups.entry(id.clone()).or_default().push(row);
        }
        groups
    }

    /// All column names in insertion order (including identifier columns).
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Numeric columns eligible for analysis: all columns minus the
    /// identifier columns.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !ID_COLUMNS.contains(&n.as_str()))
            .cloned()
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Overwrite one cell. Errors if the column or row does not exist.
    pub fn set_value(&mut self, name: &str, row: usize, value: f64) -> Result<()> {
        let n = self.n_rows();
        let column = self
            .columns
            .get_mut(name)
            .ok_or_else(|| QcError::ColumnNotFound(name.to_string()))?;
        if row >= n {
            return Err(QcError::DimensionMismatch {
                expected: n,
                got: row,
            });
        }
        column[row] = value;
        Ok(())
    }

    /// Replace a whole column's values. Errors if absent or wrong length.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        let n = self.n_rows();
        if values.len() != n {
            return Err(QcError::DimensionMismatch {
                expected: n,
                got: values.len(),
            });
        }
        match self.columns.get_mut(name) {
            Some(column) => {
                *column = values;
                Ok(())
            }
            None => Err(QcError::ColumnNotFound(name.to_string())),
        }
    }

    /// Rename columns. Names absent from the mapping pass through unchanged.
    pub fn rename_columns(&mut self, mapping: &HashMap<String, String>) {
        for name in &mut self.names {
            if let Some(canonical) = mapping.get(name) {
                if let Some(values) = self.columns.remove(name) {
                    self.columns.insert(canonical.clone(), values);
                }
                *name = canonical.clone();
            }
        }
    }

    /// Drop the named columns. Unknown names are ignored.
    pub fn drop_columns(&mut self, names: &[String]) {
        for name in names {
            self.columns.remove(name);
        }
        self.names.retain(|n| self.columns.contains_key(n));
    }

    /// Count of missing (non-finite) cells across all numeric columns.
    pub fn missing_cells(&self) -> usize {
        self.names
            .iter()
            .map(|n| self.column_missing(n))
            .sum()
    }

    /// Count of missing cells in one column (0 for unknown names).
    pub fn column_missing(&self, name: &str) -> usize {
        self.columns
            .get(name)
            .map(|v| v.iter().filter(|x| !x.is_finite()).count())
            .unwrap_or(0)
    }

    // ---- reserved boolean columns ----

    pub fn is_invalid(&self) -> &[bool] {
        &self.is_invalid
    }

    pub fn set_invalid_flags(&mut self, flags: Vec<bool>) -> Result<()> {
        if flags.len() != self.n_rows() {
            return Err(QcError::DimensionMismatch {
                expected: self.n_rows(),
                got: flags.len(),
            });
        }
        self.is_invalid = flags;
        Ok(())
    }

    pub fn anomaly(&self) -> &[bool] {
        &self.anomaly
    }

    /// Reset the cumulative anomaly flag to all-false (standardization).
    pub fn reset_anomaly(&mut self) {
        self.anomaly = vec![false; self.n_rows()];
    }

    /// OR a detector's row mask into the cumulative anomaly flag. Detectors
    /// only ever add flags; nothing clears them short of a reload.
    pub fn or_anomaly(&mut self, row_mask: &[bool]) -> Result<()> {
        if row_mask.len() != self.n_rows() {
            return Err(QcError::DimensionMismatch {
                expected: self.n_rows(),
                got: row_mask.len(),
            });
        }
        for (flag, &m) in self.anomaly.iter_mut().zip(row_mask.iter()) {
            *flag |= m;
        }
        Ok(())
    }

    pub fn event(&self) -> &[bool] {
        &self.event
    }

    /// Mark `event = true` for one turbine's rows inside the closed
    /// timestamp interval `[start, end]`. Returns the number of rows marked.
    pub fn mark_event(
        &mut self,
        turbine_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> usize {
        let mut marked = 0;
        for row in 0..self.n_rows() {
            if self.turbine_ids[row] == turbine_id
                && self.timestamps[row] >= start
                && self.timestamps[row] <= end
            {
                self.event[row] = true;
                marked += 1;
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn make_table() -> DataTable {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..6).map(|i| base + Duration::minutes(10 * i)).collect();
        DataTable::builder()
            .timestamps(timestamps)
            .turbine_ids(vec!["T01", "T01", "T01", "T02", "T02", "T02"])
            .column("wind_speed", vec![5.0, 6.0, f64::NAN, 7.0, 8.0, 9.0])
            .column("power", vec![100.0, 120.0, 130.0, 140.0, 150.0, 160.0])
            .column("record_id", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .build()
            .unwrap()
    }

    #[test]
    fn builder_validates_lengths() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let result = DataTable::builder()
            .timestamps(vec![base])
            .turbine_ids(vec!["T01", "T02"])
            .build();

        assert!(matches!(
            result,
            Err(QcError::DimensionMismatch { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn builder_validates_column_lengths() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let result = DataTable::builder()
            .timestamps(vec![base, base + Duration::minutes(10)])
            .turbine_ids(vec!["T01", "T01"])
            .column("wind_speed", vec![5.0])
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn numeric_columns_exclude_identifiers() {
        let table = make_table();
        assert_eq!(table.numeric_columns(), vec!["wind_speed", "power"]);
        assert_eq!(table.column_names().len(), 3);
    }

    #[test]
    fn group_rows_partitions_by_turbine() {
        let table = make_table();
        let groups = table.group_rows();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["T01"], vec![0, 1, 2]);
        assert_eq!(groups["T02"], vec![3, 4, 5]);
    }

    #[test]
    fn unique_turbines_sorted() {
        let table = make_table();
        assert_eq!(table.unique_turbines(), vec!["T01", "T02"]);
    }

    #[test]
    fn rename_columns_passes_unmapped_through() {
        let mut table = make_table();
        let mapping = HashMap::from([("wind_speed".to_string(), "ws".to_string())]);
        table.rename_columns(&mapping);

        assert!(table.column("ws").is_some());
        assert!(table.column("wind_speed").is_none());
        assert!(table.column("power").is_some());
        assert_eq!(table.column_names()[0], "ws");
    }

    #[test]
    fn drop_columns_keeps_order() {
        let mut table = make_table();
        table.drop_columns(&["power".to_string(), "unknown".to_string()]);

        assert_eq!(table.column_names(), &["wind_speed", "record_id"]);
    }

    #[test]
    fn missing_cells_counts_nan() {
        let table = make_table();
        assert_eq!(table.missing_cells(), 1);
        assert_eq!(table.column_missing("wind_speed"), 1);
        assert_eq!(table.column_missing("power"), 0);
    }

    #[test]
    fn set_value_unknown_column_errors() {
        let mut table = make_table();
        let err = table.set_value("nacelle_position", 0, 1.0).unwrap_err();
        assert!(matches!(err, QcError::ColumnNotFound(_)));
    }

    #[test]
    fn or_anomaly_accumulates() {
        let mut table = make_table();
        table
            .or_anomaly(&[true, false, false, false, false, false])
            .unwrap();
        table
            .or_anomaly(&[false, false, false, true, false, false])
            .unwrap();

        assert_eq!(
            table.anomaly(),
            &[true, false, false, true, false, false]
        );
    }

    #[test]
    fn mark_event_scopes_to_turbine_and_window() {
        let mut table = make_table();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let marked = table.mark_event("T01", base, base + Duration::minutes(10));
        assert_eq!(marked, 2);
        assert_eq!(
            table.event(),
            &[true, true, false, false, false, false]
        );
    }
}
