//! The canonical dataset: per-turbine analytics, normalization, correlation,
//! and correlation-based signal reduction.
//!
//! A `Dataset` owns the canonical table for one load. Imputation, anomaly
//! mask application, and correlated-signal removal mutate it in place;
//! normalization returns a separate derived table and leaves the canonical
//! table untouched. Reloading replaces the table and starts a new session.

use crate::catalog::{SignalCatalog, SignalRange};
use crate::correlate::{
    correlation_matrix, reduction_plan, CorrelationMatrix, CorrelationMethod, ReductionPlan,
};
use crate::error::{QcError, Result};
use crate::stats;
use crate::table::DataTable;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Nominal SCADA sampling interval in minutes.
pub const SAMPLING_INTERVAL_MIN: i64 = 10;

/// Signals every downstream analysis depends on; never removed by
/// correlation-based reduction.
pub const CORE_COLUMNS: &[&str] = &["wind_speed", "power", "rotor_speed"];

/// Default minimum co-observed sample count for a correlation entry.
pub const DEFAULT_MIN_PERIODS: usize = 500;

/// Normalization method for [`Dataset::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeMethod {
    /// (x - min) / (max - min)
    MinMax,
    /// (x - mean) / std; columns with zero std are left unscaled.
    ZScore,
    /// (x - median) / IQR; zero IQR falls back to std. If std is also zero
    /// the result is NaN.
    Robust,
}

/// Per-turbine availability report.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityReport {
    pub turbine_id: String,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub sampling_frequency_min: i64,
    /// Total columns in the table (signals plus identifiers).
    pub parameters: usize,
    pub missing_values_pct: f64,
    /// Actual row count for the turbine.
    pub datapoints: usize,
    pub invalid_rows_pct: f64,
    /// Actual rows over the nominal-grid expectation. Duplicate timestamps
    /// are not deduplicated, so this can legitimately exceed 100.
    pub data_uptime_pct: f64,
}

/// Summary statistics for one numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRange {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

/// Availability and variable ranges in one call.
#[derive(Debug, Clone)]
pub struct Overview {
    pub availability: Vec<AvailabilityReport>,
    pub variable_ranges: Vec<VariableRange>,
}

/// Configuration for correlation-based signal reduction.
#[derive(Debug, Clone)]
pub struct ReduceConfig {
    /// Absolute-correlation threshold above which signals cluster together.
    pub threshold: f64,
    /// Correlation estimator.
    pub method: CorrelationMethod,
    /// Minimum co-observed sample count per correlation entry.
    pub min_periods: usize,
    /// Columns exempt from removal.
    pub protected: Vec<String>,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            method: CorrelationMethod::Pearson,
            min_periods: DEFAULT_MIN_PERIODS,
            protected: CORE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ReduceConfig {
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn min_periods(mut self, min_periods: usize) -> Self {
        self.min_periods = min_periods;
        self
    }

    pub fn method(mut self, method: CorrelationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn protect(mut self, columns: Vec<String>) -> Self {
        self.protected = columns;
        self
    }
}

/// Canonical table plus the signal ranges it was standardized against.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    table: DataTable,
    ranges: HashMap<String, SignalRange>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, table: DataTable, catalog: &SignalCatalog) -> Self {
        Self {
            name: name.into(),
            table,
            ranges: catalog.ranges().clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut DataTable {
        &mut self.table
    }

    /// Replace the canonical table. Detection masks computed against the old
    /// table are no longer valid and must be discarded by the caller.
    pub fn reload(&mut self, table: DataTable) {
        debug!(name = %self.name, rows = table.n_rows(), "reloaded dataset");
        self.table = table;
    }

    pub fn numeric_columns(&self) -> Vec<String> {
        self.table.numeric_columns()
    }

    pub fn turbine_ids(&self) -> Vec<String> {
        self.table.unique_turbines()
    }

    /// Per-turbine availability over the nominal 10-minute grid.
    pub fn analyze_availability(&self) -> Vec<AvailabilityReport> {
        let parameters = self.table.column_names().len();
        let names = self.table.column_names().to_vec();

        let mut reports = Vec::new();
        for (turbine_id, rows) in self.table.group_rows() {
            let datapoints = rows.len();
            if datapoints == 0 {
                continue;
            }

            let mut missing = 0usize;
            for name in &names {
                if let Some(col) = self.table.column(name) {
                    missing += rows.iter().filter(|&&r| !col[r].is_finite()).count();
                }
            }
            let total_cells = datapoints * parameters.max(1);
            let missing_pct = 100.0 * missing as f64 / total_cells as f64;

            let invalid = rows
                .iter()
                .filter(|&&r| self.table.is_invalid()[r])
                .count();
            let invalid_pct = 100.0 * invalid as f64 / datapoints as f64;

            let first = self.table.timestamps()[rows[0]];
            let last = self.table.timestamps()[rows[datapoints - 1]];
            let expected = (last - first).num_minutes() / SAMPLING_INTERVAL_MIN + 1;
            let uptime_pct = if expected > 0 {
                100.0 * datapoints as f64 / expected as f64
            } else {
                f64::NAN
            };

            reports.push(AvailabilityReport {
                turbine_id,
                first_timestamp: first,
                last_timestamp: last,
                sampling_frequency_min: SAMPLING_INTERVAL_MIN,
                parameters,
                missing_values_pct: round2(missing_pct),
                datapoints,
                invalid_rows_pct: round2(invalid_pct),
                data_uptime_pct: round2(uptime_pct),
            });
        }
        reports
    }

    /// Min/max/mean/std per numeric column, optionally for one turbine.
    pub fn analyze_variable_ranges(&self, turbine: Option<&str>) -> Result<Vec<VariableRange>> {
        let rows: Option<Vec<usize>> = match turbine {
            Some(id) if !id.eq_ignore_ascii_case("all") => {
                let groups = self.table.group_rows();
                Some(
                    groups
                        .get(id)
                        .cloned()
                        .ok_or_else(|| QcError::TurbineNotFound(id.to_string()))?,
                )
            }
            _ => None,
        };

        let mut ranges = Vec::new();
        for name in self.numeric_columns() {
            let column = self.table.column(&name).unwrap_or(&[]);
            let values: Vec<f64> = match &rows {
                Some(rows) => rows
                    .iter()
                    .map(|&r| column[r])
                    .filter(|v| v.is_finite())
                    .collect(),
                None => stats::finite_values(column),
            };

            // statrs Statistics over the finite sample; sample std (n-1).
            use statrs::statistics::Statistics;
            let (min, max, mean, std) = if values.is_empty() {
                (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
            } else {
                (
                    values.iter().copied().fold(f64::INFINITY, f64::min),
                    values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    values.iter().mean(),
                    values.iter().std_dev(),
                )
            };

            ranges.push(VariableRange {
                parameter: name,
                min,
                max,
                mean,
                std,
            });
        }
        Ok(ranges)
    }

    /// Availability and variable ranges in one call.
    pub fn analyze_overview(&self, turbine: Option<&str>) -> Result<Overview> {
        Ok(Overview {
            availability: self.analyze_availability(),
            variable_ranges: self.analyze_variable_ranges(turbine)?,
        })
    }

    /// Produce a normalized copy of the table; the canonical table is
    /// untouched. Cells outside their configured signal range are forced to
    /// missing before scaling.
    pub fn normalize(&self, method: NormalizeMethod) -> DataTable {
        let mut derived = self.table.clone();

        for name in self.numeric_columns() {
            let Some(column) = derived.column(&name) else {
                continue;
            };
            let mut values = column.to_vec();

            if let Some(range) = self.ranges.get(&name) {
                for v in &mut values {
                    if v.is_finite() && !range.contains(*v) {
                        *v = f64::NAN;
                    }
                }
            }

            let finite = stats::finite_values(&values);
            if finite.is_empty() {
                let _ = derived.set_column(&name, values);
                continue;
            }

            let scale = |values: &mut [f64], center: f64, scale: f64| {
                for v in values.iter_mut() {
                    if v.is_finite() {
                        *v = (*v - center) / scale;
                    }
                }
            };

            match method {
                NormalizeMethod::MinMax => {
                    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let span = max - min;
                    if span > 0.0 {
                        scale(&mut values, min, span);
                    } else {
                        scale(&mut values, min, 1.0);
                    }
                }
                NormalizeMethod::ZScore => {
                    let mean = stats::mean(&finite);
                    let std = stats::std_dev(&finite);
                    if std.is_finite() && std > 0.0 {
                        scale(&mut values, mean, std);
                    }
                }
                NormalizeMethod::Robust => {
                    let median = stats::median(&finite);
                    let iqr = stats::quantile(&finite, 0.75) - stats::quantile(&finite, 0.25);
                    if iqr > 0.0 {
                        scale(&mut values, median, iqr);
                    } else {
                        // Zero IQR: fall back to std. If std is also zero
                        // the division yields NaN, which is the documented
                        // result for a fully degenerate column.
                        let std = stats::std_dev(&finite);
                        let std = if std.is_finite() { std } else { 0.0 };
                        scale(&mut values, median, std);
                    }
                }
            }

            let _ = derived.set_column(&name, values);
        }

        derived
    }

    /// Pairwise-complete correlation matrix over the numeric columns.
    pub fn correlation_matrix(
        &self,
        method: CorrelationMethod,
        min_periods: usize,
    ) -> CorrelationMatrix {
        let columns = self.numeric_columns();
        let series: Vec<&[f64]> = columns
            .iter()
            .map(|name| self.table.column(name).unwrap_or(&[]))
            .collect();
        correlation_matrix(&columns, &series, method, min_periods)
    }

    /// Plan correlation-based signal reduction without mutating the table.
    pub fn reduction_plan(&self, config: &ReduceConfig) -> ReductionPlan {
        let matrix = self.correlation_matrix(config.method, config.min_periods);
        let variances: HashMap<String, f64> = self
            .numeric_columns()
            .into_iter()
            .map(|name| {
                let finite =
                    stats::finite_values(self.table.column(&name).unwrap_or(&[]));
                (name, stats::variance(&finite))
            })
            .collect();
        reduction_plan(&matrix, config.threshold, &variances, &config.protected)
    }

    /// Reduce correlated signals. With `preview` the plan is returned without
    /// mutation; otherwise the plan's removal candidates are dropped from the
    /// canonical table.
    pub fn reduce_correlated(&mut self, config: &ReduceConfig, preview: bool) -> ReductionPlan {
        let plan = self.reduction_plan(config);
        if !preview && !plan.to_remove.is_empty() {
            self.table.drop_columns(&plan.to_remove);
            debug!(
                name = %self.name,
                removed = plan.to_remove.len(),
                clusters = plan.cluster_count,
                "dropped correlated signals"
            );
        }
        plan
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
