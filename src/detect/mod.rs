//! Per-turbine anomaly detection strategies and mask machinery.
//!
//! Three interchangeable strategies (IQR, isolation forest, DBSCAN) share a
//! single contract: given one turbine group's numeric block they return a row
//! mask and a per-column cell mask. The [`AnomalyDetector`] merges group
//! outputs into full-size masks by original row index, ORs the row mask into
//! the table's cumulative `anomaly` column, and stores the named result
//! until the dataset is reloaded.
//!
//! Granularity differs deliberately between strategies: the IQR detector
//! attributes anomalies to individual cells, while isolation forest and
//! DBSCAN flag every numeric cell of an anomalous row.

mod dbscan;
mod iqr;
mod isolation_forest;

use crate::dataset::Dataset;
use crate::error::{QcError, Result};
use crate::stats;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

pub use dbscan::DbscanParams;
pub use isolation_forest::IsolationForestParams;

/// Detection strategy with its tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorConfig {
    /// Quartile bounds `[q1 - factor*iqr, q3 + factor*iqr]` per column.
    Iqr { factor: f64 },
    /// Seeded isolation forest per turbine.
    IsolationForest(IsolationForestParams),
    /// Density clustering per turbine; noise points are anomalous.
    Dbscan(DbscanParams),
}

impl DetectorConfig {
    pub fn iqr(factor: f64) -> Self {
        Self::Iqr { factor }
    }

    pub fn iqr_default() -> Self {
        Self::Iqr { factor: 1.5 }
    }

    pub fn isolation_forest(contamination: f64) -> Self {
        Self::IsolationForest(IsolationForestParams {
            contamination,
            ..IsolationForestParams::default()
        })
    }

    pub fn dbscan() -> Self {
        Self::Dbscan(DbscanParams::default())
    }

    /// Name the detection result is stored under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Iqr { .. } => "iqr",
            Self::IsolationForest(_) => "isolation_forest",
            Self::Dbscan(_) => "dbscan",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Iqr { factor } => {
                if !factor.is_finite() || *factor < 0.0 {
                    return Err(QcError::InvalidParameter(format!(
                        "iqr factor must be non-negative, got {factor}"
                    )));
                }
            }
            Self::IsolationForest(params) => {
                if !(params.contamination > 0.0 && params.contamination <= 0.5) {
                    return Err(QcError::InvalidParameter(format!(
                        "contamination must be in (0, 0.5], got {}",
                        params.contamination
                    )));
                }
                if params.n_estimators == 0 {
                    return Err(QcError::InvalidParameter(
                        "n_estimators must be positive".to_string(),
                    ));
                }
            }
            Self::Dbscan(params) => {
                if !(params.retained_variance > 0.0 && params.retained_variance <= 1.0) {
                    return Err(QcError::InvalidParameter(format!(
                        "retained variance must be in (0, 1], got {}",
                        params.retained_variance
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parameters echoed into the detection stats.
    fn parameters(&self) -> HashMap<String, f64> {
        match self {
            Self::Iqr { factor } => HashMap::from([("factor".to_string(), *factor)]),
            Self::IsolationForest(p) => HashMap::from([
                ("contamination".to_string(), p.contamination),
                ("n_estimators".to_string(), p.n_estimators as f64),
                ("seed".to_string(), p.seed as f64),
            ]),
            Self::Dbscan(p) => HashMap::from([
                ("retained_variance".to_string(), p.retained_variance),
                ("epsilon_quantile".to_string(), p.epsilon_quantile),
            ]),
        }
    }
}

/// Aggregate statistics of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionStats {
    pub method: String,
    pub total_rows: usize,
    pub anomalous_rows: usize,
    pub row_percentage: f64,
    pub anomalous_cells: usize,
    pub cell_percentage: f64,
    pub parameters: HashMap<String, f64>,
}

/// A named detection result: full-size row and cell masks plus stats.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Numeric columns the cell mask covers, in table order.
    pub columns: Vec<String>,
    /// One flag per table row.
    pub row_mask: Vec<bool>,
    /// One flag per cell, indexed `[column][row]`.
    pub cell_mask: Vec<Vec<bool>>,
    pub stats: DetectionStats,
}

impl Detection {
    pub fn anomalous_rows(&self) -> usize {
        self.row_mask.iter().filter(|&&f| f).count()
    }

    pub fn flagged_cells(&self) -> usize {
        self.cell_mask
            .iter()
            .map(|col| col.iter().filter(|&&f| f).count())
            .sum()
    }
}

/// One turbine group's masks: `rows[i]` and `cells[col][i]` refer to the
/// i-th row of the group, not the table.
struct GroupMasks {
    rows: Vec<bool>,
    cells: Vec<Vec<bool>>,
}

impl GroupMasks {
    fn all_false(n_cols: usize, n_rows: usize) -> Self {
        Self {
            rows: vec![false; n_rows],
            cells: vec![vec![false; n_rows]; n_cols],
        }
    }

    /// Row-granularity masks: every numeric cell of a flagged row is flagged.
    fn from_rows(rows: Vec<bool>, n_cols: usize) -> Self {
        let cells = vec![rows.clone(); n_cols];
        Self { rows, cells }
    }
}

/// Computes and stores named detections against one dataset session.
///
/// The mask store lives until [`AnomalyDetector::clear`]; after a dataset
/// reload the detector must be cleared (or rebuilt) since stored masks no
/// longer match the table.
#[derive(Debug, Default)]
pub struct AnomalyDetector {
    results: HashMap<String, Detection>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one detection strategy over every turbine group of the dataset.
    ///
    /// The resulting row mask is OR-ed into the table's cumulative `anomaly`
    /// column and the detection is stored under the strategy's name,
    /// replacing any previous run of the same strategy.
    pub fn detect(
        &mut self,
        dataset: &mut Dataset,
        config: &DetectorConfig,
    ) -> Result<&Detection> {
        config.validate()?;

        let columns = dataset.numeric_columns();
        let n_rows = dataset.table().n_rows();
        let n_cols = columns.len();

        let mut row_mask = vec![false; n_rows];
        let mut cell_mask = vec![vec![false; n_rows]; n_cols];

        for (turbine_id, rows) in dataset.table().group_rows() {
            // Column-major numeric block for this group.
            let block: Vec<Vec<f64>> = columns
                .iter()
                .map(|name| {
                    let col = dataset.table().column(name).unwrap_or(&[]);
                    rows.iter().map(|&r| col[r]).collect()
                })
                .collect();

            let masks = match config {
                DetectorConfig::Iqr { factor } => iqr::detect_group(&block, *factor),
                DetectorConfig::IsolationForest(params) => {
                    isolation_forest::detect_group(&block, params)
                }
                DetectorConfig::Dbscan(params) => dbscan::detect_group(&block, params),
            };

            debug!(
                method = config.name(),
                turbine = %turbine_id,
                rows = rows.len(),
                flagged = masks.rows.iter().filter(|&&f| f).count(),
                "detected turbine group"
            );

            // Merge by original row identity; per-index overwrite keeps the
            // merge order-independent.
            for (i, &row) in rows.iter().enumerate() {
                row_mask[row] = masks.rows[i];
                for c in 0..n_cols {
                    cell_mask[c][row] = masks.cells[c][i];
                }
            }
        }

        dataset.table_mut().or_anomaly(&row_mask)?;

        let anomalous_rows = row_mask.iter().filter(|&&f| f).count();
        let anomalous_cells: usize = cell_mask
            .iter()
            .map(|col| col.iter().filter(|&&f| f).count())
            .sum();
        let total_cells = n_rows * n_cols;

        let stats = DetectionStats {
            method: config.name().to_string(),
            total_rows: n_rows,
            anomalous_rows,
            row_percentage: percentage(anomalous_rows, n_rows),
            anomalous_cells,
            cell_percentage: percentage(anomalous_cells, total_cells),
            parameters: config.parameters(),
        };

        let detection = Detection {
            columns,
            row_mask,
            cell_mask,
            stats,
        };
        let name = config.name().to_string();
        self.results.insert(name.clone(), detection);
        Ok(&self.results[&name])
    }

    /// Stored detection by name.
    pub fn detection(&self, name: &str) -> Option<&Detection> {
        self.results.get(name)
    }

    /// Stored stats by name.
    pub fn stats(&self, name: &str) -> Option<&DetectionStats> {
        self.results.get(name).map(|d| &d.stats)
    }

    /// Names of all stored detections.
    pub fn mask_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.results.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Discard all stored detections (call after a dataset reload).
    pub fn clear(&mut self) {
        self.results.clear();
    }

    /// Overwrite every cell flagged by the named mask with missing.
    ///
    /// Returns the flagged-cell count. The table is untouched if the mask is
    /// unknown or no longer matches the table's shape. Applying the same
    /// mask twice flags the same (now already missing) cells; only a fresh
    /// `detect` run sees the mutated table.
    pub fn apply_mask(&self, dataset: &mut Dataset, name: &str) -> Result<usize> {
        let detection = self
            .results
            .get(name)
            .ok_or_else(|| QcError::UnknownMask(name.to_string()))?;

        let n_rows = dataset.table().n_rows();
        if detection.row_mask.len() != n_rows {
            return Err(QcError::MaskMismatch(format!(
                "mask covers {} rows, table has {n_rows}",
                detection.row_mask.len()
            )));
        }
        for column in &detection.columns {
            if !dataset.table().has_column(column) {
                return Err(QcError::MaskMismatch(format!(
                    "mask column '{column}' is not in the table"
                )));
            }
        }

        let mut removed = 0;
        for (c, column) in detection.columns.iter().enumerate() {
            // Validated above; the error arms are unreachable.
            let mut values = dataset.table().column(column).unwrap_or(&[]).to_vec();
            for (row, &flagged) in detection.cell_mask[c].iter().enumerate() {
                if flagged {
                    values[row] = f64::NAN;
                    removed += 1;
                }
            }
            let _ = dataset.table_mut().set_column(column, values);
        }

        debug!(mask = name, removed, "applied anomaly mask");
        Ok(removed)
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// Median-impute the remaining gaps of a column-major block. Columns without
/// any finite value become all-zero so distance computations stay defined.
fn median_impute(block: &[Vec<f64>]) -> Vec<Vec<f64>> {
    block
        .iter()
        .map(|col| {
            let finite = stats::finite_values(col);
            let fill = if finite.is_empty() {
                0.0
            } else {
                stats::median(&finite)
            };
            col.iter()
                .map(|&v| if v.is_finite() { v } else { fill })
                .collect()
        })
        .collect()
}

/// Transpose a column-major block into row vectors.
fn to_rows(block: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n_rows = block.first().map_or(0, |c| c.len());
    (0..n_rows)
        .map(|r| block.iter().map(|col| col[r]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SignalCatalog;
    use crate::table::DataTable;
    use chrono::{Duration, TimeZone, Utc};

    fn two_turbine_dataset() -> Dataset {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let n = 40;
        let timestamps: Vec<_> = (0..2 * n)
            .map(|i| base + Duration::minutes(10 * (i as i64 % n as i64)))
            .collect();
        let mut ids = vec!["T01"; n];
        ids.extend(vec!["T02"; n]);

        // Well-behaved wind speeds in [3, 15] with one wild value injected
        // into turbine 1.
        let mut wind: Vec<f64> = (0..2 * n)
            .map(|i| 3.0 + 12.0 * ((i as f64 * 0.37).sin() * 0.5 + 0.5))
            .collect();
        wind[10] = 500.0;
        let power: Vec<f64> = wind.iter().map(|w| w * 100.0).collect();

        let table = DataTable::builder()
            .timestamps(timestamps)
            .turbine_ids(ids)
            .column("wind_speed", wind)
            .column("power", power)
            .build()
            .unwrap();
        Dataset::new("test", table, &SignalCatalog::new())
    }

    #[test]
    fn iqr_flags_only_the_injected_row() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        let detection = detector
            .detect(&mut dataset, &DetectorConfig::iqr(1.5))
            .unwrap();

        assert_eq!(detection.anomalous_rows(), 1);
        assert!(detection.row_mask[10]);
        // Turbine 2 rows (40..80) untouched.
        assert!(detection.row_mask[40..].iter().all(|&f| !f));
    }

    #[test]
    fn detection_updates_cumulative_anomaly_column() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        detector
            .detect(&mut dataset, &DetectorConfig::iqr(1.5))
            .unwrap();

        assert!(dataset.table().anomaly()[10]);
        assert_eq!(
            dataset.table().anomaly().iter().filter(|&&f| f).count(),
            1
        );
    }

    #[test]
    fn apply_mask_replaces_cells_and_counts_them() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        detector
            .detect(&mut dataset, &DetectorConfig::iqr(1.5))
            .unwrap();

        let removed = detector.apply_mask(&mut dataset, "iqr").unwrap();

        // Both wind_speed and power carry the injected value.
        assert_eq!(removed, 2);
        assert!(dataset.table().column("wind_speed").unwrap()[10].is_nan());
        assert!(dataset.table().column("power").unwrap()[10].is_nan());
    }

    #[test]
    fn unknown_mask_is_an_error() {
        let mut dataset = two_turbine_dataset();
        let detector = AnomalyDetector::new();
        let err = detector.apply_mask(&mut dataset, "iqr").unwrap_err();
        assert!(matches!(err, QcError::UnknownMask(_)));
    }

    #[test]
    fn stale_mask_leaves_table_untouched() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        detector
            .detect(&mut dataset, &DetectorConfig::iqr(1.5))
            .unwrap();

        // Reduce the table behind the detector's back.
        dataset
            .table_mut()
            .drop_columns(&["power".to_string()]);

        let before = dataset.table().column("wind_speed").unwrap().to_vec();
        let err = detector.apply_mask(&mut dataset, "iqr").unwrap_err();

        assert!(matches!(err, QcError::MaskMismatch(_)));
        assert_eq!(
            dataset.table().column("wind_speed").unwrap(),
            &before[..]
        );
    }

    #[test]
    fn repeated_detection_is_bit_identical() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();

        for config in [
            DetectorConfig::iqr(1.5),
            DetectorConfig::isolation_forest(0.05),
            DetectorConfig::dbscan(),
        ] {
            let first = detector.detect(&mut dataset, &config).unwrap();
            let first_rows = first.row_mask.clone();
            let first_cells = first.cell_mask.clone();

            let second = detector.detect(&mut dataset, &config).unwrap();
            assert_eq!(second.row_mask, first_rows, "{}", config.name());
            assert_eq!(second.cell_mask, first_cells, "{}", config.name());
        }
    }

    #[test]
    fn row_granular_strategies_flag_whole_rows() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        let detection = detector
            .detect(&mut dataset, &DetectorConfig::isolation_forest(0.05))
            .unwrap();

        for (c, _) in detection.columns.iter().enumerate() {
            assert_eq!(detection.cell_mask[c], detection.row_mask);
        }
    }

    #[test]
    fn invalid_contamination_is_rejected() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        let err = detector
            .detect(&mut dataset, &DetectorConfig::isolation_forest(0.9))
            .unwrap_err();
        assert!(matches!(err, QcError::InvalidParameter(_)));
    }

    #[test]
    fn stats_report_counts_and_parameters() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        detector
            .detect(&mut dataset, &DetectorConfig::iqr(2.0))
            .unwrap();

        let stats = detector.stats("iqr").unwrap();
        assert_eq!(stats.total_rows, 80);
        assert_eq!(stats.parameters["factor"], 2.0);
        assert_eq!(detector.mask_names(), vec!["iqr"]);
    }

    #[test]
    fn clear_discards_results() {
        let mut dataset = two_turbine_dataset();
        let mut detector = AnomalyDetector::new();
        detector
            .detect(&mut dataset, &DetectorConfig::iqr(1.5))
            .unwrap();

        detector.clear();
        assert!(detector.detection("iqr").is_none());
    }

    #[test]
    fn median_impute_fills_gaps() {
        let block = vec![vec![1.0, f64::NAN, 3.0], vec![f64::NAN; 3]];
        let filled = median_impute(&block);

        assert_eq!(filled[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(filled[1], vec![0.0, 0.0, 0.0]);
    }
}
