//! Bounded-gap imputation for numeric signal columns.
//!
//! Only short missing-value runs are ever filled: a candidate fill value is
//! computed for every missing cell, but written back only where the cell's
//! run of consecutive missing values is at most `max_gap` long. Long outages
//! stay missing so that downstream availability numbers remain honest.
//! Non-numeric columns are never touched.

use crate::stats;
use crate::table::DataTable;
use std::collections::HashMap;
use tracing::debug;

/// How candidate fill values are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImputeMethod {
    /// Linear interpolation between the valid values bounding a run,
    /// bridging at most 2 consecutive missing values from either run edge.
    Interpolation,
    /// K-nearest-neighbour imputation over all numeric columns jointly,
    /// with distance-weighted averaging.
    Knn,
}

/// Gap imputation configuration.
#[derive(Debug, Clone)]
pub struct ImputeConfig {
    /// Candidate computation method.
    pub method: ImputeMethod,
    /// Longest missing run (in cells) that may be filled.
    pub max_gap: usize,
    /// Number of neighbours for KNN imputation.
    pub n_neighbors: usize,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self {
            method: ImputeMethod::Interpolation,
            max_gap: 3,
            n_neighbors: 3,
        }
    }
}

impl ImputeConfig {
    pub fn interpolation() -> Self {
        Self::default()
    }

    pub fn knn() -> Self {
        Self {
            method: ImputeMethod::Knn,
            ..Self::default()
        }
    }

    /// Set the longest fillable missing run.
    pub fn max_gap(mut self, max_gap: usize) -> Self {
        self.max_gap = max_gap;
        self
    }

    /// Set the KNN neighbour count.
    pub fn n_neighbors(mut self, n_neighbors: usize) -> Self {
        self.n_neighbors = n_neighbors.max(1);
        self
    }
}

/// Per-column fill counts from one imputation pass.
#[derive(Debug, Clone, Default)]
pub struct ImputeSummary {
    /// Cells filled per column.
    pub filled: HashMap<String, usize>,
}

impl ImputeSummary {
    /// Total cells filled across all columns.
    pub fn total_filled(&self) -> usize {
        self.filled.values().sum()
    }
}

/// A maximal run of consecutive missing values: (start index, length).
fn nan_runs(values: &[f64]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, v) in values.iter().enumerate() {
        match (v.is_finite(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                runs.push((s, i - s));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, values.len() - s));
    }
    runs
}

/// Fill short missing runs in every numeric column of the table in place.
pub fn impute(table: &mut DataTable, config: &ImputeConfig) -> ImputeSummary {
    let numeric = table.numeric_columns();
    let candidates = match config.method {
        ImputeMethod::Interpolation => interpolation_candidates(table, &numeric),
        ImputeMethod::Knn => knn_candidates(table, &numeric, config.n_neighbors),
    };

    let mut summary = ImputeSummary::default();
    for name in &numeric {
        let original = match table.column(name) {
            Some(col) => col.to_vec(),
            None => continue,
        };
        let Some(fills) = candidates.get(name) else {
            continue;
        };

        let mut column = original.clone();
        let mut filled = 0;
        for (start, len) in nan_runs(&original) {
            if len > config.max_gap {
                continue;
            }
            for pos in start..start + len {
                if let Some(&candidate) = fills.get(&pos) {
                    if candidate.is_finite() {
                        column[pos] = candidate;
                        filled += 1;
                    }
                }
            }
        }

        if filled > 0 {
            // Length unchanged; the error arm is unreachable.
            let _ = table.set_column(name, column);
        }
        summary.filled.insert(name.clone(), filled);
    }

    debug!(
        method = ?config.method,
        max_gap = config.max_gap,
        filled = summary.total_filled(),
        "imputed short gaps"
    );
    summary
}

/// Linear-interpolation candidates per column: position -> fill value.
///
/// A missing cell gets a candidate if it lies within 2 cells of a run edge
/// that has a valid anchor. Two-anchor runs interpolate linearly between the
/// anchors; one-anchor (leading/trailing) runs take the anchor value.
fn interpolation_candidates(
    table: &DataTable,
    numeric: &[String],
) -> HashMap<String, HashMap<usize, f64>> {
    const BRIDGE: usize = 2;

    let mut all = HashMap::new();
    for name in numeric {
        let Some(values) = table.column(name) else {
            continue;
        };

        let mut fills = HashMap::new();
        for (start, len) in nan_runs(values) {
            let left = start.checked_sub(1).map(|i| (i, values[i]));
            let right_idx = start + len;
            let right = values.get(right_idx).map(|&v| (right_idx, v));

            for pos in start..start + len {
                let dist_left = pos - start + 1;
                let dist_right = start + len - pos;

                let candidate = match (left, right) {
                    (Some((li, lv)), Some((ri, rv)))
                        if dist_left <= BRIDGE || dist_right <= BRIDGE =>
                    {
                        let t = (pos - li) as f64 / (ri - li) as f64;
                        Some(lv + (rv - lv) * t)
                    }
                    (Some((_, lv)), None) if dist_left <= BRIDGE => Some(lv),
                    (None, Some((_, rv))) if dist_right <= BRIDGE => Some(rv),
                    _ => None,
                };
                if let Some(c) = candidate {
                    fills.insert(pos, c);
                }
            }
        }
        all.insert(name.clone(), fills);
    }
    all
}

/// KNN candidates per column: position -> fill value.
///
/// Distances are NaN-Euclidean over all numeric columns jointly: squared
/// differences over co-observed coordinates, scaled by
/// `n_columns / n_observed`. Donors must observe the target column; their
/// values are averaged with weights `1 / distance` (zero-distance donors
/// average unweighted). With no donors the column mean is used.
fn knn_candidates(
    table: &DataTable,
    numeric: &[String],
    n_neighbors: usize,
) -> HashMap<String, HashMap<usize, f64>> {
    let n_rows = table.n_rows();
    let n_cols = numeric.len();

    // Row-major snapshot of the numeric block.
    let columns: Vec<&[f64]> = numeric
        .iter()
        .filter_map(|name| table.column(name))
        .collect();
    let row = |r: usize| -> Vec<f64> { columns.iter().map(|col| col[r]).collect() };

    let column_means: Vec<f64> = columns
        .iter()
        .map(|col| stats::mean(&stats::finite_values(col)))
        .collect();

    let mut all: HashMap<String, HashMap<usize, f64>> = HashMap::new();
    for r in 0..n_rows {
        let target = row(r);
        let missing: Vec<usize> = (0..n_cols).filter(|&c| !target[c].is_finite()).collect();
        if missing.is_empty() {
            continue;
        }

        // Distance from this row to every other row, shared across the
        // row's missing columns.
        let mut distances: Vec<(usize, f64)> = Vec::new();
        for other in 0..n_rows {
            if other == r {
                continue;
            }
            let candidate = row(other);
            let mut sum_sq = 0.0;
            let mut observed = 0;
            for c in 0..n_cols {
                if target[c].is_finite() && candidate[c].is_finite() {
                    sum_sq += (target[c] - candidate[c]).powi(2);
                    observed += 1;
                }
            }
            if observed > 0 {
                let d = (n_cols as f64 / observed as f64 * sum_sq).sqrt();
                distances.push((other, d));
            }
        }
        distances.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        for &c in &missing {
            let donors: Vec<(f64, f64)> = distances
                .iter()
                .filter(|(other, _)| columns[c][*other].is_finite())
                .take(n_neighbors)
                .map(|&(other, d)| (columns[c][other], d))
                .collect();

            let fill = if donors.is_empty() {
                column_means[c]
            } else if donors.iter().any(|&(_, d)| d < 1e-12) {
                let exact: Vec<f64> = donors
                    .iter()
                    .filter(|&&(_, d)| d < 1e-12)
                    .map(|&(v, _)| v)
                    .collect();
                stats::mean(&exact)
            } else {
                let weight_sum: f64 = donors.iter().map(|&(_, d)| 1.0 / d).sum();
                donors.iter().map(|&(v, d)| v / d).sum::<f64>() / weight_sum
            };

            all.entry(numeric[c].clone()).or_default().insert(r, fill);
        }
    }
    all
}
