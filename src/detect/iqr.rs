//! Interquartile-range outlier detection for one turbine group.

use super::GroupMasks;
use crate::stats;

/// Fewer finite values than this leaves a column unflagged; quartiles over
/// tiny samples are meaningless.
const MIN_SAMPLES: usize = 4;

/// Flag cells outside `[q1 - factor*iqr, q3 + factor*iqr]` per column.
///
/// The cell mask is per feature; the row mask is the OR across columns.
/// Missing cells are never flagged (a missing value is not an outlier).
pub(super) fn detect_group(block: &[Vec<f64>], factor: f64) -> GroupMasks {
    let n_cols = block.len();
    let n_rows = block.first().map_or(0, |c| c.len());
    let mut masks = GroupMasks::all_false(n_cols, n_rows);

    for (c, column) in block.iter().enumerate() {
        let finite = stats::finite_values(column);
        if finite.len() < MIN_SAMPLES {
            continue;
        }

        let q1 = stats::quantile(&finite, 0.25);
        let q3 = stats::quantile(&finite, 0.75);
        let iqr = q3 - q1;
        let lower = q1 - factor * iqr;
        let upper = q3 + factor * iqr;

        for (i, &value) in column.iter().enumerate() {
            if value.is_finite() && (value < lower || value > upper) {
                masks.cells[c][i] = true;
                masks.rows[i] = true;
            }
        }
    }

    masks
}
