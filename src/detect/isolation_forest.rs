//! Seeded isolation forest for one turbine group.
//!
//! Standard construction: each tree is grown on a random subsample with
//! random axis-aligned splits; anomalous points isolate in few splits, so
//! short average path lengths mean high anomaly scores. The fixed seed makes
//! repeated runs on an unchanged group bit-identical.

use super::{median_impute, to_rows, GroupMasks};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Euler-Mascheroni constant for the average-path-length normalizer.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation forest tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestParams {
    /// Expected fraction of anomalous rows, in (0, 0.5].
    pub contamination: f64,
    /// Ensemble size.
    pub n_estimators: usize,
    /// Subsample size per tree (capped at the group size).
    pub max_samples: usize,
    /// Random seed; fixed for deterministic masks.
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

impl IsolationForestParams {
    pub fn contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

enum Tree {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: Box<Tree>,
        right: Box<Tree>,
    },
}

/// Flag the rows with the highest anomaly scores; every numeric cell of a
/// flagged row is flagged (row-granularity cell mask).
pub(super) fn detect_group(block: &[Vec<f64>], params: &IsolationForestParams) -> GroupMasks {
    let n_cols = block.len();
    let n_rows = block.first().map_or(0, |c| c.len());
    if n_rows == 0 || n_cols == 0 {
        return GroupMasks::all_false(n_cols, n_rows);
    }

    let rows = to_rows(&median_impute(block));
    let scores = anomaly_scores(&rows, params);

    // Top contamination-fraction of scores; stable ordering breaks ties by
    // row index so the mask stays deterministic.
    let n_flagged = ((params.contamination * n_rows as f64).ceil() as usize).min(n_rows);
    let mut order: Vec<usize> = (0..n_rows).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut row_flags = vec![false; n_rows];
    for &i in order.iter().take(n_flagged) {
        row_flags[i] = true;
    }

    GroupMasks::from_rows(row_flags, n_cols)
}

/// Anomaly score per row: `2^(-E[h] / c(psi))`.
fn anomaly_scores(rows: &[Vec<f64>], params: &IsolationForestParams) -> Vec<f64> {
    let n = rows.len();
    let psi = params.max_samples.min(n).max(2);
    let height_limit = (psi as f64).log2().ceil() as usize;
    let normalizer = average_path_length(psi);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut path_sums = vec![0.0; n];

    for _ in 0..params.n_estimators {
        let sample = sample_indices(&mut rng, n, psi);
        let tree = grow_tree(rows, &sample, 0, height_limit, &mut rng);
        for (i, row) in rows.iter().enumerate() {
            path_sums[i] += path_length(&tree, row, 0);
        }
    }

    path_sums
        .iter()
        .map(|&sum| {
            let avg = sum / params.n_estimators as f64;
            2f64.powf(-avg / normalizer)
        })
        .collect()
}

/// Sample `k` distinct indices from `0..n` without replacement.
fn sample_indices(rng: &mut StdRng, n: usize, k: usize) -> Vec<usize> {
    rand::seq::index::sample(rng, n, k.min(n)).into_vec()
}

fn grow_tree(
    rows: &[Vec<f64>],
    indices: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Tree {
    if indices.len() <= 1 || depth >= height_limit {
        return Tree::Leaf {
            size: indices.len(),
        };
    }

    let n_features = rows[0].len();

    // Features with spread among the current points; constant features
    // cannot split.
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|f| {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &i in indices {
                min = min.min(rows[i][f]);
                max = max.max(rows[i][f]);
            }
            (max > min).then_some((f, min, max))
        })
        .collect();

    let Some(&(feature, min, max)) = splittable
        .get(rng.gen_range(0..splittable.len().max(1)))
    else {
        return Tree::Leaf {
            size: indices.len(),
        };
    };

    let value = rng.gen_range(min..max);
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.iter().partition(|&&i| rows[i][feature] < value);

    Tree::Split {
        feature,
        value,
        left: Box::new(grow_tree(rows, &left, depth + 1, height_limit, rng)),
        right: Box::new(grow_tree(rows, &right, depth + 1, height_limit, rng)),
    }
}

fn path_length(tree: &Tree, row: &[f64], depth: usize) -> f64 {
    match tree {
        Tree::Leaf { size } => depth as f64 + average_path_length(*size),
        Tree::Split {
            feature,
            value,
            left,
            right,
        } => {
            if row[*feature] < *value {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful BST search among `n` points;
/// the normalizing constant c(n) from Liu et al.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            let harmonic = (n - 1.0).ln() + EULER_GAMMA;
            2.0 * harmonic - 2.0 * (n - 1.0) / n
        }
    }
}
