//! Density-based anomaly detection for one turbine group.
//!
//! Pipeline per group: median-impute remaining gaps, z-score standardize the
//! columns, project onto the principal components retaining 95% variance,
//! size the neighborhood as twice the retained component count, estimate
//! epsilon from the k-th nearest-neighbor distance distribution, then run
//! DBSCAN. Noise-labeled points are the anomalous rows.

use super::{median_impute, GroupMasks};
use crate::stats;

/// DBSCAN tuning parameters. Neighborhood size and epsilon are derived from
/// the data, so only the derivation knobs are exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct DbscanParams {
    /// Fraction of variance the PCA projection retains, in (0, 1].
    pub retained_variance: f64,
    /// Quantile of the k-th nearest-neighbor distances used as epsilon.
    pub epsilon_quantile: f64,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            retained_variance: 0.95,
            epsilon_quantile: 0.95,
        }
    }
}

impl DbscanParams {
    pub fn retained_variance(mut self, retained_variance: f64) -> Self {
        self.retained_variance = retained_variance;
        self
    }

    pub fn epsilon_quantile(mut self, epsilon_quantile: f64) -> Self {
        self.epsilon_quantile = epsilon_quantile;
        self
    }
}

/// Flag noise rows; every numeric cell of a flagged row is flagged.
pub(super) fn detect_group(block: &[Vec<f64>], params: &DbscanParams) -> GroupMasks {
    let n_cols = block.len();
    let n_rows = block.first().map_or(0, |c| c.len());
    if n_rows == 0 || n_cols == 0 {
        return GroupMasks::all_false(n_cols, n_rows);
    }

    let standardized: Vec<Vec<f64>> = median_impute(block)
        .into_iter()
        .map(|col| standardize_column(&col))
        .collect();

    let projected = match project_pca(&standardized, params.retained_variance) {
        Some(p) => p,
        // Zero total variance: every point is identical, nothing is noise.
        None => return GroupMasks::all_false(n_cols, n_rows),
    };
    let n_components = projected.first().map_or(0, |row| row.len());
    let min_pts = (2 * n_components).max(2);

    let points = projected;
    let eps = estimate_epsilon(&points, min_pts, params.epsilon_quantile);
    let labels = dbscan(&points, eps, min_pts);

    let row_flags: Vec<bool> = labels.iter().map(|&l| l == NOISE).collect();
    GroupMasks::from_rows(row_flags, n_cols)
}

fn standardize_column(column: &[f64]) -> Vec<f64> {
    let mean = stats::mean(column);
    let std = stats::std_dev(column);
    let scale = if std.is_finite() && std > 1e-10 {
        std
    } else {
        1.0
    };
    column.iter().map(|&v| (v - mean) / scale).collect()
}

/// Project rows onto the leading principal components that together retain
/// the requested variance fraction. Returns None if total variance is zero.
fn project_pca(columns: &[Vec<f64>], retained_variance: f64) -> Option<Vec<Vec<f64>>> {
    let n_cols = columns.len();
    let n_rows = columns[0].len();
    if n_rows < 2 {
        return None;
    }

    // Sample covariance of the standardized columns.
    let means: Vec<f64> = columns.iter().map(|c| stats::mean(c)).collect();
    let mut cov = vec![vec![0.0; n_cols]; n_cols];
    for i in 0..n_cols {
        for j in i..n_cols {
            let mut sum = 0.0;
            for r in 0..n_rows {
                sum += (columns[i][r] - means[i]) * (columns[j][r] - means[j]);
            }
            let c = sum / (n_rows - 1) as f64;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }

    let (eigenvalues, eigenvectors) = jacobi_eigen(cov);

    let mut order: Vec<usize> = (0..n_cols).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total: f64 = eigenvalues.iter().map(|&e| e.max(0.0)).sum();
    if total <= 0.0 {
        return None;
    }

    let mut n_components = 0;
    let mut cumulative = 0.0;
    for &k in &order {
        n_components += 1;
        cumulative += eigenvalues[k].max(0.0);
        if cumulative / total >= retained_variance {
            break;
        }
    }

    let projected: Vec<Vec<f64>> = (0..n_rows)
        .map(|r| {
            order[..n_components]
                .iter()
                .map(|&k| {
                    (0..n_cols)
                        .map(|j| (columns[j][r] - means[j]) * eigenvectors[j][k])
                        .sum()
                })
                .collect()
        })
        .collect();
    Some(projected)
}

/// Jacobi eigendecomposition of a symmetric matrix. Returns the eigenvalues
/// and the matrix whose k-th column is the k-th eigenvector.
fn jacobi_eigen(mut a: Vec<Vec<f64>>) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = a.len();
    let mut v = vec![vec![0.0; n]; n];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < 1e-20 {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                if a[p][q].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = if theta == 0.0 {
                    1.0
                } else {
                    theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                let app = a[p][p];
                let aqq = a[q][q];
                let apq = a[p][q];
                a[p][p] = c * c * app - 2.0 * s * c * apq + s * s * aqq;
                a[q][q] = s * s * app + 2.0 * s * c * apq + c * c * aqq;
                a[p][q] = 0.0;
                a[q][p] = 0.0;

                for k in 0..n {
                    if k != p && k != q {
                        let akp = a[k][p];
                        let akq = a[k][q];
                        a[k][p] = c * akp - s * akq;
                        a[p][k] = a[k][p];
                        a[k][q] = s * akp + c * akq;
                        a[q][k] = a[k][q];
                    }
                }
                for row in v.iter_mut() {
                    let vkp = row[p];
                    let vkq = row[q];
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigenvalues = (0..n).map(|i| a[i][i]).collect();
    (eigenvalues, v)
}

/// Epsilon = the requested quantile of each point's k-th nearest-neighbor
/// distance.
fn estimate_epsilon(points: &[Vec<f64>], k: usize, quantile: f64) -> f64 {
    let n = points.len();
    let mut kth_distances = Vec::with_capacity(n);

    for (i, a) in points.iter().enumerate() {
        let mut distances: Vec<f64> = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, b)| stats::euclidean_distance(a, b))
            .collect();
        distances.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

        let idx = k.saturating_sub(1).min(distances.len().saturating_sub(1));
        if let Some(&d) = distances.get(idx) {
            kth_distances.push(d);
        }
    }

    stats::quantile(&kth_distances, quantile)
}

const NOISE: i32 = -1;
const UNVISITED: i32 = -2;

/// Classic DBSCAN over precomputed points; returns a cluster label per
/// point, `NOISE` for outliers.
fn dbscan(points: &[Vec<f64>], eps: f64, min_pts: usize) -> Vec<i32> {
    let n = points.len();
    let mut labels = vec![UNVISITED; n];
    let mut cluster = 0;

    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }

        let neighbors = region_query(points, i, eps);
        if neighbors.len() < min_pts {
            labels[i] = NOISE;
            continue;
        }

        labels[i] = cluster;
        let mut queue: Vec<usize> = neighbors;
        let mut head = 0;
        while head < queue.len() {
            let j = queue[head];
            head += 1;

            if labels[j] == NOISE {
                labels[j] = cluster; // Border point reached from a core.
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = cluster;

            let j_neighbors = region_query(points, j, eps);
            if j_neighbors.len() >= min_pts {
                queue.extend(j_neighbors);
            }
        }
        cluster += 1;
    }

    labels
}

/// Indices within `eps` of point `i`, the point itself included.
fn region_query(points: &[Vec<f64>], i: usize, eps: f64) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| stats::euclidean_distance(&points[i], p) <= eps)
        .map(|(j, _)| j)
        .collect()
}
