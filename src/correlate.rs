//! Pairwise correlation and correlation-driven signal reduction.
//!
//! Correlation is computed pairwise-complete: each pair of columns uses only
//! rows where both values are present, and stays undefined (NaN) below a
//! minimum co-observed sample count. Reduction clusters the columns by
//! average-linkage agglomeration over `1 - |r|` distances and keeps one
//! max-variance representative per cluster.

use crate::stats;
use std::collections::HashMap;

/// Correlation estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    /// Rank correlation: average ranks per pairwise-complete sample, then
    /// Pearson over the ranks.
    Spearman,
}

/// Symmetric correlation matrix over numeric columns. NaN entries are
/// undefined (insufficient co-observations or zero variance).
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Entry by index.
    pub fn value_at(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    /// Entry by column names, if both exist.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        Some(self.values[i][j])
    }
}

/// Compute the pairwise-complete correlation matrix over named series.
///
/// A pair is undefined unless at least `min_periods` jointly finite
/// observations exist.
pub fn correlation_matrix(
    columns: &[String],
    series: &[&[f64]],
    method: CorrelationMethod,
    min_periods: usize,
) -> CorrelationMatrix {
    let n = columns.len();
    let mut values = vec![vec![f64::NAN; n]; n];

    for i in 0..n {
        values[i][i] = 1.0;
        for j in i + 1..n {
            let mut x = Vec::new();
            let mut y = Vec::new();
            for (&a, &b) in series[i].iter().zip(series[j].iter()) {
                if a.is_finite() && b.is_finite() {
                    x.push(a);
                    y.push(b);
                }
            }

            let r = if x.len() < min_periods.max(2) {
                f64::NAN
            } else {
                match method {
                    CorrelationMethod::Pearson => stats::pearson(&x, &y),
                    CorrelationMethod::Spearman => {
                        stats::pearson(&stats::average_ranks(&x), &stats::average_ranks(&y))
                    }
                }
            };
            values[i][j] = r;
            values[j][i] = r;
        }
    }

    CorrelationMatrix {
        columns: columns.to_vec(),
        values,
    }
}

/// A partition of numeric columns into correlation clusters with the
/// resulting removal candidates.
#[derive(Debug, Clone, Default)]
pub struct ReductionPlan {
    /// Number of flat clusters at the cut height.
    pub cluster_count: usize,
    /// Member column -> its cluster's representative.
    pub representative_map: HashMap<String, String>,
    /// One representative per cluster with more than one member.
    pub representatives: Vec<String>,
    /// Non-representative members cleared for removal (protected columns
    /// excluded).
    pub to_remove: Vec<String>,
    /// Correlation threshold the plan was cut at.
    pub threshold: f64,
}

impl ReductionPlan {
    pub fn is_empty(&self) -> bool {
        self.cluster_count == 0
    }
}

/// Build a reduction plan from a correlation matrix.
///
/// Columns whose every off-diagonal entry is undefined are dropped first;
/// fewer than 2 usable columns yields an empty plan. Remaining undefined
/// entries are treated as correlation 0.
pub fn reduction_plan(
    matrix: &CorrelationMatrix,
    threshold: f64,
    variances: &HashMap<String, f64>,
    protected: &[String],
) -> ReductionPlan {
    let n = matrix.n();
    let usable: Vec<usize> = (0..n)
        .filter(|&i| (0..n).any(|j| j != i && matrix.value_at(i, j).is_finite()))
        .collect();

    if usable.len() < 2 {
        return ReductionPlan {
            threshold,
            ..ReductionPlan::default()
        };
    }

    // Distance = 1 - |r|, undefined entries as r = 0.
    let m = usable.len();
    let mut dist = vec![vec![0.0; m]; m];
    for a in 0..m {
        for b in a + 1..m {
            let r = matrix.value_at(usable[a], usable[b]);
            let d = 1.0 - if r.is_finite() { r.abs() } else { 0.0 };
            dist[a][b] = d;
            dist[b][a] = d;
        }
    }

    let clusters = average_linkage_clusters(&dist, 1.0 - threshold);

    let mut plan = ReductionPlan {
        cluster_count: clusters.len(),
        threshold,
        ..ReductionPlan::default()
    };

    for members in &clusters {
        let names: Vec<&String> = members
            .iter()
            .map(|&i| &matrix.columns()[usable[i]])
            .collect();
        if names.len() < 2 {
            continue;
        }

        // Representative = maximum-variance member.
        let representative = names
            .iter()
            .max_by(|a, b| {
                let va = variance_or_lowest(variances, a);
                let vb = variance_or_lowest(variances, b);
                va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied()
            .cloned()
            .unwrap_or_default();

        for name in &names {
            plan.representative_map
                .insert((*name).clone(), representative.clone());
            if **name != representative && !protected.contains(*name) {
                plan.to_remove.push((*name).clone());
            }
        }
        plan.representatives.push(representative);
    }

    plan.representatives.sort();
    plan.to_remove.sort();
    plan
}

fn variance_or_lowest(variances: &HashMap<String, f64>, name: &str) -> f64 {
    let v = variances.get(name).copied().unwrap_or(f64::NAN);
    if v.is_finite() {
        v
    } else {
        f64::NEG_INFINITY
    }
}

/// Average-linkage agglomerative clustering with a flat cut.
///
/// Merges the closest pair of clusters while the merge distance stays at or
/// below `cut`, updating inter-cluster distances with the Lance-Williams
/// average rule. Average-linkage merge heights are monotone, so stopping at
/// the cut is equivalent to cutting the full dendrogram.
fn average_linkage_clusters(dist: &[Vec<f64>], cut: f64) -> Vec<Vec<usize>> {
    let n = dist.len();
    let mut members: Vec<Option<Vec<usize>>> = (0..n).map(|i| Some(vec![i])).collect();
    let mut d: Vec<Vec<f64>> = dist.to_vec();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            if members[i].is_none() {
                continue;
            }
            for j in i + 1..n {
                if members[j].is_none() {
                    continue;
                }
                if best.map_or(true, |(_, _, bd)| d[i][j] < bd) {
                    best = Some((i, j, d[i][j]));
                }
            }
        }

        let Some((i, j, merge_dist)) = best else {
            break;
        };
        if merge_dist > cut {
            break;
        }

        let size_i = members[i].as_ref().map_or(0, |m| m.len()) as f64;
        let size_j = members[j].as_ref().map_or(0, |m| m.len()) as f64;

        // Lance-Williams update for average linkage.
        for k in 0..n {
            if k == i || k == j || members[k].is_none() {
                continue;
            }
            let updated = (size_i * d[k][i] + size_j * d[k][j]) / (size_i + size_j);
            d[k][i] = updated;
            d[i][k] = updated;
        }

        let absorbed = members[j].take().unwrap_or_default();
        if let Some(m) = members[i].as_mut() {
            m.extend(absorbed);
        }
    }

    members.into_iter().flatten().collect()
}
