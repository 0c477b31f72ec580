//! Property-based tests for the quality pipeline.
//!
//! These verify invariants that should hold for all valid inputs: gap
//! eligibility under the imputation cap, interpolant bounds, normalization
//! ranges, and the validity-flag contract.

use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use windfarm_qc::catalog::SignalCatalog;
use windfarm_qc::dataset::{Dataset, NormalizeMethod};
use windfarm_qc::impute::{impute, ImputeConfig};
use windfarm_qc::standardize::Standardizer;
use windfarm_qc::table::DataTable;

fn make_timestamps(n: usize) -> Vec<DateTime<Utc>> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..n).map(|i| base + Duration::minutes(10 * i as i64)).collect()
}

fn single_turbine_table(columns: &[(&str, Vec<f64>)]) -> DataTable {
    let n = columns[0].1.len();
    let mut builder = DataTable::builder()
        .timestamps(make_timestamps(n))
        .turbine_ids(vec!["WT01"; n]);
    for (name, values) in columns {
        builder = builder.column(name, values.clone());
    }
    builder.build().unwrap()
}

/// Strategy: a smooth series with one gap of known length and position,
/// leaving at least two anchors on each side.
fn gapped_series(len_range: std::ops::Range<usize>, gap_range: std::ops::Range<usize>)
    -> impl Strategy<Value = (Vec<f64>, usize, usize)>
{
    (len_range, gap_range).prop_flat_map(|(len, gap)| {
        (2usize..len - gap - 2).prop_map(move |start| {
            let mut values: Vec<f64> = (0..len).map(|i| 5.0 + i as f64 * 0.25).collect();
            for v in &mut values[start..start + gap] {
                *v = f64::NAN;
            }
            (values, start, gap)
        })
    })
}

/// Gaps short enough that the 2-cell edge bridge reaches every cell.
fn bridged_gap_strategy() -> impl Strategy<Value = (Vec<f64>, usize, usize)> {
    gapped_series(20..60, 1..5)
}

fn gapped_series_strategy() -> impl Strategy<Value = (Vec<f64>, usize, usize)> {
    gapped_series(20..60, 1..8)
}

fn bounded_values_strategy(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    (min_len..max_len)
        .prop_flat_map(|len| prop::collection::vec(-100.0..100.0_f64, len))
        .prop_map(|mut v| {
            // Guarantee non-zero span so min-max scaling is defined.
            v[0] = -100.0;
            let last = v.len() - 1;
            v[last] = 100.0;
            v
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // ==== Imputation ====

    #[test]
    // Gaps up to 4 cells are reachable from both run edges, so an eligible
    // run fills completely; longer runs are exercised separately below.
    fn gap_is_filled_iff_within_cap((values, start, gap) in bridged_gap_strategy(), max_gap in 1usize..5) {
        let mut table = single_turbine_table(&[("wind_speed", values)]);
        let summary = impute(&mut table, &ImputeConfig::interpolation().max_gap(max_gap));

        let column = table.column("wind_speed").unwrap();
        let filled = column[start..start + gap].iter().all(|v| v.is_finite());
        let untouched = column[start..start + gap].iter().all(|v| v.is_nan());

        if gap <= max_gap {
            prop_assert!(filled);
            prop_assert_eq!(summary.total_filled(), gap);
        } else {
            prop_assert!(untouched);
            prop_assert_eq!(summary.total_filled(), 0);
        }
    }

    #[test]
    fn interpolants_stay_between_anchors((values, start, gap) in gapped_series_strategy()) {
        let left = values[start - 1];
        let right = values[start + gap];
        let mut table = single_turbine_table(&[("wind_speed", values)]);
        impute(&mut table, &ImputeConfig::interpolation().max_gap(8));

        let column = table.column("wind_speed").unwrap();
        let lo = left.min(right) - 1e-9;
        let hi = left.max(right) + 1e-9;
        // Cells beyond the 2-cell edge bridge stay missing; every filled
        // cell must lie between the run's anchors.
        for &v in &column[start..start + gap] {
            if v.is_finite() {
                prop_assert!(v >= lo && v <= hi);
            }
        }
    }

    #[test]
    fn imputation_never_touches_observed_cells((values, start, gap) in gapped_series_strategy()) {
        let original = values.clone();
        let mut table = single_turbine_table(&[("wind_speed", values)]);
        impute(&mut table, &ImputeConfig::interpolation().max_gap(8));

        let column = table.column("wind_speed").unwrap();
        for (i, (&after, &before)) in column.iter().zip(original.iter()).enumerate() {
            if !(start..start + gap).contains(&i) {
                prop_assert_eq!(after, before);
            }
        }
    }

    // ==== Normalization ====

    #[test]
    fn min_max_output_lies_in_unit_interval(values in bounded_values_strategy(10, 80)) {
        let catalog = SignalCatalog::new();
        let table = single_turbine_table(&[("stator_temp", values)]);
        let dataset = Dataset::new("prop", table, &catalog);

        let normalized = dataset.normalize(NormalizeMethod::MinMax);
        for &v in normalized.column("stator_temp").unwrap() {
            prop_assert!((-1e-12..=1.0 + 1e-12).contains(&v));
        }
    }

    #[test]
    fn z_score_output_is_centered(values in bounded_values_strategy(10, 80)) {
        let catalog = SignalCatalog::new();
        let table = single_turbine_table(&[("stator_temp", values)]);
        let dataset = Dataset::new("prop", table, &catalog);

        let normalized = dataset.normalize(NormalizeMethod::ZScore);
        let column = normalized.column("stator_temp").unwrap();
        let mean: f64 = column.iter().sum::<f64>() / column.len() as f64;
        prop_assert!(mean.abs() < 1e-9);
    }

    // ==== Validity flags ====

    #[test]
    fn row_invalid_iff_a_ranged_signal_violates(values in prop::collection::vec(-10.0..50.0_f64, 10..60)) {
        let catalog = SignalCatalog::new().with_range("wind_speed", 0.0, 40.0);
        let raw = single_turbine_table(&[("wind_speed", values.clone())]);

        let table = Standardizer::new(&catalog).standardize(raw, "scada");
        for (i, &v) in values.iter().enumerate() {
            let violates = !(0.0..=40.0).contains(&v);
            prop_assert_eq!(table.is_invalid()[i], violates);
        }
    }

    #[test]
    fn unranged_signals_never_invalidate(values in prop::collection::vec(-1e6..1e6_f64, 10..60)) {
        let catalog = SignalCatalog::new().with_range("wind_speed", 0.0, 40.0);
        let raw = single_turbine_table(&[("ambient_temp", values)]);

        let table = Standardizer::new(&catalog).standardize(raw, "scada");
        prop_assert!(table.is_invalid().iter().all(|&f| !f));
    }

    // ==== Mapping ====

    #[test]
    fn standardize_preserves_row_count_and_values(values in prop::collection::vec(0.0..40.0_f64, 10..60)) {
        let mapping = HashMap::from([("WindSpeed_avg".to_string(), "wind_speed".to_string())]);
        let catalog = SignalCatalog::new().with_mapping("scada", mapping);
        let raw = single_turbine_table(&[("WindSpeed_avg", values.clone())]);

        let table = Standardizer::new(&catalog).standardize(raw, "scada");
        prop_assert_eq!(table.n_rows(), values.len());
        prop_assert_eq!(table.column("wind_speed").unwrap(), values.as_slice());
    }
}
