//! Column standardization and range-based validity flagging.
//!
//! The standardizer is the first pipeline stage after a vendor loader has
//! produced a raw table: it renames columns to canonical signal names,
//! computes the row-level `is_invalid` flag from the configured signal
//! ranges, and resets the cumulative `anomaly` flag that detectors later OR
//! into.

use crate::catalog::SignalCatalog;
use crate::table::DataTable;
use tracing::debug;

/// Applies catalog-driven standardization to raw tables.
#[derive(Debug)]
pub struct Standardizer<'a> {
    catalog: &'a SignalCatalog,
}

impl<'a> Standardizer<'a> {
    pub fn new(catalog: &'a SignalCatalog) -> Self {
        Self { catalog }
    }

    /// Standardize a raw table for the given dataset type.
    ///
    /// 1. Rename columns per the dataset type's mapping; unmapped names pass
    ///    through unchanged. Unknown dataset types rename nothing.
    /// 2. Flag a row invalid if ANY signal with a configured range is missing
    ///    or outside `[min, max]`. Signals without a range are never checked.
    /// 3. Reset `anomaly := false` for every row.
    pub fn standardize(&self, mut table: DataTable, dataset_type: &str) -> DataTable {
        let mapping = self.catalog.mapping(dataset_type);
        table.rename_columns(&mapping);

        let flags = self.validity_flags(&table);
        let invalid_rows = flags.iter().filter(|&&f| f).count();
        // Lengths match by construction; the error arm is unreachable.
        let _ = table.set_invalid_flags(flags);
        table.reset_anomaly();

        debug!(
            dataset_type,
            rows = table.n_rows(),
            invalid_rows,
            renamed = mapping.len(),
            "standardized table"
        );
        table
    }

    /// Row-level validity: OR across all range-checked signals present in the
    /// table. Catalog entries for signals the table lacks are ignored.
    fn validity_flags(&self, table: &DataTable) -> Vec<bool> {
        let checked: Vec<(&str, &[f64])> = self
            .catalog
            .ranges()
            .keys()
            .filter_map(|name| table.column(name).map(|col| (name.as_str(), col)))
            .collect();

        let mut flags = vec![false; table.n_rows()];
        for (name, column) in checked {
            // Unwrap is safe: the name came from the catalog keys.
            let range = self.catalog.range(name).unwrap();
            for (flag, &value) in flags.iter_mut().zip(column.iter()) {
                if !value.is_finite() || !range.contains(value) {
                    *flag = true;
                }
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn catalog() -> SignalCatalog {
        SignalCatalog::new()
            .with_mapping(
                "kelmarsh",
                HashMap::from([
                    ("Wind speed (m/s)".to_string(), "wind_speed".to_string()),
                    ("Power (kW)".to_string(), "power".to_string()),
                ]),
            )
            .with_range("wind_speed", 0.0, 35.0)
            .with_range("power", -50.0, 2500.0)
    }

    fn raw_table() -> DataTable {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..5).map(|i| base + Duration::minutes(10 * i)).collect();
        DataTable::builder()
            .timestamps(timestamps)
            .turbine_ids(vec!["T01"; 5])
            .column(
                "Wind speed (m/s)",
                vec![5.0, 40.0, f64::NAN, 7.0, -1.0],
            )
            .column("Power (kW)", vec![100.0, 120.0, 130.0, 140.0, 150.0])
            .column("ambient_noise", vec![0.1, 0.2, 0.3, 0.4, 0.5])
            .build()
            .unwrap()
    }

    #[test]
    fn renames_mapped_columns_only() {
        let catalog = catalog();
        let table = Standardizer::new(&catalog).standardize(raw_table(), "kelmarsh");

        assert!(table.column("wind_speed").is_some());
        assert!(table.column("power").is_some());
        assert!(table.column("ambient_noise").is_some());
        assert!(table.column("Wind speed (m/s)").is_none());
    }

    #[test]
    fn unknown_dataset_type_renames_nothing() {
        let catalog = catalog();
        let table = Standardizer::new(&catalog).standardize(raw_table(), "penmanshiel");

        assert!(table.column("Wind speed (m/s)").is_some());
    }

    #[test]
    fn invalid_iff_any_ranged_signal_out_of_bounds_or_missing() {
        let catalog = catalog();
        let table = Standardizer::new(&catalog).standardize(raw_table(), "kelmarsh");

        // Row 0: both signals in range -> valid.
        // Row 1: wind_speed 40 > 35 -> invalid.
        // Row 2: wind_speed missing -> invalid.
        // Row 3: both in range -> valid.
        // Row 4: wind_speed -1 < 0 -> invalid.
        assert_eq!(table.is_invalid(), &[false, true, true, false, true]);
    }

    #[test]
    fn unranged_signals_are_never_checked() {
        // ambient_noise has no configured range, so even extreme values in it
        // do not flag a row.
        let catalog = SignalCatalog::new().with_range("power", -50.0, 2500.0);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let table = DataTable::builder()
            .timestamps(vec![base])
            .turbine_ids(vec!["T01"])
            .column("ambient_noise", vec![1e12])
            .column("power", vec![100.0])
            .build()
            .unwrap();

        let table = Standardizer::new(&catalog).standardize(table, "any");
        assert_eq!(table.is_invalid(), &[false]);
    }

    #[test]
    fn catalog_signals_absent_from_table_are_ignored() {
        let catalog = SignalCatalog::new().with_range("rotor_speed", 0.0, 20.0);
        let table = Standardizer::new(&catalog).standardize(raw_table(), "kelmarsh");

        assert!(table.is_invalid().iter().all(|&f| !f));
    }

    #[test]
    fn anomaly_flag_starts_false() {
        let catalog = catalog();
        let mut raw = raw_table();
        raw.or_anomaly(&[true, true, true, true, true]).unwrap();

        let table = Standardizer::new(&catalog).standardize(raw, "kelmarsh");
        assert!(table.anomaly().iter().all(|&f| !f));
    }
}
