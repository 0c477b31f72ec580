//! # windfarm-qc
//!
//! Data-quality and anomaly-detection toolkit for wind-farm SCADA time
//! series.
//!
//! Provides signal standardization against a catalog, bounded-gap
//! imputation, availability and variable-range reporting, correlation-based
//! feature reduction, and per-turbine anomaly detection (IQR, isolation
//! forest, DBSCAN) with reviewable masks.

#![allow(clippy::needless_range_loop)]

pub mod catalog;
pub mod correlate;
pub mod dataset;
pub mod detect;
pub mod error;
pub mod impute;
pub mod standardize;
pub mod stats;
pub mod table;

pub use error::{QcError, Result};

pub mod prelude {
    pub use crate::catalog::{SignalCatalog, SignalRange};
    pub use crate::correlate::CorrelationMethod;
    pub use crate::dataset::{Dataset, NormalizeMethod, ReduceConfig};
    pub use crate::detect::{AnomalyDetector, DetectorConfig};
    pub use crate::error::{QcError, Result};
    pub use crate::impute::{impute, ImputeConfig};
    pub use crate::standardize::Standardizer;
    pub use crate::table::{DataTable, DataTableBuilder};
}
