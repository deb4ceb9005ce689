//! File formats around a contingency study.
//!
//! - [`contingencies`]: contingency definitions from per-element CSVs or YAML/JSON
//! - [`scope`]: studied buses and per-contingency exclusions
//! - [`config`]: thresholds, compensation search and solver settings (TOML)
//! - [`export`]: dataset CSVs, summary, diagnostics and JSON report

pub mod config;
pub mod contingencies;
pub mod export;
pub mod scope;

pub use config::StudyConfig;
pub use contingencies::load_contingencies;
pub use export::{write_report, write_table, DIAGNOSTICS_FILE, REPORT_FILE, SUMMARY_FILE};
pub use scope::load_bus_scope;
