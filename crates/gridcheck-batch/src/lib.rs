//! Multi-case batch runner.
//!
//! A batch file lists network cases that share one contingency set, bus scope
//! and study configuration. Cases run on a rayon pool, each with its own
//! solver session; a failed case is recorded in `batch_manifest.json` and the
//! rest carry on.

pub mod job;
pub mod manifest;
pub mod runner;

pub use job::{BatchCase, BatchCaseRecord, BatchFile};
pub use manifest::{load_batch_manifest, write_batch_manifest, BatchManifest, MANIFEST_FILE};
pub use runner::{run_batch, BatchRunnerConfig, BatchSummary, NetworkSessionFactory, SessionFactory};
