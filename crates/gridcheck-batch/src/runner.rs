use crate::job::{BatchCase, BatchCaseRecord, BatchFile};
use crate::manifest::{write_batch_manifest, BatchManifest, MANIFEST_FILE};
use anyhow::{Context, Result};
use chrono::Utc;
use gridcheck_algo::{run_study, BusScope, ContingencySet, NetworkSession, PowerFlowSession, SessionSettings};
use gridcheck_io::{load_bus_scope, load_contingencies, write_report, StudyConfig};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, info_span};

/// Builds a fresh solver session for each case.
pub trait SessionFactory: Sync {
    fn create(&self, settings: &SessionSettings) -> Result<Box<dyn PowerFlowSession>>;
}

/// Sessions over JSON network cases.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkSessionFactory;

impl SessionFactory for NetworkSessionFactory {
    fn create(&self, settings: &SessionSettings) -> Result<Box<dyn PowerFlowSession>> {
        let session = NetworkSession::new(settings.clone()).context("creating solver session")?;
        Ok(Box::new(session))
    }
}

/// Everything a batch needs once its input files are read.
pub struct BatchRunnerConfig {
    pub cases: Vec<BatchCase>,
    pub contingencies: ContingencySet,
    pub scope: BusScope,
    pub config: StudyConfig,
    pub output_root: PathBuf,
    pub threads: usize,
}

impl BatchRunnerConfig {
    /// Read the shared contingency, scope and config files of `batch`.
    pub fn from_batch_file(batch: BatchFile) -> Result<Self> {
        let contingencies = load_contingencies(&batch.contingencies)?;
        let scope = match &batch.bus_scope {
            Some(path) => load_bus_scope(path)?,
            None => BusScope::default(),
        };
        let adjust_reactive = batch.cases.iter().any(|case| case.adjust_reactive);
        let config = StudyConfig::load_or_default(batch.config.as_deref(), adjust_reactive)?;
        Ok(Self {
            cases: batch.cases,
            contingencies,
            scope,
            config,
            output_root: batch.output_root,
            threads: batch.threads,
        })
    }
}

/// Counts and manifest location, for the caller to report.
pub struct BatchSummary {
    pub success: usize,
    pub failure: usize,
    pub manifest_path: PathBuf,
    pub cases: Vec<BatchCaseRecord>,
}

pub fn run_batch(config: &BatchRunnerConfig, factory: &dyn SessionFactory) -> Result<BatchSummary> {
    fs::create_dir_all(&config.output_root).with_context(|| {
        format!(
            "creating batch output root '{}'",
            config.output_root.display()
        )
    })?;

    let thread_count = if config.threads == 0 {
        num_cpus::get()
    } else {
        config.threads
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .context("building Rayon thread pool for batch runs")?;
    info!(
        cases = config.cases.len(),
        contingencies = config.contingencies.len(),
        threads = thread_count,
        "starting batch"
    );

    // Each case owns its session; nothing is shared between workers.
    let records: Vec<BatchCaseRecord> = pool.install(|| {
        config
            .cases
            .par_iter()
            .map(|case| run_case(case, config, factory))
            .collect()
    });

    let success = records.iter().filter(|record| record.is_ok()).count();
    let failure = records.len() - success;

    let manifest = BatchManifest {
        created_at: Utc::now(),
        num_cases: records.len(),
        success,
        failure,
        cases: records.clone(),
    };
    let manifest_path = config.output_root.join(MANIFEST_FILE);
    write_batch_manifest(&manifest_path, &manifest)?;
    info!(success, failure, manifest = %manifest_path.display(), "batch finished");
    Ok(BatchSummary {
        success,
        failure,
        manifest_path,
        cases: records,
    })
}

/// Run one case and export its results. Failures become an `"error"`
/// record; results recorded before an abort are still written.
fn run_case(
    case: &BatchCase,
    config: &BatchRunnerConfig,
    factory: &dyn SessionFactory,
) -> BatchCaseRecord {
    let span = info_span!("case", id = %case.id);
    let _guard = span.enter();
    let started = Instant::now();
    let output = case.results_dir(&config.output_root);
    let mut executed = 0;

    let mut runner = || -> Result<bool> {
        let settings = config.config.study_settings(case.adjust_reactive);
        let mut session = factory.create(&config.config.solver)?;
        match run_study(
            session.as_mut(),
            &case.case,
            &config.contingencies,
            &config.scope,
            &settings,
        ) {
            Ok(report) => {
                executed = report.results.len();
                write_report(&report, &output)?;
                Ok(report.all_compliant())
            }
            Err(err) => {
                if let Some(partial) = err.partial_report() {
                    executed = partial.results.len();
                    write_report(partial, &output).context("writing partial results")?;
                }
                Err(err.into())
            }
        }
    };
    let outcome = runner();

    let (status, error, compliant) = match outcome {
        Ok(compliant) => ("ok".to_string(), None, Some(compliant)),
        Err(err) => {
            error!(case = %case.case.display(), "case failed: {err:#}");
            ("error".to_string(), Some(format!("{err:#}")), None)
        }
    };
    BatchCaseRecord {
        id: case.id.clone(),
        case: case.case.display().to_string(),
        status,
        error,
        output: output.display().to_string(),
        duration_secs: started.elapsed().as_secs_f64(),
        contingencies: executed,
        compliant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::load_batch_manifest;
    use gridcheck_algo::ContingencyDefinition;
    use gridcheck_core::{BranchKey, ElementStatus};
    use std::path::Path;
    use tempfile::tempdir;

    const THREE_BUS: &str = r#"{
        "name": "three-bus",
        "buses": [
            {"number": 1, "name": "NORTH", "base_kv": 220.0, "bus_type": "swing", "vm": 1.02},
            {"number": 2, "name": "EAST", "base_kv": 220.0},
            {"number": 3, "name": "SOUTH", "base_kv": 220.0}
        ],
        "loads": [{"bus": 2, "p": 60.0, "q": 20.0}, {"bus": 3, "p": 40.0, "q": 10.0}],
        "branches": [
            {"from": 1, "to": 2, "id": "1", "r": 0.005, "x": 0.05, "rate_a": 400.0},
            {"from": 2, "to": 3, "id": "1", "r": 0.005, "x": 0.05, "rate_a": 400.0},
            {"from": 1, "to": 3, "id": "1", "r": 0.008, "x": 0.08, "rate_a": 400.0}
        ],
        "machines": [{"bus": 1, "id": "1", "pg": 100.0, "qmax": 300.0, "qmin": -300.0, "vs": 1.02}]
    }"#;

    fn config(root: &Path, cases: Vec<BatchCase>, threads: usize) -> BatchRunnerConfig {
        BatchRunnerConfig {
            cases,
            contingencies: ContingencySet::new(vec![ContingencyDefinition::new("Outage-A")
                .with_circuit(BranchKey::new(1, 3, "1"), ElementStatus::OutOfService)])
            .unwrap(),
            scope: BusScope::default(),
            config: StudyConfig::default(),
            output_root: root.join("results"),
            threads,
        }
    }

    fn case(id: &str, path: PathBuf) -> BatchCase {
        BatchCase {
            id: id.into(),
            case: path,
            results_dir: None,
            adjust_reactive: false,
        }
    }

    #[test]
    fn one_failing_case_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("winter.json");
        fs::write(&good, THREE_BUS).unwrap();
        let config = config(
            dir.path(),
            vec![
                case("winter", good),
                case("missing", dir.path().join("missing.json")),
            ],
            2,
        );

        let summary = run_batch(&config, &NetworkSessionFactory).unwrap();
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failure, 1);

        let winter = summary.cases.iter().find(|r| r.id == "winter").unwrap();
        assert_eq!(winter.contingencies, 1);
        assert_eq!(winter.compliant, Some(true));
        assert!(dir.path().join("results/winter/summary.csv").exists());

        let missing = summary.cases.iter().find(|r| r.id == "missing").unwrap();
        assert_eq!(missing.status, "error");
        assert!(missing.error.as_deref().unwrap().contains("failed to load case"));

        let manifest = load_batch_manifest(&summary.manifest_path).unwrap();
        assert_eq!(manifest.num_cases, 2);
        assert_eq!(manifest.cases[0].id, "winter");
    }

    #[test]
    fn factory_failure_is_recorded_per_case() {
        struct Broken;
        impl SessionFactory for Broken {
            fn create(&self, _: &SessionSettings) -> Result<Box<dyn PowerFlowSession>> {
                anyhow::bail!("no licence available")
            }
        }
        let dir = tempdir().unwrap();
        let config = config(dir.path(), vec![case("a", dir.path().join("a.json"))], 0);
        let summary = run_batch(&config, &Broken).unwrap();
        assert_eq!(summary.failure, 1);
        assert_eq!(summary.cases[0].error.as_deref(), Some("no licence available"));
    }

    #[test]
    fn reads_shared_inputs_from_batch_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("winter.json"), THREE_BUS).unwrap();
        fs::write(
            dir.path().join("contingencies.yaml"),
            "- name: Outage-A\n  circuits:\n    - {from: 1, to: 2, id: '1', status: 0}\n",
        )
        .unwrap();
        fs::write(dir.path().join("study.toml"), "[thresholds]\nstep_circuit = 0.2\n").unwrap();
        let path = dir.path().join("batch.toml");
        fs::write(
            &path,
            "contingencies = \"contingencies.yaml\"\nconfig = \"study.toml\"\n\n[[cases]]\nid = \"winter\"\ncase = \"winter.json\"\n",
        )
        .unwrap();

        let config = BatchRunnerConfig::from_batch_file(BatchFile::load(&path).unwrap()).unwrap();
        assert_eq!(config.contingencies.names(), vec!["Outage-A"]);
        assert_eq!(config.config.thresholds.step_circuit, 0.2);

        let summary = run_batch(&config, &NetworkSessionFactory).unwrap();
        assert_eq!(summary.success, 1);
        assert_eq!(summary.manifest_path, dir.path().join("results").join(MANIFEST_FILE));
    }
}
