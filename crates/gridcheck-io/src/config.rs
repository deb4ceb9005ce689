//! Study configuration file (TOML).
//!
//! Every section is optional; missing keys take the built-in defaults.
//!
//! ```toml
//! [thresholds]
//! step_circuit = 0.10
//! step_voltage_control = 0.03
//! rating_threshold = 0.0
//! rating = "a"
//!
//! [[thresholds.voltage_bands]]
//! nominal_lower = 379.0
//! nominal_upper = 401.0
//! lower = 0.947368
//! upper = 1.078947
//!
//! [compensation]
//! max_iterations = 100
//! machines = [{ bus = 2204, id = "SH" }]
//!
//! [solver]
//! max_iterations = 100
//! tolerance_mva = 2.0
//! ```

use anyhow::{Context, Result};
use gridcheck_algo::{CompensationSettings, ComplianceThresholds, SessionSettings, StudySettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    #[serde(default)]
    pub thresholds: ComplianceThresholds,
    #[serde(default)]
    pub compensation: CompensationSettings,
    #[serde(default)]
    pub solver: SessionSettings,
}

impl StudyConfig {
    /// Read and validate a configuration file. The compensation section is
    /// only checked when the search is requested.
    pub fn load(path: &Path, adjust_reactive: bool) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let config: StudyConfig = toml::from_str(&data)
            .with_context(|| format!("parsing config '{}'", path.display()))?;
        config.validate(adjust_reactive)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Defaults, or the file at `path` when given.
    pub fn load_or_default(path: Option<&Path>, adjust_reactive: bool) -> Result<Self> {
        match path {
            Some(path) => Self::load(path, adjust_reactive),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self, adjust_reactive: bool) -> Result<()> {
        self.study_settings(adjust_reactive)
            .validate()
            .context("invalid study configuration")?;
        self.solver.validate().context("invalid solver configuration")?;
        Ok(())
    }

    pub fn study_settings(&self, adjust_reactive: bool) -> StudySettings {
        StudySettings {
            thresholds: self.thresholds.clone(),
            compensation: self.compensation.clone(),
            adjust_reactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcheck_algo::compliance::VoltageBands;
    use gridcheck_core::MachineKey;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("study.toml");
        fs::write(&path, "").unwrap();
        let config = StudyConfig::load(&path, true).unwrap();
        assert_eq!(config, StudyConfig::default());
        assert_eq!(config.thresholds.voltage_bands, VoltageBands::default());
    }

    #[test]
    fn overrides_individual_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("study.toml");
        fs::write(
            &path,
            "[thresholds]\nstep_circuit = 0.08\nrating = \"b\"\n\n\
             [compensation]\nmachines = [{ bus = 10, id = \"G1\" }]\n\n\
             [solver]\ntolerance_mva = 0.5\n",
        )
        .unwrap();
        let config = StudyConfig::load(&path, true).unwrap();
        assert_eq!(config.thresholds.step_circuit, 0.08);
        assert_eq!(config.thresholds.step_voltage_control, 0.03);
        assert_eq!(config.compensation.machines, vec![MachineKey::new(10, "G1")]);
        assert_eq!(config.compensation.max_iterations, 100);
        assert_eq!(config.solver.tolerance_mva, 0.5);

        let settings = config.study_settings(false);
        assert!(!settings.adjust_reactive);
        assert_eq!(settings.thresholds, config.thresholds);
    }

    #[test]
    fn compensation_checked_only_when_requested() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("study.toml");
        fs::write(&path, "[compensation]\nmachines = []\n").unwrap();
        assert!(StudyConfig::load(&path, false).is_ok());
        assert!(StudyConfig::load(&path, true).is_err());
    }

    #[test]
    fn rejects_unknown_sections_and_bad_solver_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("study.toml");
        fs::write(&path, "[output]\ndir = \"x\"\n").unwrap();
        assert!(StudyConfig::load(&path, false).is_err());

        fs::write(&path, "[solver]\nmax_iterations = 0\n").unwrap();
        let err = StudyConfig::load(&path, false).unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations"));
    }
}
