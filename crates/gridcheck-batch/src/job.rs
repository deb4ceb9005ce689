use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

fn default_output_root() -> PathBuf {
    PathBuf::from("results")
}

fn default_threads() -> usize {
    1
}

/// One network case of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchCase {
    pub id: String,
    pub case: PathBuf,
    /// Defaults to `<output_root>/<id>`.
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
    #[serde(default)]
    pub adjust_reactive: bool,
}

impl BatchCase {
    pub fn results_dir(&self, output_root: &Path) -> PathBuf {
        self.results_dir
            .clone()
            .unwrap_or_else(|| output_root.join(&self.id))
    }
}

/// Batch description: cases plus the inputs they share.
///
/// Relative paths are resolved against the directory of the batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    pub cases: Vec<BatchCase>,
    pub contingencies: PathBuf,
    #[serde(default)]
    pub bus_scope: Option<PathBuf>,
    #[serde(default)]
    pub config: Option<PathBuf>,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Cases run concurrently; `0` uses every CPU.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl BatchFile {
    /// Parse a TOML, YAML or JSON batch file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading batch file '{}'", path.display()))?;
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let mut batch: BatchFile = match ext.as_str() {
            "toml" => toml::from_str(&data).context("parsing batch TOML")?,
            "yaml" | "yml" => serde_yaml::from_str(&data).context("parsing batch YAML")?,
            "json" => serde_json::from_str(&data).context("parsing batch JSON")?,
            other => bail!(
                "unsupported batch file extension '{other}' for '{}' (expected toml, yaml or json)",
                path.display()
            ),
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        batch.resolve_paths(base);
        batch.validate()?;
        Ok(batch)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cases.is_empty() {
            bail!("batch defines no cases");
        }
        let mut seen = HashSet::new();
        for case in &self.cases {
            if case.id.trim().is_empty() {
                bail!("batch case with an empty id ('{}')", case.case.display());
            }
            if !seen.insert(case.id.as_str()) {
                bail!("duplicate batch case id '{}'", case.id);
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };
        self.contingencies = resolve(&self.contingencies);
        self.bus_scope = self.bus_scope.as_deref().map(resolve);
        self.config = self.config.as_deref().map(resolve);
        self.output_root = resolve(&self.output_root);
        for case in &mut self.cases {
            case.case = resolve(&case.case);
            case.results_dir = case.results_dir.as_deref().map(resolve);
        }
    }
}

/// Outcome of one case as written to the batch manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCaseRecord {
    pub id: String,
    pub case: String,
    pub status: String,
    pub error: Option<String>,
    pub output: String,
    pub duration_secs: f64,
    /// Contingencies executed, including those of an aborted case.
    pub contingencies: usize,
    /// `None` when the case aborted.
    pub compliant: Option<bool>,
}

impl BatchCaseRecord {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn toml_batch_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.toml");
        fs::write(
            &path,
            r#"
contingencies = "contingencies"
threads = 2

[[cases]]
id = "winter"
case = "cases/winter.json"
adjust_reactive = true

[[cases]]
id = "summer"
case = "/data/summer.json"
results_dir = "out/summer"
"#,
        )
        .unwrap();
        let batch = BatchFile::load(&path).unwrap();
        assert_eq!(batch.threads, 2);
        assert_eq!(batch.contingencies, dir.path().join("contingencies"));
        assert_eq!(batch.cases[0].case, dir.path().join("cases/winter.json"));
        assert!(batch.cases[0].adjust_reactive);
        assert_eq!(batch.cases[1].case, PathBuf::from("/data/summer.json"));
        assert_eq!(
            batch.cases[0].results_dir(&batch.output_root),
            dir.path().join("results").join("winter")
        );
        assert_eq!(
            batch.cases[1].results_dir(&batch.output_root),
            dir.path().join("out/summer")
        );
    }

    #[test]
    fn yaml_and_json_batches() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("batch.yaml");
        fs::write(
            &yaml,
            "contingencies: c.yaml\ncases:\n  - id: a\n    case: a.json\n",
        )
        .unwrap();
        assert_eq!(BatchFile::load(&yaml).unwrap().threads, 1);

        let json = dir.path().join("batch.json");
        fs::write(
            &json,
            r#"{"contingencies": "c.yaml", "cases": [{"id": "a", "case": "a.json"}, {"id": "a", "case": "b.json"}]}"#,
        )
        .unwrap();
        let err = BatchFile::load(&json).unwrap_err();
        assert!(err.to_string().contains("duplicate batch case id"));
    }

    #[test]
    fn rejects_empty_and_unknown_formats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.toml");
        fs::write(&path, "contingencies = \"c\"\ncases = []\n").unwrap();
        assert!(BatchFile::load(&path).is_err());

        let ini = dir.path().join("batch.ini");
        fs::write(&ini, "").unwrap();
        assert!(BatchFile::load(&ini)
            .unwrap_err()
            .to_string()
            .contains("unsupported batch file extension"));
    }
}
