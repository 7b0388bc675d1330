use crate::runner::{DEFAULT_OUTPUT_LIMIT_BYTES, Launch, Runner, RunnerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub launch: Launch,
    #[serde(default)]
    pub surface_stderr: bool,
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

pub fn default_output_limit_bytes() -> usize {
    DEFAULT_OUTPUT_LIMIT_BYTES
}

pub fn default_timeout_ms() -> u64 {
    1000
}

impl RunnerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn build_runner(&self) -> Runner {
        Runner::new(RunnerConfig {
            launch: self.launch,
            surface_stderr: self.surface_stderr,
            output_limit_bytes: self.output_limit_bytes,
        })
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            launch: Launch::default(),
            surface_stderr: false,
            output_limit_bytes: default_output_limit_bytes(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    /// Directory variants are materialized into before they run.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Argument string appended verbatim to every variant's command line.
    #[serde(default)]
    pub args: String,
}

pub fn default_work_dir() -> PathBuf {
    PathBuf::from("./.zoon")
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            args: String::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ZoonConfig {
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub harness: HarnessSettings,
}

impl ZoonConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: ZoonConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        if config.runner.timeout_ms == 0 {
            anyhow::bail!("runner.timeout-ms in {:?} must be greater than zero", path);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: ZoonConfig = toml::from_str("").unwrap();
        assert_eq!(config.runner.timeout_ms, 1000);
        assert_eq!(config.runner.launch, Launch::Direct);
        assert!(!config.runner.surface_stderr);
        assert_eq!(config.runner.output_limit_bytes, DEFAULT_OUTPUT_LIMIT_BYTES);
        assert_eq!(config.harness.work_dir, PathBuf::from("./.zoon"));
        assert!(config.harness.args.is_empty());
    }

    #[test]
    fn kebab_case_keys_are_parsed() {
        let config: ZoonConfig = toml::from_str(
            r#"
            [runner]
            timeout-ms = 250
            launch = "shell"
            surface-stderr = true
            output-limit-bytes = 4096

            [harness]
            work-dir = "/tmp/variants"
            args = "--quiet input.txt"
            "#,
        )
        .unwrap();
        assert_eq!(config.runner.timeout(), Duration::from_millis(250));
        assert_eq!(config.runner.launch, Launch::Shell);
        let runner = config.runner.build_runner();
        assert!(runner.config().surface_stderr);
        assert_eq!(runner.config().output_limit_bytes, 4096);
        assert_eq!(config.harness.work_dir, PathBuf::from("/tmp/variants"));
        assert_eq!(config.harness.args, "--quiet input.txt");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<ZoonConfig, _> = toml::from_str("[runner]\nretries = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file_reports_path_and_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = ZoonConfig::load_from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));

        let zero = dir.path().join("zero.toml");
        std::fs::write(&zero, "[runner]\ntimeout-ms = 0\n").unwrap();
        assert!(ZoonConfig::load_from_file(&zero).is_err());

        let good = dir.path().join("zoon.toml");
        std::fs::write(&good, "[harness]\nargs = \"-v\"\n").unwrap();
        let config = ZoonConfig::load_from_file(&good).unwrap();
        assert_eq!(config.harness.args, "-v");
    }
}
