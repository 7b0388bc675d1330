mod logging;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use zoon_core::{RunResult, Runner, Zoon, ZoonConfig};

const DEFAULT_CONFIG_FILE: &str = "zoon.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration; `zoon.toml` in the current directory is used when present.
    #[clap(short, long = "config", value_parser, global = true)]
    config_file: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a file unmodified from the work directory.
    Run {
        file: PathBuf,
        #[clap(flatten)]
        overrides: HarnessOverrides,
    },
    /// Flip each given bit of a file and run the resulting variant.
    Mutate {
        file: PathBuf,
        #[clap(short, long, required = true, num_args = 1..)]
        position: Vec<usize>,
        #[clap(flatten)]
        overrides: HarnessOverrides,
    },
    /// Run an arbitrary command line and classify its outcome.
    Exec {
        command: String,
        #[clap(long)]
        timeout_ms: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct HarnessOverrides {
    /// Argument string appended to the variant's command line.
    #[clap(long, allow_hyphen_values = true)]
    args: Option<String>,
    #[clap(long)]
    timeout_ms: Option<u64>,
    #[clap(long)]
    work_dir: Option<PathBuf>,
}

impl HarnessOverrides {
    fn apply(self, config: &mut ZoonConfig) {
        if let Some(args) = self.args {
            config.harness.args = args;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.runner.timeout_ms = timeout_ms;
        }
        if let Some(work_dir) = self.work_dir {
            config.harness.work_dir = work_dir;
        }
    }
}

fn load_config(config_file: Option<PathBuf>) -> Result<ZoonConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!(path = ?config_path, "loading configuration");
            ZoonConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!(path = ?default_config_path, "loading default configuration");
                ZoonConfig::load_from_file(&default_config_path)
            } else {
                info!("no configuration file found, using built-in defaults");
                Ok(ZoonConfig::default())
            }
        }
    }
}

fn prepare_work_dir(dir: &Path) -> Result<(), anyhow::Error> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create work directory {}", dir.display()))
}

fn print_result(result: &RunResult, position: Option<usize>) -> Result<(), anyhow::Error> {
    let mut line = serde_json::to_value(result)?;
    if let (Some(position), Some(map)) = (position, line.as_object_mut()) {
        map.insert("position".to_string(), json!(position));
    }
    println!("{line}");
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    logging::init();
    let cli = Cli::parse();
    let mut config = load_config(cli.config_file)?;

    match cli.command {
        Commands::Run { file, overrides } => {
            overrides.apply(&mut config);
            let runner = config.runner.build_runner();
            let zoon = Zoon::from_path(&file)?;
            prepare_work_dir(&config.harness.work_dir)?;

            let name = file
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "original".into());
            let target = config.harness.work_dir.join(name);
            info!(%zoon, target = %target.display(), "running unmodified");
            let result = zoon.run_with(
                &runner,
                &target,
                &config.harness.args,
                config.runner.timeout(),
            )?;
            print_result(&result, None)?;
        }
        Commands::Mutate {
            file,
            position,
            overrides,
        } => {
            overrides.apply(&mut config);
            let runner = config.runner.build_runner();
            let zoon = Zoon::from_path(&file)?;
            prepare_work_dir(&config.harness.work_dir)?;

            info!(%zoon, variants = position.len(), "running point mutations");
            for p in position {
                let result = zoon.mutate_and_run_with(
                    &runner,
                    p,
                    &config.harness.work_dir,
                    &config.harness.args,
                    config.runner.timeout(),
                )?;
                if !result.is_success() {
                    warn!(position = p, status = %result.status, exit_code = result.exit_code, "variant did not succeed");
                }
                print_result(&result, Some(p))?;
            }
        }
        Commands::Exec {
            command,
            timeout_ms,
        } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.runner.timeout());
            let runner: Runner = config.runner.build_runner();
            let result = runner.run(&command, timeout)?;
            print_result(&result, None)?;
        }
    }

    Ok(())
}
