use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::installer::EngineCommand;

/// Environment variable naming the engine program when `--engine` is absent
pub const ENGINE_ENV: &str = "TRI_INSTALL_ENGINE";

/// tri-install - Trident installer core
#[derive(Parser)]
#[command(name = "tri-install")]
#[command(about = "Validate, compile and run a pc-sysinstall based installation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check an install plan against the host's hardware snapshot
    Validate {
        #[command(flatten)]
        input: PlanArgs,
    },
    /// Print the compiled configuration with secrets redacted
    Summary {
        #[command(flatten)]
        input: PlanArgs,

        /// Write the summary to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile the plan and run the installation engine
    Install {
        #[command(flatten)]
        input: PlanArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Build the package tree and print the install list for a selection
    Packages {
        /// Package catalog snapshot (JSON)
        catalog: PathBuf,

        /// Package or category path to select (e.g. `zsh`, `Shells/Extras`)
        #[arg(short, long)]
        select: Vec<String>,

        /// Store the resulting install list in this plan file
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Show the engine log and config copy left by a run
    Artifacts {
        #[command(flatten)]
        engine: EngineArgs,

        /// Print the full log instead of its last lines
        #[arg(long)]
        full: bool,
    },
}

/// Plan file plus the hardware snapshot it is validated against
#[derive(Args)]
pub struct PlanArgs {
    /// Install plan (JSON)
    pub plan: PathBuf,

    /// Hardware catalog snapshot (JSON) produced by the probe
    #[arg(long)]
    pub hardware: PathBuf,
}

/// Engine invocation overrides
#[derive(Args, Default)]
pub struct EngineArgs {
    /// Engine program (default: $TRI_INSTALL_ENGINE, then pc-sysinstall)
    #[arg(long)]
    pub engine: Option<PathBuf>,

    /// Argument passed before the config path; repeatable (default: -c)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Where to write the compiled configuration
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Engine log file
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Working directory for the engine
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

impl EngineArgs {
    /// Resolve flags and environment into an engine invocation
    pub fn to_engine_command(&self, env_engine: Option<String>) -> EngineCommand {
        let mut cmd = EngineCommand::default();
        if let Some(program) = self.engine.clone().or_else(|| env_engine.map(PathBuf::from)) {
            cmd.program = program;
        }
        if !self.engine_args.is_empty() {
            cmd.args = self.engine_args.clone();
        }
        if let Some(path) = &self.config_path {
            cmd.config_path = path.clone();
        }
        if let Some(path) = &self.log_path {
            cmd.log_path = path.clone();
        }
        cmd.working_dir = self.workdir.clone();
        cmd
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::{DEFAULT_CONFIG_PATH, DEFAULT_ENGINE};

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["tri-install"]).is_err());
    }

    #[test]
    fn test_cli_validate_command() {
        let cli = Cli::try_parse_from([
            "tri-install",
            "validate",
            "/path/to/plan.json",
            "--hardware",
            "/tmp/hw.json",
        ])
        .expect("valid args"); // test: known-good input
        match cli.command {
            Commands::Validate { input } => {
                assert_eq!(input.plan.to_str().unwrap(), "/path/to/plan.json");
                assert_eq!(input.hardware.to_str().unwrap(), "/tmp/hw.json");
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_cli_validate_needs_hardware() {
        assert!(Cli::try_parse_from(["tri-install", "validate", "plan.json"]).is_err());
    }

    #[test]
    fn test_cli_install_engine_overrides() {
        let cli = Cli::try_parse_from([
            "tri-install",
            "install",
            "plan.json",
            "--hardware",
            "hw.json",
            "--engine",
            "/usr/local/sbin/pc-sysinstall",
            "--engine-arg",
            "-c",
            "--config-path",
            "/tmp/x.conf",
        ])
        .expect("valid args"); // test: known-good input
        let Commands::Install { engine, .. } = cli.command else {
            panic!("Expected Install command");
        };
        let cmd = engine.to_engine_command(None);
        assert_eq!(cmd.program, PathBuf::from("/usr/local/sbin/pc-sysinstall"));
        assert_eq!(cmd.args, vec!["-c"]);
        assert_eq!(cmd.config_path, PathBuf::from("/tmp/x.conf"));
    }

    #[test]
    fn test_engine_env_fallback() {
        let args = EngineArgs::default();
        let cmd = args.to_engine_command(Some("/opt/engine".to_string()));
        assert_eq!(cmd.program, PathBuf::from("/opt/engine"));

        let cmd = args.to_engine_command(None);
        assert_eq!(cmd.program, PathBuf::from(DEFAULT_ENGINE));
        assert_eq!(cmd.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(cmd.args, vec!["-c"]);
    }

    #[test]
    fn test_cli_packages_command() {
        let cli = Cli::try_parse_from([
            "tri-install",
            "packages",
            "catalog.json",
            "-s",
            "zsh",
            "--select",
            "Shells/Extras",
        ])
        .expect("valid args"); // test: known-good input
        match cli.command {
            Commands::Packages { select, plan, .. } => {
                assert_eq!(select, vec!["zsh", "Shells/Extras"]);
                assert!(plan.is_none());
            }
            _ => panic!("Expected Packages command"),
        }
    }
}
