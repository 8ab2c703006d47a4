//! # Config Subcommand
//!
//! - `avs config check <path>` — parse and validate a workflow file, then
//!   print the step order it produces.
//! - `avs config show [--config <path>]` — print the fully expanded
//!   configuration as YAML.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::load_runtime;

/// Arguments for the `avs config` subcommand.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a workflow configuration file.
    Check {
        /// Workflow YAML to validate.
        path: PathBuf,
    },
    /// Print the effective workflow configuration.
    Show {
        /// Workflow YAML. Defaults to the standard workflow.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Execute the config subcommand.
pub fn run_config(args: &ConfigArgs, out: &mut impl Write) -> Result<u8> {
    match &args.command {
        ConfigCommand::Check { path } => cmd_check(path, out),
        ConfigCommand::Show { config } => cmd_show(config.as_deref(), out),
    }
}

fn cmd_check(path: &Path, out: &mut impl Write) -> Result<u8> {
    let runtime = load_runtime(Some(path))?;
    let order: Vec<&str> = runtime
        .machine
        .graph()
        .order()
        .iter()
        .map(|step| step.as_str())
        .collect();
    writeln!(out, "OK: {}", path.display())?;
    writeln!(out, "  steps: {}", order.join(" -> "))?;
    writeln!(out, "  reservation lease: {}s", runtime.lease.as_secs())?;
    Ok(0)
}

fn cmd_show(config: Option<&Path>, out: &mut impl Write) -> Result<u8> {
    let runtime = load_runtime(config)?;
    let yaml = serde_yaml::to_string(&runtime.effective_config())
        .context("failed to render workflow configuration")?;
    write!(out, "{yaml}")?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avs_workflow::WorkflowConfig;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn output(args: ConfigArgs) -> Result<String> {
        let mut buf = Vec::new();
        run_config(&args, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap())
    }

    #[test]
    fn check_accepts_quota_override() {
        let file = write_config("quotas:\n  registry_cso: 6\nreservation_lease_secs: 90\n");
        let out = output(ConfigArgs {
            command: ConfigCommand::Check {
                path: file.path().to_path_buf(),
            },
        })
        .unwrap();
        assert!(out.starts_with("OK: "));
        assert!(out.contains("document"));
        assert!(out.contains("90s"));
    }

    #[test]
    fn check_rejects_cyclic_graph() {
        let file = write_config(
            "graph:\n  - step: document\n    depends_on: [selfie_liveness]\n  - step: selfie_liveness\n    depends_on: [document]\n",
        );
        let err = output(ConfigArgs {
            command: ConfigCommand::Check {
                path: file.path().to_path_buf(),
            },
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("invalid"));
    }

    #[test]
    fn check_rejects_unknown_fields() {
        let file = write_config("quotass:\n  document: 2\n");
        let result = output(ConfigArgs {
            command: ConfigCommand::Check {
                path: file.path().to_path_buf(),
            },
        });
        assert!(result.is_err());
    }

    #[test]
    fn check_missing_file_fails() {
        let result = output(ConfigArgs {
            command: ConfigCommand::Check {
                path: PathBuf::from("/nonexistent/workflow.yaml"),
            },
        });
        assert!(result.is_err());
    }

    #[test]
    fn show_output_is_a_loadable_config() {
        let out = output(ConfigArgs {
            command: ConfigCommand::Show { config: None },
        })
        .unwrap();
        let parsed = WorkflowConfig::from_yaml_str(&out).unwrap();
        let runtime = parsed.build().unwrap();
        assert_eq!(runtime.machine.graph().order().len(), 8);
        assert_eq!(parsed.reservation_lease_secs, Some(120));
    }
}
