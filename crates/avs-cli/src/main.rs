//! # avs CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use avs_cli::config::{run_config, ConfigArgs};
use avs_cli::graph::{run_graph, GraphArgs};

/// Appraiser verification service CLI.
///
/// Validates and inspects the workflow configuration consumed by the
/// verification API.
#[derive(Parser, Debug)]
#[command(name = "avs", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate or print workflow configuration.
    Config(ConfigArgs),

    /// Print the step dependency graph with quotas.
    Graph(GraphArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut stdout = std::io::stdout().lock();
    let result = match cli.command {
        Commands::Config(args) => run_config(&args, &mut stdout),
        Commands::Graph(args) => run_graph(&args, &mut stdout),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avs_cli::config::ConfigCommand;

    #[test]
    fn parse_config_check() {
        let cli = Cli::try_parse_from(["avs", "config", "check", "workflow.yaml"]).unwrap();
        match cli.command {
            Commands::Config(ConfigArgs {
                command: ConfigCommand::Check { path },
            }) => assert_eq!(path.to_str(), Some("workflow.yaml")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_graph_with_config_and_verbosity() {
        let cli = Cli::try_parse_from(["avs", "-vv", "graph", "--config", "w.yaml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Graph(GraphArgs { config: Some(_) })));
    }

    #[test]
    fn parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["avs"]).is_err());
        assert!(Cli::try_parse_from(["avs", "config", "check"]).is_err());
    }
}
