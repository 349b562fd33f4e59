mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.global);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Log directives for the engine crates; everything else stays at `warn`.
fn log_directives(verbose: u8, quiet: bool) -> String {
    let level = match (quiet, verbose) {
        (true, _) => return "error".to_owned(),
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    format!("warn,autoarm={level},autoarm_core={level},autoarm_config={level}")
}

/// Logs go to stderr so `-o json` output stays parseable. `RUST_LOG` wins
/// over the flags.
fn init_tracing(global: &GlobalOpts) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(global.verbose, global.quiet)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(global.verbose > 1)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    tracing::debug!(command = ?cli.command, "dispatching command");
    match &cli.command {
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),
        Command::Reset(args) => commands::reset::handle(args, &cli.global).await,
        Command::States => commands::states::handle(&cli.global),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(log_directives(3, true), "error");
    }

    #[test]
    fn verbosity_scopes_to_engine_crates() {
        assert_eq!(
            log_directives(0, false),
            "warn,autoarm=warn,autoarm_core=warn,autoarm_config=warn"
        );
        assert!(log_directives(2, false).contains("autoarm_core=debug"));
        assert!(log_directives(7, false).contains("autoarm=trace"));
    }
}
