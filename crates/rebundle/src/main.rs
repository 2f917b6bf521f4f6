mod commands;
mod error;
mod logging;
mod settings;
mod state;

use std::process::ExitCode;

use clap::Parser;

use crate::settings::AppSettings;

/// Download application bundles and swap them into place atomically.
#[derive(Debug, Parser)]
#[command(name = "rebundle", version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = AppSettings::load();
    logging::init_logging(
        cli.verbose || settings.debug_logging,
        settings.max_log_size_bytes,
    );

    match commands::run(cli.command, &settings) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            log::error!("{error}");
            eprintln!("error: {error}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::Cli;
    use crate::commands::Command;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fetch_parses_destination_and_mode() {
        let cli = Cli::try_parse_from([
            "rebundle",
            "fetch",
            "https://cdn.example.com/main.jsbundle",
            "--dest",
            "/tmp/main.jsbundle",
            "--background",
        ])
        .expect("fetch arguments should parse");

        match cli.command {
            Command::Fetch {
                url,
                dest,
                background,
            } => {
                assert_eq!(url, "https://cdn.example.com/main.jsbundle");
                assert_eq!(dest, Some("/tmp/main.jsbundle".into()));
                assert!(background);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn refresh_requires_version() {
        assert!(Cli::try_parse_from(["rebundle", "refresh"]).is_err());

        let cli = Cli::try_parse_from(["rebundle", "-v", "refresh", "--version", "1.2.0"])
            .expect("refresh arguments should parse");
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Refresh { ref version, app_key: None } if version == "1.2.0"
        ));
    }
}
