//! Command-line parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const ENVIRONMENT_HELP: &str = "\
Environment:
  SECTORSCOPE_DATA_DIR, SECTORSCOPE_FRESHNESS_HORIZON_SECS, SECTORSCOPE_LOG_FORMAT, RUST_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "sectorscope",
    about = "Sector valuation statistics cache",
    after_help = ENVIRONMENT_HELP,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Collect, aggregate and store a new statistics table.
    Refresh {
        /// Snapshot file: a JSON array of records.
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Skip the run when the stored statistics are still fresh.
        #[arg(long, default_value_t = false)]
        if_stale: bool,
    },
    /// Re-aggregate the stored snapshot batch without collecting.
    Regenerate,
    /// Refresh on the collection interval until ctrl-c.
    Schedule {
        /// Snapshot file read on every tick.
        #[arg(long, short = 'i')]
        input: PathBuf,
    },
    /// Statistics for one sector.
    Show {
        /// Sector label. Unquoted multi-word labels are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        sector: Vec<String>,
    },
    /// Every sector in the current table.
    List,
    /// Freshness and layer health.
    Status,
    /// Recent stored tables, newest first.
    History {
        #[arg(default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        limit: u64,
    },
}

impl Command {
    /// The sector label as typed, with split words rejoined.
    pub fn sector_label(words: &[String]) -> String {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(s: &str) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("sectorscope").chain(s.split_whitespace()))
            .map(|cli| cli.command)
    }

    #[test]
    fn test_refresh_forces_by_default() {
        assert_eq!(
            parse("refresh --input snap.json").unwrap(),
            Command::Refresh {
                input: PathBuf::from("snap.json"),
                if_stale: false
            }
        );
        assert_eq!(
            parse("refresh -i snap.json --if-stale").unwrap(),
            Command::Refresh {
                input: PathBuf::from("snap.json"),
                if_stale: true
            }
        );
        assert_eq!(
            parse("refresh").unwrap_err().kind(),
            ErrorKind::MissingRequiredArgument
        );
        assert!(parse("schedule --input a.json --if-stale").is_err());
    }

    #[test]
    fn test_show_joins_words() {
        let Command::Show { sector } = parse("show IT 서비스").unwrap() else {
            panic!("expected show");
        };
        assert_eq!(Command::sector_label(&sector), "IT 서비스");
        assert!(parse("show").is_err());
    }

    #[test]
    fn test_history_limit() {
        assert_eq!(parse("history").unwrap(), Command::History { limit: 10 });
        assert_eq!(parse("history 3").unwrap(), Command::History { limit: 3 });
        assert_eq!(parse("history 0").unwrap_err().kind(), ErrorKind::ValueValidation);
        assert_eq!(parse("history many").unwrap_err().kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_help_and_unknown() {
        assert_eq!(parse("--help").unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse("frobnicate").unwrap_err().kind(), ErrorKind::InvalidSubcommand);
    }
}
