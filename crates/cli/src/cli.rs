use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run ingest modules over local evidence directories.
#[derive(Parser, Debug)]
#[command(name = "caseflow", about = "Ingest job runner for caseflow")]
pub struct CliArgs {
    /// Preferences file (default: ~/.config/caseflow/preferences.toml)
    #[arg(long, env = "CASEFLOW_PREFERENCES_PATH", global = true)]
    pub preferences: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest one or more directories as data sources of a single job
    Ingest(IngestArgs),

    /// List the available ingest modules
    Modules,
}

#[derive(clap::Args, Debug)]
pub struct IngestArgs {
    /// Directories to ingest, one data source each
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Comma-separated module names
    #[arg(long, value_delimiter = ',', default_value = "hash,stats")]
    pub modules: Vec<String>,

    /// Number of file ingest threads. Persisted to the preferences file.
    #[arg(long, env = "CASEFLOW_FILE_INGEST_THREADS")]
    pub threads: Option<usize>,

    /// How often to print progress, in milliseconds (0 disables)
    #[arg(long, default_value = "1000")]
    pub progress_interval_ms: u64,

    /// Run the stats module after all files instead of alongside them
    #[arg(long)]
    pub stats_last: bool,

    /// Case name reported in logs
    #[arg(long, default_value = "default")]
    pub case_name: String,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_module_list() {
        let args = CliArgs::try_parse_from(["caseflow", "ingest", "/evidence", "--modules", "stats,hash", "--threads", "4"])
            .unwrap();
        let Command::Ingest(ingest) = args.command else {
            panic!("expected ingest");
        };
        assert_eq!(ingest.modules, vec!["stats", "hash"]);
        assert_eq!(ingest.threads, Some(4));
        assert_eq!(ingest.paths, vec![PathBuf::from("/evidence")]);
    }

    #[test]
    fn ingest_requires_a_path() {
        assert!(CliArgs::try_parse_from(["caseflow", "ingest"]).is_err());
    }
}
