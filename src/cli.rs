use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// installkit - resolve component selections and run install transactions
#[derive(Parser, Debug)]
#[command(name = "installkit")]
#[command(about = "Resolve installable components and run them as a transaction")]
#[command(version)]
pub struct Cli {
    /// Installer configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the ordered component selection for a request
    Resolve {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Print the selection as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a catalog description file
    Validate {
        /// Path to the catalog description (JSON)
        #[arg(short, long)]
        catalog: PathBuf,
    },
    /// Run a full transaction with logging-only actions
    Simulate {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Make the apply of this component fail (repeatable)
        #[arg(long = "fail", value_name = "ID")]
        fail: Vec<String>,

        /// Print the transaction report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct SelectionArgs {
    /// Path to the catalog description (JSON)
    #[arg(short, long)]
    pub catalog: PathBuf,

    /// Resolve the default set instead of explicit ids
    #[arg(long, conflicts_with = "ids")]
    pub default: bool,

    /// Component ids to install
    pub ids: Vec<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
