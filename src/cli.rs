use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cmi-updater - rebuild and install the multi-distro ISO creator
#[derive(Parser, Debug)]
#[command(name = "cmi-updater")]
#[command(about = "Clone, build and install the ISO creator tool for this distribution")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Every pipeline step is logged and reported as successful without
    /// running. No password is requested.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print reports and versions as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the update pipeline (the default)
    Update {
        /// Skip the menu and the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Launch the installed tool after a successful update
        #[arg(long, conflicts_with = "no_launch")]
        launch: bool,

        /// Never offer to launch the installed tool
        #[arg(long)]
        no_launch: bool,
    },
    /// Show the installed and available versions without changing anything
    Versions,
    /// Print the detected distribution category
    Detect,
    /// Print the steps that `update` would run
    Plan,
}

impl Default for Commands {
    fn default() -> Self {
        Self::Update {
            yes: false,
            launch: false,
            no_launch: false,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// The subcommand to run, `update` when none was given
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }
}
