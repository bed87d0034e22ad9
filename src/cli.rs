use clap::{Args, Parser, Subcommand};
use clap_complete::aot::Shell;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "devfleet",
    version,
    about = "Local development launcher for multi-service .NET solutions"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Solution root (the directory that contains `src/`)
    #[arg(long, global = true, env = "DEVFLEET_ROOT")]
    pub root: Option<PathBuf>,

    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true)]
    pub config_file: Option<PathBuf>,

    /// Neither use nor remember the last loaded solution root
    #[arg(long, global = true, env = "DEVFLEET_NO_RECENT")]
    pub no_recent: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start services and supervise them until quit or Ctrl+C
    Up {
        /// Services to start (tiered bulk start if empty)
        services: Vec<String>,
        /// Echo every service's console output
        #[arg(long)]
        follow: bool,
    },
    /// List discovered services with tier and port
    Ls,
    /// Show the bulk start order
    Plan,
    /// Check that the build toolchain is installed
    Doctor,
    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}
