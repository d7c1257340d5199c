//! Command-line arguments

use clap::Parser;

/// deckhub - button grid controller with pages, triggers and connections
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (defaults to the platform data directory)
    #[arg(short, long, env = "DECKHUB_CONFIG")]
    pub config: Option<String>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    pub print_schema: bool,

    /// Check the configuration file and exit
    #[arg(long)]
    pub check_config: bool,
}
