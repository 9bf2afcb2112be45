//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download files into allow-listed directories.
///
/// Directories and their permissions come from the JSON config file;
/// `--dir` names one of them.
#[derive(Parser, Debug)]
#[command(name = "download-hub")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/download-hub/config.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the directories downloads may target and exit
    #[arg(long)]
    pub list_dirs: bool,

    /// Name of the target directory
    #[arg(short, long, value_name = "NAME", required_unless_present = "list_dirs")]
    pub dir: Option<String>,

    /// File name to save under (extension is taken from the server if omitted)
    #[arg(short, long, value_name = "FILE")]
    pub name: Option<String>,

    /// URLs to download
    #[arg(value_name = "URL", required_unless_present = "list_dirs")]
    pub urls: Vec<String>,
}
