use crate::commands::install::InstallCommand;
use clap::{Parser, Subcommand};

pub mod install;

/// CLI for installing 3DS CIA/CDN packages directly onto an SD card.
#[derive(Parser, Debug)]
#[command(
	author,                   // pulls env!("CARGO_PKG_AUTHORS")
	version,                  // pulls env!("CARGO_PKG_VERSION")
	about,                    // doc-comment or Cargo.toml description
	help_template = "\
{before-help}{name} {version}\n\
{about-with-newline}\n\
{usage-heading}\n    {usage}\n\n\
{all-args}\n\n\
Made with ‚ù§ by {author}
"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Install(InstallCommand),
}
