use crate::commands::install::InstallCommand;
use crate::commands::{Cli, Commands};
use crate::install::{install_batch, InstallOptions, ProgressSink};
use anyhow::Result;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;

mod commands;
mod container;
mod crypto;
mod error;
mod install;
mod util;

/// Bridges the orchestrator's callback surface to an `indicatif` bar plus
/// the standard `log` macros, the way the teacher's conversion commands log
/// directly but through a `MultiProgress`-aware logger.
struct CliProgressSink {
    bar: ProgressBar,
}

impl ProgressSink for CliProgressSink {
    fn on_log(&self, line: &str) {
        log::info!("{line}");
    }

    fn on_progress(&self, percent_of_current: u8, bytes_done: u64, bytes_total: u64) {
        self.bar.set_length(bytes_total.max(1));
        self.bar.set_position(bytes_done);
        self.bar.set_message(format!("{percent_of_current}%"));
    }

    fn on_cia_start(&self, index: usize, total: usize) {
        log::info!("installing title {} of {}", index + 1, total);
    }

    fn on_error(&self, path: &Path, error: &error::InstallError) {
        log::error!("failed to install {}: {error}", path.display());
    }
}

async fn run_install(cmd: InstallCommand) -> Result<()> {
    let options = InstallOptions {
        boot9: cmd.boot9,
        movable: cmd.movable,
        seeddb: cmd.seeddb,
        sd_root: cmd.sd,
        skip_contents: cmd.skip_contents.into_iter().collect::<HashSet<u16>>(),
        overwrite_saves: cmd.overwrite_saves,
        cifinish_out: cmd.cifinish_out,
        dev: cmd.dev,
        tool_dir: std::env::current_exe()?
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default(),
    };

    let bar = ProgressBar::new(1);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let sink = CliProgressSink { bar };
    let cancel = AtomicBool::new(false);

    let outcome = install_batch(&cmd.cia, &options, &sink, &cancel).await?;

    for path in &outcome.installed {
        log::info!("installed {}", path.display());
    }
    for (path, reason) in &outcome.failed {
        log::error!("{}: {reason}", path.display());
    }

    if !outcome.failed.is_empty() {
        anyhow::bail!(
            "{} of {} titles failed to install",
            outcome.failed.len(),
            cmd.cia.len()
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let logger = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .build();

    let level = logger.filter();
    let pb = MultiProgress::new();

    LogWrapper::new(pb.clone(), logger).try_init()?;
    log::set_max_level(level);

    let cli = Cli::parse();

    match cli.command {
        Commands::Install(cmd) => run_install(cmd).await?,
    }

    Ok(())
}
