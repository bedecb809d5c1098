use clap::Parser;
use std::path::PathBuf;

/// Install CIA files or CDN content directories directly onto an SD card.
#[derive(Parser, Debug)]
#[command(
    long_about = "Installs CIA files or CDN content directories directly onto an SD card \
formatted by a real 3DS console, bypassing the console's own installer."
)]
pub struct InstallCommand {
    /// CIA files or CDN content directories to install, in order.
    #[arg(value_name = "CIA", required = true)]
    pub cia: Vec<PathBuf>,

    /// Path to this console's `movable.sed`.
    #[arg(long, short = 'm', value_name = "MOVABLE_SED")]
    pub movable: PathBuf,

    /// Path to an ARM9 bootROM dump (`boot9.bin`/`boot9_prot.bin`). Falls
    /// back to `BOOT9_PATH` and the platform config directories if omitted.
    #[arg(long, short = 'b', value_name = "BOOT9")]
    pub boot9: Option<PathBuf>,

    /// Path to `seeddb.bin`, needed only for titles using NCCH seeds.
    #[arg(long, short = 's', value_name = "SEEDDB")]
    pub seeddb: Option<PathBuf>,

    /// Root of the target SD card (the directory containing `Nintendo 3DS`).
    #[arg(long, value_name = "SD_ROOT")]
    pub sd: PathBuf,

    /// Content indices to skip across every installed title.
    #[arg(long, value_name = "INDEX", value_delimiter = ',')]
    pub skip_contents: Vec<u16>,

    /// Overwrite an existing save file instead of leaving it untouched.
    #[arg(long, default_value = "false")]
    pub overwrite_saves: bool,

    /// Write `cifinish.bin` to this path instead of `<sd>/cifinish.bin`.
    #[arg(long, value_name = "PATH")]
    pub cifinish_out: Option<PathBuf>,

    /// Derive keys as if running on a development unit.
    #[arg(long, default_value = "false")]
    pub dev: bool,
}
