use std::path::PathBuf;
use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("keyslot {0:#04x} has no normal key set up")]
    KeyslotMissing(u8),

    #[error("bootrom has wrong size: expected 0x8000 or 0x10000, got {0:#x}")]
    BadBootromSize(usize),

    #[error("bootrom failed hash verification, this is not a valid ARM9 bootROM")]
    BadBootromHash,

    #[error("could not find an ARM9 bootROM in any of the searched paths: {0:?}")]
    BootromNotFound(Vec<PathBuf>),

    #[error("movable.sed has an unexpected size: {0:#x}")]
    BadMovableSedSize(usize),

    #[error("ticket is too small to contain a titlekey: 0x2ac required, got {0:#x}")]
    TicketTooSmall(usize),

    #[error("unknown common key index {0} in ticket")]
    UnknownCommonKeyIndex(u8),

    #[error("seed for title {0:016x} was not found in seeddb.bin")]
    SeedNotFound(u64),

    #[error("NCCH seed verification hash did not match the header's expected hash")]
    BadSeedHash,
}

pub type CryptoResult<T> = result::Result<T, CryptoError>;
