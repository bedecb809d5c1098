use crate::crypto::error::CryptoError;
use std::path::PathBuf;
use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    BinRw(#[from] binrw::Error),

    #[error("CIA archive header size was {0:#x}, expected 0x2020")]
    BadArchiveHeaderSize(u32),

    #[error("content index {0} is active in the CIA but missing from the TMD, or vice versa")]
    ContentIndexMismatch(u16),

    #[error("TMD info record hash did not match the header's expected hash")]
    BadInfoRecordHash,

    #[error("chunk record for content {0} was hashed by more than one info record")]
    DuplicateChunkHash(u16),

    #[error("content {0} failed hash verification")]
    BadContentHash(u16),

    #[error("NCCH at offset {0:#x} has an invalid magic value")]
    BadNcchMagic(u64),

    #[error("ExeFS file name at entry {0} is not valid UTF-8")]
    BadExeFsFileName(usize),

    #[error("ExeFS offset {0:#x} is not a multiple of 0x200")]
    BadExeFsAlignment(u64),

    #[error(".code decompression ran past the start of the output buffer")]
    CodeDecompressionUnderflow,

    #[error("RomFS Lv3 header failed its monotonic-region sanity check")]
    BadRomFsLv3Header,
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("could not find a ticket (cetk or *.tik) in {0}")]
    NoTitleFileFound(PathBuf),

    #[error("could not find a tmd file in {0}")]
    NoTmdFileFound(PathBuf),

    #[error("content index {0} referenced by the TMD has no matching file in {1}")]
    MissingContentFile(u16, PathBuf),

    #[error("save3ds_fuse exited with status {0}")]
    Save3dsFuseFailed(i32),

    #[error("save3ds_fuse binary was not found at {0}")]
    Save3dsFuseNotFound(PathBuf),

    #[error("cifinish.bin entry count {0} exceeds the format's maximum")]
    CiFinishTooManyEntries(usize),

    #[error("cifinish.bin has an unrecognized version tag {0:#x}")]
    UnknownCiFinishVersion(u32),

    #[error("expected exactly one id1 directory under {0}, found a different number")]
    SdPathError(PathBuf),

    #[error("seed for title {0:016x} was not found in seeddb.bin")]
    SeedNotFound(u64),

    #[error("no seeddb.bin was provided but title {0:016x} needs a seed")]
    SeedDbNotProvided(u64),
}

pub type InstallResult<T> = result::Result<T, InstallError>;
