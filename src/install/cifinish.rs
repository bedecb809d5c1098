//! Reads and writes `cifinish.bin`, the journal a homebrew finalizer
//! consumes after a batch of installs. Three on-disk versions exist in the
//! wild (v1/v2/v3, differing in field layout); this always writes v3 but
//! reads all three for compatibility with an existing journal on the card.

use crate::error::{InstallError, InstallResult};
use std::collections::BTreeMap;
use std::path::Path;

pub const CIFINISH_MAGIC: &[u8; 8] = b"CIFINISH";
pub const CIFINISH_VERSION: u32 = 3;
const TITLE_MAGIC: &[u8; 6] = b"TITLE\0";

#[derive(Debug, Clone, Default)]
pub struct CiFinishEntry {
    pub seed: Option<[u8; 16]>,
}

pub type CiFinishDb = BTreeMap<u64, CiFinishEntry>;

/// Returns an empty database if the file doesn't exist yet, matching the
/// reference tool's "safe to point at a fresh SD card" behavior.
pub async fn load_cifinish(path: &Path) -> InstallResult<CiFinishDb> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CiFinishDb::new()),
        Err(e) => return Err(e.into()),
    };
    parse_cifinish(&data)
}

fn parse_cifinish(data: &[u8]) -> InstallResult<CiFinishDb> {
    if data.len() < 0x10 || &data[0..8] != CIFINISH_MAGIC {
        return Ok(CiFinishDb::new());
    }
    let version = u32::from_le_bytes(data[0x8..0xC].try_into().unwrap());
    let count = u32::from_le_bytes(data[0xC..0x10].try_into().unwrap()) as usize;

    let entry_size = match version {
        1 => 0x30,
        2 | 3 => 0x20,
        other => return Err(InstallError::UnknownCiFinishVersion(other)),
    };

    let mut db = CiFinishDb::new();
    let mut offset = 0x10;
    for _ in 0..count {
        let raw = data
            .get(offset..offset + entry_size)
            .ok_or(InstallError::UnknownCiFinishVersion(version))?;

        let (title_magic, title_id, has_seed, seed): (&[u8], u64, u8, [u8; 16]) = match version {
            1 => (
                &raw[0xA..0x10],
                u64::from_le_bytes(raw[0x0..0x8].try_into().unwrap()),
                raw[0x9],
                raw[0x20..0x30].try_into().unwrap(),
            ),
            2 => (
                &raw[0x0..0x6],
                u64::from_le_bytes(raw[0x6..0xE].try_into().unwrap()),
                raw[0xE],
                raw[0x10..0x20].try_into().unwrap(),
            ),
            _ => (
                &raw[0x0..0x6],
                u64::from_le_bytes(raw[0x8..0x10].try_into().unwrap()),
                raw[0x6],
                raw[0x10..0x20].try_into().unwrap(),
            ),
        };

        if title_magic == &TITLE_MAGIC[..] {
            db.insert(
                title_id,
                CiFinishEntry {
                    seed: if has_seed != 0 { Some(seed) } else { None },
                },
            );
        }
        offset += entry_size;
    }

    Ok(db)
}

pub async fn save_cifinish(path: &Path, db: &CiFinishDb) -> InstallResult<()> {
    if db.len() > u32::MAX as usize {
        return Err(InstallError::CiFinishTooManyEntries(db.len()));
    }

    let mut out = Vec::new();
    out.extend_from_slice(CIFINISH_MAGIC);
    out.extend_from_slice(&CIFINISH_VERSION.to_le_bytes());
    out.extend_from_slice(&(db.len() as u32).to_le_bytes());

    for (&title_id, entry) in db {
        out.extend_from_slice(TITLE_MAGIC);
        out.push(entry.seed.is_some() as u8);
        out.push(0);
        out.extend_from_slice(&title_id.to_le_bytes());
        out.extend_from_slice(&entry.seed.unwrap_or([0u8; 16]));
    }

    tokio::fs::write(path, out).await?;
    Ok(())
}
