//! SD-card logical path construction. Every path built here is later fed
//! through [`crate::crypto::CryptoEngine::sd_path_to_iv`] to derive the
//! per-file AES-CTR IV, so these helpers return both the on-disk path (for
//! `tokio::fs`) and the SD-relative path string (for IV derivation) as a
//! matched pair.

use std::path::{Path, PathBuf};

/// One half of a Title ID split for SD path purposes: `h` (high, category)
/// and `l` (low, unique ID), each rendered as 8 lowercase hex digits.
pub fn title_id_parts(title_id: u64) -> (String, String) {
    (
        format!("{:08x}", (title_id >> 32) as u32),
        format!("{:08x}", title_id as u32),
    )
}

/// `true` when the title's category identifies it as DLC (`0004008c`).
pub fn is_dlc(title_id: u64) -> bool {
    title_id_parts(title_id).0 == "0004008c"
}

pub struct SdPaths {
    pub id0: String,
    pub id1: String,
}

impl SdPaths {
    /// `<sd_root>/Nintendo 3DS/<id0>`, scanned for its single 32-hex-char
    /// `id1` subdirectory. More than one, or none, is a fatal path error —
    /// the same contract `get_sd_path` enforces.
    pub async fn discover(sd_root: &Path, id0_hex: &str) -> std::io::Result<Self> {
        let id0_dir = sd_root.join("Nintendo 3DS").join(id0_hex);
        let mut entries = tokio::fs::read_dir(&id0_dir).await?;
        let mut id1s = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.len() == 32 && name.chars().all(|c| c.is_ascii_hexdigit()) {
                id1s.push(name);
            }
        }
        if id1s.len() != 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected exactly one id1 directory under {}, found {}", id0_dir.display(), id1s.len()),
            ));
        }
        Ok(Self {
            id0: id0_hex.to_string(),
            id1: id1s.into_iter().next().unwrap(),
        })
    }

    pub fn sd_root_cmd(&self) -> String {
        format!("/{}", self.id0)
    }
}

/// A title's content root, as both a filesystem path and the SD-relative
/// path string used for IV derivation (`/title/<h>/<l>/content`).
pub struct TitlePaths {
    pub title_root: PathBuf,
    pub title_root_cmd: String,
}

impl TitlePaths {
    pub fn new(sd_paths: &SdPaths, sd_root: &Path, title_id: u64) -> Self {
        let (h, l) = title_id_parts(title_id);
        let title_root = sd_root
            .join("Nintendo 3DS")
            .join(&sd_paths.id0)
            .join(&sd_paths.id1)
            .join("title")
            .join(&h)
            .join(&l);
        let title_root_cmd = format!("/title/{h}/{l}");
        Self {
            title_root,
            title_root_cmd,
        }
    }

    pub fn content_root(&self) -> PathBuf {
        self.title_root.join("content")
    }

    pub fn content_root_cmd(&self) -> String {
        format!("{}/content", self.title_root_cmd)
    }

    pub fn data_root(&self) -> PathBuf {
        self.title_root.join("data")
    }

    pub fn data_root_cmd(&self) -> String {
        format!("{}/data", self.title_root_cmd)
    }
}
