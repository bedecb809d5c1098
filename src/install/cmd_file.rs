//! Builds the CMD (content map) file for a title: per-content CMACs over a
//! chunk of ciphertext plus the content ID, with a literal `"MISSING
//! CONTENT!"` placeholder for any index gap up to the highest installed
//! index. Ported from `custominstall.py`'s inline cmd-building block; the
//! exact placeholder bytes and field order are a quirk of the console's own
//! title database format, preserved byte-for-byte here.

use crate::crypto::{keyslot, CryptoEngine};
use crate::error::InstallResult;
use sha2::{Digest, Sha256};

const MISSING_CONTENT_CMAC: [u8; 16] = *b"MISSING CONTENT!";
const CMD_MISSING_ID: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

pub struct CmdContentEntry {
    pub content_index: u16,
    pub content_id: u32,
    /// The first 0x100 bytes of this content's ciphertext, starting at
    /// ciphertext offset 0x100 (the console hashes the still-encrypted
    /// bytes, not the plaintext).
    pub ciphertext_sample: [u8; 0x100],
}

/// `cmd_id` is 1 for every non-DLC title, or the number of contents for DLC.
pub fn build_cmd_file(
    cmd_id: u32,
    entries: &[CmdContentEntry],
    crypto: &CryptoEngine,
) -> InstallResult<Vec<u8>> {
    let highest_index = entries.iter().map(|e| e.content_index).max().unwrap_or(0);

    let mut ids_by_index = vec![CMD_MISSING_ID; highest_index as usize + 1];
    let mut cmacs = vec![MISSING_CONTENT_CMAC; highest_index as usize + 1];
    let mut installed_ids: Vec<[u8; 4]> = Vec::new();

    for entry in entries {
        let id_bytes_be = entry.content_id.to_be_bytes();
        let mut id_bytes_reversed = id_bytes_be;
        id_bytes_reversed.reverse();

        let mut cmac_data = entry.ciphertext_sample.to_vec();
        cmac_data.extend_from_slice(&(entry.content_index as u32).to_le_bytes());
        cmac_data.extend_from_slice(&id_bytes_reversed);

        let digest = Sha256::digest(&cmac_data);
        let mut cmac = crypto.create_cmac(keyslot::CMAC_SD_NAND)?;
        cmac.update(&digest);
        let cmac_bytes = cmac.finalize();

        let idx = entry.content_index as usize;
        ids_by_index[idx] = id_bytes_reversed;
        cmacs[idx] = cmac_bytes;
        installed_ids.push(id_bytes_reversed);
    }

    installed_ids.sort_by_key(|id| u32::from_le_bytes(*id));

    let mut out = Vec::new();
    out.extend_from_slice(&cmd_id.to_le_bytes());
    out.extend_from_slice(&(ids_by_index.len() as u32).to_le_bytes());
    out.extend_from_slice(&(installed_ids.len() as u32).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());

    let mut header_cmac = crypto.create_cmac(keyslot::CMAC_SD_NAND)?;
    header_cmac.update(&out);
    out.extend_from_slice(&header_cmac.finalize());

    for id in &ids_by_index {
        out.extend_from_slice(id);
    }
    for id in &installed_ids {
        out.extend_from_slice(id);
    }
    for cmac in &cmacs {
        out.extend_from_slice(cmac);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_index_gets_placeholder() {
        let crypto = {
            let mut c = CryptoEngine::new(false);
            c.set_normal_key_for_test(keyslot::CMAC_SD_NAND, [0x42; 16]);
            c
        };

        let entries = vec![
            CmdContentEntry {
                content_index: 0,
                content_id: 0x00000000,
                ciphertext_sample: [0xAB; 0x100],
            },
            CmdContentEntry {
                content_index: 2,
                content_id: 0x00000002,
                ciphertext_sample: [0xCD; 0x100],
            },
        ];

        let cmd = build_cmd_file(1, &entries, &crypto).unwrap();
        assert_eq!(&cmd[0..4], &1u32.to_le_bytes());

        // ids_by_index starts after cmd_id(4) + total(4) + installed(4) + 1(4) + cmac(16)
        let ids_start = 4 + 4 + 4 + 4 + 16;
        let id1 = &cmd[ids_start + 4..ids_start + 8];
        assert_eq!(id1, &CMD_MISSING_ID);
    }
}
