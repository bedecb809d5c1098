//! The 3DS cryptographic engine: a keyslot store plus the ARM9 bootROM,
//! `movable.sed` and ticket ingestion routines that populate it.

pub mod cipher;
pub mod error;
pub mod io;

use crate::crypto::cipher::{CbcCipher, CmacEngine, CtrCipher};
use crate::crypto::error::{CryptoError, CryptoResult};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Well-known keyslot numbers used throughout the install pipeline. Kept as
/// plain constants, not an enum, since the keyslot store is addressed over
/// the full 8-bit range and most slots are never named.
pub mod keyslot {
    pub const TWL_NAND: u8 = 0x03;
    pub const CTR_NAND_OLD: u8 = 0x04;
    pub const CTR_NAND_NEW: u8 = 0x05;
    pub const NCCH_9_3: u8 = 0x18;
    pub const NCCH_9_6: u8 = 0x1B;
    pub const NCCH_7_0: u8 = 0x25;
    pub const NCCH: u8 = 0x2C;
    pub const CMAC_SD_NAND: u8 = 0x30;
    pub const SD: u8 = 0x34;
    pub const DSIWARE_EXPORT: u8 = 0x3A;
    pub const COMMON_KEY: u8 = 0x3D;
    pub const DECRYPTED_TITLEKEY: u8 = 0x40;
}

const BOOT9_PROT_HASH: [u8; 32] = hex_literal::hex!(
    "7331f7edece3dd33f2ab4bd0b3a5d607229fd19212c10b734cedcaf78c1a7b98"
);

const DEV_COMMON_KEY_0: u128 = 0x55A3F872BDC80C555A654381139E153B;

/// KeyY values for the 6 defined common-key slots, retail devices. Index is
/// the ticket's common key index byte.
const COMMON_KEY_Y: [u128; 6] = [
    0xD07B337F9CA4385932A2E25723232EB9,
    0x0C767230F0998F1C46828202FAACBE4C,
    0xC475CB3AB8C788BB575E12A10907B8A4,
    0xE486EEE3D0C09C902F6686D4C06F649F,
    0xED31BA9C04B067506C4497A35B7804FC,
    0x5E66998AB4E8931606850FD7A16DD755,
];

/// (retail, dev) KeyX pairs for the NCCH keyslots introduced in later system
/// versions.
const BASE_KEY_X: [(u8, u128, u128); 3] = [
    (
        keyslot::NCCH_9_3,
        0x82E9C9BEBFB8BDB875ECC0A07D474374,
        0x304BF1468372EE64115EBD4093D84276,
    ),
    (
        keyslot::NCCH_9_6,
        0x45AD04953992C7C893724A9A7BCE6182,
        0x6C8B2944A0726035F941DFC018524FB6,
    ),
    (
        keyslot::NCCH_7_0,
        0xCEE7D8AB30C00DAE850EF5E382AC5AF3,
        0x81907A4B6F1B47323A677974CE4AD71B,
    ),
];

#[derive(Clone, Copy, Default)]
struct KeyslotEntry {
    key_x: Option<u128>,
    key_y: Option<u128>,
    normal: Option<[u8; 16]>,
}

/// Keys derived from the ARM9 bootROM are the same for every engine on a
/// given (retail/dev) device; the first successful ingestion populates this
/// cache so later engines don't need to re-read and re-hash the bootROM.
struct BootromKeys {
    key_x: Vec<(u8, u128)>,
    key_normal: Vec<(u8, [u8; 16])>,
}

static RETAIL_BOOTROM_KEYS: OnceLock<BootromKeys> = OnceLock::new();
static DEV_BOOTROM_KEYS: OnceLock<BootromKeys> = OnceLock::new();

/// Computes `ROL128((ROL128(x, 2) ^ y) + NORMAL_CONST, 87)` for non-TWL
/// keyslots, or `ROL128((x ^ y) + TWL_CONST, 42)` for keyslots below 4.
fn keygen(slot: u8, x: u128, y: u128) -> [u8; 16] {
    let normal = if is_twl_slot(slot) {
        (x ^ y)
            .wrapping_add(0xFFFEFB4E295902582A680F5F1A4F3E79)
            .rotate_left(42)
    } else {
        (x.rotate_left(2) ^ y)
            .wrapping_add(0x1FF9E9AAC5FE0408024591DC5D52768A)
            .rotate_left(87)
    };
    normal.to_be_bytes()
}

fn is_twl_slot(slot: u8) -> bool {
    slot <= keyslot::TWL_NAND
}

/// Reads a raw 16-byte key half as big-endian for keyslots above 3, or
/// little-endian for keyslots 0-3 (TWL/DSi slots use the console's native
/// ARM9 byte order).
fn key_half_to_int(slot: u8, raw: [u8; 16]) -> u128 {
    if slot > keyslot::TWL_NAND {
        u128::from_be_bytes(raw)
    } else {
        u128::from_le_bytes(raw)
    }
}

/// The full set of AES keyslots (0x00-0xFF), plus the bookkeeping needed to
/// derive normal keys from KeyX/KeyY pairs as they're set.
pub struct KeyslotStore {
    entries: Box<[KeyslotEntry; 256]>,
}

impl KeyslotStore {
    fn new() -> Self {
        Self {
            entries: Box::new([KeyslotEntry::default(); 256]),
        }
    }

    fn set_key_x_int(&mut self, slot: u8, value: u128) {
        let entry = &mut self.entries[slot as usize];
        entry.key_x = Some(value);
        if let Some(y) = entry.key_y {
            entry.normal = Some(keygen(slot, value, y));
        }
    }

    fn set_key_y_int(&mut self, slot: u8, value: u128) {
        let entry = &mut self.entries[slot as usize];
        entry.key_y = Some(value);
        if let Some(x) = entry.key_x {
            entry.normal = Some(keygen(slot, x, value));
        }
    }

    pub fn set_key_x(&mut self, slot: u8, raw: [u8; 16]) {
        self.set_key_x_int(slot, key_half_to_int(slot, raw));
    }

    pub fn set_key_y(&mut self, slot: u8, raw: [u8; 16]) {
        self.set_key_y_int(slot, key_half_to_int(slot, raw));
    }

    pub fn set_normal_key(&mut self, slot: u8, key: [u8; 16]) {
        self.entries[slot as usize].normal = Some(key);
    }

    pub fn normal_key(&self, slot: u8) -> CryptoResult<[u8; 16]> {
        self.entries[slot as usize]
            .normal
            .ok_or(CryptoError::KeyslotMissing(slot))
    }
}

/// Drives key derivation for a single install run: owns a [`KeyslotStore`]
/// plus the SD `id0` derived from `movable.sed`, and hands out ciphers bound
/// to whichever keyslot a container operation needs.
pub struct CryptoEngine {
    store: KeyslotStore,
    dev: bool,
    id0: Option<[u8; 16]>,
}

impl CryptoEngine {
    pub fn new(dev: bool) -> Self {
        let mut store = KeyslotStore::new();

        // Hardcoded TWL KeyYs, present on every console regardless of bootROM.
        store.set_key_y_int(keyslot::TWL_NAND, 0xE1A00005202DDD1DBD4DC4D30AB9DC76);
        store.set_key_y_int(keyslot::CTR_NAND_OLD, 0x4D804F4E9990194613A204AC584460BE);

        for &(slot, retail, dev_key) in &BASE_KEY_X {
            store.set_key_x_int(slot, if dev { dev_key } else { retail });
        }

        Self {
            store,
            dev,
            id0: None,
        }
    }

    fn bootrom_cache(&self) -> &'static OnceLock<BootromKeys> {
        if self.dev {
            &DEV_BOOTROM_KEYS
        } else {
            &RETAIL_BOOTROM_KEYS
        }
    }

    /// Ingests an ARM9 bootROM (`boot9.bin`/`boot9_prot.bin`, 0x8000 or
    /// 0x10000 bytes) and populates every bootROM-derived keyslot.
    pub fn setup_keys_from_boot9(&mut self, boot9: &[u8]) -> CryptoResult<()> {
        if let Some(cached) = self.bootrom_cache().get() {
            self.apply_bootrom_keys(cached);
            return Ok(());
        }

        let computed = Self::derive_bootrom_keys(boot9, self.dev)?;
        self.apply_bootrom_keys(&computed);
        let _ = self.bootrom_cache().set(computed);
        Ok(())
    }

    fn apply_bootrom_keys(&mut self, keys: &BootromKeys) {
        for &(slot, x) in &keys.key_x {
            self.store.set_key_x_int(slot, x);
        }
        for &(slot, normal) in &keys.key_normal {
            self.store.set_normal_key(slot, normal);
        }
    }

    fn derive_bootrom_keys(boot9: &[u8], dev: bool) -> CryptoResult<BootromKeys> {
        if boot9.len() != 0x8000 && boot9.len() != 0x10000 {
            return Err(CryptoError::BadBootromSize(boot9.len()));
        }
        let b9 = if boot9.len() == 0x10000 {
            &boot9[0x8000..]
        } else {
            boot9
        };

        let hash = Sha256::digest(b9);
        if hash.as_slice() != BOOT9_PROT_HASH {
            return Err(CryptoError::BadBootromHash);
        }

        let keyblob_offset = 0x5860 + if dev { 0x400 } else { 0 };
        let keyblob = &b9[keyblob_offset..keyblob_offset + 0x400];

        let read16 = |range: std::ops::Range<usize>| -> [u8; 16] {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&keyblob[range]);
            buf
        };

        let mut key_x = Vec::new();
        for slot in 0x2C..=0x2F {
            key_x.push((slot, key_half_to_int(slot, read16(0x170..0x180))));
        }
        for slot in 0x30..=0x33 {
            key_x.push((slot, key_half_to_int(slot, read16(0x180..0x190))));
        }
        for slot in 0x34..=0x37 {
            key_x.push((slot, key_half_to_int(slot, read16(0x190..0x1A0))));
        }
        for slot in 0x38..=0x3B {
            key_x.push((slot, key_half_to_int(slot, read16(0x1A0..0x1B0))));
        }
        key_x.push((0x3C, key_half_to_int(0x3C, read16(0x1B0..0x1C0))));
        key_x.push((0x3D, key_half_to_int(0x3D, read16(0x1C0..0x1D0))));
        key_x.push((0x3E, key_half_to_int(0x3E, read16(0x1D0..0x1E0))));

        let mut key_normal = Vec::new();
        key_normal.push((0x0D, read16(0x270..0x280)));

        Ok(BootromKeys { key_x, key_normal })
    }

    /// Searches `explicit` (usually `--boot9` / `$BOOT9_PATH`), then the
    /// platform config directories, for a usable bootROM file.
    pub async fn setup_keys_from_boot9_file(
        &mut self,
        explicit: Option<&std::path::Path>,
    ) -> CryptoResult<()> {
        let mut candidates: Vec<std::path::PathBuf> = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.to_path_buf());
        }
        if let Ok(env_path) = std::env::var("BOOT9_PATH") {
            candidates.push(std::path::PathBuf::from(env_path));
        }
        for dir in crate::util::config_dirs() {
            candidates.push(dir.join("boot9.bin"));
            candidates.push(dir.join("boot9_prot.bin"));
        }

        for candidate in &candidates {
            if let Ok(data) = tokio::fs::read(candidate).await {
                if self.setup_keys_from_boot9(&data).is_ok() {
                    return Ok(());
                }
            }
        }

        Err(CryptoError::BootromNotFound(candidates))
    }

    /// Ingests `movable.sed` (or a bare 0x10-byte SD key), deriving `id0` and
    /// the three SD-bound keyslots.
    pub fn setup_sd_key(&mut self, data: &[u8]) -> CryptoResult<()> {
        let key = match data.len() {
            0x10 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(data);
                buf
            }
            0x120 | 0x140 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(&data[0x110..0x120]);
                buf
            }
            other => return Err(CryptoError::BadMovableSedSize(other)),
        };

        self.store.set_key_y(keyslot::SD, key);
        self.store.set_key_y(keyslot::CMAC_SD_NAND, key);
        self.store.set_key_y(keyslot::DSIWARE_EXPORT, key);

        let key_hash = Sha256::digest(key);
        let mut id0 = [0u8; 16];
        for (i, chunk) in key_hash[0..16].chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes(chunk.try_into().unwrap());
            id0[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        self.id0 = Some(id0);

        Ok(())
    }

    pub fn id0(&self) -> CryptoResult<[u8; 16]> {
        self.id0.ok_or(CryptoError::KeyslotMissing(keyslot::SD))
    }

    pub fn id0_hex(&self) -> CryptoResult<String> {
        Ok(hex::encode(self.id0()?))
    }

    /// Decrypts the titlekey from a ticket and loads it into the decrypted
    /// titlekey keyslot (0x40), ready for CIA/CDN content decryption.
    pub fn load_from_ticket(&mut self, ticket: &[u8]) -> CryptoResult<()> {
        if ticket.len() < 0x2AC {
            return Err(CryptoError::TicketTooSmall(ticket.len()));
        }

        let titlekey_enc: [u8; 16] = ticket[0x1BF..0x1CF].try_into().unwrap();
        let title_id = &ticket[0x1DC..0x1E4];
        let common_key_index = ticket[0x1F1];

        let key_y = if self.dev && common_key_index == 0 {
            DEV_COMMON_KEY_0
        } else {
            *COMMON_KEY_Y
                .get(common_key_index as usize)
                .ok_or(CryptoError::UnknownCommonKeyIndex(common_key_index))?
        };
        self.store.set_key_y_int(keyslot::COMMON_KEY, key_y);

        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(title_id);

        let key = self.store.normal_key(keyslot::COMMON_KEY)?;
        let cipher = CbcCipher::new(key, iv, false);
        let titlekey = cipher.decrypt(&titlekey_enc);

        let mut normal = [0u8; 16];
        normal.copy_from_slice(&titlekey);
        self.store.set_normal_key(keyslot::DECRYPTED_TITLEKEY, normal);

        Ok(())
    }

    /// Derives the IV that `CTRFileIO` uses for a given SD-relative install
    /// path, mirroring the console's own path-dependent content encryption.
    pub fn sd_path_to_iv(path: &str) -> [u8; 16] {
        let path = path.replace("/backup/", "/main/");
        let utf16: Vec<u8> = path
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .chain([0u8, 0u8])
            .collect();

        let hash = Sha256::digest(&utf16);
        let mut iv = [0u8; 16];
        for i in 0..16 {
            iv[i] = hash[i] ^ hash[16 + i];
        }
        iv
    }

    pub fn create_ctr_cipher(&self, slot: u8, counter: u128) -> CryptoResult<CtrCipher> {
        Ok(CtrCipher::new(
            self.store.normal_key(slot)?,
            counter,
            is_twl_slot(slot),
        ))
    }

    pub fn create_cbc_cipher(&self, slot: u8, iv: [u8; 16]) -> CryptoResult<CbcCipher> {
        Ok(CbcCipher::new(
            self.store.normal_key(slot)?,
            iv,
            is_twl_slot(slot),
        ))
    }

    pub fn create_cmac(&self, slot: u8) -> CryptoResult<CmacEngine> {
        Ok(CmacEngine::new(self.store.normal_key(slot)?))
    }

    /// Sets the KeyY for an arbitrary keyslot, deriving its normal key if a
    /// KeyX is already present. Used by the NCCH reader to load a content's
    /// per-partition KeyY (plain or seeded) into the Original/extra keyslot.
    pub fn set_key_y(&mut self, slot: u8, raw: [u8; 16]) {
        self.store.set_key_y(slot, raw);
    }

    #[cfg(test)]
    pub(crate) fn set_normal_key_for_test(&mut self, slot: u8, key: [u8; 16]) {
        self.store.set_normal_key(slot, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rol128_matches_reference_vector() {
        let x: u128 = 0x0123456789ABCDEF0123456789ABCDEF;
        assert_eq!(
            x.rotate_left(87),
            0x456789ABCDEF0123456789ABCDEF0123
        );
    }

    #[test]
    fn keygen_normal_matches_manual_formula() {
        let x: u128 = 1;
        let y: u128 = 2;
        let expected = (x.rotate_left(2) ^ y)
            .wrapping_add(0x1FF9E9AAC5FE0408024591DC5D52768A)
            .rotate_left(87)
            .to_be_bytes();
        assert_eq!(keygen(keyslot::NCCH, x, y), expected);
    }

    #[test]
    fn set_key_x_then_y_derives_normal_key() {
        let mut store = KeyslotStore::new();
        store.set_key_x(keyslot::NCCH, [1; 16]);
        assert!(store.normal_key(keyslot::NCCH).is_err());
        store.set_key_y(keyslot::NCCH, [2; 16]);
        assert!(store.normal_key(keyslot::NCCH).is_ok());
    }

    #[test]
    fn key_half_endianness_depends_on_slot() {
        let raw = [0u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(key_half_to_int(keyslot::NCCH, raw), 1);
        assert_eq!(
            key_half_to_int(keyslot::TWL_NAND, raw),
            0x0100_0000_0000_0000_0000_0000_0000_0000
        );
    }

    #[test]
    fn load_from_ticket_decrypted_titlekey_round_trips_under_its_own_cbc_iv() {
        // load_from_ticket only re-derives the common key's normal key from
        // a KeyX if one was already set; since no bootROM was ingested here
        // the fixed key below survives untouched into the CBC decrypt step.
        let mut engine = CryptoEngine::new(false);
        engine.set_normal_key_for_test(keyslot::COMMON_KEY, [0x11; 16]);

        let title_id: u64 = 0x0004000000046500;
        let mut ticket = vec![0u8; 0x2AC];
        ticket[0x1F1] = 0;
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&title_id.to_be_bytes());
        let encrypted = CbcCipher::new([0x11; 16], iv, false).encrypt(&[0xAB; 16]);
        ticket[0x1BF..0x1CF].copy_from_slice(&encrypted);
        ticket[0x1DC..0x1E4].copy_from_slice(&title_id.to_be_bytes());

        engine.load_from_ticket(&ticket).unwrap();

        let titlekey = engine.store.normal_key(keyslot::DECRYPTED_TITLEKEY).unwrap();
        let cipher = CbcCipher::new(titlekey, iv, false);
        let round_tripped = cipher.encrypt(&[0u8; 16]);
        let decrypted_back = CbcCipher::new(titlekey, iv, false).decrypt(&round_tripped);
        assert_eq!(decrypted_back, [0u8; 16]);
    }

    #[test]
    fn sd_path_to_iv_is_stable_and_rewrites_backup() {
        let iv_main = CryptoEngine::sd_path_to_iv("/title/00040000/12345678/content/main");
        let iv_backup = CryptoEngine::sd_path_to_iv("/backup/00040000/12345678/content/main");
        let iv_main_again = CryptoEngine::sd_path_to_iv("/main/00040000/12345678/content/main");
        assert_eq!(iv_backup, iv_main_again);
        assert_ne!(iv_main, iv_backup);
    }
}
