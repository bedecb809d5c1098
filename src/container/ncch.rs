//! NCCH (CTR Executable Image / CTR File Archive) container parsing and
//! decryption. Unlike the Python reference this reads whole sections into
//! memory rather than serving a seekable file-like object: every section
//! this tool ever touches (ExtendedHeader, ExeFS, RomFS, the assembled
//! `FullDecrypted` image) is consumed in full during an install run, so
//! there is no streaming reader to preserve.

use crate::crypto::{keyslot, CryptoEngine};
use crate::error::ContainerError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const NCCH_MEDIA_UNIT: u64 = 0x200;
pub const FIXED_SYSTEM_KEY: u128 = 0x527CE630A9CA305F3696F3CDE954194B;

/// Selects the extra keyslot used for RomFS and parts of ExeFS, keyed by the
/// header's `crypto_method` flag byte.
pub fn extra_keyslot_for(crypto_method: u8) -> Option<u8> {
    match crypto_method {
        0x00 => Some(keyslot::NCCH),
        0x01 => Some(keyslot::NCCH_7_0),
        0x0A => Some(keyslot::NCCH_9_3),
        0x0B => Some(keyslot::NCCH_9_6),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcchSection {
    Header,
    ExtendedHeader,
    Logo,
    Plain,
    ExeFs,
    RomFs,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    offset: u64,
    size: u64,
}

impl Region {
    fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NcchFlags {
    pub crypto_method: u8,
    pub executable: bool,
    pub fixed_crypto_key: bool,
    pub no_romfs: bool,
    pub no_crypto: bool,
    pub uses_seed: bool,
}

/// A parsed NCCH header plus the section table it describes. Holds the raw
/// (still-encrypted, except for [`NcchSection::Header`]) content bytes and
/// decrypts sections on demand.
pub struct NcchReader {
    raw: Vec<u8>,
    pub content_size: u64,
    pub partition_id: u64,
    pub program_id: u64,
    pub product_code: String,
    pub version: u16,
    pub flags: NcchFlags,
    seed_verify: [u8; 4],
    key_y: [u8; 16],
    seeded_key_y: Option<[u8; 16]>,
    sections: HashMap<NcchSection, Region>,
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

impl NcchReader {
    pub fn new(raw: Vec<u8>, crypto: &mut CryptoEngine) -> Result<Self, ContainerError> {
        if raw.len() < 0x200 || &raw[0x100..0x104] != b"NCCH" {
            return Err(ContainerError::BadNcchMagic(le_u64(&raw, 0x108)));
        }
        let header = &raw[..0x200];

        let mut key_y = [0u8; 16];
        key_y.copy_from_slice(&header[0x0..0x10]);

        let version = u16::from_le_bytes(header[0x112..0x114].try_into().unwrap());
        let content_size = le_u32(header, 0x104) as u64 * NCCH_MEDIA_UNIT;
        let partition_id = le_u64(header, 0x108);
        let program_id = le_u64(header, 0x118);

        let mut seed_verify = [0u8; 4];
        seed_verify.copy_from_slice(&header[0x114..0x118]);

        let product_code = std::str::from_utf8(&header[0x150..0x160])
            .unwrap_or("")
            .trim_end_matches('\0')
            .to_string();

        let extheader_size = le_u32(header, 0x180);

        let flags_raw = &header[0x188..0x190];
        let flags = NcchFlags {
            crypto_method: flags_raw[3],
            executable: flags_raw[5] & 0x2 != 0,
            fixed_crypto_key: flags_raw[7] & 0x1 != 0,
            no_romfs: flags_raw[7] & 0x2 != 0,
            no_crypto: flags_raw[7] & 0x4 != 0,
            uses_seed: flags_raw[7] & 0x20 != 0,
        };

        let mut sections = HashMap::new();
        sections.insert(
            NcchSection::Header,
            Region {
                offset: 0,
                size: NCCH_MEDIA_UNIT,
            },
        );
        if extheader_size == 0x400 {
            sections.insert(
                NcchSection::ExtendedHeader,
                Region {
                    offset: NCCH_MEDIA_UNIT,
                    size: 4 * NCCH_MEDIA_UNIT,
                },
            );
        }
        let mut add = |section, unit_off: u32, units: u32| {
            if units != 0 {
                sections.insert(
                    section,
                    Region {
                        offset: unit_off as u64 * NCCH_MEDIA_UNIT,
                        size: units as u64 * NCCH_MEDIA_UNIT,
                    },
                );
            }
        };
        add(NcchSection::Logo, le_u32(header, 0x198), le_u32(header, 0x19C));
        add(NcchSection::Plain, le_u32(header, 0x190), le_u32(header, 0x194));
        add(NcchSection::ExeFs, le_u32(header, 0x1A0), le_u32(header, 0x1A4));
        add(NcchSection::RomFs, le_u32(header, 0x1B0), le_u32(header, 0x1B4));

        crypto.set_key_y(keyslot::NCCH, key_y);

        Ok(Self {
            raw,
            content_size,
            partition_id,
            program_id,
            product_code,
            version,
            flags,
            seed_verify,
            key_y,
            seeded_key_y: None,
            sections,
        })
    }

    pub fn has_extheader(&self) -> bool {
        self.sections.contains_key(&NcchSection::ExtendedHeader)
    }

    /// `SHA256(seed || program_id_le)`'s first four bytes must match the
    /// header's seed-verify field before the seed is accepted.
    pub fn setup_seed(&mut self, seed: &[u8; 16], crypto: &mut CryptoEngine) -> Result<(), ContainerError> {
        if !self.flags.uses_seed {
            return Ok(());
        }
        let mut buf = seed.to_vec();
        buf.extend_from_slice(&self.program_id.to_le_bytes());
        let hash = Sha256::digest(&buf);
        if hash[0..4] != self.seed_verify {
            return Err(ContainerError::BadNcchMagic(self.program_id));
        }
        let mut key_buf = self.key_y.to_vec();
        key_buf.extend_from_slice(seed);
        let derived = Sha256::digest(&key_buf);
        let mut seeded = [0u8; 16];
        seeded.copy_from_slice(&derived[0..16]);
        self.seeded_key_y = Some(seeded);

        let extra_slot = extra_keyslot_for(self.flags.crypto_method)
            .ok_or(ContainerError::BadNcchMagic(self.flags.crypto_method as u64))?;
        crypto.set_key_y(extra_slot, seeded);
        Ok(())
    }

    fn region_iv(&self, section: NcchSection) -> u128 {
        let section_id: u8 = match section {
            NcchSection::ExtendedHeader => 1,
            NcchSection::ExeFs => 2,
            NcchSection::RomFs => 3,
            NcchSection::Header | NcchSection::Logo | NcchSection::Plain => 4,
        };
        ((self.partition_id as u128) << 64) | ((section_id as u128) << 56)
    }

    /// Returns the fully decrypted bytes of `section`. Header/Logo/Plain are
    /// stored unencrypted; ExtendedHeader always uses the Original NCCH
    /// keyslot; ExeFS and RomFS use the extra keyslot selected by
    /// `crypto_method`, except for the ExeFS header and any `icon`/`banner`
    /// file body, which remain under the Original NCCH keyslot regardless.
    pub fn read_section(&self, section: NcchSection, crypto: &CryptoEngine) -> Result<Vec<u8>, ContainerError> {
        let region = *self
            .sections
            .get(&section)
            .ok_or(ContainerError::BadNcchMagic(0))?;
        let data = self.raw[region.offset as usize..region.end() as usize].to_vec();

        if self.flags.no_crypto
            || matches!(section, NcchSection::Header | NcchSection::Logo | NcchSection::Plain)
        {
            return Ok(data);
        }

        match section {
            NcchSection::ExtendedHeader => {
                let cipher = crypto.create_ctr_cipher(keyslot::NCCH, self.region_iv(section))?;
                let mut buf = data;
                cipher.apply_keystream(&mut buf);
                Ok(buf)
            }
            NcchSection::RomFs => {
                let extra_slot = extra_keyslot_for(self.flags.crypto_method)
                    .ok_or(ContainerError::BadNcchMagic(self.flags.crypto_method as u64))?;
                let cipher = crypto.create_ctr_cipher(extra_slot, self.region_iv(section))?;
                let mut buf = data;
                cipher.apply_keystream(&mut buf);
                Ok(buf)
            }
            NcchSection::ExeFs => self.decrypt_exefs(&data, crypto),
            _ => Ok(data),
        }
    }

    /// The ExeFS header (first 0x200 bytes) and the `icon`/`banner` entries
    /// always decrypt under the Original NCCH keyslot even when
    /// `crypto_method` selects a newer one for everything else; this walks
    /// 0x200-aligned chunks, picking the keyslot per chunk.
    fn decrypt_exefs(&self, data: &[u8], crypto: &CryptoEngine) -> Result<Vec<u8>, ContainerError> {
        let extra_slot = extra_keyslot_for(self.flags.crypto_method)
            .ok_or(ContainerError::BadNcchMagic(self.flags.crypto_method as u64))?;

        // The header is always under the Original NCCH keyslot, independent
        // of crypto_method, so it can be decrypted up front to find any
        // icon/banner entries that also keep that keyslot for their body.
        let header_iv = self.region_iv(NcchSection::ExeFs);
        let header_cipher = crypto.create_ctr_cipher(keyslot::NCCH, header_iv)?;
        let mut header = data.get(..0x200).unwrap_or(data).to_vec();
        header_cipher.apply_keystream(&mut header);

        let mut normal_ranges: Vec<(u64, u64)> = vec![(0, 0x200)];
        if let Ok(parsed) = super::exefs::ExeFsReader::new(header.clone()) {
            for entry in parsed.entries.values() {
                if entry.name == "icon" || entry.name == "banner" {
                    let start = entry.offset as u64 + 0x200;
                    let end = start + crate::util::roundup(entry.size as u64, NCCH_MEDIA_UNIT);
                    normal_ranges.push((start, end));
                }
            }
        }

        let mut out = vec![0u8; data.len()];
        let mut chunk_start = 0u64;
        while (chunk_start as usize) < data.len() {
            let chunk_end = ((chunk_start + NCCH_MEDIA_UNIT) as usize).min(data.len());
            let keyslot = if normal_ranges
                .iter()
                .any(|&(s, e)| s <= chunk_start && chunk_start < e)
            {
                keyslot::NCCH
            } else {
                extra_slot
            };
            let iv = self.region_iv(NcchSection::ExeFs) + (chunk_start >> 4) as u128;
            let cipher = crypto.create_ctr_cipher(keyslot, iv)?;
            let mut buf = data[chunk_start as usize..chunk_end].to_vec();
            cipher.apply_keystream(&mut buf);
            out[chunk_start as usize..chunk_end].copy_from_slice(&buf);
            chunk_start += NCCH_MEDIA_UNIT;
        }
        Ok(out)
    }

    /// Assembles the fully decrypted NCCH image byte-for-byte: every region
    /// decrypted in place, with the header's crypto flags zeroed out
    /// (offset 0x18B and 0x18F set as if encryption had never been used),
    /// matching what a "decrypted CXI" dump looks like.
    pub fn full_decrypted(&self, crypto: &CryptoEngine) -> Result<Vec<u8>, ContainerError> {
        let mut out = vec![0u8; self.content_size as usize];

        let mut header = self.read_section(NcchSection::Header, crypto)?;
        header[0x18B] = 0;
        header[0x18F] = 4;
        out[0..header.len()].copy_from_slice(&header);

        for &section in &[
            NcchSection::ExtendedHeader,
            NcchSection::Logo,
            NcchSection::Plain,
            NcchSection::ExeFs,
            NcchSection::RomFs,
        ] {
            if let Some(region) = self.sections.get(&section) {
                let decrypted = self.read_section(section, crypto)?;
                let start = region.offset as usize;
                out[start..start + decrypted.len()].copy_from_slice(&decrypted);
            }
        }

        Ok(out)
    }
}
