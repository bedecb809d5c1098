use crate::container::signature::SignatureData;
use crate::error::ContainerError;
use binrw::{BinRead, BinWrite};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub const CHUNK_RECORD_SIZE: u64 = 0x30;

/// Title metadata: the signed record of a title's system version, save data
/// sizes and the content chunks that make it up, each with its own SHA-256.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TitleMetadata {
    pub signature_data: SignatureData,
    pub header: TitleMetadataHeader,
    #[br(count = 64)]
    pub content_info_records: Vec<ContentInfoRecord>,
    #[br(count = header.content_count)]
    pub content_chunk_records: Vec<ContentChunkRecord>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TitleMetadataHeader {
    #[br(count = 0x40)]
    pub signature_issuer: Vec<u8>,
    pub version: u8,
    pub ca_crl_version: u8,
    pub signer_crl_version: u8,
    pub reserved1: u8,
    pub system_version: u64,
    pub title_id: u64,
    pub title_type: u32,
    pub group_id: u16,
    /// Stored little-endian even though the rest of the TMD is big-endian.
    #[brw(little)]
    pub save_data_size: u32,
    /// Also little-endian.
    #[brw(little)]
    pub srl_private_save_data_size: u32,
    pub reserved2: u32,
    pub srl_flag: u8,
    #[br(count = 0x31)]
    pub reserved3: Vec<u8>,
    pub access_rights: u32,
    pub title_version: u16,
    pub content_count: u16,
    pub boot_content: u16,
    pub padding: u16,
    #[br(count = 0x20)]
    pub content_info_records_hash: Vec<u8>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentInfoRecord {
    pub content_index_offset: u16,
    pub content_command_count: u16,
    #[br(count = 0x20)]
    pub hash: Vec<u8>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentChunkRecord {
    pub content_id: u32,
    pub content_index: u16,
    pub content_type: ContentType,
    pub content_size: u64,
    #[br(count = 0x20)]
    pub hash: Vec<u8>,
}

#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentType(pub u16);

impl ContentType {
    pub const ENCRYPTED: u16 = 0x0001;
    pub const DISC: u16 = 0x0002;
    pub const CFM: u16 = 0x0004;
    pub const OPTIONAL: u16 = 0x4000;
    pub const SHARED: u16 = 0x8000;

    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn is_optional(&self) -> bool {
        self.0 & Self::OPTIONAL != 0
    }

    pub fn is_shared(&self) -> bool {
        self.0 & Self::SHARED != 0
    }
}

impl TitleMetadata {
    /// Verifies the Info-Record-over-Info-Records hash in the header, then
    /// walks each Info Record's chunk-record range, hashing it and checking
    /// it against that record's own hash. A chunk record claimed by more
    /// than one Info Record is rejected, matching the reference reader's
    /// "already hashed" guard.
    pub fn verify_hashes(&self) -> Result<(), ContainerError> {
        let mut info_buf = Vec::with_capacity(64 * 0x24);
        for info in &self.content_info_records {
            info_buf.extend_from_slice(&info.content_index_offset.to_be_bytes());
            info_buf.extend_from_slice(&info.content_command_count.to_be_bytes());
            info_buf.extend_from_slice(&info.hash);
        }
        if Sha256::digest(&info_buf).as_slice() != self.header.content_info_records_hash.as_slice() {
            return Err(ContainerError::BadInfoRecordHash);
        }

        let mut hashed: HashSet<u16> = HashSet::new();
        for info in &self.content_info_records {
            if info.content_command_count == 0 {
                continue;
            }
            let start = info.content_index_offset as usize;
            let end = start + info.content_command_count as usize;
            if end > self.content_chunk_records.len() {
                continue;
            }
            let range = &self.content_chunk_records[start..end];

            let mut chunk_buf = Vec::with_capacity(range.len() * CHUNK_RECORD_SIZE as usize);
            for record in range {
                chunk_buf.extend_from_slice(&record.content_id.to_be_bytes());
                chunk_buf.extend_from_slice(&record.content_index.to_be_bytes());
                chunk_buf.extend_from_slice(&record.content_type.0.to_be_bytes());
                chunk_buf.extend_from_slice(&record.content_size.to_be_bytes());
                chunk_buf.extend_from_slice(&record.hash);
            }

            if Sha256::digest(&chunk_buf).as_slice() != info.hash.as_slice() {
                return Err(ContainerError::BadInfoRecordHash);
            }

            for record in range {
                if !hashed.insert(record.content_index) {
                    return Err(ContainerError::DuplicateChunkHash(record.content_index));
                }
            }
        }

        Ok(())
    }

    pub fn find_chunk(&self, content_index: u16) -> Option<&ContentChunkRecord> {
        self.content_chunk_records
            .iter()
            .find(|r| r.content_index == content_index)
    }
}
