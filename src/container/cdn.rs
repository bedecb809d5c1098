//! Reads a CDN-style content directory (a `tmd`, a ticket, and each content
//! named by its hex content ID) the same way a CIA is read once unpacked —
//! no teacher analog exists since the teacher only ever builds or reads
//! CIAs, never bare CDN layouts.

use crate::container::cia::CiaContent;
use crate::container::ticket::Ticket;
use crate::container::tmd::TitleMetadata;
use crate::crypto::CryptoEngine;
use crate::error::{InstallError, InstallResult};
use crate::util::fs::{find_title_file, find_tmd_file};
use binrw::BinRead;
use std::collections::HashMap;
use std::path::Path;

pub struct CdnReader {
    pub tmd: TitleMetadata,
    pub contents: HashMap<u16, CiaContent>,
}

impl CdnReader {
    pub async fn open(dir: &Path, crypto: &mut CryptoEngine) -> InstallResult<Self> {
        let tmd_path = find_tmd_file(dir).await?;
        let ticket_path = find_title_file(dir).await?;

        let tmd_data = tokio::fs::read(&tmd_path).await?;
        let ticket_data = tokio::fs::read(&ticket_path).await?;

        let tmd = TitleMetadata::read_be(&mut std::io::Cursor::new(&tmd_data))
            .map_err(crate::error::ContainerError::from)?;
        let _ticket = Ticket::read_be(&mut std::io::Cursor::new(&ticket_data))
            .map_err(crate::error::ContainerError::from)?;
        crypto.load_from_ticket(&ticket_data)?;

        let mut contents = HashMap::new();
        for record in &tmd.content_chunk_records {
            let content_path = dir.join(format!("{:08x}", record.content_id));
            let raw = tokio::fs::read(&content_path)
                .await
                .map_err(|_| InstallError::MissingContentFile(record.content_index, dir.to_path_buf()))?;

            let plaintext = if record.content_type.is_encrypted() {
                let mut iv = [0u8; 16];
                iv[0..2].copy_from_slice(&record.content_index.to_be_bytes());
                let cipher = crypto.create_cbc_cipher(crate::crypto::keyslot::DECRYPTED_TITLEKEY, iv)?;
                cipher.decrypt(&raw)
            } else {
                raw
            };

            contents.insert(
                record.content_index,
                CiaContent {
                    content_id: record.content_id,
                    content_index: record.content_index,
                    data: plaintext,
                },
            );
        }

        Ok(Self { tmd, contents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::signature::{SignatureData, SignatureType};
    use crate::container::ticket::{ContentIndex, TicketData};
    use crate::container::tmd::{ContentChunkRecord, ContentInfoRecord, ContentType, TitleMetadataHeader};
    use binrw::BinWrite;
    use sha2::{Digest, Sha256};

    fn signed_stub() -> SignatureData {
        SignatureData {
            signature_type: SignatureType::Rsa2048Sha256,
            signature: vec![0xAA; 0x100],
            padding: vec![0x00; 0x3C],
        }
    }

    fn ticket_bytes(title_id: u64) -> Vec<u8> {
        let ticket = Ticket {
            signature_data: signed_stub(),
            ticket_data: TicketData {
                issuer: vec![0x00; 0x40],
                ecc_public_key: vec![0x00; 0x3C],
                version: 1,
                ca_crl_version: 0,
                signer_crl_version: 0,
                title_key: vec![0xFF; 0x10],
                reserved1: 0,
                ticket_id: 0,
                console_id: 0,
                title_id,
                reserved2: 0,
                ticket_title_version: 0,
                reserved3: 0,
                license_type: 0,
                common_key_index: 0,
                reserved4: vec![0x00; 0x2A],
                eshop_account_id: 0,
                reserved5: 0,
                audit: 0,
                reserved6: vec![0x00; 0x42],
                limits: vec![0x00; 0x40],
                content_index: ContentIndex {
                    header_word: 0,
                    total_size: 22,
                    data: vec![0x00; 20],
                },
            },
        };
        let mut buf = Vec::new();
        ticket.write_be(&mut std::io::Cursor::new(&mut buf)).unwrap();
        buf
    }

    fn single_content_tmd(title_id: u64, content: &[u8]) -> TitleMetadata {
        let chunk = ContentChunkRecord {
            content_id: 0,
            content_index: 0,
            content_type: ContentType(0),
            content_size: content.len() as u64,
            hash: Sha256::digest(content).to_vec(),
        };

        let mut chunk_buf = Vec::new();
        chunk_buf.extend_from_slice(&chunk.content_id.to_be_bytes());
        chunk_buf.extend_from_slice(&chunk.content_index.to_be_bytes());
        chunk_buf.extend_from_slice(&chunk.content_type.0.to_be_bytes());
        chunk_buf.extend_from_slice(&chunk.content_size.to_be_bytes());
        chunk_buf.extend_from_slice(&chunk.hash);
        let info_hash = Sha256::digest(&chunk_buf).to_vec();

        let mut info_records = vec![ContentInfoRecord {
            content_index_offset: 0,
            content_command_count: 1,
            hash: info_hash,
        }];
        info_records.resize(
            64,
            ContentInfoRecord {
                content_index_offset: 0,
                content_command_count: 0,
                hash: vec![0x00; 0x20],
            },
        );

        let mut info_buf = Vec::new();
        for info in &info_records {
            info_buf.extend_from_slice(&info.content_index_offset.to_be_bytes());
            info_buf.extend_from_slice(&info.content_command_count.to_be_bytes());
            info_buf.extend_from_slice(&info.hash);
        }
        let header_hash = Sha256::digest(&info_buf).to_vec();

        TitleMetadata {
            signature_data: signed_stub(),
            header: TitleMetadataHeader {
                signature_issuer: vec![0x00; 0x40],
                version: 1,
                ca_crl_version: 0,
                signer_crl_version: 0,
                reserved1: 0,
                system_version: 0,
                title_id,
                title_type: 0x00040010,
                group_id: 0,
                save_data_size: 0,
                srl_private_save_data_size: 0,
                reserved2: 0,
                srl_flag: 0,
                reserved3: vec![0x00; 0x31],
                access_rights: 0,
                title_version: 0x0100,
                content_count: 1,
                boot_content: 0,
                padding: 0,
                content_info_records_hash: header_hash,
            },
            content_info_records: info_records,
            content_chunk_records: vec![chunk],
        }
    }

    #[tokio::test]
    async fn reads_plaintext_content_keyed_by_content_index() {
        let title_id: u64 = 0x0004000000046500;
        let content = vec![0x5A; 0x400];

        let dir = tempfile::tempdir().unwrap();
        let tmd = single_content_tmd(title_id, &content);
        let mut tmd_buf = Vec::new();
        tmd.write_be(&mut std::io::Cursor::new(&mut tmd_buf)).unwrap();
        tokio::fs::write(dir.path().join("tmd"), &tmd_buf).await.unwrap();
        tokio::fs::write(dir.path().join("cetk"), ticket_bytes(title_id)).await.unwrap();
        tokio::fs::write(dir.path().join("00000000"), &content).await.unwrap();

        let mut crypto = CryptoEngine::new(false);
        crypto.set_normal_key_for_test(crate::crypto::keyslot::COMMON_KEY, [0x11; 16]);
        let reader = CdnReader::open(dir.path(), &mut crypto).await.unwrap();

        assert_eq!(reader.tmd.header.title_id, title_id);
        let parsed = reader.contents.get(&0).unwrap();
        assert_eq!(parsed.content_id, 0);
        assert_eq!(parsed.data, content);
    }
}
