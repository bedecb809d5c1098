//! CIA (CTR Importable Archive) reading: the archive header, certificate
//! chain, ticket and TMD use the teacher's aligned binrw layout almost
//! unchanged; [`CiaReader`] is new, and walks that layout to decrypt each
//! content and hand back an [`NcchReader`] for it.

use crate::container::certificate::Certificate;
use crate::container::ncch::NcchReader;
use crate::container::ticket::Ticket;
use crate::container::tmd::TitleMetadata;
use crate::crypto::CryptoEngine;
use crate::error::ContainerError;
use crate::util::roundup;
use binrw::{BinRead, BinResult, BinWrite, Endian};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom, Write};

pub const CIA_HEADER_SIZE: u32 = 0x2020;
const ALIGN_SIZE: u64 = 64;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct CiaHeader {
    pub header_size: u32,
    pub cia_type: u16,
    pub version: u16,
    pub cert_chain_size: u32,
    pub ticket_size: u32,
    pub tmd_size: u32,
    pub meta_size: u32,
    pub content_size: u64,
    #[br(count = 0x2000)]
    pub content_index: Vec<u8>,
}

impl CiaHeader {
    pub fn set_content_index(&mut self, content_index: usize) {
        let byte_index = content_index / 8;
        let bit_index = 7 - (content_index % 8);
        if byte_index < self.content_index.len() {
            self.content_index[byte_index] |= 1 << bit_index;
        }
    }

    /// Bits are numbered MSB-first within each byte: bit 7 of byte 0 is
    /// content index 0, bit 0 of byte 0 is content index 7, and so on.
    fn active_contents(&self) -> HashSet<u16> {
        let mut active = HashSet::new();
        for (idx, &byte) in self.content_index.iter().enumerate() {
            for bit in 0..8u16 {
                if byte & (1 << bit) != 0 {
                    active.insert((idx as u16) * 8 + (7 - bit));
                }
            }
        }
        active
    }
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct MetaData {
    #[br(count = 0x180)]
    pub dependency_list: Vec<u8>,
    #[br(count = 0x180)]
    pub reserved1: Vec<u8>,
    pub core_version: u32,
    #[br(count = 0xFC)]
    pub reserved2: Vec<u8>,
    #[br(count = 0x36C0)]
    pub icon_data: Vec<u8>,
}

/// The header/cert-chain/ticket/TMD shell of a CIA, without content bodies.
/// Mirrors the teacher's hand-written alignment logic: every section after
/// the archive header is padded up to a 64-byte boundary.
#[derive(Debug, Clone)]
pub struct CiaFileWithoutContent {
    pub header: CiaHeader,
    pub cert_chain: Vec<Certificate>,
    pub ticket: Ticket,
    pub tmd: TitleMetadata,
}

impl BinRead for CiaFileWithoutContent {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let header = CiaHeader::read_options(reader, Endian::Little, ())?;
        let header_end = reader.stream_position()?;
        reader.seek(SeekFrom::Start(roundup(header_end, ALIGN_SIZE)))?;

        let cert_start = reader.stream_position()?;
        let cert_end = cert_start + header.cert_chain_size as u64;

        let mut cert_chain = Vec::new();
        while reader.stream_position()? < cert_end {
            let current_pos = reader.stream_position()?;
            let mut sig_type_bytes = [0u8; 4];
            reader.read_exact(&mut sig_type_bytes)?;
            reader.seek(SeekFrom::Start(current_pos))?;

            let sig_type_value = u32::from_be_bytes(sig_type_bytes);
            if !matches!(sig_type_value, 0x010000..=0x010005) {
                break;
            }
            cert_chain.push(Certificate::read_options(reader, Endian::Big, ())?);
        }
        reader.seek(SeekFrom::Start(cert_end))?;

        reader.seek(SeekFrom::Start(roundup(cert_end, ALIGN_SIZE)))?;
        let ticket = Ticket::read_options(reader, Endian::Big, ())?;

        let tmd_start = roundup(reader.stream_position()?, ALIGN_SIZE);
        reader.seek(SeekFrom::Start(tmd_start))?;
        let tmd = TitleMetadata::read_options(reader, Endian::Big, ())?;

        Ok(CiaFileWithoutContent {
            header,
            cert_chain,
            ticket,
            tmd,
        })
    }
}

impl BinWrite for CiaFileWithoutContent {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.header.write_options(writer, Endian::Little, ())?;

        let header_end = writer.stream_position()?;
        let cert_start = roundup(header_end, ALIGN_SIZE);
        if cert_start > header_end {
            writer.write_all(&vec![0u8; (cert_start - header_end) as usize])?;
        }

        for cert in &self.cert_chain {
            cert.write_options(writer, Endian::Big, ())?;
        }
        let cert_written = writer.stream_position()? - cert_start;
        if cert_written < self.header.cert_chain_size as u64 {
            writer.write_all(&vec![0u8; (self.header.cert_chain_size as u64 - cert_written) as usize])?;
        }

        let ticket_start = roundup(writer.stream_position()?, ALIGN_SIZE);
        writer.seek(SeekFrom::Start(ticket_start))?;
        self.ticket.write_options(writer, Endian::Big, ())?;

        let tmd_start = roundup(writer.stream_position()?, ALIGN_SIZE);
        writer.seek(SeekFrom::Start(tmd_start))?;
        self.tmd.write_options(writer, Endian::Big, ())?;

        Ok(())
    }
}

/// A decrypted CIA content ready for the SD install writer: its content ID,
/// content index, and the plaintext bytes (still an encoded NCCH, not a
/// decrypted one — CIA-level crypto is a different layer than NCCH-level).
pub struct CiaContent {
    pub content_id: u32,
    pub content_index: u16,
    pub data: Vec<u8>,
}

/// Parses a whole CIA file already read into memory: validates the header,
/// loads the ticket into a [`CryptoEngine`], cross-checks the content-index
/// bitmap against the TMD's chunk records, then decrypts each encrypted
/// content (CBC, IV = content index as a big-endian u16 followed by 14 zero
/// bytes — reused from the same cipher math CIA *writing* would need).
pub struct CiaReader {
    pub shell: CiaFileWithoutContent,
    pub contents: HashMap<u16, CiaContent>,
}

impl CiaReader {
    pub fn new(data: &[u8], crypto: &mut CryptoEngine) -> Result<Self, ContainerError> {
        if data.len() < 0x20 {
            return Err(ContainerError::BadArchiveHeaderSize(data.len() as u32));
        }
        let archive_header_size = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if archive_header_size != CIA_HEADER_SIZE {
            return Err(ContainerError::BadArchiveHeaderSize(archive_header_size));
        }

        let mut cursor = std::io::Cursor::new(data);
        let shell = CiaFileWithoutContent::read(&mut cursor)?;

        let active_contents = shell.header.active_contents();
        let mut active_in_tmd = HashSet::new();
        let mut active_records = Vec::new();
        for record in &shell.tmd.content_chunk_records {
            if active_contents.contains(&record.content_index) {
                active_in_tmd.insert(record.content_index);
                active_records.push(record.clone());
            }
        }
        if active_contents != active_in_tmd {
            let missing = active_contents
                .symmetric_difference(&active_in_tmd)
                .next()
                .copied()
                .unwrap_or(0);
            return Err(ContainerError::ContentIndexMismatch(missing));
        }

        let mut ticket_buf = Vec::new();
        shell
            .ticket
            .write_be(&mut std::io::Cursor::new(&mut ticket_buf))
            .expect("ticket re-serialization cannot fail");
        crypto
            .load_from_ticket(&ticket_buf)
            .map_err(|_| ContainerError::BadArchiveHeaderSize(archive_header_size))?;

        let cert_chain_offset = roundup(archive_header_size as u64, ALIGN_SIZE);
        let ticket_offset = cert_chain_offset + roundup(shell.header.cert_chain_size as u64, ALIGN_SIZE);
        let tmd_offset = ticket_offset + roundup(shell.header.ticket_size as u64, ALIGN_SIZE);
        let mut content_offset = tmd_offset + roundup(shell.header.tmd_size as u64, ALIGN_SIZE);

        let mut contents = HashMap::new();
        for record in &active_records {
            let start = content_offset as usize;
            let end = start + record.content_size as usize;
            let raw = data
                .get(start..end)
                .ok_or(ContainerError::BadArchiveHeaderSize(archive_header_size))?;

            let plaintext = if record.content_type.is_encrypted() {
                let mut iv = [0u8; 16];
                iv[0..2].copy_from_slice(&record.content_index.to_be_bytes());
                let cipher = crypto
                    .create_cbc_cipher(crate::crypto::keyslot::DECRYPTED_TITLEKEY, iv)
                    .expect("titlekey keyslot was just loaded from ticket");
                cipher.decrypt(raw)
            } else {
                raw.to_vec()
            };

            contents.insert(
                record.content_index,
                CiaContent {
                    content_id: record.content_id,
                    content_index: record.content_index,
                    data: plaintext,
                },
            );
            content_offset += roundup(record.content_size, ALIGN_SIZE);
        }

        Ok(Self { shell, contents })
    }

    /// Skips the Nintendo DS ROM (SRL) check the teacher's own NCCH loader
    /// would need: this crate never installs DSiWare (see crate-level
    /// Non-goals), so content 0 is always opened as an NCCH.
    pub fn open_ncch(&self, content_index: u16, crypto: &mut CryptoEngine) -> Result<NcchReader, ContainerError> {
        let content = self
            .contents
            .get(&content_index)
            .ok_or(ContainerError::ContentIndexMismatch(content_index))?;
        NcchReader::new(content.data.clone(), crypto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_contents_reads_msb_first() {
        let mut header = CiaHeader {
            header_size: CIA_HEADER_SIZE,
            cia_type: 0,
            version: 0,
            cert_chain_size: 0,
            ticket_size: 0,
            tmd_size: 0,
            meta_size: 0,
            content_size: 0,
            content_index: vec![0u8; 0x2000],
        };
        header.set_content_index(0);
        header.set_content_index(7);
        header.set_content_index(8);

        let active = header.active_contents();
        assert!(active.contains(&0));
        assert!(active.contains(&7));
        assert!(active.contains(&8));
        assert!(!active.contains(&1));
    }
}
