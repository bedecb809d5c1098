use crate::container::signature::SignatureData;
use binrw::{BinRead, BinWrite};

/// A 3DS (v1) ticket: the signed record that carries a title's encrypted
/// titlekey. [`crate::crypto::CryptoEngine::load_from_ticket`] reads the
/// raw byte ranges it needs directly out of a loaded ticket buffer rather
/// than through this struct, since the titlekey/title ID/common key index
/// offsets are fixed regardless of the signature type ahead of them.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct Ticket {
    pub signature_data: SignatureData,
    pub ticket_data: TicketData,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct TicketData {
    #[br(count = 0x40)]
    pub issuer: Vec<u8>,
    #[br(count = 0x3C)]
    pub ecc_public_key: Vec<u8>,
    pub version: u8,
    pub ca_crl_version: u8,
    pub signer_crl_version: u8,
    #[br(count = 0x10)]
    pub title_key: Vec<u8>,
    pub reserved1: u8,
    pub ticket_id: u64,
    pub console_id: u32,
    pub title_id: u64,
    pub reserved2: u16,
    pub ticket_title_version: u16,
    pub reserved3: u64,
    pub license_type: u8,
    pub common_key_index: u8,
    #[br(count = 0x2A)]
    pub reserved4: Vec<u8>,
    pub eshop_account_id: u32,
    pub reserved5: u8,
    pub audit: u8,
    #[br(count = 0x42)]
    pub reserved6: Vec<u8>,
    #[br(count = 0x40)]
    pub limits: Vec<u8>,
    pub content_index: ContentIndex,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct ContentIndex {
    pub header_word: u32,
    pub total_size: u32,
    #[br(count = total_size.checked_sub(8).expect("invalid content index size") as usize)]
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::signature::SignatureType;
    use std::io::Cursor;

    fn sample_ticket_data() -> TicketData {
        TicketData {
            issuer: vec![0x00; 0x40],
            ecc_public_key: vec![0x00; 0x3C],
            version: 1,
            ca_crl_version: 0,
            signer_crl_version: 0,
            title_key: vec![0xFF; 0x10],
            reserved1: 0,
            ticket_id: 0x0123456789ABCDEF,
            console_id: 0x12345678,
            title_id: 0x000400000F000000,
            reserved2: 0,
            ticket_title_version: 0x0100,
            reserved3: 0,
            license_type: 0,
            common_key_index: 1,
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
        }
    }

    #[test]
    fn ticket_data_round_trips() {
        let data = sample_ticket_data();
        let mut buf = Vec::new();
        data.write(&mut Cursor::new(&mut buf)).unwrap();
        let read_back = TicketData::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(data.title_id, read_back.title_id);
        assert_eq!(data.common_key_index, read_back.common_key_index);
        assert_eq!(data.title_key, read_back.title_key);
    }

    #[test]
    fn full_ticket_round_trips() {
        let ticket = Ticket {
            signature_data: SignatureData {
                signature_type: SignatureType::Rsa2048Sha256,
                signature: vec![0xAA; 0x100],
                padding: vec![0x00; 0x3C],
            },
            ticket_data: sample_ticket_data(),
        };
        let mut buf = Vec::new();
        ticket.write(&mut Cursor::new(&mut buf)).unwrap();
        let read_back = Ticket::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(
            ticket.ticket_data.title_id,
            read_back.ticket_data.title_id
        );
    }
}
