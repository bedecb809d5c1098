use binrw::{BinRead, BinWrite};

/// The signature method used to sign a certificate, ticket or TMD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u32)]
pub enum SignatureType {
    Rsa4096Sha1 = 0x010000,
    Rsa2048Sha1 = 0x010001,
    EllipticCurveSha1 = 0x010002,
    Rsa4096Sha256 = 0x010003,
    Rsa2048Sha256 = 0x010004,
    EcdsaSha256 = 0x010005,
}

impl SignatureType {
    pub fn signature_size(&self) -> usize {
        match self {
            Self::Rsa4096Sha1 | Self::Rsa4096Sha256 => 0x200,
            Self::Rsa2048Sha1 | Self::Rsa2048Sha256 => 0x100,
            Self::EllipticCurveSha1 | Self::EcdsaSha256 => 0x3C,
        }
    }

    pub fn padding_size(&self) -> usize {
        match self {
            Self::Rsa4096Sha1 | Self::Rsa4096Sha256 => 0x3C,
            Self::Rsa2048Sha1 | Self::Rsa2048Sha256 => 0x3C,
            Self::EllipticCurveSha1 | Self::EcdsaSha256 => 0x40,
        }
    }
}

/// Generic signature block: every signed container (certificate, ticket, TMD)
/// starts with one of these before its payload.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct SignatureData {
    #[brw(big)]
    pub signature_type: SignatureType,
    #[br(count = signature_type.signature_size())]
    pub signature: Vec<u8>,
    #[br(count = signature_type.padding_size())]
    pub padding: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn signature_type_sizes() {
        assert_eq!(SignatureType::Rsa2048Sha256.signature_size(), 0x100);
        assert_eq!(SignatureType::Rsa2048Sha256.padding_size(), 0x3C);
        assert_eq!(SignatureType::EcdsaSha256.padding_size(), 0x40);
    }

    #[test]
    fn signature_data_round_trips() {
        let sig = SignatureData {
            signature_type: SignatureType::EcdsaSha256,
            signature: vec![0xAA; 0x3C],
            padding: vec![0x00; 0x40],
        };
        let mut buf = Vec::new();
        sig.write_be(&mut Cursor::new(&mut buf)).unwrap();
        assert_eq!(buf.len(), 0x80);

        let read_back = SignatureData::read_be(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read_back.signature_type, sig.signature_type);
        assert_eq!(read_back.signature, sig.signature);
    }
}
