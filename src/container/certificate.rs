use crate::container::signature::SignatureType;
use binrw::{BinRead, BinWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u32)]
pub enum KeyType {
    Rsa4096 = 0x0,
    Rsa2048 = 0x1,
    EllipticCurve = 0x2,
}

/// A certificate in the chain rooted at the retail/dev root key, used to
/// verify the ticket and TMD signatures structurally. This tool never
/// performs the actual RSA/ECDSA verification (see crate-level Non-goals);
/// the certificate chain is parsed only to locate the ticket and TMD that
/// follow it in a CIA.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct Certificate {
    #[brw(big)]
    pub signature_type: SignatureType,
    #[br(count = signature_type.signature_size())]
    pub signature: Vec<u8>,
    #[br(count = signature_type.padding_size())]
    pub padding: Vec<u8>,
    #[br(count = 0x40)]
    pub issuer: Vec<u8>,
    #[brw(big)]
    pub key_type: KeyType,
    #[br(count = 0x40)]
    pub name: Vec<u8>,
    #[brw(big)]
    pub expiration_time: u32,
    #[br(args(key_type))]
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[br(import(key_type: KeyType))]
pub enum PublicKey {
    #[br(pre_assert(key_type == KeyType::Rsa4096))]
    Rsa4096 {
        #[br(count = 0x200)]
        modulus: Vec<u8>,
        #[brw(big)]
        public_exponent: u32,
        #[br(count = 0x34)]
        padding: Vec<u8>,
    },
    #[br(pre_assert(key_type == KeyType::Rsa2048))]
    Rsa2048 {
        #[br(count = 0x100)]
        modulus: Vec<u8>,
        #[brw(big)]
        public_exponent: u32,
        #[br(count = 0x34)]
        padding: Vec<u8>,
    },
    #[br(pre_assert(key_type == KeyType::EllipticCurve))]
    EllipticCurve {
        #[br(count = 0x3C)]
        public_key: Vec<u8>,
        #[br(count = 0x3C)]
        padding: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn certificate_round_trips() {
        let cert = Certificate {
            signature_type: SignatureType::Rsa2048Sha256,
            signature: vec![0xAA; 0x100],
            padding: vec![0x00; 0x3C],
            issuer: vec![0x00; 0x40],
            key_type: KeyType::Rsa2048,
            name: vec![0x00; 0x40],
            expiration_time: 0x5F5E0F00,
            public_key: PublicKey::Rsa2048 {
                modulus: vec![0xFF; 0x100],
                public_exponent: 65537,
                padding: vec![0x00; 0x34],
            },
        };

        let mut buf = Vec::new();
        cert.write_be(&mut Cursor::new(&mut buf)).unwrap();

        let read_cert = Certificate::read_be(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(cert.signature_type, read_cert.signature_type);
        assert_eq!(cert.key_type, read_cert.key_type);
        match read_cert.public_key {
            PublicKey::Rsa2048 { public_exponent, .. } => assert_eq!(public_exponent, 65537),
            _ => panic!("wrong public key variant"),
        }
    }
}
