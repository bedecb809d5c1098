//! Builds the 0x80-byte Title Info Entry the console's title database
//! expects for every installed title, per `custominstall.py`'s
//! `title_info_entry_data` block.

use crate::util::roundup;

const TITLE_ALIGN_SIZE: u64 = 0x8000;

pub struct TitleInfoParams {
    pub title_size_components: Vec<u64>,
    pub title_version: u16,
    pub ncch_version: u16,
    pub has_manual: bool,
    pub cmd_content_id: u32,
    pub save_size: u64,
    pub extdata_id_low: [u8; 4],
    pub product_code: String,
}

/// `size(8) | 0x40(4) | title_version(2) | ncch_version(2) | manual_flag(4)
/// | tmd_content_id=0(4) | cmd_content_id(4) | save_flag(4) |
/// extdata_id_low(4) | reserved(4) | 0x100000000(8) | product_code(16) |
/// reserved(0x10) | random(4) | reserved(0x2C)` = 0x80 bytes.
pub fn build_title_info_entry(params: &TitleInfoParams) -> [u8; 0x80] {
    let title_size: u64 = params
        .title_size_components
        .iter()
        .map(|&size| roundup(size, TITLE_ALIGN_SIZE))
        .sum();

    let mut out = [0u8; 0x80];
    out[0x00..0x08].copy_from_slice(&title_size.to_le_bytes());
    out[0x08..0x0C].copy_from_slice(&0x40u32.to_le_bytes());
    out[0x0C..0x0E].copy_from_slice(&params.title_version.to_le_bytes());
    out[0x0E..0x10].copy_from_slice(&params.ncch_version.to_le_bytes());
    out[0x10..0x14].copy_from_slice(&(params.has_manual as u32).to_le_bytes());
    out[0x14..0x18].copy_from_slice(&0u32.to_le_bytes());
    out[0x18..0x1C].copy_from_slice(&params.cmd_content_id.to_le_bytes());
    out[0x1C..0x20].copy_from_slice(&((params.save_size > 0) as u32).to_le_bytes());
    out[0x20..0x24].copy_from_slice(&params.extdata_id_low);
    // 0x24..0x28 reserved
    out[0x28..0x30].copy_from_slice(&0x100000000u64.to_le_bytes());

    let code_bytes = params.product_code.as_bytes();
    let len = code_bytes.len().min(0x10);
    out[0x30..0x30 + len].copy_from_slice(&code_bytes[..len]);
    // 0x40..0x50 reserved

    let random: u32 = rand::random();
    out[0x50..0x54].copy_from_slice(&random.to_le_bytes());
    // 0x54..0x80 reserved

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_exactly_0x80_bytes_with_expected_fields() {
        let params = TitleInfoParams {
            title_size_components: vec![1, 1, 1, 1, 1, 0x200000],
            title_version: 0x0100,
            ncch_version: 2,
            has_manual: false,
            cmd_content_id: 1,
            save_size: 0,
            extdata_id_low: [0, 0, 0, 0],
            product_code: "CTR-P-TEST".to_string(),
        };

        let entry = build_title_info_entry(&params);
        assert_eq!(entry.len(), 0x80);
        assert_eq!(&entry[0x08..0x0C], &0x40u32.to_le_bytes());
        assert_eq!(&entry[0x18..0x1C], &1u32.to_le_bytes());
        assert_eq!(&entry[0x30..0x3A], b"CTR-P-TEST");
    }
}
