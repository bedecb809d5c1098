use crate::error::ContainerError;
use std::collections::HashMap;

pub const EXEFS_ENTRY_SIZE: usize = 0x10;
pub const EXEFS_ENTRY_COUNT: usize = 10;
pub const EXEFS_HEADER_SIZE: usize = 0x200;
const EXEFS_EMPTY_ENTRY: [u8; EXEFS_ENTRY_SIZE] = [0u8; EXEFS_ENTRY_SIZE];
const CODE_MAX_SIZE: i64 = 0x2300000;

#[derive(Debug, Clone)]
pub struct ExeFsEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub hash: [u8; 32],
}

/// A parsed ExeFS: header + the entries it describes. Holds the file data
/// it was built from so file bodies can be sliced out on demand.
pub struct ExeFsReader {
    data: Vec<u8>,
    pub entries: HashMap<String, ExeFsEntry>,
}

impl ExeFsReader {
    pub fn new(data: Vec<u8>) -> Result<Self, ContainerError> {
        if data.len() < EXEFS_HEADER_SIZE {
            return Err(ContainerError::BadExeFsAlignment(data.len() as u64));
        }
        let header = &data[..EXEFS_HEADER_SIZE];

        let mut entries = HashMap::new();
        // Entries are stored forward; hashes for those same 10 slots are
        // stored in reverse, starting at 0x1E0 and stepping back by 0x20.
        for i in 0..EXEFS_ENTRY_COUNT {
            let entry_off = i * EXEFS_ENTRY_SIZE;
            let hash_off = 0x1E0 - i * 0x20;
            let entry_raw = &header[entry_off..entry_off + EXEFS_ENTRY_SIZE];
            if entry_raw == EXEFS_EMPTY_ENTRY {
                continue;
            }

            let name_raw = &entry_raw[0..8];
            let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(8);
            let name = std::str::from_utf8(&name_raw[..name_end])
                .map_err(|_| ContainerError::BadExeFsFileName(i))?
                .to_string();

            let offset = u32::from_le_bytes(entry_raw[8..12].try_into().unwrap());
            let size = u32::from_le_bytes(entry_raw[12..16].try_into().unwrap());

            if offset % 0x200 != 0 {
                return Err(ContainerError::BadExeFsAlignment(offset as u64));
            }

            let mut hash = [0u8; 32];
            hash.copy_from_slice(&header[hash_off..hash_off + 0x20]);

            entries.insert(
                name.clone(),
                ExeFsEntry {
                    name,
                    offset,
                    size,
                    hash,
                },
            );
        }

        Ok(Self { data, entries })
    }

    pub fn read_file(&self, name: &str) -> Option<&[u8]> {
        let entry = self.entries.get(name)?;
        let start = EXEFS_HEADER_SIZE + entry.offset as usize;
        let end = start + entry.size as usize;
        self.data.get(start..end)
    }
}

/// Decompresses an ExeFS `.code` section compressed with the backward-LZSS
/// scheme the 3DS bootloader expects. Returns the input unchanged if it
/// turns out to already be decompressed (the footer then describes a
/// zero-length compressed region).
pub fn decompress_code(code: &[u8]) -> Result<Vec<u8>, ContainerError> {
    let code_len = code.len() as i64;
    if code_len < 8 {
        return Err(ContainerError::CodeDecompressionUnderflow);
    }
    if code_len > CODE_MAX_SIZE {
        return Err(ContainerError::CodeDecompressionUnderflow);
    }

    let off_size_comp = u32::from_le_bytes(code[code.len() - 8..code.len() - 4].try_into().unwrap()) as i64;
    let add_size = u32::from_le_bytes(code[code.len() - 4..].try_into().unwrap()) as i64;

    let code_comp_size = off_size_comp & 0xFFFFFF;
    let code_comp_end = code_comp_size - ((off_size_comp >> 24) % 0xFF);
    let code_dec_size = code_len + add_size;

    let mut comp_start: i64 = 0;
    if code_comp_size <= code_len {
        comp_start = code_len - code_comp_size;
    }

    if code_comp_end < 0 {
        return Err(ContainerError::CodeDecompressionUnderflow);
    }
    if code_dec_size > CODE_MAX_SIZE {
        return Err(ContainerError::CodeDecompressionUnderflow);
    }

    let mut dec = code.to_vec();
    dec.resize(code_dec_size.max(code_len) as usize, 0);

    let data_end = comp_start + code_dec_size;
    let mut ptr_in = comp_start + code_comp_end;
    let mut ptr_out = code_dec_size;

    let at = |dec: &[u8], i: i64| -> u8 { dec[i as usize] };
    let set = |dec: &mut [u8], i: i64, v: u8| {
        dec[i as usize] = v;
    };

    while ptr_in > comp_start && ptr_out > comp_start {
        if ptr_out < ptr_in {
            return Err(ContainerError::CodeDecompressionUnderflow);
        }

        ptr_in -= 1;
        let ctrl_byte = at(&dec, ptr_in);

        for i in (0..8).rev() {
            if ptr_in <= comp_start || ptr_out <= comp_start {
                break;
            }

            if (ctrl_byte >> i) & 1 != 0 {
                ptr_in -= 2;
                if ptr_in < comp_start {
                    return Err(ContainerError::CodeDecompressionUnderflow);
                }
                let seg_code = u16::from_le_bytes([at(&dec, ptr_in), at(&dec, ptr_in + 1)]) as i64;
                let seg_off = (seg_code & 0x0FFF) + 2;
                let seg_len = ((seg_code >> 12) & 0xF) + 3;

                if ptr_out - seg_len < comp_start {
                    return Err(ContainerError::CodeDecompressionUnderflow);
                }
                if ptr_out + seg_off >= data_end {
                    return Err(ContainerError::CodeDecompressionUnderflow);
                }

                for _ in 0..seg_len {
                    let byte = at(&dec, ptr_out + seg_off);
                    ptr_out -= 1;
                    set(&mut dec, ptr_out, byte);
                }
            } else {
                if ptr_out == comp_start || ptr_in == comp_start {
                    return Err(ContainerError::CodeDecompressionUnderflow);
                }
                ptr_out -= 1;
                ptr_in -= 1;
                let byte = at(&dec, ptr_in);
                set(&mut dec, ptr_out, byte);
            }
        }
    }

    if ptr_in != comp_start || ptr_out != comp_start {
        return Err(ContainerError::CodeDecompressionUnderflow);
    }

    Ok(dec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(entries: &[(&str, u32, u32)]) -> Vec<u8> {
        let mut header = vec![0u8; EXEFS_HEADER_SIZE];
        for (i, (name, offset, size)) in entries.iter().enumerate() {
            let entry_off = i * EXEFS_ENTRY_SIZE;
            let name_bytes = name.as_bytes();
            header[entry_off..entry_off + name_bytes.len()].copy_from_slice(name_bytes);
            header[entry_off + 8..entry_off + 12].copy_from_slice(&offset.to_le_bytes());
            header[entry_off + 12..entry_off + 16].copy_from_slice(&size.to_le_bytes());

            let hash_off = 0x1E0 - i * 0x20;
            header[hash_off..hash_off + 0x20].copy_from_slice(&[0xAB; 0x20]);
        }
        header
    }

    #[test]
    fn parses_single_entry_exefs() {
        let mut data = build_header(&[("icon", 0, 0x200)]);
        data.extend_from_slice(&[0x11u8; 0x200]);

        let reader = ExeFsReader::new(data).unwrap();
        assert_eq!(reader.entries.len(), 1);
        let file = reader.read_file("icon").unwrap();
        assert_eq!(file, &[0x11u8; 0x200][..]);
    }

    #[test]
    fn rejects_misaligned_offset() {
        let data = build_header(&[("icon", 5, 0x200)]);
        assert!(ExeFsReader::new(data).is_err());
    }

    #[test]
    fn decompress_code_is_identity_on_uncompressed_footer() {
        // code_comp_size = 0, add_size = 0 -> comp_start = code_len, loop never runs.
        let mut code = vec![0x42u8; 16];
        let len = code.len() as u32;
        code[len as usize - 8..len as usize - 4].copy_from_slice(&0u32.to_le_bytes());
        code[len as usize - 4..].copy_from_slice(&0u32.to_le_bytes());

        let result = decompress_code(&code).unwrap();
        assert_eq!(result, code);
    }
}
