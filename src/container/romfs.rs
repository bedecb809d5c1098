use crate::error::ContainerError;
use binrw::{BinRead, BinWrite};

pub const IVFC_MAGIC: [u8; 4] = *b"IVFC";
pub const LV3_HEADER_SIZE: u32 = 0x28;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct IvfcLevel {
    pub logical_offset: u64,
    pub hash_data_size: u64,
    pub block_size_log2: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct IvfcHeader {
    #[br(count = 4)]
    pub magic: Vec<u8>,
    pub id: u32,
    pub master_hash_size: u32,
    pub level1: IvfcLevel,
    pub level2: IvfcLevel,
    pub level3: IvfcLevel,
    pub header_size: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct Lv3Header {
    pub header_length: u32,
    pub directory_hash_table_offset: u32,
    pub directory_hash_table_length: u32,
    pub directory_metadata_offset: u32,
    pub directory_metadata_length: u32,
    pub file_hash_table_offset: u32,
    pub file_hash_table_length: u32,
    pub file_metadata_offset: u32,
    pub file_metadata_length: u32,
    pub file_data_offset: u32,
}

impl Lv3Header {
    /// Each region must start no earlier than the previous one ends; this is
    /// what the 3DS itself checks before trusting a RomFS image.
    fn verify_monotonic(&self) -> Result<(), ContainerError> {
        let regions = [
            (
                self.directory_hash_table_offset,
                self.directory_hash_table_length,
            ),
            (
                self.directory_metadata_offset,
                self.directory_metadata_length,
            ),
            (self.file_hash_table_offset, self.file_hash_table_length),
            (self.file_metadata_offset, self.file_metadata_length),
        ];
        let mut prev_end = 0u32;
        for (offset, length) in regions {
            if offset < prev_end {
                return Err(ContainerError::BadRomFsLv3Header);
            }
            prev_end = offset.saturating_add(length);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
struct RawDirEntry {
    parent_dir_offset: u32,
    sibling_dir_offset: u32,
    first_child_dir_offset: u32,
    first_file_offset: u32,
    next_hash_offset: u32,
    name_length: u32,
    #[br(count = name_length / 2)]
    name: Vec<u16>,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
struct RawFileEntry {
    parent_dir_offset: u32,
    sibling_file_offset: u32,
    data_offset: u64,
    data_size: u64,
    next_hash_offset: u32,
    name_length: u32,
    #[br(count = name_length / 2)]
    name: Vec<u16>,
}

const DIR_ENTRY_NONE: u32 = 0xFFFFFFFF;

#[derive(Debug, Clone)]
pub struct RomFsFileEntry {
    pub path: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct RomFsDirEntry {
    pub path: String,
}

/// A parsed RomFS image: the IVFC/Lv3 headers plus the directory tree
/// flattened into absolute paths, ready for lookups against a shared data
/// buffer (the Lv3 file-data region).
pub struct RomFsReader {
    data: Vec<u8>,
    lv3_start: usize,
    lv3: Lv3Header,
    pub files: Vec<RomFsFileEntry>,
    pub dirs: Vec<RomFsDirEntry>,
}

impl RomFsReader {
    pub fn new(data: Vec<u8>) -> Result<Self, ContainerError> {
        let mut cursor = std::io::Cursor::new(&data);
        let ivfc = IvfcHeader::read(&mut cursor)?;
        if ivfc.magic != IVFC_MAGIC {
            return Err(ContainerError::BadRomFsLv3Header);
        }

        let lv3_start = ivfc.level3.logical_offset as usize;
        let mut lv3_cursor = std::io::Cursor::new(&data[lv3_start..]);
        let lv3 = Lv3Header::read(&mut lv3_cursor)?;
        lv3.verify_monotonic()?;

        let mut reader = Self {
            data,
            lv3_start,
            lv3,
            files: Vec::new(),
            dirs: Vec::new(),
        };
        reader.walk(0, String::new())?;
        Ok(reader)
    }

    fn dir_entry(&self, offset: u32) -> Result<RawDirEntry, ContainerError> {
        let base = self.lv3_start + self.lv3.directory_metadata_offset as usize + offset as usize;
        let mut cursor = std::io::Cursor::new(&self.data[base..]);
        Ok(RawDirEntry::read(&mut cursor)?)
    }

    fn file_entry(&self, offset: u32) -> Result<RawFileEntry, ContainerError> {
        let base = self.lv3_start + self.lv3.file_metadata_offset as usize + offset as usize;
        let mut cursor = std::io::Cursor::new(&self.data[base..]);
        Ok(RawFileEntry::read(&mut cursor)?)
    }

    fn walk(&mut self, dir_offset: u32, prefix: String) -> Result<(), ContainerError> {
        let dir = self.dir_entry(dir_offset)?;
        self.dirs.push(RomFsDirEntry {
            path: prefix.clone(),
        });

        let mut file_offset = dir.first_file_offset;
        while file_offset != DIR_ENTRY_NONE {
            let file = self.file_entry(file_offset)?;
            let name = String::from_utf16_lossy(&file.name);
            self.files.push(RomFsFileEntry {
                path: format!("{prefix}/{name}"),
                offset: self.lv3.file_data_offset as u64 + file.data_offset,
                size: file.data_size,
            });
            file_offset = file.sibling_file_offset;
        }

        let mut child_offset = dir.first_child_dir_offset;
        while child_offset != DIR_ENTRY_NONE {
            let child = self.dir_entry(child_offset)?;
            let name = String::from_utf16_lossy(&child.name);
            self.walk(child_offset, format!("{prefix}/{name}"))?;
            child_offset = child.sibling_dir_offset;
        }

        Ok(())
    }

    pub fn read_file(&self, entry: &RomFsFileEntry) -> Option<&[u8]> {
        let start = self.lv3_start + entry.offset as usize;
        let end = start + entry.size as usize;
        self.data.get(start..end)
    }

    /// Case-insensitive path lookup, matching how the console resolves RomFS
    /// paths regardless of how the title's own code cased them.
    pub fn find_file(&self, path: &str) -> Option<&RomFsFileEntry> {
        self.files
            .iter()
            .find(|f| f.path.eq_ignore_ascii_case(path))
    }
}
