use crate::error::ContainerError;
use binrw::{BinRead, BinWrite};

pub const SMDH_SIZE: usize = 0x36C0;

/// Language slots in the order they're stored in the SMDH title block.
pub const REGION_NAMES: [&str; 12] = [
    "japanese",
    "english",
    "french",
    "german",
    "italian",
    "spanish",
    "simplified_chinese",
    "korean",
    "dutch",
    "portuguese",
    "russian",
    "traditional_chinese",
];

/// Preference order used when looking up a display title: English first,
/// then Japanese, then the rest in storage order.
pub const REGION_LOOKUP_ORDER: [&str; 12] = [
    "english",
    "japanese",
    "french",
    "german",
    "italian",
    "spanish",
    "simplified_chinese",
    "korean",
    "dutch",
    "portuguese",
    "russian",
    "traditional_chinese",
];

#[derive(Debug, Clone)]
pub struct AppTitle {
    pub short_description: String,
    pub long_description: String,
    pub publisher: String,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
struct RawAppTitle {
    #[br(count = 0x40)]
    short_description: Vec<u16>,
    #[br(count = 0x80)]
    long_description: Vec<u16>,
    #[br(count = 0x40)]
    publisher: Vec<u16>,
}

fn utf16_to_string(units: &[u16]) -> String {
    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct Smdh {
    #[br(count = 4)]
    pub magic: Vec<u8>,
    pub version: u16,
    pub reserved1: u16,
    /// 16 title slots, 12 of which are named in [`REGION_NAMES`].
    #[br(count = 16)]
    titles: Vec<RawAppTitle>,
    #[br(count = 16)]
    pub ratings: Vec<u8>,
    pub region_lockout: u32,
    pub match_maker_id: u32,
    pub match_maker_bit_id: u64,
    pub flags: u32,
    pub eula_version: u16,
    pub reserved2: u16,
    pub optimal_animation_default_frame: f32,
    pub street_pass_id: u32,
    pub reserved3: u64,
    #[br(count = 0x480)]
    pub small_icon: Vec<u8>,
    #[br(count = 0x1200)]
    pub large_icon: Vec<u8>,
}

impl Smdh {
    pub fn is_valid(&self) -> bool {
        self.magic == b"SMDH"
    }

    /// Returns the title for a named language slot.
    pub fn title_for(&self, language: &str) -> Option<AppTitle> {
        let index = REGION_NAMES.iter().position(|&name| name == language)?;
        let raw = self.titles.get(index)?;
        Some(AppTitle {
            short_description: utf16_to_string(&raw.short_description),
            long_description: utf16_to_string(&raw.long_description),
            publisher: utf16_to_string(&raw.publisher),
        })
    }

    /// Falls through [`REGION_LOOKUP_ORDER`], returning the first language
    /// slot with a non-empty short description, or `("unknown", "unknown",
    /// "unknown")` if every slot is blank.
    pub fn best_title(&self) -> AppTitle {
        for language in REGION_LOOKUP_ORDER {
            if let Some(title) = self.title_for(language) {
                if !title.short_description.is_empty() {
                    return title;
                }
            }
        }
        AppTitle {
            short_description: "unknown".to_string(),
            long_description: "unknown".to_string(),
            publisher: "unknown".to_string(),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ContainerError> {
        if data.len() < SMDH_SIZE {
            return Err(ContainerError::BadNcchMagic(0));
        }
        let mut cursor = std::io::Cursor::new(data);
        Ok(Self::read(&mut cursor)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_smdh() -> Smdh {
        Smdh {
            magic: b"SMDH".to_vec(),
            version: 0,
            reserved1: 0,
            titles: vec![
                RawAppTitle {
                    short_description: vec![0; 0x40],
                    long_description: vec![0; 0x80],
                    publisher: vec![0; 0x40],
                };
                16
            ],
            ratings: vec![0; 16],
            region_lockout: 0,
            match_maker_id: 0,
            match_maker_bit_id: 0,
            flags: 0,
            eula_version: 0,
            reserved2: 0,
            optimal_animation_default_frame: 0.0,
            street_pass_id: 0,
            reserved3: 0,
            small_icon: vec![0; 0x480],
            large_icon: vec![0; 0x1200],
        }
    }

    #[test]
    fn round_trips_to_known_size() {
        let smdh = blank_smdh();
        let mut buf = Vec::new();
        smdh.write(&mut std::io::Cursor::new(&mut buf)).unwrap();
        assert_eq!(buf.len(), SMDH_SIZE);
    }

    #[test]
    fn best_title_falls_back_to_unknown_when_all_blank() {
        let smdh = blank_smdh();
        let title = smdh.best_title();
        assert_eq!(title.short_description, "unknown");
    }

    #[test]
    fn best_title_prefers_english_over_japanese() {
        let mut smdh = blank_smdh();
        let jp_index = REGION_NAMES.iter().position(|&n| n == "japanese").unwrap();
        let en_index = REGION_NAMES.iter().position(|&n| n == "english").unwrap();

        let encode = |s: &str, len: usize| -> Vec<u16> {
            let mut v: Vec<u16> = s.encode_utf16().collect();
            v.resize(len, 0);
            v
        };

        smdh.titles[jp_index].short_description = encode("Japanese Title", 0x40);
        smdh.titles[en_index].short_description = encode("English Title", 0x40);

        assert_eq!(smdh.best_title().short_description, "English Title");
    }
}
