//! The SD install orchestrator: walks a batch of CIA files or CDN
//! directories, re-encrypts every content under the SD key, synthesizes the
//! CMD file and Title Info Entry per title, and finally imports the whole
//! batch into the on-disk title database through `save3ds_fuse`. No direct
//! teacher analog exists for this module (the teacher only ever builds or
//! reads CIAs) — its shape is grounded in `custominstall.py`'s `CustomInstall`
//! class, expressed with the teacher's async/tokio idiom and error style.

pub mod cifinish;
pub mod cmd_file;
pub mod db_import;
pub mod path_iv;
pub mod title_info;

use crate::container::cdn::CdnReader;
use crate::container::cia::{CiaContent, CiaReader};
use crate::container::ncch::{NcchReader, NcchSection};
use crate::container::tmd::TitleMetadata;
use crate::crypto::{keyslot, CryptoEngine};
use crate::error::{InstallError, InstallResult};
use crate::install::cifinish::{CiFinishDb, CiFinishEntry};
use crate::install::cmd_file::{build_cmd_file, CmdContentEntry};
use crate::install::path_iv::{is_dlc, title_id_parts, SdPaths, TitlePaths};
use crate::install::title_info::{build_title_info_entry, TitleInfoParams};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress/log sink the CLI wires to a real progress bar; tests wire a
/// recording stub instead. Mirrors the `on_log`/`on_progress`/`on_cia_start`/
/// `on_error` callback surface the orchestrator is specified against.
pub trait ProgressSink: Send + Sync {
    fn on_log(&self, _line: &str) {}
    fn on_progress(&self, _percent_of_current: u8, _bytes_done: u64, _bytes_total: u64) {}
    fn on_cia_start(&self, _index: usize, _total: usize) {}
    fn on_error(&self, _path: &Path, _error: &InstallError) {}
}

pub struct NullProgressSink;
impl ProgressSink for NullProgressSink {}

pub struct InstallOptions {
    pub boot9: Option<PathBuf>,
    pub movable: PathBuf,
    pub seeddb: Option<PathBuf>,
    pub sd_root: PathBuf,
    pub skip_contents: HashSet<u16>,
    pub overwrite_saves: bool,
    pub cifinish_out: Option<PathBuf>,
    pub dev: bool,
    /// Directory the running executable lives in, searched for
    /// `bin/<platform>/save3ds_fuse` and `custom-install-finalize.3dsx`.
    pub tool_dir: PathBuf,
}

#[derive(Default)]
pub struct InstallOutcome {
    pub installed: Vec<PathBuf>,
    pub failed: HashMap<PathBuf, String>,
}

/// Either a CIA archive or an unpacked CDN directory, read down to the same
/// (TMD, per-index contents) shape the rest of the orchestrator consumes.
enum Package {
    Cia(CiaReader),
    Cdn(CdnReader),
}

impl Package {
    fn tmd(&self) -> &TitleMetadata {
        match self {
            Package::Cia(reader) => &reader.shell.tmd,
            Package::Cdn(reader) => &reader.tmd,
        }
    }

    fn contents(&self) -> &HashMap<u16, CiaContent> {
        match self {
            Package::Cia(reader) => &reader.contents,
            Package::Cdn(reader) => &reader.contents,
        }
    }
}

async fn open_package(path: &Path, crypto: &mut CryptoEngine) -> InstallResult<Package> {
    if path.is_dir() {
        Ok(Package::Cdn(CdnReader::open(path, crypto).await?))
    } else {
        let data = tokio::fs::read(path).await?;
        Ok(Package::Cia(CiaReader::new(&data, crypto)?))
    }
}

/// Searches an explicit path, then an env var, then the platform config
/// directories, for the first candidate filename that exists on disk.
async fn resolve_support_file(
    explicit: Option<&Path>,
    env_var: &str,
    filenames: &[&str],
) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    if let Ok(env_path) = std::env::var(env_var) {
        candidates.push(PathBuf::from(env_path));
    }
    for dir in crate::util::config_dirs() {
        for name in filenames {
            candidates.push(dir.join(name));
        }
    }
    for candidate in candidates {
        if tokio::fs::metadata(&candidate).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

/// `seeddb.bin`: 4-byte LE entry count, 12 bytes of padding, then `count`
/// entries of 32 bytes (8-byte LE title ID, 16-byte seed, 8 unused bytes).
async fn load_seeddb(path: &Path) -> InstallResult<HashMap<u64, [u8; 16]>> {
    let data = tokio::fs::read(path).await?;
    let mut map = HashMap::new();
    if data.len() < 0x10 {
        return Ok(map);
    }
    let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let mut offset = 0x10usize;
    for _ in 0..count {
        let Some(entry) = data.get(offset..offset + 0x20) else {
            break;
        };
        let title_id = u64::from_le_bytes(entry[0..8].try_into().unwrap());
        let mut seed = [0u8; 16];
        seed.copy_from_slice(&entry[8..24]);
        map.insert(title_id, seed);
        offset += 0x20;
    }
    Ok(map)
}

fn sd_encrypt(crypto: &CryptoEngine, logical_path: &str, plaintext: &[u8]) -> InstallResult<Vec<u8>> {
    let counter = u128::from_be_bytes(CryptoEngine::sd_path_to_iv(logical_path));
    let cipher = crypto.create_ctr_cipher(keyslot::SD, counter)?;
    let mut buf = plaintext.to_vec();
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

async fn write_encrypted(
    crypto: &CryptoEngine,
    logical_path: &str,
    disk_path: &Path,
    plaintext: &[u8],
) -> InstallResult<Vec<u8>> {
    let ciphertext = sd_encrypt(crypto, logical_path, plaintext)?;
    if let Some(parent) = disk_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(disk_path, &ciphertext).await?;
    Ok(ciphertext)
}

struct TitleInstall {
    title_id: u64,
    entry: [u8; 0x80],
    cifinish: CiFinishEntry,
}

/// Installs one title. Container parse, seed, and write errors are all
/// per-title — the caller decides whether to keep going with the rest of
/// the batch.
async fn install_one_title(
    path: &Path,
    crypto: &mut CryptoEngine,
    sd_paths: &SdPaths,
    options: &InstallOptions,
    seeddb: Option<&HashMap<u64, [u8; 16]>>,
    sink: &dyn ProgressSink,
) -> InstallResult<TitleInstall> {
    let package = open_package(path, crypto).await?;
    package.tmd().verify_hashes()?;

    let title_id = package.tmd().header.title_id;
    let dlc = is_dlc(title_id);
    let save_size = package.tmd().header.save_data_size as u64;

    let contents: HashMap<u16, &CiaContent> = package
        .contents()
        .iter()
        .filter(|(index, _)| !options.skip_contents.contains(index))
        .map(|(index, content)| (*index, content))
        .collect();

    let content0 = contents
        .get(&0)
        .ok_or_else(|| InstallError::MissingContentFile(0, path.to_path_buf()))?;
    let mut ncch0 = NcchReader::new(content0.data.clone(), crypto)?;

    let seed = if ncch0.flags.uses_seed {
        let Some(db) = seeddb else {
            return Err(InstallError::SeedDbNotProvided(title_id));
        };
        let seed = db
            .get(&title_id)
            .copied()
            .ok_or(InstallError::SeedNotFound(title_id))?;
        ncch0.setup_seed(&seed, crypto)?;
        Some(seed)
    } else {
        None
    };

    let extdata_id_low = if ncch0.has_extheader() {
        let ext = ncch0.read_section(NcchSection::ExtendedHeader, crypto)?;
        ext[0x30..0x34].try_into().unwrap()
    } else {
        [0u8; 4]
    };

    let product_code = ncch0.product_code.clone();
    let ncch_version = ncch0.version;
    let title_version = package.tmd().header.title_version;
    let has_manual = !dlc && contents.contains_key(&1);

    let title_paths = TitlePaths::new(sd_paths, &options.sd_root, title_id);
    tokio::fs::create_dir_all(title_paths.content_root()).await?;
    tokio::fs::create_dir_all(title_paths.content_root().join("cmd")).await?;
    if save_size > 0 {
        tokio::fs::create_dir_all(title_paths.data_root()).await?;
    }
    if dlc {
        let mut dir_indices: Vec<u32> = contents.keys().map(|&idx| idx as u32 / 256).collect();
        dir_indices.sort_unstable();
        dir_indices.dedup();
        for dir_index in dir_indices {
            tokio::fs::create_dir_all(
                title_paths.content_root().join(format!("{dir_index:08x}")),
            )
            .await?;
        }
    }

    let mut tmd_bytes = Vec::new();
    {
        use binrw::BinWrite;
        package
            .tmd()
            .write_be(&mut std::io::Cursor::new(&mut tmd_bytes))
            .expect("parsed TMD always re-serializes");
    }
    write_encrypted(
        crypto,
        &format!("{}/00000000.tmd", title_paths.content_root_cmd()),
        &title_paths.content_root().join("00000000.tmd"),
        &tmd_bytes,
    )
    .await?;

    let mut sorted_indices: Vec<u16> = contents.keys().copied().collect();
    sorted_indices.sort_unstable();

    let mut cmd_entries = Vec::with_capacity(sorted_indices.len());
    let total_bytes: u64 = sorted_indices
        .iter()
        .map(|idx| contents[idx].data.len() as u64)
        .sum();
    let mut bytes_done = 0u64;

    for content_index in sorted_indices {
        if options.skip_contents.contains(&content_index) {
            continue;
        }
        let content = contents[&content_index];
        let cid_hex = format!("{:08x}", content.content_id);

        let (logical_path, disk_path) = if dlc {
            let dir_index = content_index as u32 / 256;
            (
                format!(
                    "{}/{dir_index:08x}/{cid_hex}.app",
                    title_paths.content_root_cmd()
                ),
                title_paths
                    .content_root()
                    .join(format!("{dir_index:08x}"))
                    .join(format!("{cid_hex}.app")),
            )
        } else {
            (
                format!("{}/{cid_hex}.app", title_paths.content_root_cmd()),
                title_paths.content_root().join(format!("{cid_hex}.app")),
            )
        };

        let ciphertext = write_encrypted(crypto, &logical_path, &disk_path, &content.data).await?;

        let mut sample = [0u8; 0x100];
        let available = ciphertext.len().saturating_sub(0x100).min(0x100);
        sample[..available].copy_from_slice(&ciphertext[0x100..0x100 + available]);

        cmd_entries.push(CmdContentEntry {
            content_index,
            content_id: content.content_id,
            ciphertext_sample: sample,
        });

        bytes_done += content.data.len() as u64;
        let percent = if total_bytes > 0 {
            ((bytes_done * 100) / total_bytes) as u8
        } else {
            100
        };
        sink.on_progress(percent, bytes_done, total_bytes);
    }

    if save_size > 0 {
        let save_path = title_paths.data_root().join("00000001.sav");
        if options.overwrite_saves || tokio::fs::metadata(&save_path).await.is_err() {
            let zero = vec![0u8; save_size as usize];
            write_encrypted(
                crypto,
                &format!("{}/00000001.sav", title_paths.data_root_cmd()),
                &save_path,
                &zero,
            )
            .await?;
        }
    }

    let cmd_id = if dlc { cmd_entries.len() as u32 } else { 1 };
    let cmd_bytes = build_cmd_file(cmd_id, &cmd_entries, crypto)?;
    write_encrypted(
        crypto,
        &format!("{}/cmd/{cmd_id:08x}.cmd", title_paths.content_root_cmd()),
        &title_paths
            .content_root()
            .join("cmd")
            .join(format!("{cmd_id:08x}.cmd")),
        &cmd_bytes,
    )
    .await?;

    let mut title_size_components = vec![1u64, 1, 1, 1, 1];
    if save_size > 0 {
        title_size_components.push(save_size);
    }
    title_size_components.extend(contents.values().map(|c| c.data.len() as u64));

    let entry = build_title_info_entry(&TitleInfoParams {
        title_size_components,
        title_version,
        ncch_version,
        has_manual,
        cmd_content_id: cmd_id,
        save_size,
        extdata_id_low,
        product_code,
    });

    Ok(TitleInstall {
        title_id,
        entry,
        cifinish: CiFinishEntry { seed },
    })
}

/// Runs a whole install batch: crypto setup, per-title installs in the
/// user-supplied order, then a single database import and `cifinish.bin`
/// persist covering every title that succeeded.
pub async fn install_batch(
    paths: &[PathBuf],
    options: &InstallOptions,
    sink: &dyn ProgressSink,
    cancel: &AtomicBool,
) -> InstallResult<InstallOutcome> {
    let mut crypto = CryptoEngine::new(options.dev);

    let boot9_path = resolve_support_file(
        options.boot9.as_deref(),
        "BOOT9_PATH",
        &["boot9.bin", "boot9_prot.bin"],
    )
    .await
    .ok_or_else(|| InstallError::Crypto(crate::crypto::error::CryptoError::BootromNotFound(vec![])))?;
    let boot9_bytes = tokio::fs::read(&boot9_path).await?;
    crypto.setup_keys_from_boot9(&boot9_bytes)?;

    let movable_bytes = tokio::fs::read(&options.movable).await?;
    crypto.setup_sd_key(&movable_bytes)?;

    let seeddb = match resolve_support_file(options.seeddb.as_deref(), "SEEDDB_PATH", &["seeddb.bin"]).await {
        Some(path) => Some(load_seeddb(&path).await?),
        None => None,
    };

    let id0_hex = crypto.id0_hex()?;
    let sd_paths = SdPaths::discover(&options.sd_root, &id0_hex)
        .await
        .map_err(|_| InstallError::SdPathError(options.sd_root.clone()))?;

    let cifinish_path = options
        .cifinish_out
        .clone()
        .unwrap_or_else(|| options.sd_root.join("cifinish.bin"));
    let mut cifinish_db: CiFinishDb = cifinish::load_cifinish(&cifinish_path).await?;

    let mut outcome = InstallOutcome::default();
    let mut title_entries: HashMap<u64, [u8; 0x80]> = HashMap::new();

    for (index, path) in paths.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            sink.on_log("install cancelled, stopping before the next title");
            break;
        }
        sink.on_cia_start(index, paths.len());

        match install_one_title(path, &mut crypto, &sd_paths, options, seeddb.as_ref(), sink).await {
            Ok(result) => {
                title_entries.insert(result.title_id, result.entry);
                cifinish_db.insert(result.title_id, result.cifinish);
                outcome.installed.push(path.clone());
            }
            Err(error) => {
                sink.on_error(path, &error);
                outcome.failed.insert(path.clone(), error.to_string());
            }
        }
    }

    cifinish::save_cifinish(&cifinish_path, &cifinish_db).await?;

    if !title_entries.is_empty() {
        let save3ds_fuse = db_import::locate_save3ds_fuse(&options.tool_dir);
        db_import::import_title_entries(
            &save3ds_fuse,
            &boot9_path,
            &options.movable,
            &options.sd_root,
            &title_entries,
        )
        .await?;
    }

    db_import::copy_finalize_sidecar(&options.tool_dir, &options.sd_root).await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::signature::{SignatureData, SignatureType};
    use crate::container::ticket::{ContentIndex, Ticket, TicketData};
    use crate::container::tmd::{ContentChunkRecord, ContentInfoRecord, ContentType, TitleMetadataHeader};
    use binrw::BinWrite;
    use sha2::{Digest, Sha256};

    #[test]
    fn title_id_parts_drive_sd_layout() {
        let (h, l) = title_id_parts(0x000400000f800100);
        assert_eq!((h.as_str(), l.as_str()), ("00040000", "0f800100"));
    }

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

    fn single_content_tmd(title_id: u64, content_size: u64) -> TitleMetadata {
        let chunk = ContentChunkRecord {
            content_id: 0,
            content_index: 0,
            content_type: ContentType(0), // plaintext: no ENCRYPTED bit
            content_size,
            hash: vec![0xAB; 0x20],
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

    fn minimal_ncch_content(size: usize) -> Vec<u8> {
        let mut data = vec![0u8; size];
        data[0x100..0x104].copy_from_slice(b"NCCH");
        data[0x104..0x108].copy_from_slice(&((size as u64 / 0x200) as u32).to_le_bytes());
        data[0x150..0x160].copy_from_slice(b"TEST-CODE\0\0\0\0\0\0\0");
        data[0x18F] = 0x04; // no_crypto
        data
    }

    /// End-to-end install layout vector: a single non-DLC title with one
    /// 2 MiB content and no save yields exactly the content/tmd/cmd files
    /// the console's own database expects, plus one `cifinish.bin` entry.
    #[tokio::test]
    async fn installs_single_content_title_into_expected_sd_layout() {
        let title_id: u64 = 0x000400000f800100;
        let content_size = 2 * 1024 * 1024;

        let dir = tempfile::tempdir().unwrap();
        let cdn_dir = dir.path().join("cdn");
        tokio::fs::create_dir_all(&cdn_dir).await.unwrap();

        let tmd = single_content_tmd(title_id, content_size as u64);
        let mut tmd_buf = Vec::new();
        tmd.write_be(&mut std::io::Cursor::new(&mut tmd_buf)).unwrap();
        tokio::fs::write(cdn_dir.join("tmd"), &tmd_buf).await.unwrap();
        tokio::fs::write(cdn_dir.join("cetk"), ticket_bytes(title_id)).await.unwrap();
        tokio::fs::write(cdn_dir.join("00000000"), minimal_ncch_content(content_size))
            .await
            .unwrap();

        let mut crypto = CryptoEngine::new(false);
        crypto.set_normal_key_for_test(keyslot::COMMON_KEY, [0x11; 16]);
        crypto.set_normal_key_for_test(keyslot::SD, [0x22; 16]);
        crypto.set_normal_key_for_test(keyslot::CMAC_SD_NAND, [0x33; 16]);

        let sd_root = dir.path().join("sd");
        let sd_paths = SdPaths {
            id0: "abc00000000000000000000000000000".to_string(),
            id1: "def00000000000000000000000000000".to_string(),
        };

        let options = InstallOptions {
            boot9: None,
            movable: PathBuf::new(),
            seeddb: None,
            sd_root: sd_root.clone(),
            skip_contents: HashSet::new(),
            overwrite_saves: false,
            cifinish_out: None,
            dev: false,
            tool_dir: dir.path().to_path_buf(),
        };

        let sink = NullProgressSink;
        let result = install_one_title(&cdn_dir, &mut crypto, &sd_paths, &options, None, &sink)
            .await
            .unwrap();

        assert_eq!(result.title_id, title_id);
        assert!(result.cifinish.seed.is_none());

        let title_root = sd_root
            .join("Nintendo 3DS")
            .join(&sd_paths.id0)
            .join(&sd_paths.id1)
            .join("title")
            .join("00040000")
            .join("0f800100");

        assert!(title_root.join("content/00000000.tmd").is_file());
        assert!(title_root.join("content/00000000.app").is_file());
        assert!(title_root.join("content/cmd/00000001.cmd").is_file());
        assert!(!title_root.join("data").exists());

        let mut on_disk = Vec::new();
        collect_files(&title_root, &mut on_disk);
        on_disk.sort();
        assert_eq!(
            on_disk,
            vec![
                title_root.join("content/00000000.app"),
                title_root.join("content/00000000.tmd"),
                title_root.join("content/cmd/00000001.cmd"),
            ]
        );
    }

    fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
        let entries = std::fs::read_dir(dir).unwrap();
        for entry in entries {
            let entry = entry.unwrap();
            let path = entry.path();
            if path.is_dir() {
                collect_files(&path, out);
            } else {
                out.push(path);
            }
        }
    }
}
