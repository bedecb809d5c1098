//! Invokes the external `save3ds_fuse` FUSE-based tool to extract, patch
//! and reimport the console's on-disk title database. This crate never
//! reimplements that database format itself — the tool is the only thing
//! that understands it, matching `custominstall.py`'s own approach.

use crate::error::{InstallError, InstallResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Locates `save3ds_fuse[.exe]` next to the running executable: under
/// `bin/<platform>/` when run from a source checkout, or plain `bin/` when
/// packaged.
pub fn locate_save3ds_fuse(install_dir: &Path) -> PathBuf {
    let exe_name = if cfg!(windows) {
        "save3ds_fuse.exe"
    } else {
        "save3ds_fuse"
    };

    let platform_dir = if cfg!(target_os = "windows") {
        "win32"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else {
        "linux"
    };

    let source_layout = install_dir.join("bin").join(platform_dir).join(exe_name);
    if source_layout.is_file() {
        return source_layout;
    }
    install_dir.join("bin").join(exe_name)
}

async fn run(binary: &Path, args: &[&str]) -> InstallResult<()> {
    let mut command = Command::new(binary);
    command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

    // On Windows the child would otherwise flash a console window; this is
    // the one platform-specific knob the orchestrator carries.
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let output = command
        .output()
        .await
        .map_err(|_| InstallError::Save3dsFuseNotFound(binary.to_path_buf()))?;

    if !output.status.success() {
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            log::error!("save3ds_fuse: {line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            log::error!("save3ds_fuse: {line}");
        }
        return Err(InstallError::Save3dsFuseFailed(
            output.status.code().unwrap_or(-1),
        ));
    }
    Ok(())
}

/// Extracts the current title database, drops one Title Info Entry file per
/// `title_id_hex -> entry_bytes` pair into it, then reimports the whole
/// directory. Both subprocess invocations must succeed; a nonzero exit from
/// either is a fatal batch-wide error.
pub async fn import_title_entries(
    save3ds_fuse: &Path,
    boot9: &Path,
    movable: &Path,
    sd_root: &Path,
    entries: &HashMap<u64, [u8; 0x80]>,
) -> InstallResult<()> {
    if entries.is_empty() {
        return Ok(());
    }
    if !save3ds_fuse.is_file() {
        return Err(InstallError::Save3dsFuseNotFound(save3ds_fuse.to_path_buf()));
    }

    let tempdir = tempfile::Builder::new()
        .suffix("-custom-install")
        .tempdir()?;
    let tempdir_path = tempdir.path().to_str().ok_or(InstallError::Save3dsFuseNotFound(
        tempdir.path().to_path_buf(),
    ))?;

    let base_args: Vec<String> = vec![
        "-b".to_string(),
        boot9.to_string_lossy().to_string(),
        "-m".to_string(),
        movable.to_string_lossy().to_string(),
        "--sd".to_string(),
        sd_root.to_string_lossy().to_string(),
        "--db".to_string(),
        "sdtitle".to_string(),
        tempdir_path.to_string(),
    ];
    let base_args_ref: Vec<&str> = base_args.iter().map(String::as_str).collect();

    let mut extract_args = base_args_ref.clone();
    extract_args.push("-x");
    run(save3ds_fuse, &extract_args).await?;

    for (&title_id, entry) in entries {
        let path = tempdir.path().join(format!("{title_id:016x}"));
        tokio::fs::write(path, entry).await?;
    }

    let mut import_args = base_args_ref;
    import_args.push("-i");
    run(save3ds_fuse, &import_args).await?;

    Ok(())
}

/// Copies `custom-install-finalize.3dsx` next to the tool onto
/// `<sd>/3ds/custom-install-finalize.3dsx` if present, so the homebrew
/// finalizer is ready to run from the Homebrew Launcher.
pub async fn copy_finalize_sidecar(install_dir: &Path, sd_root: &Path) -> InstallResult<bool> {
    let source = install_dir.join("custom-install-finalize.3dsx");
    if !source.is_file() {
        return Ok(false);
    }
    let hb_dir = sd_root.join("3ds");
    tokio::fs::create_dir_all(&hb_dir).await?;
    tokio::fs::copy(&source, hb_dir.join("custom-install-finalize.3dsx")).await?;
    Ok(true)
}
