use anyhow::{bail, Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{AcquiredImage, Source};
use crate::metadata;

/// Unprivileged acquisition via docker2aci.
///
/// docker2aci pulls the image from a registry without talking to a daemon,
/// leaving a single `*.aci` archive in its working directory. Unpacking it
/// yields a `rootfs/` tree and a `manifest` JSON file.
pub struct AciSource;

impl AciSource {
    pub fn new() -> Result<Self> {
        which::which("docker2aci")
            .context("docker2aci executable not found in PATH (required for unprivileged mode)")?;
        Ok(Self)
    }

    fn find_aci_archive(work_dir: &Path) -> Result<PathBuf> {
        let entries = fs::read_dir(work_dir)
            .with_context(|| format!("Failed to read work directory: {}", work_dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("aci") {
                return Ok(path);
            }
        }
        bail!("docker2aci produced no .aci archive in {}", work_dir.display())
    }
}

impl Source for AciSource {
    fn name(&self) -> &str {
        "docker2aci"
    }

    fn acquire(&self, image: &str, work_dir: &Path) -> Result<AcquiredImage> {
        let url = format!("docker://{}", image);
        info!("Fetching '{}' via docker2aci...", url);

        let status = Command::new("docker2aci")
            .arg(&url)
            .current_dir(work_dir)
            .status()
            .context("Failed to execute docker2aci")?;
        if !status.success() {
            bail!("docker2aci failed with {}", status);
        }

        let archive = Self::find_aci_archive(work_dir)?;
        info!("Unpacking {}", archive.display());

        let unpack_status = Command::new("tar")
            .args(["--exclude=dev", "-x", "-f"])
            .arg(&archive)
            .current_dir(work_dir)
            .status()
            .context("Failed to run tar on the ACI archive")?;
        if !unpack_status.success() {
            bail!("tar failed to unpack the ACI archive: {}", unpack_status);
        }
        fs::remove_file(&archive)
            .with_context(|| format!("Failed to remove {}", archive.display()))?;

        let metadata = metadata::from_aci_manifest(&work_dir.join("manifest"))?;

        let rootfs = work_dir.join("rootfs");
        if !rootfs.is_dir() {
            bail!("ACI archive contained no rootfs directory");
        }

        Ok(AcquiredImage { rootfs, metadata })
    }
}
