//! Output-path handling: kind selection from the path suffix, preflight
//! checks, and final materialization of the converted rootfs.

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// How the finished rootfs leaves the work area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Directory,
    CompressedImage,
}

/// Destination path plus the output kind derived from it.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub path: PathBuf,
    pub kind: OutputKind,
}

impl OutputSpec {
    /// Selects the kind from the path suffix: no extension means a plain
    /// directory, `.sqsh` a SquashFS image. Any other suffix is an input
    /// error, raised before anything touches the filesystem.
    pub fn from_path(path: &Path) -> Result<Self> {
        let kind = match path.extension().and_then(|e| e.to_str()) {
            None => OutputKind::Directory,
            Some("sqsh") => OutputKind::CompressedImage,
            Some(other) => bail!("Unknown output path extension \".{}\"", other),
        };
        Ok(Self {
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Pre-condition checks, run before any temporary resources are
    /// allocated: the output must not exist and its parent must be a
    /// directory.
    pub fn preflight(&self) -> Result<()> {
        if self.path.exists() {
            bail!("Output \"{}\" already exists", self.path.display());
        }
        let parent = self.parent_dir();
        if !parent.is_dir() {
            bail!(
                "Can't create output in \"{}\": doesn't exist or not a directory",
                parent.display()
            );
        }
        Ok(())
    }

    pub fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    }
}

/// Moves or packs the finished rootfs to its destination. `normalize`
/// requests a recursive permission cleanup before packing (the
/// `.singularity.d` layout asks for it, the legacy one does not).
pub fn materialize(spec: &OutputSpec, rootfs: &Path, normalize: bool) -> Result<()> {
    match spec.kind {
        OutputKind::Directory => {
            fs::rename(rootfs, &spec.path).with_context(|| {
                format!(
                    "Failed to move rootfs to \"{}\"",
                    spec.path.display()
                )
            })?;
            info!("Rootfs bundle written to {}", spec.path.display());
        }
        OutputKind::CompressedImage => {
            if normalize {
                normalize_tree(rootfs)?;
            }
            pack_squashfs(rootfs, spec)?;
            info!("SquashFS image written to {}", spec.path.display());
        }
    }
    Ok(())
}

/// Packs the rootfs with mksquashfs into a staging directory beside the
/// destination, then renames into place, so a crashed run never leaves a
/// half-written image visible at the final path.
fn pack_squashfs(rootfs: &Path, spec: &OutputSpec) -> Result<()> {
    let staging = tempfile::Builder::new()
        .prefix(&format!("{}-pack-", spec.file_name()))
        .tempdir_in(spec.parent_dir())
        .context("Failed to create staging directory for mksquashfs")?;
    let image = staging.path().join("image.sqsh");

    info!("Packing rootfs into SquashFS image...");
    let status = Command::new("mksquashfs")
        .arg(rootfs)
        .arg(&image)
        .args(["-all-root", "-noappend"])
        .status()
        .context("Failed to run mksquashfs")?;
    if !status.success() {
        bail!("mksquashfs failed with {}", status);
    }

    fs::rename(&image, &spec.path)
        .with_context(|| format!("Failed to move image to \"{}\"", spec.path.display()))?;
    Ok(())
}

/// Recursive permission cleanup so mksquashfs can walk the whole tree:
/// every entry gets owner read (plus traverse for directories), and
/// world-write bits are stripped. Symlinks are left alone.
fn normalize_tree(rootfs: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        for entry in walkdir::WalkDir::new(rootfs) {
            let entry = entry.context("Failed to walk rootfs for permission cleanup")?;
            if entry.path_is_symlink() {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|e| anyhow!("Failed to stat {}: {}", entry.path().display(), e))?;

            let mode = metadata.permissions().mode() & 0o7777;
            let wanted = if metadata.is_dir() {
                (mode | 0o700) & !0o002
            } else {
                (mode | 0o600) & !0o002
            };
            if wanted != mode {
                fs::set_permissions(entry.path(), fs::Permissions::from_mode(wanted))
                    .with_context(|| {
                        format!("Failed to set permissions on {}", entry.path().display())
                    })?;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = rootfs;

    Ok(())
}
