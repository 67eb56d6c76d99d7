//! Synthesis of the bootstrap files a Singularity runtime expects inside
//! an imported rootfs: an environment file, the shell/exec/run dispatchers
//! and the runscript carrying the image's default command.

mod legacy;
mod singularity_d;

pub use legacy::LegacyLayout;
pub use singularity_d::SingularityDLayout;

use anyhow::{Context, Result};
use log::warn;
use std::fs;
use std::path::Path;

use crate::metadata::ImageMetadata;
use crate::shell;

/// File-layout strategy for one target-runtime generation.
///
/// The two Singularity generations expect different files at different
/// paths and follow different overwrite policies; everything else in the
/// pipeline is shared.
pub trait BootstrapLayout {
    /// Returns the name of the layout for identification purposes
    fn name(&self) -> &str;

    /// Writes the environment file, dispatchers and runscript for
    /// `metadata` into `rootfs`.
    fn synthesize(&self, rootfs: &Path, metadata: &ImageMetadata) -> Result<()>;

    /// Whether permissions should be normalized before packing the rootfs
    /// into a compressed image.
    fn normalize_before_pack(&self) -> bool {
        false
    }
}

/// Fixups applied to every imported rootfs before synthesis: Singularity
/// mounts over `dev/`, which therefore has to exist, and a stray
/// `.dockerenv` marker is dropped.
pub fn prepare_rootfs(rootfs: &Path) -> Result<()> {
    let dev = rootfs.join("dev");
    if !dev.is_dir() {
        fs::create_dir(&dev)
            .with_context(|| format!("Failed to create {}", dev.display()))?;
    }

    let dockerenv = rootfs.join(".dockerenv");
    if dockerenv.is_file() {
        fs::remove_file(&dockerenv)
            .with_context(|| format!("Failed to remove {}", dockerenv.display()))?;
    }

    Ok(())
}

/// Picks the interpreter for generated scripts: bash when the image ships
/// it, `/bin/sh` otherwise.
pub(crate) fn default_shell(rootfs: &Path) -> &'static str {
    if rootfs.join("bin/bash").is_file() {
        "/bin/bash"
    } else {
        "/bin/sh"
    }
}

/// Writes `contents` to `path` with explicit permission bits.
pub(crate) fn write_mode(path: &Path, contents: &str, mode: u32) -> Result<()> {
    fs::write(path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Legacy overwrite policy: a file already present in the image wins.
pub(crate) fn write_mode_if_absent(path: &Path, contents: &str, mode: u32) -> Result<()> {
    if path.is_file() {
        warn!("Keeping existing \"{}\"", path.display());
        return Ok(());
    }
    write_mode(path, contents, mode)
}

/// Renders the runscript body: a shebang plus an `exec` of the run command
/// with every argument double-quoted, so embedded whitespace survives as
/// one argument.
pub(crate) fn render_runscript(shell_path: &str, run_cmd: &[String]) -> String {
    let quoted = run_cmd
        .iter()
        .map(|arg| shell::double_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    format!("#!{}\n\nexec {}\n", shell_path, quoted)
}
