use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::process::Command;

use super::{default_shell, render_runscript, write_mode, BootstrapLayout};
use crate::metadata::{ensure_default_env, EnvVar, ImageMetadata};
use crate::runtime::SingularityInstall;
use crate::shell;

/// Bootstrap layout for the `.singularity.d/` app-layer convention.
///
/// The runtime's own reference bootstrap tree is extracted into the rootfs
/// first; the generated environment file and runscript then overwrite
/// their slots unconditionally, and the stock shell action is patched in
/// place.
pub struct SingularityDLayout {
    install: SingularityInstall,
}

impl SingularityDLayout {
    pub fn new() -> Result<Self> {
        Ok(Self {
            install: SingularityInstall::discover()?,
        })
    }

    /// Builds the layout around an already-discovered install.
    pub fn with_install(install: SingularityInstall) -> Self {
        Self { install }
    }

    fn extract_reference_bootstrap(&self, rootfs: &Path) -> Result<()> {
        let archive = self.install.bootstrap_archive();
        if !archive.is_file() {
            bail!(
                "Singularity bootstrap archive not found at {}",
                archive.display()
            );
        }

        info!("Extracting reference bootstrap tree from {}", archive.display());
        let status = Command::new("tar")
            .args(["-x", "-f"])
            .arg(&archive)
            .current_dir(rootfs)
            .status()
            .context("Failed to run tar on the bootstrap archive")?;
        if !status.success() {
            bail!("tar failed to unpack the bootstrap archive: {}", status);
        }

        Ok(())
    }
}

impl BootstrapLayout for SingularityDLayout {
    fn name(&self) -> &str {
        "singularity.d"
    }

    fn synthesize(&self, rootfs: &Path, metadata: &ImageMetadata) -> Result<()> {
        // Seed the runtime's reference tree first; the files generated
        // below overwrite pieces of it.
        self.extract_reference_bootstrap(rootfs)?;

        let mut env = metadata.env.clone();
        ensure_default_env(&mut env);

        let env_dir = rootfs.join(".singularity.d/env");
        fs::create_dir_all(&env_dir)
            .with_context(|| format!("Failed to create {}", env_dir.display()))?;
        write_mode(&env_dir.join("10-docker.sh"), &environment_file(&env), 0o644)?;

        patch_shell_action(&rootfs.join(".singularity.d/actions/shell"))?;

        if metadata.run_cmd.is_empty() {
            info!("Singularity container has no default run cmd.");
        } else {
            let shell_path = default_shell(rootfs);
            write_mode(
                &rootfs.join(".singularity.d/runscript"),
                &render_runscript(shell_path, &metadata.run_cmd),
                0o755,
            )?;
        }

        Ok(())
    }

    fn normalize_before_pack(&self) -> bool {
        true
    }
}

/// Plain `export` statements; the runtime sources every file under
/// `.singularity.d/env/` itself, so no re-entry guard is needed here.
fn environment_file(env: &[EnvVar]) -> String {
    let mut out = String::from("#!/bin/sh\n# Environment imported from the Docker image.\n\n");
    for var in env {
        out.push_str("export ");
        out.push_str(&var.name);
        out.push('=');
        out.push_str(&shell::double_quote(&var.value));
        out.push('\n');
    }
    out
}

/// The stock shell action launches `bash --norc`, which would skip the
/// environment files written above. Drop the flag via in-place text
/// substitution.
fn patch_shell_action(path: &Path) -> Result<()> {
    if !path.is_file() {
        warn!("No shell action script at \"{}\"; nothing to patch", path.display());
        return Ok(());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let patched = contents.replace(" --norc", "").replace("--norc ", "");
    if patched != contents {
        fs::write(path, &patched)
            .with_context(|| format!("Failed to patch {}", path.display()))?;
        info!("Removed --norc from {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    /// Lays out a fake Singularity install whose bootstrap archive carries
    /// a `.singularity.d` skeleton with a `--norc` shell action, built
    /// with the system tar like the real archive would be.
    fn fake_install(libexecdir: &Path) -> SingularityInstall {
        let scripts_dir = libexecdir.join("singularity/bootstrap-scripts");
        fs::create_dir_all(&scripts_dir).unwrap();

        let stage = libexecdir.join("stage");
        fs::create_dir_all(stage.join(".singularity.d/actions")).unwrap();
        fs::write(
            stage.join(".singularity.d/actions/shell"),
            "#!/bin/sh\nexec /bin/bash --norc \"$@\"\n",
        )
        .unwrap();
        fs::write(stage.join(".singularity.d/labels.json"), "{}\n").unwrap();

        let status = Command::new("tar")
            .args(["-c", "-f"])
            .arg(scripts_dir.join("environment.tar"))
            .arg(".singularity.d")
            .current_dir(&stage)
            .status()
            .unwrap();
        assert!(status.success());

        SingularityInstall {
            libexecdir: libexecdir.to_path_buf(),
        }
    }

    fn metadata(env: &[(&str, &str)], cmd: &[&str]) -> ImageMetadata {
        ImageMetadata {
            env: env.iter().map(|(n, v)| EnvVar::new(*n, *v)).collect(),
            run_cmd: cmd.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_synthesize_extracts_and_patches() {
        let install_dir = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let layout = SingularityDLayout::with_install(fake_install(install_dir.path()));

        layout
            .synthesize(rootfs.path(), &metadata(&[("FOO", "bar")], &["/bin/app"]))
            .unwrap();

        // Reference tree landed in the rootfs.
        assert!(rootfs.path().join(".singularity.d/labels.json").is_file());

        // Shell action lost its --norc flag but nothing else.
        let action =
            fs::read_to_string(rootfs.path().join(".singularity.d/actions/shell")).unwrap();
        assert!(!action.contains("--norc"));
        assert!(action.contains("exec /bin/bash \"$@\""));

        let env_file =
            fs::read_to_string(rootfs.path().join(".singularity.d/env/10-docker.sh")).unwrap();
        assert!(env_file.contains("export FOO=\"bar\"\n"));
        assert!(env_file.contains("export PATH="));
        assert!(env_file.contains("export LD_LIBRARY_PATH=\"\"\n"));
        // No legacy synthetics in this layout.
        assert!(!env_file.contains("SINGULARITY_INIT"));
        assert!(!env_file.contains("PS1"));

        let runscript =
            fs::read_to_string(rootfs.path().join(".singularity.d/runscript")).unwrap();
        assert!(runscript.ends_with("exec \"/bin/app\"\n"));
    }

    #[test]
    fn test_synthesize_overwrites_existing_env_file() {
        let install_dir = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let layout = SingularityDLayout::with_install(fake_install(install_dir.path()));

        fs::create_dir_all(rootfs.path().join(".singularity.d/env")).unwrap();
        fs::write(
            rootfs.path().join(".singularity.d/env/10-docker.sh"),
            "stale\n",
        )
        .unwrap();

        layout.synthesize(rootfs.path(), &metadata(&[], &[])).unwrap();

        let env_file =
            fs::read_to_string(rootfs.path().join(".singularity.d/env/10-docker.sh")).unwrap();
        assert!(!env_file.contains("stale"));
        assert!(env_file.contains("export PATH="));
    }

    #[test]
    fn test_missing_bootstrap_archive_is_fatal() {
        let install_dir = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let layout = SingularityDLayout::with_install(SingularityInstall {
            libexecdir: PathBuf::from(install_dir.path()),
        });

        assert!(layout.synthesize(rootfs.path(), &metadata(&[], &[])).is_err());
    }

    #[test]
    fn test_no_runscript_without_run_cmd() {
        let install_dir = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let layout = SingularityDLayout::with_install(fake_install(install_dir.path()));

        layout.synthesize(rootfs.path(), &metadata(&[], &[])).unwrap();
        assert!(!rootfs.path().join(".singularity.d/runscript").exists());
    }
}
