use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{AcquiredImage, Source};
use crate::metadata;

/// Privileged acquisition through the Docker daemon.
///
/// Metadata comes from `docker inspect`; the filesystem comes from running
/// an ephemeral helper container and piping `docker export` into `tar`.
pub struct DockerSource;

impl DockerSource {
    pub fn new() -> Result<Self> {
        let output = Command::new("docker")
            .arg("--version")
            .output()
            .context("Failed to execute docker command. Is Docker installed and running?")?;

        if !output.status.success() {
            return Err(anyhow!("Docker is not available"));
        }

        Ok(Self)
    }

    fn run_command(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .context(format!("Failed to execute docker command: {:?}", args))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Docker command failed: {}", error));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(stdout)
    }

    /// Stops the helper container and streams its filesystem into
    /// `<work_dir>/rootfs`, excluding `dev` entries.
    fn export_rootfs(&self, container: &str, work_dir: &Path) -> Result<PathBuf> {
        self.run_command(&["stop", "--time=1", container])?;
        info!("Stopped container {}", container);

        let rootfs = work_dir.join("rootfs");
        fs::create_dir(&rootfs)
            .with_context(|| format!("Failed to create rootfs directory: {}", rootfs.display()))?;

        let mut exporter = Command::new("docker")
            .args(["export", container])
            .stdout(Stdio::piped())
            .spawn()
            .context("Failed to spawn docker export")?;

        // The stdout handle is moved out of the child and given to tar as
        // stdin, so this process keeps no copy of the pipe's write end and
        // the exporter receives EPIPE instead of hanging if tar exits
        // early.
        let stream = exporter
            .stdout
            .take()
            .ok_or_else(|| anyhow!("docker export produced no stdout handle"))?;

        let tar_status = Command::new("tar")
            .args(["--exclude=dev", "-x", "-f", "-"])
            .current_dir(&rootfs)
            .stdin(Stdio::from(stream))
            .status()
            .context("Failed to run tar to unpack the exported filesystem")?;

        let export_status = exporter.wait().context("Failed to wait for docker export")?;
        if !export_status.success() {
            bail!("docker export failed with {}", export_status);
        }
        if !tar_status.success() {
            bail!("tar failed to unpack the exported filesystem: {}", tar_status);
        }

        Ok(rootfs)
    }
}

impl Source for DockerSource {
    fn name(&self) -> &str {
        "docker"
    }

    fn acquire(&self, image: &str, work_dir: &Path) -> Result<AcquiredImage> {
        let inspect = self.run_command(&["inspect", image])?;
        let metadata = metadata::from_docker_inspect(&inspect)?;

        let container = self
            .run_command(&["run", "-d", image, "/bin/sh"])?
            .trim()
            .to_string();
        if container.is_empty() {
            bail!("docker run returned no container id for image '{}'", image);
        }
        info!("Started container {} from {}", container, image);

        // The helper container must be removed even when export fails, so
        // the error is held until after `docker rm` has run.
        let result = self.export_rootfs(&container, work_dir);

        match self.run_command(&["rm", &container]) {
            Ok(_) => info!("Removed container {}", container),
            Err(e) => warn!("Failed to remove container {}: {}", container, e),
        }

        let rootfs = result?;
        Ok(AcquiredImage { rootfs, metadata })
    }
}
