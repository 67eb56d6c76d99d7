mod aci;
mod docker;

pub use aci::AciSource;
pub use docker::DockerSource;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::metadata::ImageMetadata;

/// A rootfs tree plus the image metadata needed to bootstrap it.
#[derive(Debug)]
pub struct AcquiredImage {
    pub rootfs: PathBuf,
    pub metadata: ImageMetadata,
}

/// Source trait for turning an image reference into an extracted rootfs.
///
/// Implementations materialize the image filesystem somewhere under
/// `work_dir` (which the caller owns and removes) and report the image's
/// environment and default command alongside it.
pub trait Source {
    /// Returns the name of the source for identification purposes
    fn name(&self) -> &str;

    /// Fetches `image` and unpacks its filesystem under `work_dir`.
    fn acquire(&self, image: &str, work_dir: &Path) -> Result<AcquiredImage>;
}
