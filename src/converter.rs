//! The conversion pipeline: preflight the output, acquire the rootfs and
//! metadata, synthesize the bootstrap files, materialize the result.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;
use tempfile::TempDir;

use crate::bootstrap::{self, BootstrapLayout};
use crate::output::{self, OutputKind, OutputSpec};
use crate::sources::Source;

pub struct ImageToBundleConverter<S: Source, L: BootstrapLayout> {
    source: S,
    layout: L,
}

impl<S: Source, L: BootstrapLayout> ImageToBundleConverter<S, L> {
    pub fn new(source: S, layout: L) -> Self {
        Self { source, layout }
    }

    pub fn convert(&self, image: &str, output_path: &Path) -> Result<()> {
        info!("Starting conversion of image: {}", image);
        debug!("Source: {}, layout: {}", self.source.name(), self.layout.name());

        let spec = OutputSpec::from_path(output_path)?;
        info!("Output type: {:?}", spec.kind);
        spec.preflight()?;

        // The work area is a scoped TempDir: removed on every exit path
        // when it drops. Directory outputs are renamed into place, so
        // theirs has to live on the same filesystem as the destination.
        let work_dir = self.create_work_area(&spec)?;
        info!("Temporary work area: {}", work_dir.path().display());

        let acquired = self.source.acquire(image, work_dir.path())?;
        debug!("Rootfs extracted to {}", acquired.rootfs.display());

        bootstrap::prepare_rootfs(&acquired.rootfs)?;
        self.layout.synthesize(&acquired.rootfs, &acquired.metadata)?;

        output::materialize(&spec, &acquired.rootfs, self.layout.normalize_before_pack())?;

        info!("Conversion complete: {}", spec.path.display());
        Ok(())
    }

    fn create_work_area(&self, spec: &OutputSpec) -> Result<TempDir> {
        let work_dir = match spec.kind {
            OutputKind::Directory => tempfile::Builder::new()
                .prefix(&format!("{}-", spec.file_name()))
                .tempdir_in(spec.parent_dir()),
            OutputKind::CompressedImage => tempfile::Builder::new()
                .prefix("docker2singularity-")
                .tempdir(),
        };
        work_dir.context("Failed to create temporary work area")
    }
}
