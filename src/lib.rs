pub mod bootstrap;
pub mod converter;
pub mod metadata;
pub mod output;
pub mod runtime;
pub mod shell;
pub mod sources;

// Re-exports for easy access
pub use bootstrap::{BootstrapLayout, LegacyLayout, SingularityDLayout};
pub use converter::ImageToBundleConverter;
pub use metadata::{EnvVar, ImageMetadata};
pub use output::{OutputKind, OutputSpec};
pub use runtime::SingularityInstall;
pub use sources::{AciSource, AcquiredImage, DockerSource, Source};
