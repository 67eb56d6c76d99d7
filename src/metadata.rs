//! Typed image metadata: the environment and default command discovered in
//! an image, plus the parsers that produce it from `docker inspect` output
//! and ACI manifests.
//!
//! Missing or null metadata fields degrade to empty values here, once, so
//! the rest of the pipeline never has to re-check for absent keys.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default `PATH` injected when the image declares none.
pub const DEFAULT_PATH: &str = "/bin:/sbin:/usr/bin:/usr/sbin:/usr/local/bin:/usr/local/sbin";

/// One environment variable, in discovery order.
///
/// Derives `Deserialize` because ACI manifests carry the environment as a
/// list of `{name, value}` objects in exactly this shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Splits a Docker-style `KEY=VALUE` entry on the first `=`. An entry
    /// without `=` becomes a variable with an empty value.
    pub fn parse(entry: &str) -> Self {
        match entry.split_once('=') {
            Some((name, value)) => Self::new(name, value),
            None => Self::new(entry, ""),
        }
    }
}

/// Environment and default run command of one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub env: Vec<EnvVar>,
    pub run_cmd: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InspectRecord {
    #[serde(rename = "Config")]
    config: Option<InspectConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectConfig {
    #[serde(default, rename = "Env")]
    env: Option<Vec<String>>,
    #[serde(default, rename = "Cmd")]
    cmd: Option<Vec<String>>,
}

/// Parses the JSON emitted by `docker inspect <image>`: an array with one
/// record whose `Config.Env` and `Config.Cmd` may each be missing or null.
pub fn from_docker_inspect(json: &str) -> Result<ImageMetadata> {
    let records: Vec<InspectRecord> =
        serde_json::from_str(json).context("Failed to parse docker inspect output")?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("docker inspect returned no records"))?;
    let config = record.config.unwrap_or_default();

    Ok(ImageMetadata {
        env: config
            .env
            .unwrap_or_default()
            .iter()
            .map(|e| EnvVar::parse(e))
            .collect(),
        run_cmd: config.cmd.unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct AciManifest {
    #[serde(default)]
    app: Option<AciApp>,
}

#[derive(Debug, Default, Deserialize)]
struct AciApp {
    #[serde(default)]
    environment: Option<Vec<EnvVar>>,
    #[serde(default)]
    exec: Option<Vec<String>>,
}

/// Reads the `manifest` file docker2aci leaves next to the extracted
/// rootfs, taking `app.environment` and `app.exec` (missing/null → empty).
pub fn from_aci_manifest(path: &Path) -> Result<ImageMetadata> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read ACI manifest: {}", path.display()))?;
    let manifest: AciManifest =
        serde_json::from_str(&contents).context("Failed to parse ACI manifest")?;
    let app = manifest.app.unwrap_or_default();

    Ok(ImageMetadata {
        env: app.environment.unwrap_or_default(),
        run_cmd: app.exec.unwrap_or_default(),
    })
}

/// Guarantees `PATH` and `LD_LIBRARY_PATH` exist, inserting them at the
/// front (in that order) with default values only when absent. Everything
/// else keeps its discovery order; duplicate keys from the source metadata
/// are retained as-is.
pub fn ensure_default_env(env: &mut Vec<EnvVar>) {
    if !env.iter().any(|e| e.name == "PATH") {
        env.insert(0, EnvVar::new("PATH", DEFAULT_PATH));
    }
    if !env.iter().any(|e| e.name == "LD_LIBRARY_PATH") {
        env.insert(1, EnvVar::new("LD_LIBRARY_PATH", ""));
    }
}
