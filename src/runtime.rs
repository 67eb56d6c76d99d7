//! Discovery of the local Singularity installation.
//!
//! Singularity bakes its install-time configuration into the executable as
//! `key="value"` string constants. Running `strings` over the binary
//! recovers them; `libexecdir` may reference other keys (`${prefix}` and
//! friends) and is resolved by repeated substitution until stable.

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

/// Resolved install paths of the target Singularity runtime.
#[derive(Debug, Clone)]
pub struct SingularityInstall {
    pub libexecdir: PathBuf,
}

impl SingularityInstall {
    /// Locates the `singularity` executable and resolves its `libexecdir`.
    pub fn discover() -> Result<Self> {
        let exe = which::which("singularity")
            .context("singularity executable not found in PATH")?;
        debug!("Found singularity executable: {}", exe.display());

        let output = Command::new("strings")
            .arg(&exe)
            .output()
            .context("Failed to run strings on the singularity binary")?;
        if !output.status.success() {
            bail!("strings failed on {}", exe.display());
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let vars = parse_build_vars(&text);
        let libexecdir = resolve_var(&vars, "libexecdir")?;
        debug!("Resolved libexecdir: {}", libexecdir);

        Ok(Self {
            libexecdir: PathBuf::from(libexecdir),
        })
    }

    /// Path of the reference bootstrap archive shipped with the runtime.
    pub fn bootstrap_archive(&self) -> PathBuf {
        self.libexecdir
            .join("singularity/bootstrap-scripts/environment.tar")
    }
}

/// Collects `key="value"` lines from `strings` output. The first
/// occurrence of a key wins; lines that are not a plain identifier
/// followed by a double-quoted value are ignored.
fn parse_build_vars(text: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once("=\"") else {
            continue;
        };
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            continue;
        }
        let Some(value) = rest.strip_suffix('"') else {
            continue;
        };
        if value.contains('"') {
            continue;
        }
        vars.entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
    vars
}

/// Looks up `key` and expands nested `${var}` references until the value
/// stops changing. The round count is bounded so a self-referential value
/// cannot loop forever; anything still unresolved afterwards is an error.
fn resolve_var(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    let mut value = vars
        .get(key)
        .cloned()
        .ok_or_else(|| anyhow!("key '{}' not found in singularity binary", key))?;

    for _ in 0..8 {
        let expanded = expand_refs(&value, vars)?;
        if expanded == value {
            break;
        }
        value = expanded;
    }
    if value.contains("${") {
        bail!("could not fully resolve '{}': {}", key, value);
    }
    Ok(value)
}

fn expand_refs(value: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow!("unterminated variable reference in '{}'", value))?;
        let name = &after[..end];
        let replacement = vars
            .get(name)
            .ok_or_else(|| anyhow!("unknown variable '{}' referenced by '{}'", name, value))?;
        out.push_str(replacement);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_build_vars() {
        let text = "\
random garbage
prefix=\"/usr/local\"
exec_prefix=\"${prefix}\"
libexecdir=\"${exec_prefix}/libexec\"
not a var line
spaced key=\"x\"
";
        let vars = parse_build_vars(text);
        assert_eq!(vars.get("prefix").unwrap(), "/usr/local");
        assert_eq!(vars.get("exec_prefix").unwrap(), "${prefix}");
        assert_eq!(vars.get("libexecdir").unwrap(), "${exec_prefix}/libexec");
        assert!(!vars.contains_key("spaced key"));
    }

    #[test]
    fn test_parse_build_vars_first_occurrence_wins() {
        let text = "a=\"one\"\na=\"two\"\n";
        assert_eq!(parse_build_vars(text).get("a").unwrap(), "one");
    }

    #[test]
    fn test_resolve_nested() {
        let vars = vars(&[
            ("prefix", "/usr/local"),
            ("exec_prefix", "${prefix}"),
            ("libexecdir", "${exec_prefix}/libexec"),
        ]);
        assert_eq!(
            resolve_var(&vars, "libexecdir").unwrap(),
            "/usr/local/libexec"
        );
    }

    #[test]
    fn test_resolve_plain_value() {
        let vars = vars(&[("libexecdir", "/opt/singularity/libexec")]);
        assert_eq!(
            resolve_var(&vars, "libexecdir").unwrap(),
            "/opt/singularity/libexec"
        );
    }

    #[test]
    fn test_resolve_missing_key() {
        let vars = vars(&[("prefix", "/usr")]);
        assert!(resolve_var(&vars, "libexecdir").is_err());
    }

    #[test]
    fn test_resolve_unknown_reference() {
        let vars = vars(&[("libexecdir", "${nonexistent}/libexec")]);
        assert!(resolve_var(&vars, "libexecdir").is_err());
    }

    #[test]
    fn test_resolve_self_reference_fails() {
        let vars = vars(&[("a", "${a}")]);
        assert!(resolve_var(&vars, "a").is_err());
    }
}
