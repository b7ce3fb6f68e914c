//! Client configuration: YAML file plus `VOID_ARTIFACT_*` environment
//! overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_MAX_UNTAR_SIZE: &str = "VOID_ARTIFACT_MAX_UNTAR_SIZE";
pub const ENV_SKIP_SYMLINKS: &str = "VOID_ARTIFACT_SKIP_SYMLINKS";
pub const ENV_TIMEOUT_SECS: &str = "VOID_ARTIFACT_TIMEOUT_SECS";
pub const ENV_LAYOUT_ROOT: &str = "VOID_ARTIFACT_LAYOUT_ROOT";

/// Defaults applied to every push and pull made through a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Budget for decompressed tarball content in bytes. `None` disables the
    /// check.
    pub max_untar_size: Option<u64>,
    /// Drop symlinks found in pulled tarballs.
    pub skip_symlinks: bool,
    /// Deadline for a whole push or pull.
    pub timeout_secs: Option<u64>,
    /// Root of the local OCI layout store.
    pub layout_root: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_untar_size: None,
            skip_symlinks: true,
            timeout_secs: None,
            layout_root: default_layout_root(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Load a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid YAML config {}: {}", path.display(), e)))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Apply `VOID_ARTIFACT_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// `VOID_ARTIFACT_MAX_UNTAR_SIZE` accepts a byte count, or `0`/`none`
    /// for unbounded. `VOID_ARTIFACT_TIMEOUT_SECS` accepts seconds, or `0`
    /// for no deadline.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_UNTAR_SIZE) {
            self.max_untar_size = parse_optional_u64(ENV_MAX_UNTAR_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SKIP_SYMLINKS) {
            self.skip_symlinks = parse_bool(ENV_SKIP_SYMLINKS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = parse_optional_u64(ENV_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LAYOUT_ROOT) {
            if raw.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", ENV_LAYOUT_ROOT)));
            }
            self.layout_root = PathBuf::from(raw);
        }
        Ok(self)
    }
}

fn default_layout_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".cache")
        .join("void-artifact")
        .join("oci")
}

fn parse_optional_u64(key: &str, raw: &str) -> Result<Option<u64>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    match raw.parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(Error::Config(format!("invalid {} '{}': {}", key, raw, e))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "invalid {} '{}', expected true or false",
            key, other
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.max_untar_size, None);
        assert!(cfg.skip_symlinks);
        assert_eq!(cfg.timeout(), None);
        assert!(cfg.layout_root.ends_with("void-artifact/oci"));
    }

    #[test]
    fn yaml_partial_keeps_defaults() {
        let cfg = ClientConfig::from_yaml_str(
            "max_untar_size: 1048576\ntimeout_secs: 30\nlayout_root: /var/lib/artifacts\n",
        )
        .unwrap();
        assert_eq!(cfg.max_untar_size, Some(1 << 20));
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.layout_root, PathBuf::from("/var/lib/artifacts"));
        assert!(cfg.skip_symlinks);
    }

    #[test]
    fn yaml_type_error() {
        let err = ClientConfig::from_yaml_str("skip_symlinks: maybe\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)), "{err}");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = ClientConfig::load(Path::new("/nonexistent/void-artifact.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "skip_symlinks: false\n").unwrap();
        let cfg = ClientConfig::load(&path).unwrap();
        assert!(!cfg.skip_symlinks);
    }

    #[test]
    fn env_overrides() {
        let cfg = ClientConfig::default()
            .apply_env_from(env(&[
                (ENV_MAX_UNTAR_SIZE, "4096"),
                (ENV_SKIP_SYMLINKS, "false"),
                (ENV_TIMEOUT_SECS, "5"),
                (ENV_LAYOUT_ROOT, "/srv/oci"),
            ]))
            .unwrap();
        assert_eq!(cfg.max_untar_size, Some(4096));
        assert!(!cfg.skip_symlinks);
        assert_eq!(cfg.timeout_secs, Some(5));
        assert_eq!(cfg.layout_root, PathBuf::from("/srv/oci"));
    }

    #[test]
    fn env_zero_means_unbounded() {
        let cfg = ClientConfig {
            max_untar_size: Some(10),
            timeout_secs: Some(10),
            ..Default::default()
        }
        .apply_env_from(env(&[(ENV_MAX_UNTAR_SIZE, "0"), (ENV_TIMEOUT_SECS, "none")]))
        .unwrap();
        assert_eq!(cfg.max_untar_size, None);
        assert_eq!(cfg.timeout_secs, None);
    }

    #[test]
    fn env_invalid_values() {
        for (key, value) in [
            (ENV_MAX_UNTAR_SIZE, "lots"),
            (ENV_SKIP_SYMLINKS, "perhaps"),
            (ENV_TIMEOUT_SECS, "-1"),
            (ENV_LAYOUT_ROOT, " "),
        ] {
            let err = ClientConfig::default()
                .apply_env_from(env(&[(key, value)]))
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{key}={value}: {err}");
        }
    }
}
