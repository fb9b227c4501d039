//! the slave's local identity: a small YAML file recording the name it
//! registers under, following the same XDG-path convention the project's
//! other command-line tool uses for its own configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

const CONFIG_FILE: &str = "forgeci-slave.yml";

fn default_config_file() -> PathBuf {
    let base = env::var("XDG_CONFIG_HOME")
        .unwrap_or_else(|_| format!("{}/.config", env::var("HOME").unwrap_or_else(|_| ".".to_string())));
    Path::new(&base).join(CONFIG_FILE)
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Identity {
    pub name: Option<String>,
}

impl Identity {
    /// reads the identity file at `path`, or an empty identity if it
    /// doesn't exist yet; a missing file is not an error, a slave given
    /// `--name` on the command line never needs one
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;
        serde_yaml::from_str(&contents).with_context(|| format!("failed to parse {path:?}"))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).with_context(|| format!("failed to create {parent:?}"))?;
            }
        }
        let yaml = serde_yaml::to_string(self).context("failed to serialize identity")?;
        fs::write(path, yaml).with_context(|| format!("failed to write {path:?}"))
    }
}

/// resolves the slave's name: an explicit `--name` wins, then whatever is
/// recorded in the identity file, then the local hostname; a freshly
/// derived name is persisted so future runs are stable without `--name`
pub fn resolve_name(explicit: Option<&str>, config_path: Option<&Path>) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }

    let path = config_path.map(Path::to_path_buf).unwrap_or_else(default_config_file);
    let mut identity = Identity::read(&path)?;

    if let Some(name) = &identity.name {
        return Ok(name.clone());
    }

    let name = whoami::fallible::hostname().unwrap_or_else(|_| "slave".to_string());
    identity.name = Some(name.clone());
    identity.write(&path)?;

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_name_wins_without_touching_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.yml");
        let name = resolve_name(Some("slave1"), Some(&path)).unwrap();
        assert_eq!(name, "slave1");
        assert!(!path.exists());
    }

    #[test]
    fn missing_identity_is_generated_and_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.yml");

        let first = resolve_name(None, Some(&path)).unwrap();
        assert!(path.is_file());

        let second = resolve_name(None, Some(&path)).unwrap();
        assert_eq!(first, second);
    }
}
