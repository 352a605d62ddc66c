//! CLI context storage: `~/.hodei/config`.
//!
//! A context names an orchestrator control endpoint plus credentials. The
//! file holds secrets, so it must be owner read/write only; a loosened mode
//! is an error, not a warning.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextEntry>,
}

pub fn config_path() -> PathBuf {
    hodei_logging::hodei_home().join("config")
}

pub fn load() -> Result<ContextFile> {
    let path = config_path();
    if !path.exists() {
        return Ok(ContextFile::default());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path)?.permissions().mode();
        if mode & 0o077 != 0 {
            bail!(
                "Refusing to read {}: mode {:o} is too permissive (must be 0600). \
                Run: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn save(file: &ContextFile) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(file)?;
    fs::write(&path, raw).with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

impl ContextFile {
    /// The active context, or the default control address when none is set.
    pub fn current(&self) -> Result<ContextEntry> {
        match &self.current_context {
            Some(name) => self
                .contexts
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("current context '{}' does not exist", name)),
            None => Ok(ContextEntry {
                url: hodei_protocol::defaults::DEFAULT_CONTROL_ADDR.to_string(),
                user: None,
                token: None,
            }),
        }
    }
}
