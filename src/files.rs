//! Broker ACL and password files generated from scenario data.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    Ok(())
}

/// Writes one ACL rule per line.
pub fn create_acl_file(path: &Path, rules: &[String]) -> Result<PathBuf> {
    ensure_parent(path)?;

    let mut content = String::new();
    for rule in rules {
        content.push_str(rule);
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("Failed to write ACL file: {:?}", path))?;

    info!("Created ACL file at: {:?}", path);
    Ok(path.to_path_buf())
}

/// Writes `user:password` lines.
pub fn create_password_file(path: &Path, users: &BTreeMap<String, String>) -> Result<PathBuf> {
    ensure_parent(path)?;

    let content: String = users
        .iter()
        .map(|(user, password)| format!("{}:{}\n", user, password))
        .collect();
    fs::write(path, content)
        .with_context(|| format!("Failed to write password file: {:?}", path))?;

    info!("Created password file at: {:?}", path);
    Ok(path.to_path_buf())
}
