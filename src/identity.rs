use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the generated user id lives between runs.
pub fn identity_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hearth")
        .join("user_id")
}

/// `HEARTH_USER_ID` when set, else the id stored at [`identity_path`],
/// generating one on first run.
pub fn resolve_user_id() -> Result<String> {
    if let Some(id) = std::env::var("HEARTH_USER_ID")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Ok(id);
    }
    load_or_create(&identity_path())
}

fn load_or_create(path: &Path) -> Result<String> {
    if let Ok(existing) = fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, &id).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Created new user id at {}", path.display());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hearth").join("user_id");

        let first = load_or_create(&path).unwrap();
        assert_eq!(first.len(), 36);
        assert_eq!(load_or_create(&path).unwrap(), first);
    }

    #[test]
    fn blank_identity_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_id");
        fs::write(&path, "  \n").unwrap();
        let id = load_or_create(&path).unwrap();
        assert!(!id.trim().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), id);
    }
}
