//! Startup seed file
//!
//! ```json
//! {
//!   "tokens": { "tok-alice": "alice" },
//!   "groups": [{ "id": "g1", "admin": "alice", "members": ["bob"] }]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::models::{Group, UserId};

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub tokens: HashMap<String, UserId>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl SeedFile {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed file {:?}", path))?;
        let seed: SeedFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed file {:?}", path))?;
        info!(
            "Loaded seed {:?}: {} tokens, {} groups",
            path,
            seed.tokens.len(),
            seed.groups.len()
        );
        Ok(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_seed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"{
                "tokens": { "tok-a": "alice", "tok-b": "bob" },
                "groups": [{ "id": "g1", "admin": "alice", "coAdmins": ["bob"], "members": ["bob", "carol"] }]
            }"#,
        )
        .unwrap();

        let seed = SeedFile::load(&path).await.unwrap();
        assert_eq!(seed.tokens["tok-b"], "bob");
        assert_eq!(seed.groups.len(), 1);
        assert!(seed.groups[0].is_privileged("bob"));
        assert!(seed.groups[0].is_member("carol"));
    }

    #[tokio::test]
    async fn test_malformed_seed_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SeedFile::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse seed file"));
    }
}
