use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;

/// Directory of opaque credential blobs, one JSON file per name. The
/// transport decides what the blobs mean; this only guarantees they are on
/// disk before the next event is processed, so a crash never forces
/// re-pairing.
#[derive(Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True when a previous pairing left credential files behind.
    pub async fn has_credentials(&self) -> bool {
        match fs::read_dir(&self.dir).await {
            Ok(mut entries) => entries.next_entry().await.ok().flatten().is_some(),
            Err(_) => false,
        }
    }

    /// Flush one credential blob to its file.
    pub async fn save(&self, name: &str, data: &Value) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.json", sanitize(name)));
        let payload = serde_json::to_vec(data)?;
        fs::write(&path, payload).await
    }

    /// Remove every stored credential file. The next connection attempt
    /// will have to issue a fresh pairing code.
    pub async fn clear(&self) -> std::io::Result<()> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

/// Credential names come from the wire; keep them inside the directory.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
