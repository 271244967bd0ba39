// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local artifact storage for uploaded binaries (screenshots and friends).
//!
//! The in-session record of an upload is its `artifact` event; the bytes
//! land here and are served back at a stable URL.

use std::path::{Path, PathBuf};

use switchboard_core::SwitchboardError;
use uuid::Uuid;

/// Disk-backed artifact store rooted at a configured directory.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist artifact bytes for a session.
    ///
    /// The stored name is prefixed with a fresh id so repeated uploads of
    /// the same filename never collide. Returns the stable relative URL.
    pub async fn save(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, SwitchboardError> {
        let safe_session = sanitize(session_id)?;
        let safe_name = sanitize(file_name)?;
        let stored_name = format!("{}-{}", Uuid::new_v4(), safe_name);

        let dir = self.root.join(&safe_session);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(storage_err)?;
        tokio::fs::write(dir.join(&stored_name), bytes)
            .await
            .map_err(storage_err)?;

        Ok(format!("/artifacts/{safe_session}/{stored_name}"))
    }

    /// Read artifact bytes back. Unknown names are `None`.
    pub async fn load(
        &self,
        session_id: &str,
        stored_name: &str,
    ) -> Result<Option<Vec<u8>>, SwitchboardError> {
        let path = self
            .root
            .join(sanitize(session_id)?)
            .join(sanitize(stored_name)?);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn storage_err(e: std::io::Error) -> SwitchboardError {
    SwitchboardError::Storage {
        source: Box::new(e),
    }
}

/// Reject names that could escape the store root.
fn sanitize(name: &str) -> Result<String, SwitchboardError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(SwitchboardError::BadRequest(format!(
            "invalid artifact path segment: {name}"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let url = store.save("sess-1", "shot.png", b"png-bytes").await.unwrap();
        assert!(url.starts_with("/artifacts/sess-1/"));
        assert!(url.ends_with("-shot.png"));

        let stored_name = url.rsplit('/').next().unwrap();
        let bytes = store.load("sess-1", stored_name).await.unwrap().unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn repeated_uploads_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = store.save("s", "shot.png", b"one").await.unwrap();
        let b = store.save("s", "shot.png", b"two").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn traversal_attempts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.save("s", "../evil", b"x").await.is_err());
        assert!(store.save("../s", "ok.png", b"x").await.is_err());
        assert!(store.load("s", ".hidden").await.is_err());
    }

    #[tokio::test]
    async fn unknown_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load("s", "missing.png").await.unwrap().is_none());
    }
}
