//! File-backed session registry
//!
//! One pretty-printed JSON file per session plus `now.json` with the most
//! recently written session, for running without a backend.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::session::{SessionRegistry, SessionState};

pub struct FileSessionRegistry {
    state_dir: PathBuf,
    sessions_dir: PathBuf,
}

impl FileSessionRegistry {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let base = state_dir.as_ref().to_path_buf();
        Self {
            sessions_dir: base.join("sessions"),
            state_dir: base,
        }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.sessions_dir).await?;
        Ok(())
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.sessions_dir.join(format!("{}.json", safe))
    }

    pub async fn load(&self, session_id: &str) -> anyhow::Result<Option<SessionState>> {
        let path = self.session_path(session_id);
        match fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, state: &SessionState) -> anyhow::Result<()> {
        self.init().await?;
        let json = serde_json::to_string_pretty(state)?;
        fs::write(self.session_path(&state.session_id), &json).await?;
        fs::write(self.state_dir.join("now.json"), &json).await?;
        debug!("Wrote session {} ({})", state.session_id, state.status);
        Ok(())
    }
}

#[async_trait]
impl SessionRegistry for FileSessionRegistry {
    async fn create(&self, state: &SessionState) -> anyhow::Result<()> {
        self.write(state).await
    }

    async fn update(&self, state: &SessionState) -> anyhow::Result<()> {
        self.write(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionKind, SessionStatus, SessionTracker};

    #[tokio::test]
    async fn test_writes_session_and_now_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileSessionRegistry::new(dir.path());

        let mut tracker =
            SessionTracker::new("vid/01", SessionKind::Video, "clip.mp4", Some(300), "m1", 50);
        registry.create(tracker.state()).await.unwrap();

        tracker.start().unwrap();
        registry.update(tracker.state()).await.unwrap();

        let loaded = registry.load("vid/01").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Processing);
        assert!(registry.session_path("vid/01").ends_with("vid_01.json"));

        let now = std::fs::read_to_string(dir.path().join("now.json")).unwrap();
        assert!(now.contains("\"processing\""));

        assert!(registry.load("missing").await.unwrap().is_none());
    }
}
