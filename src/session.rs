use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Persisted format: ~/.canopy/session.json
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
struct PersistedSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

/// Local bearer-token holder shared by the API client and the transport.
///
/// Cloning shares the same slot, so an invalidation seen by one connection
/// is seen by every other request made afterwards.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Arc<Mutex<Option<String>>>,
    file: Option<PathBuf>,
}

impl Session {
    /// Load from `file`. Returns an empty session if missing or invalid.
    /// `CANOPY_TOKEN` takes precedence over the file.
    pub fn load(file: &Path) -> Self {
        let from_env = std::env::var("CANOPY_TOKEN").ok().filter(|t| !t.is_empty());
        let token = from_env.or_else(|| Self::read_token(file));
        Self {
            token: Arc::new(Mutex::new(token)),
            file: Some(file.to_path_buf()),
        }
    }

    /// In-memory session with no backing file.
    pub fn in_memory(token: Option<String>) -> Self {
        Self {
            token: Arc::new(Mutex::new(token)),
            file: None,
        }
    }

    fn read_token(file: &Path) -> Option<String> {
        if !file.exists() {
            return None;
        }
        match std::fs::read_to_string(file) {
            Ok(content) => match serde_json::from_str::<PersistedSession>(&content) {
                Ok(persisted) => persisted.token.filter(|t| !t.is_empty()),
                Err(e) => {
                    warn!("Failed to parse session.json: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read session.json: {}", e);
                None
            }
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Store a new token and persist it when file-backed.
    pub fn set_token(&self, token: String) -> anyhow::Result<()> {
        if let Some(file) = &self.file {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&PersistedSession {
                token: Some(token.clone()),
            })?;
            std::fs::write(file, json)?;
        }
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token);
        }
        Ok(())
    }

    /// Drop the token in memory and on disk.
    pub fn invalidate(&self) {
        let had_token = self
            .token
            .lock()
            .map(|mut guard| guard.take().is_some())
            .unwrap_or(false);
        if let Some(file) = &self.file {
            if file.exists() {
                if let Err(e) = std::fs::remove_file(file) {
                    warn!("Failed to remove {}: {}", file.display(), e);
                }
            }
        }
        if had_token {
            info!("Session invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_persist_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");

        let session = Session::load(&file);
        assert!(!session.is_authenticated() || std::env::var("CANOPY_TOKEN").is_ok());

        session.set_token("tok-123".to_string()).unwrap();
        assert_eq!(session.token().as_deref(), Some("tok-123"));
        assert_eq!(Session::read_token(&file).as_deref(), Some("tok-123"));

        session.invalidate();
        assert!(session.token().is_none());
        assert!(!file.exists());
    }

    #[test]
    fn test_clones_share_invalidation() {
        let session = Session::in_memory(Some("abc".to_string()));
        let other = session.clone();
        other.invalidate();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_corrupt_file_yields_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");
        std::fs::write(&file, "{not json").unwrap();
        assert!(Session::read_token(&file).is_none());
    }
}
