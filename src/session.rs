//! In-memory store for session uploads.
//!
//! Uploads are session-scoped and never written to disk. The store is owned
//! by the server state and dropped with it.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::UploadedFile;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Vec<UploadedFile>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends files to a session, creating it when `session_id` is `None`
    /// or unknown. A file with the same name replaces the earlier upload.
    /// Returns the session id.
    pub async fn add(&self, session_id: Option<&str>, files: Vec<UploadedFile>) -> String {
        let id = session_id
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id.clone()).or_default();
        for file in files {
            entry.retain(|f| f.filename != file.filename);
            entry.push(file);
        }
        id
    }

    pub async fn files(&self, session_id: &str) -> Option<Vec<UploadedFile>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
