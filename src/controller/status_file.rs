//! Persists replica records so a control-plane restart can resume monitoring
//! without recreating K8s resources.
//!
//! Grounded on `StatusHandler.cpp`: 4-space-indented JSON under a
//! `server_list` key, file mode checked/enforced as exactly 0640.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::errors::{CoordinatorError, Feature, Module, Result};

const FILE_MODE: u32 = 0o640;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSaveStatus {
    pub replicas: u32,
    pub namespace: String,
    pub server_name: String,
    pub server_type: String,
    pub use_service: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StatusDocument {
    server_list: Vec<ServerSaveStatus>,
}

pub struct StatusHandler {
    path: PathBuf,
    max_servers: usize,
    lock: Mutex<()>,
}

impl StatusHandler {
    pub fn new(path: PathBuf, max_servers: usize) -> Self {
        Self {
            path,
            max_servers,
            lock: Mutex::new(()),
        }
    }

    /// Reads the status file, validating its permission bits are exactly
    /// 0640 and that it carries a `server_list` array.
    pub async fn load(&self) -> Result<Vec<ServerSaveStatus>> {
        let _guard = self.lock.lock().await;
        Self::load_from_path(&self.path)
    }

    fn load_from_path(path: &Path) -> Result<Vec<ServerSaveStatus>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode != FILE_MODE {
            return Err(CoordinatorError::InvalidParameter {
                module: Module::Controller,
                feature: Feature::StatusFile,
                message: format!("status file has mode {mode:o}, expected {FILE_MODE:o}"),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let doc: StatusDocument = serde_json::from_str(&raw)?;
        Ok(doc.server_list)
    }

    /// Appends or replaces `status` (keyed by `server_name`) and rewrites the
    /// file atomically with 4-space indentation and mode 0640.
    pub async fn save(&self, status: ServerSaveStatus) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = Self::load_from_path(&self.path).unwrap_or_default();
        entries.retain(|e| e.server_name != status.server_name);
        if entries.len() >= self.max_servers {
            return Err(CoordinatorError::ResourceExhausted {
                module: Module::Controller,
                feature: Feature::StatusFile,
                message: format!("status file already holds {} server(s)", self.max_servers),
            });
        }
        entries.push(status);
        self.write_all(&entries)
    }

    pub async fn remove(&self, server_name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = Self::load_from_path(&self.path).unwrap_or_default();
        entries.retain(|e| e.server_name != server_name);
        self.write_all(&entries)
    }

    fn write_all(&self, entries: &[ServerSaveStatus]) -> Result<()> {
        let doc = StatusDocument {
            server_list: entries.to_vec(),
        };
        let rendered = serde_json::to_string_pretty(&doc)?;
        // serde_json's pretty-printer uses 2-space indent by default; the
        // reference `.dump(4)` call is 4 spaces, so re-indent explicitly.
        let rendered = reindent_to_four_spaces(&rendered);
        std::fs::write(&self.path, rendered)?;
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(FILE_MODE))?;
        Ok(())
    }
}

fn reindent_to_four_spaces(json: &str) -> String {
    let mut out = String::with_capacity(json.len() * 2);
    for line in json.lines() {
        let indent_len = line.len() - line.trim_start_matches(' ').len();
        out.push_str(&" ".repeat(indent_len * 2));
        out.push_str(line.trim_start_matches(' '));
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips_and_is_four_space_indented() {
        let dir = std::env::temp_dir().join(format!("digs-status-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("status.json");
        let handler = StatusHandler::new(path.clone(), 2);

        handler
            .save(ServerSaveStatus {
                replicas: 1,
                namespace: "default".into(),
                server_name: "srv-a".into(),
                server_type: "mindie_cross_node".into(),
                use_service: true,
            })
            .await
            .unwrap();
        handler
            .save(ServerSaveStatus {
                replicas: 2,
                namespace: "default".into(),
                server_name: "srv-b".into(),
                server_type: "mindie_cross_node".into(),
                use_service: false,
            })
            .await
            .unwrap();

        let loaded = handler.load().await.unwrap();
        assert_eq!(loaded.len(), 2);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("    \"server_list\""));

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, FILE_MODE);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn rejects_beyond_max_servers() {
        let dir = std::env::temp_dir().join(format!("digs-status-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("status.json");
        let handler = StatusHandler::new(path.clone(), 1);

        handler
            .save(ServerSaveStatus {
                replicas: 1,
                namespace: "default".into(),
                server_name: "only".into(),
                server_type: "mindie_cross_node".into(),
                use_service: true,
            })
            .await
            .unwrap();
        let result = handler
            .save(ServerSaveStatus {
                replicas: 1,
                namespace: "default".into(),
                server_name: "second".into(),
                server_type: "mindie_cross_node".into(),
                use_service: true,
            })
            .await;
        assert!(matches!(result, Err(CoordinatorError::ResourceExhausted { .. })));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
