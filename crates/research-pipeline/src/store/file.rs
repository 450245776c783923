//! JSON-file state store
//!
//! ```text
//! {dir}/
//! ├── {research_id}.json
//! └── {research_id}.json.tmp   (only while a write is in flight)
//! ```

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StateStore;
use crate::error::PipelineError;
use crate::research::ResearchState;

/// One pretty-printed JSON file per research id, written via temp file + rename
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, research_id: &str) -> Result<PathBuf, PipelineError> {
        let valid = !research_id.is_empty()
            && research_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PipelineError::store(format!(
                "invalid research id '{}'",
                research_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", research_id)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, research_id: &str) -> Result<Option<ResearchState>, PipelineError> {
        let path = self.path_for(research_id)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::store(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let state = serde_json::from_slice(&data)?;
        Ok(Some(state))
    }

    async fn set(&self, research_id: &str, state: &ResearchState) -> Result<(), PipelineError> {
        let path = self.path_for(research_id)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::store(format!("Failed to create directory: {}", e)))?;

        let json = serde_json::to_vec_pretty(state)?;
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| PipelineError::store(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&json)
            .await
            .map_err(|e| PipelineError::store(format!("Failed to write data: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| PipelineError::store(format!("Failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| PipelineError::store(format!("Failed to rename file: {}", e)))
    }

    async fn delete(&self, research_id: &str) -> Result<bool, PipelineError> {
        let path = self.path_for(research_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PipelineError::store(format!("Failed to delete: {}", e))),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>, PipelineError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PipelineError::store(format!(
                    "Failed to read directory: {}",
                    e
                )))
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::store(format!("Failed to read entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
