//! Tag → recording mapping
//!
//! Records live in memory and every mutation is written through to a JSON
//! file before the call returns. The file is replaced atomically so a crash
//! mid-write leaves the previous contents intact.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub tag_id: String,
    pub audio_filename: String,
}

#[derive(Debug)]
enum Backing {
    File(PathBuf),
    Memory,
}

#[derive(Debug)]
pub struct RecordStore {
    records: Vec<TagRecord>,
    backing: Backing,
}

impl RecordStore {
    /// Open the store at `path`, starting empty when the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::LoadFailed(format!("{}: {}", path.display(), e)))?;
            let loaded: Vec<TagRecord> = serde_json::from_str(&contents)
                .map_err(|e| StoreError::LoadFailed(format!("{}: {}", path.display(), e)))?;
            dedup_by_tag(loaded)
        } else {
            Vec::new()
        };

        tracing::info!("Loaded {} record(s) from {:?}", records.len(), path);
        Ok(Self {
            records,
            backing: Backing::File(path),
        })
    }

    /// A store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            records: Vec::new(),
            backing: Backing::Memory,
        }
    }

    /// Replace whatever record `tag_id` had with a new one
    pub fn upsert(&mut self, tag_id: &str, audio_filename: &str) -> Result<(), StoreError> {
        self.records.retain(|r| r.tag_id != tag_id);
        self.records.push(TagRecord {
            tag_id: tag_id.to_string(),
            audio_filename: audio_filename.to_string(),
        });
        tracing::debug!("Upserted {} -> {}", tag_id, audio_filename);
        self.commit()
    }

    pub fn find(&self, tag_id: &str) -> Option<&TagRecord> {
        self.records.iter().find(|r| r.tag_id == tag_id)
    }

    /// Remove the record for `tag_id`. Missing records are not an error.
    pub fn delete(&mut self, tag_id: &str) -> Result<(), StoreError> {
        let before = self.records.len();
        self.records.retain(|r| r.tag_id != tag_id);
        if self.records.len() == before {
            return Ok(());
        }
        tracing::debug!("Deleted record for {}", tag_id);
        self.commit()
    }

    /// All records ordered by tag id
    pub fn records(&self) -> Vec<TagRecord> {
        let mut records = self.records.clone();
        records.sort_by(|a, b| a.tag_id.cmp(&b.tag_id));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn commit(&self) -> Result<(), StoreError> {
        match &self.backing {
            Backing::Memory => Ok(()),
            Backing::File(path) => write_atomically(path, &self.records)
                .map_err(|e| StoreError::PersistFailed(format!("{}: {}", path.display(), e))),
        }
    }
}

fn write_atomically(path: &Path, records: &[TagRecord]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let contents = serde_json::to_vec_pretty(records)?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(&contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Keep the last record seen for each tag id
fn dedup_by_tag(records: Vec<TagRecord>) -> Vec<TagRecord> {
    let mut unique: Vec<TagRecord> = Vec::with_capacity(records.len());
    for record in records {
        unique.retain(|r| r.tag_id != record.tag_id);
        unique.push(record);
    }
    unique
}
