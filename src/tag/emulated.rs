//! File-backed tag reader
//!
//! A "field" directory stands in for the space in front of the reader: every
//! `*.json` file in it is one tag in range. Dropping a file in presents the
//! tag, deleting it takes the tag away.

use super::{DetectedTag, NdefMessage, NdefStatus, SessionFailure, TagReader, TagSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const TAG_EXTENSION: &str = "json";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    NotSupported,
    ReadWrite,
    ReadOnly,
    #[serde(other)]
    Unrecognized,
}

impl From<FieldStatus> for NdefStatus {
    fn from(status: FieldStatus) -> Self {
        match status {
            FieldStatus::NotSupported => NdefStatus::NotSupported,
            FieldStatus::ReadWrite => NdefStatus::ReadWrite,
            FieldStatus::ReadOnly => NdefStatus::ReadOnly,
            FieldStatus::Unrecognized => NdefStatus::Other(0),
        }
    }
}

/// Contents of one tag file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedTag {
    pub status: FieldStatus,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Raw NDEF message bytes
    #[serde(default)]
    pub message: Vec<u8>,
}

fn default_capacity() -> usize {
    504
}

impl EmulatedTag {
    pub fn new(status: FieldStatus, capacity: usize) -> Self {
        Self {
            status,
            capacity,
            message: Vec::new(),
        }
    }

    /// Identifier stored on the tag, if it carries a text record
    pub fn text(&self) -> Option<String> {
        NdefMessage::decode(&self.message).ok()?.first_text()
    }
}

pub struct EmulatedReader {
    field_dir: PathBuf,
    timeout: Duration,
}

impl EmulatedReader {
    pub fn new(field_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            field_dir: field_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TagReader for EmulatedReader {
    async fn begin(&self, alert_message: &str) -> Result<Box<dyn TagSession>, SessionFailure> {
        tokio::fs::create_dir_all(&self.field_dir)
            .await
            .map_err(|e| {
                SessionFailure(format!(
                    "Cannot open tag field {}: {}",
                    self.field_dir.display(),
                    e
                ))
            })?;

        tracing::info!("{}", alert_message);
        Ok(Box::new(EmulatedSession {
            field_dir: self.field_dir.clone(),
            deadline: Instant::now() + self.timeout,
            invalidated: false,
        }))
    }
}

struct EmulatedSession {
    field_dir: PathBuf,
    deadline: Instant,
    invalidated: bool,
}

impl EmulatedSession {
    fn tag_path(&self, tag: &DetectedTag) -> PathBuf {
        tag_file(&self.field_dir, &tag.handle)
    }

    async fn load(&self, tag: &DetectedTag) -> Result<EmulatedTag, SessionFailure> {
        let contents = tokio::fs::read_to_string(self.tag_path(tag))
            .await
            .map_err(|_| SessionFailure("Tag connection lost".to_string()))?;
        serde_json::from_str(&contents)
            .map_err(|e| SessionFailure(format!("Unreadable tag {}: {}", tag.handle, e)))
    }

    fn ensure_open(&self) -> Result<(), SessionFailure> {
        if self.invalidated {
            return Err(SessionFailure("Session invalidated".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TagSession for EmulatedSession {
    fn set_alert_message(&mut self, message: &str) {
        tracing::info!("{}", message);
    }

    async fn detect(&mut self) -> Result<Vec<DetectedTag>, SessionFailure> {
        loop {
            self.ensure_open()?;

            // The deadline holds while tags stay in range too
            if Instant::now() >= self.deadline {
                self.invalidated = true;
                return Err(SessionFailure("Session timeout".to_string()));
            }

            let handles = tag_names(&self.field_dir)
                .await
                .map_err(|e| SessionFailure(format!("{:#}", e)))?;
            if !handles.is_empty() {
                return Ok(handles
                    .into_iter()
                    .map(|handle| DetectedTag { handle })
                    .collect());
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn restart_polling(&mut self) {
        tracing::debug!("Restarting tag polling");
    }

    async fn connect(&mut self, tag: &DetectedTag) -> Result<(), SessionFailure> {
        self.ensure_open()?;
        self.load(tag).await.map(|_| ())
    }

    async fn query_status(
        &mut self,
        tag: &DetectedTag,
    ) -> Result<(NdefStatus, usize), SessionFailure> {
        self.ensure_open()?;
        let emulated = self.load(tag).await?;
        Ok((emulated.status.into(), emulated.capacity))
    }

    async fn write(&mut self, tag: &DetectedTag, message: &NdefMessage) -> Result<(), SessionFailure> {
        self.ensure_open()?;
        let mut emulated = self.load(tag).await?;
        if emulated.status != FieldStatus::ReadWrite {
            return Err(SessionFailure("Tag is not writable".to_string()));
        }

        emulated.message = message
            .encode()
            .map_err(|e| SessionFailure(format!("Cannot encode message: {}", e)))?;
        let contents = serde_json::to_string_pretty(&emulated)
            .map_err(|e| SessionFailure(e.to_string()))?;
        tokio::fs::write(self.tag_path(tag), contents)
            .await
            .map_err(|e| SessionFailure(format!("Write failed: {}", e)))
    }

    async fn invalidate(&mut self, error_message: Option<&str>) {
        if let Some(message) = error_message {
            tracing::warn!("Scan session ended: {}", message);
        }
        self.invalidated = true;
    }
}

fn tag_file(field_dir: &Path, name: &str) -> PathBuf {
    field_dir.join(format!("{}.{}", name, TAG_EXTENSION))
}

/// Names of the tags currently in the field, sorted
pub async fn tag_names(field_dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(field_dir)
        .await
        .with_context(|| format!("Failed to read tag field {:?}", field_dir))?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TAG_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Place a blank tag in the field
pub fn add_tag(field_dir: &Path, name: &str, tag: &EmulatedTag) -> Result<PathBuf> {
    std::fs::create_dir_all(field_dir)
        .with_context(|| format!("Failed to create tag field {:?}", field_dir))?;

    let path = tag_file(field_dir, name);
    let contents = serde_json::to_string_pretty(tag).context("Failed to serialize tag")?;
    std::fs::write(&path, contents).with_context(|| format!("Failed to write tag {:?}", path))?;
    Ok(path)
}

/// Take a tag out of the field. Returns false when it was not there.
pub fn remove_tag(field_dir: &Path, name: &str) -> Result<bool> {
    let path = tag_file(field_dir, name);
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path).with_context(|| format!("Failed to remove tag {:?}", path))?;
    Ok(true)
}

pub fn read_tag(field_dir: &Path, name: &str) -> Result<EmulatedTag> {
    let path = tag_file(field_dir, name);
    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read tag {:?}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse tag {:?}", path))
}
