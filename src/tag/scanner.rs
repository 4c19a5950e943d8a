use super::ndef::NdefError;
use super::{DetectedTag, NdefMessage, NdefStatus, TagReader, TagSession};
use crate::error::{ScanError, ScanResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

pub const SCAN_PROMPT: &str = "Hold your tag near the reader";
pub const MULTIPLE_TAGS_PROMPT: &str = "More than one tag detected, please try again.";
const CONNECTED_PROMPT: &str = "Tag detected!";

/// Delay before polling again after several tags were in range at once
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Resolves the identifier of exactly one tag per scan.
///
/// A tag that is writable but not yet known gets a fresh identifier written
/// to it as a text record. A known identifier is trusted as is.
#[derive(Clone)]
pub struct Scanner {
    reader: Arc<dyn TagReader>,
    retry_interval: Duration,
}

impl Scanner {
    pub fn new(reader: Arc<dyn TagReader>) -> Self {
        Self {
            reader,
            retry_interval: RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Run one scan session. Resolves exactly once and always invalidates
    /// the session before returning.
    pub async fn scan(&self, known_id: Option<&str>) -> ScanResult {
        tracing::debug!("scan: known id = {:?}", known_id);

        let mut session = self
            .reader
            .begin(SCAN_PROMPT)
            .await
            .map_err(|e| ScanError::SessionError(format!("Unable to start scan session: {}", e)))?;

        let result = self.resolve(session.as_mut(), known_id).await;

        match &result {
            Ok(id) => {
                tracing::info!("Scan resolved tag {}", id);
                session.invalidate(None).await;
            }
            Err(e) => {
                tracing::warn!("Scan failed: {}", e);
                session.invalidate(Some(e.alert_message())).await;
            }
        }

        result
    }

    /// Scan on a background task; the receiver yields the single result
    pub fn spawn_scan(&self, known_id: Option<String>) -> oneshot::Receiver<ScanResult> {
        let (tx, rx) = oneshot::channel();
        let scanner = self.clone();
        tokio::spawn(async move {
            let result = scanner.scan(known_id.as_deref()).await;
            let _ = tx.send(result);
        });
        rx
    }

    async fn resolve(&self, session: &mut dyn TagSession, known_id: Option<&str>) -> ScanResult {
        let tag = self.wait_for_single_tag(session).await?;

        session
            .connect(&tag)
            .await
            .map_err(|e| ScanError::SessionError(format!("Unable to connect to tag: {}", e)))?;

        let (status, capacity) = session
            .query_status(&tag)
            .await
            .map_err(|e| ScanError::SessionError(format!("Error querying NDEF status: {}", e)))?;

        tracing::debug!("Tag {} status {:?}, capacity {}", tag.handle, status, capacity);

        match status {
            NdefStatus::NotSupported => Err(ScanError::NotSupported),
            NdefStatus::ReadOnly => Err(ScanError::ReadOnly),
            NdefStatus::Other(_) => Err(ScanError::Unknown),
            NdefStatus::ReadWrite => {
                session.set_alert_message(CONNECTED_PROMPT);
                match known_id.filter(|id| !id.is_empty()) {
                    Some(id) => Ok(id.to_string()),
                    None => {
                        let new_id = Uuid::new_v4().to_string().to_uppercase();
                        write_identifier(session, &tag, capacity, &new_id).await?;
                        Ok(new_id)
                    }
                }
            }
        }
    }

    async fn wait_for_single_tag(&self, session: &mut dyn TagSession) -> Result<DetectedTag, ScanError> {
        loop {
            let mut tags = session
                .detect()
                .await
                .map_err(|e| ScanError::SessionError(e.to_string()))?;

            if tags.len() == 1 {
                return Ok(tags.remove(0));
            }

            if tags.len() > 1 {
                tracing::debug!("{} tags in range, restarting polling", tags.len());
                session.set_alert_message(MULTIPLE_TAGS_PROMPT);
            }
            tokio::time::sleep(self.retry_interval).await;
            session.restart_polling().await;
        }
    }
}

async fn write_identifier(
    session: &mut dyn TagSession,
    tag: &DetectedTag,
    capacity: usize,
    id: &str,
) -> Result<(), ScanError> {
    let invalid = |e: NdefError| ScanError::InvalidPayload(e.to_string());
    let message = NdefMessage::text(id).map_err(invalid)?;
    let size = message.encode().map_err(invalid)?.len();
    if size > capacity {
        return Err(ScanError::WriteError(format!(
            "message needs {} bytes, tag holds {}",
            size, capacity
        )));
    }

    session
        .write(tag, &message)
        .await
        .map_err(|e| ScanError::WriteError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::SessionFailure;
    use crate::testing::{ScriptedReader, tags};

    fn scanner(reader: &ScriptedReader) -> Scanner {
        Scanner::new(Arc::new(reader.clone())).with_retry_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_new_tag_gets_identifier_written() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);

        let id = scanner(&reader).scan(None).await.unwrap();

        let log = reader.log();
        assert_eq!(log.writes.len(), 1);
        assert_eq!(log.writes[0].first_text(), Some(id.clone()));
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(log.invalidations, vec![None]);
    }

    #[tokio::test]
    async fn test_empty_known_id_counts_as_new_tag() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);
        scanner(&reader).scan(Some("")).await.unwrap();
        assert_eq!(reader.log().writes.len(), 1);
    }

    #[tokio::test]
    async fn test_known_id_is_trusted_without_writing() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);

        let id = scanner(&reader).scan(Some("abc123")).await.unwrap();

        assert_eq!(id, "abc123");
        assert!(reader.log().writes.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_tags_restart_until_one_remains() {
        let reader =
            ScriptedReader::with_detections(vec![Ok(tags(2)), Ok(tags(3)), Ok(tags(1))]);

        let id = scanner(&reader).scan(Some("abc123")).await.unwrap();

        assert_eq!(id, "abc123");
        let log = reader.log();
        assert_eq!(log.restarts, 2);
        assert_eq!(
            log.alerts
                .iter()
                .filter(|a| a.as_str() == MULTIPLE_TAGS_PROMPT)
                .count(),
            2
        );
        assert_eq!(log.connects, 1);
    }

    #[tokio::test]
    async fn test_multiple_tags_never_resolve_before_timeout() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(2)), Ok(tags(2))]);

        let err = scanner(&reader).scan(None).await.unwrap_err();

        assert!(matches!(err, ScanError::SessionError(_)));
        let log = reader.log();
        assert_eq!(log.connects, 0);
        assert!(log.writes.is_empty());
        assert_eq!(log.invalidations.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_never_succeeds() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);
        reader.script(|s| s.write_error = Some(SessionFailure("tag moved".into())));

        let err = scanner(&reader).scan(None).await.unwrap_err();

        assert_eq!(err, ScanError::WriteError("tag moved".into()));
        assert_eq!(
            reader.log().invalidations,
            vec![Some("Failed to write NDEF message".to_string())]
        );
    }

    #[tokio::test]
    async fn test_too_small_tag_is_a_write_error() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);
        reader.script(|s| s.status = Ok((NdefStatus::ReadWrite, 16)));

        let err = scanner(&reader).scan(None).await.unwrap_err();

        assert!(matches!(err, ScanError::WriteError(_)));
        assert!(reader.log().writes.is_empty());
    }

    #[tokio::test]
    async fn test_identifier_too_long_for_text_record() {
        let reader = ScriptedReader::default();
        let mut session = reader.begin(SCAN_PROMPT).await.unwrap();
        let tag = tags(1).remove(0);

        let err = write_identifier(session.as_mut(), &tag, 4096, &"A".repeat(300))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ScanError::InvalidPayload(NdefError::PayloadTooLong(303).to_string())
        );
        assert!(reader.log().writes.is_empty());
    }

    #[tokio::test]
    async fn test_capability_errors() {
        let cases = [
            (NdefStatus::NotSupported, ScanError::NotSupported),
            (NdefStatus::ReadOnly, ScanError::ReadOnly),
            (NdefStatus::Other(9), ScanError::Unknown),
        ];

        for (status, expected) in cases {
            let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);
            reader.script(|s| s.status = Ok((status, 512)));

            let err = scanner(&reader).scan(Some("abc123")).await.unwrap_err();

            assert_eq!(err, expected);
            let log = reader.log();
            assert!(log.writes.is_empty());
            assert_eq!(log.invalidations.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_session_level_failures() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);
        reader.script(|s| s.connect_error = Some(SessionFailure("out of range".into())));
        let err = scanner(&reader).scan(None).await.unwrap_err();
        assert_eq!(
            err,
            ScanError::SessionError("Unable to connect to tag: out of range".into())
        );
        assert_eq!(
            reader.log().invalidations,
            vec![Some("Unable to connect to tag: out of range".to_string())]
        );

        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);
        reader.script(|s| s.status = Err(SessionFailure("no answer".into())));
        let err = scanner(&reader).scan(None).await.unwrap_err();
        assert_eq!(
            err,
            ScanError::SessionError("Error querying NDEF status: no answer".into())
        );
        assert_eq!(
            reader.log().invalidations,
            vec![Some("Error querying NDEF status: no answer".to_string())]
        );

        let reader = ScriptedReader::with_detections(vec![Err(SessionFailure(
            "Session invalidated by user".into(),
        ))]);
        let err = scanner(&reader).scan(None).await.unwrap_err();
        assert_eq!(
            err,
            ScanError::SessionError("Session invalidated by user".into())
        );
    }

    #[tokio::test]
    async fn test_spawned_scan_resolves_once() {
        let reader = ScriptedReader::with_detections(vec![Ok(tags(1))]);

        let rx = scanner(&reader).spawn_scan(Some("abc123".into()));

        assert_eq!(rx.await.unwrap(), Ok("abc123".to_string()));
        assert_eq!(reader.log().sessions, 1);
    }
}
