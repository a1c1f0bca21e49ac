use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Drains the audit channel into an [`AuditStore`].
///
/// Insert failures are logged and the event is lost; the writer never stops
/// early. It exits once every [`AuditHandle`] is dropped.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Write events until the channel closes. Returns how many were stored.
    pub async fn run(mut self) -> usize {
        info!("Audit writer started");
        let mut written = 0;

        while let Some(envelope) = self.rx.recv().await {
            let record = envelope.into_record();
            match self.store.insert(&record) {
                Ok(_) => written += 1,
                Err(e) => error!("Failed to write {} audit event: {}", record.event_type, e),
            }
        }

        info!("Audit writer stopped after {} events", written);
        written
    }
}

impl AuditEventEnvelope {
    /// Unsaved record for the event, its index columns derived from the payload.
    fn into_record(self) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp: self.timestamp,
            event_type: self.event.event_type().to_string(),
            deposit_id: self.event.deposit_id().map(String::from),
            user_id: self.event.user_id().map(String::from),
            data: self.event,
        }
    }
}

/// Create a handle/writer pair sharing a channel of `buffer_size` events
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter, SqliteAuditStore};

    /// Store that rejects every insert.
    struct RejectingStore;

    impl AuditStore for RejectingStore {
        fn insert(&self, _record: &AuditRecord) -> Result<i64, AuditError> {
            Err(AuditError::Corrupt {
                id: 0,
                reason: "read-only".to_string(),
            })
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(0)
        }
    }

    fn job_started(deposit_id: &str) -> AuditEvent {
        AuditEvent::JobStarted {
            deposit_id: deposit_id.to_string(),
            job_id: "j-1".to_string(),
            job_class: "ParseBagJob".to_string(),
        }
    }

    fn oldest_first(store: &SqliteAuditStore) -> Vec<AuditRecord> {
        let mut records = store.query(&AuditFilter::new()).unwrap();
        records.reverse();
        records
    }

    #[tokio::test]
    async fn test_writer_extracts_deposit_and_user_ids() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(store.clone(), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::DepositRegistered {
                deposit_id: "d-123".to_string(),
                registered_by: Some("depositor".to_string()),
                fields: vec!["depositorName".to_string()],
            })
            .await;
        drop(handle);
        assert_eq!(writer_handle.await.unwrap(), 1);

        let records = oldest_first(&store);
        assert_eq!(records[0].event_type, "deposit_registered");
        assert_eq!(records[0].deposit_id.as_deref(), Some("d-123"));
        assert_eq!(records[0].user_id.as_deref(), Some("depositor"));
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let (handle, writer) = create_audit_system(Arc::new(RejectingStore), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle.emit(job_started("d-1")).await;
        handle.emit(job_started("d-2")).await;
        drop(handle);

        assert_eq!(writer_handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (main_handle, writer) = create_audit_system(store.clone(), 10);
        let coordinator_handle = main_handle.clone();
        let writer_handle = tokio::spawn(writer.run());

        coordinator_handle.emit(job_started("d-1")).await;
        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;

        drop(main_handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer_handle.is_finished());

        drop(coordinator_handle);
        let written = tokio::time::timeout(Duration::from_secs(1), writer_handle)
            .await
            .expect("writer should exit once every handle is dropped")
            .unwrap();
        assert_eq!(written, 2);

        let records = oldest_first(&store);
        assert_eq!(records[0].event_type, "job_started");
        assert_eq!(records[1].event_type, "service_stopped");
    }
}
