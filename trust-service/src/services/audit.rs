//! Audit gateway.
//!
//! Every state-changing operation lands exactly one entry here. Writes are
//! retried with exponential backoff; if the backend stays down the failure is
//! escalated through an [`AlertSink`] and the primary operation still succeeds.

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use super::store::{AuditStore, StoreError};
use super::ServiceError;
use crate::models::{AuditAction, AuditLogEntry, AuditQuery};

/// Receives audit writes that could not be persisted.
pub trait AlertSink: Send + Sync {
    fn audit_write_failed(&self, entry: &AuditLogEntry, error: &StoreError);
}

/// Default sink: an error-level log line plus a failure counter.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn audit_write_failed(&self, entry: &AuditLogEntry, error: &StoreError) {
        metrics::counter!("audit_write_failures_total", "action" => entry.action.as_str())
            .increment(1);
        tracing::error!(
            audit_id = %entry.id,
            principal_id = %entry.principal_id,
            action = %entry.action,
            error = %error,
            "Audit entry could not be persisted"
        );
    }
}

#[derive(Clone)]
pub struct AuditGateway {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
    retry_max_elapsed: Duration,
}

impl AuditGateway {
    pub fn new(
        store: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
        retry_max_elapsed: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            alerts: Arc::new(TracingAlertSink),
            retry_max_elapsed,
        }
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Append one entry. Never fails the caller.
    pub async fn record(
        &self,
        principal_id: &str,
        action: AuditAction,
        details: impl Into<String>,
        ip_address: Option<String>,
    ) {
        let entry = AuditLogEntry::new(
            principal_id,
            action,
            details,
            ip_address,
            self.clock.now(),
        );

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(25))
            .with_max_interval(Duration::from_secs(1))
            .with_max_elapsed_time(Some(self.retry_max_elapsed))
            .build();

        let result = retry(policy, || async {
            self.store.append(entry.clone()).await.map_err(|e| {
                tracing::warn!(action = %entry.action, error = %e, "Audit write failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("audit_entries_total", "action" => entry.action.as_str())
                    .increment(1);
                tracing::debug!(
                    principal_id = %entry.principal_id,
                    action = %entry.action,
                    "Audit entry recorded"
                );
            }
            Err(e) => self.alerts.audit_write_failed(&entry, &e),
        }
    }

    /// Compliance reporting. Entries come back in append order.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, ServiceError> {
        Ok(self.store.query(query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DownStore {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AuditStore for DownStore {
        async fn append(&self, _entry: AuditLogEntry) -> Result<(), StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("audit db offline".to_string()))
        }

        async fn query(&self, _query: &AuditQuery) -> Result<Vec<AuditLogEntry>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        alerts: AtomicUsize,
    }

    impl AlertSink for CountingSink {
        fn audit_write_failed(&self, _entry: &AuditLogEntry, _error: &StoreError) {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_record_and_query_by_principal() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = AuditGateway::new(store, Arc::new(SystemClock), Duration::from_secs(1));

        gateway
            .record("alice", AuditAction::SessionCreated, "session s1", None)
            .await;
        gateway
            .record("bob", AuditAction::DocumentLocked, "doc d1", None)
            .await;

        let entries = gateway
            .query(&AuditQuery {
                principal_id: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::SessionCreated);
    }

    #[tokio::test]
    async fn test_persistent_failure_raises_alert() {
        let store = Arc::new(DownStore {
            attempts: AtomicUsize::new(0),
        });
        let sink = Arc::new(CountingSink::default());
        let gateway = AuditGateway::new(
            store.clone(),
            Arc::new(SystemClock),
            Duration::from_millis(100),
        )
        .with_alert_sink(sink.clone());

        gateway
            .record("alice", AuditAction::RoleAssigned, "role=admin", None)
            .await;

        assert_eq!(sink.alerts.load(Ordering::SeqCst), 1);
        assert!(store.attempts.load(Ordering::SeqCst) >= 2);
    }
}
