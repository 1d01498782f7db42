// ============================================================================
// Storage Collaborator
// ============================================================================
//
// Durable records (events, audit trail) are written through an external
// storage service. This module is the trait seam for that collaborator.
// Every tenant-record operation takes the active TenantScopeMarker and
// the implementation must enforce row-level tenant filtering against it,
// independent of what the calling code intended — the second line of
// defense when application logic has an isolation bug.

use crate::audit::AuditEvent;
use crate::scope::TenantScopeMarker;
use crate::tenant::TenantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Operation attempted against a row whose tenant does not match the
    /// active marker. Fatal for the unit of work.
    #[error("tenant isolation violation: {0}")]
    IsolationViolation(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A durable row owned by exactly one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: Uuid,
    pub tenant: TenantId,
    /// Record family, e.g. "event"
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

impl TenantRecord {
    pub fn new(tenant: TenantId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant,
            kind: kind.into(),
            payload,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persists a tenant record. Must reject the write when the marker
    /// does not cover the record's tenant.
    async fn put_record(
        &self,
        marker: &TenantScopeMarker,
        record: TenantRecord,
    ) -> Result<(), StorageError>;

    /// Fetches records of one kind, filtered to the rows the marker is
    /// allowed to see. A tenant marker returns only that tenant's rows;
    /// the unrestricted sentinel returns all of them.
    async fn fetch_records(
        &self,
        marker: &TenantScopeMarker,
        kind: &str,
    ) -> Result<Vec<TenantRecord>, StorageError>;

    /// Appends an audit event. Append-only; the gateway never mutates or
    /// deletes what it wrote.
    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StorageError>;
}

/// In-process reference implementation of the storage contract. Backs
/// local development and the integration tests; production deployments
/// wire the external storage service behind the same trait.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<Vec<TenantRecord>>,
    audit: RwLock<Vec<AuditEvent>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit trail, oldest first.
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.read().await.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_record(
        &self,
        marker: &TenantScopeMarker,
        record: TenantRecord,
    ) -> Result<(), StorageError> {
        match marker {
            TenantScopeMarker::Tenant(tenant) if *tenant != record.tenant => {
                return Err(StorageError::IsolationViolation(format!(
                    "write for tenant {} under marker {}",
                    record.tenant, marker
                )));
            }
            _ => {}
        }
        self.records.write().await.push(record);
        Ok(())
    }

    async fn fetch_records(
        &self,
        marker: &TenantScopeMarker,
        kind: &str,
    ) -> Result<Vec<TenantRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| match marker {
                TenantScopeMarker::Tenant(tenant) => r.tenant == *tenant,
                TenantScopeMarker::Unrestricted => true,
            })
            .cloned()
            .collect())
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StorageError> {
        self.audit.write().await.push(event.clone());
        Ok(())
    }
}
