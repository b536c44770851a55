//! Append-only audit trail writer.
//!
//! Entries are written inline so tests and operators see them as soon as the
//! request completes. A failed write is logged and never fails the request.

use std::sync::Arc;

use crate::models::AuditLog;
use crate::store::Store;

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn Store>,
}

impl AuditService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: AuditLog) {
        if let Err(e) = self.store.append_audit(&entry).await {
            tracing::warn!(
                error = %e,
                action = %entry.action,
                resource_type = %entry.resource_type,
                "Failed to write audit entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_record_appends() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());
        let user = Uuid::new_v4();

        audit
            .record(AuditLog::new(AuditAction::UserLogin, "user").user(user))
            .await;

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is(AuditAction::UserLogin));
        assert_eq!(entries[0].user_id, Some(user));
    }
}
