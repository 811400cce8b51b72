//! Lead ingestion: accept an inbound lead and announce it to the team.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadpulse_core::error::{LeadPulseError, Result};
use leadpulse_core::traits::LeadStore;
use leadpulse_core::types::{Lead, LeadDraft};

use crate::events::EventNotifier;

pub struct LeadIngestor {
    store: Arc<dyn LeadStore>,
    notifier: Arc<EventNotifier>,
}

impl LeadIngestor {
    pub fn new(store: Arc<dyn LeadStore>, notifier: Arc<EventNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Accept a lead for `tenant_id`.
    ///
    /// The caller's credential is checked against the tenant's API key. Once
    /// the lead is stored the call succeeds: a failed announcement is only
    /// logged.
    pub async fn ingest(
        &self,
        tenant_id: &str,
        credential: Option<&str>,
        draft: LeadDraft,
        now: DateTime<Utc>,
    ) -> Result<Lead> {
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| LeadPulseError::NotFound(format!("tenant {tenant_id}")))?;
        if !tenant.accepts_credential(credential) {
            tracing::warn!("🚫 Rejected lead for tenant {}: bad credential", tenant_id);
            return Err(LeadPulseError::Unauthorized(format!("invalid API key for tenant {tenant_id}")));
        }

        let lead = draft.into_lead(&tenant.id, now)?;
        self.store.insert_lead(&lead).await?;
        tracing::info!("📥 Lead {} stored for tenant {}", lead.id, tenant.id);

        if let Err(e) = self.notifier.on_created(&lead, now).await {
            tracing::warn!("⚠️ New-lead notification failed for {}: {e}", lead.id);
        }
        Ok(lead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, MemoryGateway};
    use crate::format::MessageFormatter;
    use crate::store::MemoryStore;
    use leadpulse_core::config::FormatConfig;
    use leadpulse_core::types::{LeadStatus, Member, Role, Tenant};
    use std::time::Duration;

    async fn fixture() -> (Arc<MemoryStore>, Arc<MemoryGateway>, LeadIngestor) {
        let store = Arc::new(MemoryStore::new());
        let mut tenant = Tenant::new("t1", "Acme");
        tenant.api_key = Some("k-123".into());
        store.upsert_tenant(&tenant).await.unwrap();
        store
            .upsert_member(&Member::new("owner", "t1", Role::Owner).with_channel("C1"))
            .await
            .unwrap();

        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = Arc::new(Dispatcher::new(gateway.clone(), Duration::from_secs(1)));
        let formatter = Arc::new(MessageFormatter::new(&FormatConfig::default()));
        let notifier = Arc::new(EventNotifier::new(store.clone(), dispatcher, formatter));
        (store.clone(), gateway, LeadIngestor::new(store, notifier))
    }

    fn draft() -> LeadDraft {
        LeadDraft {
            name: Some(" Olena ".into()),
            phone: Some("+380501112233".into()),
            source: Some("landing".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_stores_and_announces() {
        let (store, gateway, ingestor) = fixture().await;
        let lead = ingestor.ingest("t1", Some("k-123"), draft(), Utc::now()).await.unwrap();

        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.name.as_deref(), Some("Olena"));
        assert_eq!(store.list_leads("t1").await.unwrap().len(), 1);
        let sent = gateway.sent_to("C1");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("📋 Source: landing"));
    }

    #[tokio::test]
    async fn test_ingest_rejections() {
        let (store, gateway, ingestor) = fixture().await;

        let err = ingestor.ingest("t1", Some("wrong"), draft(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, LeadPulseError::Unauthorized(_)));

        let err = ingestor.ingest("t9", None, draft(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, LeadPulseError::NotFound(_)));

        let no_contact = LeadDraft { name: Some("Anon".into()), ..Default::default() };
        let err = ingestor.ingest("t1", Some("k-123"), no_contact, Utc::now()).await.unwrap_err();
        assert!(matches!(err, LeadPulseError::Validation(_)));

        assert!(store.list_leads("t1").await.unwrap().is_empty());
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_still_accepts_lead() {
        let (store, gateway, ingestor) = fixture().await;
        gateway.fail_for("C1");

        let lead = ingestor.ingest("t1", Some("k-123"), draft(), Utc::now()).await;
        assert!(lead.is_ok());
        assert_eq!(store.list_leads("t1").await.unwrap().len(), 1);
    }
}
