//! Event notifier: reacts to lead creation and field changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadpulse_core::error::{LeadPulseError, Result};
use leadpulse_core::traits::LeadStore;
use leadpulse_core::types::{Lead, LeadStatus, Tenant};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::format::{MessageFormatter, Payload};

/// A storage mutation observed on a lead.
#[derive(Debug, Clone)]
pub enum LeadEvent {
    Created { lead: Lead },
    Updated { before: Lead, after: Lead },
}

/// A notification-worthy difference between two lead snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadChange {
    Status { from: LeadStatus, to: LeadStatus },
    Assigned { member_id: String },
}

/// Status and assignment changes, in that order. Clearing the assignee is not
/// a change worth notifying.
pub fn diff(before: &Lead, after: &Lead) -> Vec<LeadChange> {
    let mut changes = Vec::new();
    if before.status != after.status {
        changes.push(LeadChange::Status { from: before.status, to: after.status });
    }
    if let Some(assignee) = after.assignee() {
        if before.assignee() != Some(assignee) {
            changes.push(LeadChange::Assigned { member_id: assignee.to_string() });
        }
    }
    changes
}

pub struct EventNotifier {
    store: Arc<dyn LeadStore>,
    dispatcher: Arc<Dispatcher>,
    formatter: Arc<MessageFormatter>,
}

impl EventNotifier {
    pub fn new(store: Arc<dyn LeadStore>, dispatcher: Arc<Dispatcher>, formatter: Arc<MessageFormatter>) -> Self {
        Self { store, dispatcher, formatter }
    }

    pub async fn handle(&self, event: &LeadEvent, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        match event {
            LeadEvent::Created { lead } => self.on_created(lead, now).await,
            LeadEvent::Updated { before, after } => self.on_updated(before, after, now).await,
        }
    }

    /// New-lead notification to owners and managers.
    pub async fn on_created(&self, lead: &Lead, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let tenant = self.tenant(&lead.tenant_id).await?;
        let members = self.store.list_members(&tenant.id).await?;
        let local = tenant.local_time(now);

        let message = self.formatter.render(&Payload::NewLead { lead });
        let outcome = self.dispatcher.notify(&members, Some(lead), &local, &message).await;
        tracing::info!(
            "🆕 New lead {} in tenant {}: {} sent, {} suppressed, {} failed",
            lead.id,
            tenant.id,
            outcome.sent,
            outcome.suppressed,
            outcome.failed
        );
        Ok(outcome)
    }

    /// Status-change and assignment notifications. Both fire when both change.
    pub async fn on_updated(&self, before: &Lead, after: &Lead, now: DateTime<Utc>) -> Result<DispatchOutcome> {
        let changes = diff(before, after);
        if changes.is_empty() {
            return Ok(DispatchOutcome::default());
        }

        let tenant = self.tenant(&after.tenant_id).await?;
        let members = self.store.list_members(&tenant.id).await?;
        let local = tenant.local_time(now);

        let mut total = DispatchOutcome::default();
        for change in changes {
            let payload = match &change {
                LeadChange::Status { from, to } => Payload::StatusChange {
                    lead: after,
                    from: tenant.status_label(*from),
                    to: tenant.status_label(*to),
                },
                LeadChange::Assigned { .. } => Payload::Assignment { lead: after },
            };
            let message = self.formatter.render(&payload);
            let outcome = self.dispatcher.notify(&members, Some(after), &local, &message).await;
            tracing::info!(
                "🔄 {} for lead {} in tenant {}: {} sent, {} suppressed, {} failed",
                message.category,
                after.id,
                tenant.id,
                outcome.sent,
                outcome.suppressed,
                outcome.failed
            );
            total.merge(outcome);
        }
        Ok(total)
    }

    async fn tenant(&self, tenant_id: &str) -> Result<Tenant> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| LeadPulseError::NotFound(format!("tenant {tenant_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MemoryGateway;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use leadpulse_core::config::FormatConfig;
    use leadpulse_core::types::{Category, Member, Role};
    use std::time::Duration;

    fn lead() -> Lead {
        let mut lead = Lead::new("l1", "t1", Utc::now());
        lead.phone = Some("+380501112233".into());
        lead
    }

    #[test]
    fn test_diff_detects_changes() {
        let before = lead();
        let mut after = before.clone();
        assert!(diff(&before, &after).is_empty());

        after.status = LeadStatus::Contacted;
        after.assigned_to = Some("agent".into());
        assert_eq!(
            diff(&before, &after),
            vec![
                LeadChange::Status { from: LeadStatus::New, to: LeadStatus::Contacted },
                LeadChange::Assigned { member_id: "agent".into() },
            ]
        );
    }

    #[test]
    fn test_diff_ignores_unassign_and_same_assignee() {
        let mut before = lead();
        before.assigned_to = Some("agent".into());
        let mut after = before.clone();
        assert!(diff(&before, &after).is_empty());

        after.assigned_to = None;
        assert!(diff(&before, &after).is_empty());
    }

    async fn fixture() -> (Arc<MemoryStore>, Arc<MemoryGateway>, EventNotifier) {
        let store = Arc::new(MemoryStore::new());
        let mut tenant = Tenant::new("t1", "Acme");
        tenant.status_labels.insert("contacted".into(), "Called back".into());
        store.upsert_tenant(&tenant).await.unwrap();
        for member in [
            Member::new("owner", "t1", Role::Owner).with_channel("C1"),
            Member::new("manager", "t1", Role::Manager).with_channel("C2"),
            Member::new("agent", "t1", Role::Other).with_channel("C3"),
        ] {
            store.upsert_member(&member).await.unwrap();
        }

        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = Arc::new(Dispatcher::new(gateway.clone(), Duration::from_secs(1)));
        let formatter = Arc::new(MessageFormatter::new(&FormatConfig::default()));
        (store.clone(), gateway, EventNotifier::new(store, dispatcher, formatter))
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_created_goes_to_owner_and_manager() {
        let (_, gateway, notifier) = fixture().await;
        let outcome = notifier.handle(&LeadEvent::Created { lead: lead() }, noon()).await.unwrap();
        assert_eq!(outcome.sent, 2);
        assert!(gateway.sent_to("C3").is_empty());
    }

    #[tokio::test]
    async fn test_status_and_assignment_are_separate_dispatches() {
        let (_, gateway, notifier) = fixture().await;
        let before = lead();
        let mut after = before.clone();
        after.status = LeadStatus::Contacted;
        after.assigned_to = Some("agent".into());

        let outcome = notifier.on_updated(&before, &after, noon()).await.unwrap();

        assert_eq!(outcome.sent, 2);
        let to_agent = gateway.sent_to("C3");
        assert_eq!(to_agent.len(), 2);
        assert!(to_agent[0].text.contains("New → <b>Called back</b>"));
        assert!(to_agent[1].text.contains("You were assigned"));
        assert!(gateway.sent_to("C1").is_empty());
    }

    #[tokio::test]
    async fn test_unassigned_status_change_goes_to_managers() {
        let (_, gateway, notifier) = fixture().await;
        let before = lead();
        let mut after = before.clone();
        after.status = LeadStatus::Paid;

        notifier.on_updated(&before, &after, noon()).await.unwrap();
        assert_eq!(gateway.sent_to("C1").len(), 1);
        assert_eq!(gateway.sent_to("C2").len(), 1);
        assert!(gateway.sent_to("C3").is_empty());
    }

    #[tokio::test]
    async fn test_no_change_sends_nothing() {
        let (_, gateway, notifier) = fixture().await;
        let before = lead();
        let mut after = before.clone();
        after.notes = Some("called twice".into());

        let outcome = notifier.on_updated(&before, &after, noon()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::default());
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_assignment_respects_opt_out() {
        let (store, gateway, notifier) = fixture().await;
        store
            .upsert_member(
                &Member::new("agent", "t1", Role::Other)
                    .with_channel("C3")
                    .with_toggle(Category::Assignment, false),
            )
            .await
            .unwrap();
        let before = lead();
        let mut after = before.clone();
        after.assigned_to = Some("agent".into());

        let outcome = notifier.on_updated(&before, &after, noon()).await.unwrap();
        assert_eq!(outcome.suppressed, 1);
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_not_found() {
        let (_, _, notifier) = fixture().await;
        let mut stray = lead();
        stray.tenant_id = "nope".into();
        let err = notifier.on_created(&stray, noon()).await.unwrap_err();
        assert!(matches!(err, LeadPulseError::NotFound(_)));
    }
}
