//! In-memory lead store: backs dry runs and tests.
//! Everything lives behind one async RwLock; listings keep insertion order.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use leadpulse_core::error::{LeadPulseError, Result};
use leadpulse_core::traits::LeadStore;
use leadpulse_core::types::{ChannelLink, Lead, LeadStatus, Member, Tenant};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    tenants: Vec<Tenant>,
    members: Vec<Member>,
    leads: Vec<Lead>,
    /// (tenant_id, marker)
    tenant_markers: HashSet<(String, String)>,
}

/// Volatile [`LeadStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert<T>(rows: &mut Vec<T>, row: T, same: impl Fn(&T) -> bool) {
    match rows.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.tables.read().await.tenants.clone())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let tables = self.tables.read().await;
        Ok(tables.tenants.iter().find(|t| t.id == tenant_id).cloned())
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        tenant.validate()?;
        let mut tables = self.tables.write().await;
        upsert(&mut tables.tenants, tenant.clone(), |t| t.id == tenant.id);
        Ok(())
    }

    async fn list_members(&self, tenant_id: &str) -> Result<Vec<Member>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_member(&self, member: &Member) -> Result<()> {
        let mut tables = self.tables.write().await;
        upsert(&mut tables.members, member.clone(), |m| {
            m.tenant_id == member.tenant_id && m.id == member.id
        });
        Ok(())
    }

    async fn bind_channel(&self, tenant_id: &str, member_id: &str, link: &ChannelLink) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables
            .members
            .iter_mut()
            .find(|m| m.tenant_id == tenant_id && m.id == member_id)
        {
            Some(member) => {
                member.link(link);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn members_by_channel(&self, channel_id: &str) -> Result<Vec<Member>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .iter()
            .filter(|m| m.channel() == Some(channel_id))
            .cloned()
            .collect())
    }

    async fn unbind_channel(&self, channel_id: &str) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut count = 0;
        for member in tables.members.iter_mut() {
            if member.channel_id.as_deref() == Some(channel_id) {
                member.unlink();
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_leads(&self, tenant_id: &str) -> Result<Vec<Lead>> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn leads_due_on(&self, tenant_id: &str, date: NaiveDate) -> Result<Vec<Lead>> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.next_date == Some(date))
            .cloned()
            .collect())
    }

    async fn leads_with_status(&self, tenant_id: &str, status: LeadStatus) -> Result<Vec<Lead>> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.status == status)
            .cloned()
            .collect())
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.leads.iter().any(|l| l.id == lead.id) {
            return Err(LeadPulseError::storage(format!("lead {} already exists", lead.id)));
        }
        tables.leads.push(lead.clone());
        Ok(())
    }

    async fn update_lead(&self, lead: &Lead) -> Result<()> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .leads
            .iter_mut()
            .find(|l| l.tenant_id == lead.tenant_id && l.id == lead.id)
            .ok_or_else(|| LeadPulseError::NotFound(format!("lead {}", lead.id)))?;

        let mut markers = std::mem::take(&mut existing.reminders);
        markers.extend(lead.reminders.iter().filter(|(_, set)| **set).map(|(k, v)| (k.clone(), *v)));
        *existing = lead.clone();
        existing.reminders = markers;
        Ok(())
    }

    async fn try_set_marker(&self, tenant_id: &str, lead_id: &str, marker: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let lead = tables
            .leads
            .iter_mut()
            .find(|l| l.tenant_id == tenant_id && l.id == lead_id)
            .ok_or_else(|| LeadPulseError::NotFound(format!("lead {lead_id}")))?;
        if lead.has_marker(marker) {
            return Ok(false);
        }
        lead.reminders.insert(marker.to_string(), true);
        Ok(true)
    }

    async fn try_set_tenant_marker(&self, tenant_id: &str, marker: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if !tables.tenants.iter().any(|t| t.id == tenant_id) {
            return Err(LeadPulseError::NotFound(format!("tenant {tenant_id}")));
        }
        Ok(tables
            .tenant_markers
            .insert((tenant_id.to_string(), marker.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadpulse_core::types::Role;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_marker_is_claimed_once() {
        let store = MemoryStore::new();
        store.insert_lead(&Lead::new("l1", "t1", Utc::now())).await.unwrap();

        assert!(store.try_set_marker("t1", "l1", "reminder_15_2024-06-01").await.unwrap());
        assert!(!store.try_set_marker("t1", "l1", "reminder_15_2024-06-01").await.unwrap());
        assert!(store.try_set_marker("t1", "l1", "reminder_60_2024-06-01").await.unwrap());
        assert!(store.try_set_marker("t2", "l1", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        store.insert_lead(&Lead::new("l1", "t1", Utc::now())).await.unwrap();

        let claims = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.try_set_marker("t1", "l1", "m").await.unwrap() })
        });
        let results = futures::future::join_all(claims).await;
        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_update_keeps_markers() {
        let store = MemoryStore::new();
        let lead = Lead::new("l1", "t1", Utc::now());
        store.insert_lead(&lead).await.unwrap();
        store.try_set_marker("t1", "l1", "m").await.unwrap();

        let mut edited = lead.clone();
        edited.status = LeadStatus::Contacted;
        store.update_lead(&edited).await.unwrap();

        let stored = store.list_leads("t1").await.unwrap().remove(0);
        assert_eq!(stored.status, LeadStatus::Contacted);
        assert!(stored.has_marker("m"));
        assert!(store.insert_lead(&lead).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_status_and_unbind_channel() {
        let store = MemoryStore::new();
        store.upsert_member(&Member::new("a", "t1", Role::Owner)).await.unwrap();
        store.upsert_member(&Member::new("b", "t2", Role::Owner)).await.unwrap();
        let link = ChannelLink::new("C9", Some("Olena"), Utc::now());

        assert!(store.members_by_channel("C9").await.unwrap().is_empty());
        assert!(store.bind_channel("t1", "a", &link).await.unwrap());
        assert!(store.bind_channel("t2", "b", &link).await.unwrap());
        assert!(!store.bind_channel("t1", "ghost", &link).await.unwrap());

        let bound = store.members_by_channel("C9").await.unwrap();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].channel_name.as_deref(), Some("Olena"));
        assert_eq!(bound[0].linked_at, Some(link.linked_at));

        assert_eq!(store.unbind_channel("C9").await.unwrap(), 2);
        assert!(!store.list_members("t1").await.unwrap()[0].is_reachable());
        assert!(store.members_by_channel("C9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tenant_marker_is_claimed_once() {
        let store = MemoryStore::new();
        store.upsert_tenant(&Tenant::new("t1", "Acme")).await.unwrap();

        assert!(store.try_set_tenant_marker("t1", "digest_2024-06-01").await.unwrap());
        assert!(!store.try_set_tenant_marker("t1", "digest_2024-06-01").await.unwrap());
        assert!(store.try_set_tenant_marker("t1", "digest_2024-06-02").await.unwrap());
        assert!(store.try_set_tenant_marker("t9", "digest_2024-06-01").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_tenant_is_rejected() {
        let store = MemoryStore::new();
        let far = Tenant::new("t1", "Acme").with_utc_offset(24 * 60);
        assert!(store.upsert_tenant(&far).await.is_err());
        assert!(store.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_keeps_order() {
        let store = MemoryStore::new();
        store.upsert_tenant(&Tenant::new("t1", "One")).await.unwrap();
        store.upsert_tenant(&Tenant::new("t2", "Two")).await.unwrap();
        store.upsert_tenant(&Tenant::new("t1", "Renamed")).await.unwrap();

        let tenants = store.list_tenants().await.unwrap();
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].name, "Renamed");
        assert!(store.get_tenant("t3").await.unwrap().is_none());
    }
}
