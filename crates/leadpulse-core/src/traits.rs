//! Collaborator traits: the document store and the outbound delivery channel.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ChannelLink, Lead, LeadStatus, Member, Tenant};

/// Storage for tenants, members and leads.
///
/// Listings keep insertion order. Reminder markers are owned by
/// [`LeadStore::try_set_marker`]; `update_lead` never clears them.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// Insert or replace a tenant. Tenants failing [`Tenant::validate`] are rejected.
    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<()>;

    async fn list_members(&self, tenant_id: &str) -> Result<Vec<Member>>;

    async fn upsert_member(&self, member: &Member) -> Result<()>;

    /// Attach a channel to a member. Returns `false` when the member does not exist.
    async fn bind_channel(&self, tenant_id: &str, member_id: &str, link: &ChannelLink) -> Result<bool>;

    /// Members the channel is currently bound to, across tenants.
    async fn members_by_channel(&self, channel_id: &str) -> Result<Vec<Member>>;

    /// Detach a channel from every member that has it bound, across tenants.
    /// Returns how many members were updated.
    async fn unbind_channel(&self, channel_id: &str) -> Result<usize>;

    async fn list_leads(&self, tenant_id: &str) -> Result<Vec<Lead>>;

    /// Leads whose `next_date` equals `date`.
    async fn leads_due_on(&self, tenant_id: &str, date: NaiveDate) -> Result<Vec<Lead>>;

    async fn leads_with_status(&self, tenant_id: &str, status: LeadStatus) -> Result<Vec<Lead>>;

    async fn insert_lead(&self, lead: &Lead) -> Result<()>;

    async fn update_lead(&self, lead: &Lead) -> Result<()>;

    /// Set a reminder marker only if it is absent.
    /// Returns `true` for the single caller that wrote it.
    async fn try_set_marker(&self, tenant_id: &str, lead_id: &str, marker: &str) -> Result<bool>;

    /// Tenant-level counterpart of [`LeadStore::try_set_marker`], used for
    /// once-per-day work such as the digest.
    async fn try_set_tenant_marker(&self, tenant_id: &str, marker: &str) -> Result<bool>;
}

/// How the channel should interpret message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Plain,
    #[serde(rename = "richtext")]
    RichText,
}

/// Outbound messaging API. Any error is a failure for that one recipient.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, channel_id: &str, text: &str, mode: RenderMode) -> Result<()>;
}
