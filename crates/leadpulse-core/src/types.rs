//! Domain records: tenants, members, leads and notification categories.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{LeadPulseError, Result};

/// Member role within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Manager,
    Other,
}

impl Role {
    /// Owners and managers receive role-scoped notifications.
    pub fn is_lead_manager(&self) -> bool {
        matches!(self, Role::Owner | Role::Manager)
    }
}

/// Pipeline stage of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Scheduled,
    Completed,
    ReportSent,
    Deposit,
    Paid,
    Failed,
    Frozen,
    Repeat,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 10] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Scheduled,
        LeadStatus::Completed,
        LeadStatus::ReportSent,
        LeadStatus::Deposit,
        LeadStatus::Paid,
        LeadStatus::Failed,
        LeadStatus::Frozen,
        LeadStatus::Repeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Scheduled => "scheduled",
            LeadStatus::Completed => "completed",
            LeadStatus::ReportSent => "report_sent",
            LeadStatus::Deposit => "deposit",
            LeadStatus::Paid => "paid",
            LeadStatus::Failed => "failed",
            LeadStatus::Frozen => "frozen",
            LeadStatus::Repeat => "repeat",
        }
    }

    /// Terminal leads get no task reminders and are left out of due/overdue counts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Paid | LeadStatus::Failed | LeadStatus::Frozen)
    }

    /// Built-in display label, used when a tenant has no custom label for the stage.
    pub fn default_label(&self) -> &'static str {
        match self {
            LeadStatus::New => "New",
            LeadStatus::Contacted => "Contacted",
            LeadStatus::Scheduled => "Consultation scheduled",
            LeadStatus::Completed => "Consultation held",
            LeadStatus::ReportSent => "Report sent",
            LeadStatus::Deposit => "Deposit",
            LeadStatus::Paid => "Paid",
            LeadStatus::Failed => "Lost",
            LeadStatus::Frozen => "Frozen",
            LeadStatus::Repeat => "Repeat",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = LeadPulseError;

    fn from_str(s: &str) -> Result<Self> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| LeadPulseError::Validation(format!("unknown lead status '{s}'")))
    }
}

/// How recipients are chosen for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientScope {
    /// The lead's assignee when one is set (no fallback), otherwise owners and managers.
    AssignmentScoped,
    /// Owners and managers.
    RoleScoped,
    /// Every member with a bound channel.
    TenantWide,
}

/// Notification category. Each one has a per-member opt-out toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "new_lead")]
    NewLead,
    #[serde(rename = "status_change")]
    StatusChange,
    #[serde(rename = "assignment")]
    Assignment,
    #[serde(rename = "task_reminder_15")]
    TaskReminder15,
    #[serde(rename = "consult_reminder_60")]
    ConsultReminder60,
    #[serde(rename = "daily_digest")]
    DailyDigest,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::NewLead => "new_lead",
            Category::StatusChange => "status_change",
            Category::Assignment => "assignment",
            Category::TaskReminder15 => "task_reminder_15",
            Category::ConsultReminder60 => "consult_reminder_60",
            Category::DailyDigest => "daily_digest",
        }
    }

    pub fn scope(&self) -> RecipientScope {
        match self {
            Category::NewLead => RecipientScope::RoleScoped,
            Category::DailyDigest => RecipientScope::TenantWide,
            Category::StatusChange
            | Category::Assignment
            | Category::TaskReminder15
            | Category::ConsultReminder60 => RecipientScope::AssignmentScoped,
        }
    }

    /// The digest goes out at a fixed morning hour and ignores quiet hours.
    pub fn quiet_hours_exempt(&self) -> bool {
        matches!(self, Category::DailyDigest)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local-time window during which non-exempt notifications are held back.
/// `start >= end` wraps past midnight (22 → 6 covers 22:00..06:00).
/// Stored records go through the same range check as [`QuietHours::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuietHoursRecord")]
pub struct QuietHours {
    pub start: u32,
    pub end: u32,
}

#[derive(Deserialize)]
struct QuietHoursRecord {
    start: u32,
    end: u32,
}

impl TryFrom<QuietHoursRecord> for QuietHours {
    type Error = LeadPulseError;

    fn try_from(record: QuietHoursRecord) -> Result<Self> {
        QuietHours::new(record.start, record.end)
    }
}

impl QuietHours {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > 23 || end > 23 {
            return Err(LeadPulseError::Validation(format!(
                "quiet hours must be within 0..=23, got {start}..{end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start < self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Largest accepted distance of tenant-local time from UTC.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

fn check_utc_offset(minutes: i32) -> Result<i32> {
    if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(LeadPulseError::Validation(format!(
            "utc_offset_minutes must be within ±{MAX_UTC_OFFSET_MINUTES}, got {minutes}"
        )));
    }
    Ok(minutes)
}

fn utc_offset_minutes<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i32, D::Error> {
    let minutes = i32::deserialize(deserializer)?;
    check_utc_offset(minutes).map_err(serde::de::Error::custom)
}

/// An isolated organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Offset of tenant-local time from UTC.
    #[serde(default, deserialize_with = "utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Custom stage labels keyed by status (`"new"`, `"paid"`, ...).
    #[serde(default)]
    pub status_labels: HashMap<String, String>,
    /// Credential required by lead ingestion, when set.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Tenant {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            utc_offset_minutes: 0,
            status_labels: HashMap::new(),
            api_key: None,
        }
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// Reject records the scheduler cannot place in time.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LeadPulseError::Validation("tenant id must not be empty".into()));
        }
        check_utc_offset(self.utc_offset_minutes).map(|_| ())
    }

    /// Tenant-local offset. Stores only hold validated tenants, so the UTC
    /// fallback is never reached for stored records.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset())
    }

    /// Display label for a stage: the tenant's own label, else the built-in one.
    pub fn status_label(&self, status: LeadStatus) -> String {
        self.status_labels
            .get(status.as_str())
            .filter(|label| !label.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| status.default_label().to_string())
    }

    /// Tenants without an API key accept any caller.
    pub fn accepts_credential(&self, credential: Option<&str>) -> bool {
        match self.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => credential == Some(key),
            None => true,
        }
    }
}

/// A user inside a tenant who may receive notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub display_name: String,
    pub role: Role,
    /// Bound messaging-channel identifier (Telegram chat id).
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Name the channel reported when it was linked (Telegram first name).
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub linked_at: Option<DateTime<Utc>>,
    /// Per-category toggles; a missing entry means enabled.
    #[serde(default)]
    pub notifications: HashMap<Category, bool>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
}

impl Member {
    pub fn new(id: &str, tenant_id: &str, role: Role) -> Self {
        Self {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            display_name: String::new(),
            role,
            channel_id: None,
            channel_name: None,
            linked_at: None,
            notifications: HashMap::new(),
            quiet_hours: None,
        }
    }

    pub fn with_channel(mut self, channel_id: &str) -> Self {
        self.channel_id = Some(channel_id.to_string());
        self
    }

    pub fn with_quiet_hours(mut self, quiet_hours: QuietHours) -> Self {
        self.quiet_hours = Some(quiet_hours);
        self
    }

    pub fn with_toggle(mut self, category: Category, enabled: bool) -> Self {
        self.notifications.insert(category, enabled);
        self
    }

    /// Record a channel link, replacing any earlier one.
    pub fn link(&mut self, link: &ChannelLink) {
        self.channel_id = Some(link.channel_id.clone());
        self.channel_name = link.display_name.clone();
        self.linked_at = Some(link.linked_at);
    }

    pub fn unlink(&mut self) {
        self.channel_id = None;
        self.channel_name = None;
        self.linked_at = None;
    }

    /// Bound channel, if any. Blank identifiers count as unbound.
    pub fn channel(&self) -> Option<&str> {
        self.channel_id.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn is_reachable(&self) -> bool {
        self.channel().is_some()
    }

    pub fn wants(&self, category: Category) -> bool {
        self.notifications.get(&category).copied().unwrap_or(true)
    }
}

/// A chat linking itself to a member (the bot's `/start <member>` flow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLink {
    pub channel_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub linked_at: DateTime<Utc>,
}

impl ChannelLink {
    pub fn new(channel_id: &str, display_name: Option<&str>, linked_at: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            display_name: display_name.map(str::trim).filter(|n| !n.is_empty()).map(String::from),
            linked_at,
        }
    }
}

/// A sales prospect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Messenger handle (e.g. `@username`).
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub status: LeadStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Due date of the next task, tenant-local.
    #[serde(default)]
    pub next_date: Option<NaiveDate>,
    /// Due time of the next task as `HH:MM`, tenant-local. Kept as entered.
    #[serde(default)]
    pub next_time: Option<String>,
    #[serde(default)]
    pub consult: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deposit_amount: Option<f64>,
    #[serde(default)]
    pub paid_total: Option<f64>,
    #[serde(default)]
    pub paid_at: Option<NaiveDate>,
    /// Reminder markers keyed `reminder_<kind>_<date>`.
    #[serde(default)]
    pub reminders: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// A blank lead with status `new`; mostly useful for tests and fixtures.
    pub fn new(id: &str, tenant_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            name: None,
            phone: None,
            handle: None,
            email: None,
            source: None,
            problem: None,
            notes: None,
            status: LeadStatus::New,
            assigned_to: None,
            next_date: None,
            next_time: None,
            consult: None,
            deposit_amount: None,
            paid_total: None,
            paid_at: None,
            reminders: BTreeMap::new(),
            created_at,
        }
    }

    /// Assigned member id; blank values count as unassigned.
    pub fn assignee(&self) -> Option<&str> {
        self.assigned_to.as_deref().filter(|a| !a.trim().is_empty())
    }

    pub fn has_marker(&self, key: &str) -> bool {
        self.reminders.get(key).copied().unwrap_or(false)
    }

    pub fn has_contact(&self) -> bool {
        [&self.phone, &self.handle, &self.email]
            .into_iter()
            .any(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }

    /// Short human label: name, else the first contact, else the id.
    pub fn title(&self) -> &str {
        [&self.name, &self.phone, &self.handle, &self.email]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|v| !v.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }
}

/// Inbound lead as submitted by an external form or integration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl LeadDraft {
    /// Build a `new` lead. At least one contact field is required.
    pub fn into_lead(self, tenant_id: &str, created_at: DateTime<Utc>) -> Result<Lead> {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let mut lead = Lead::new(&uuid::Uuid::new_v4().to_string(), tenant_id, created_at);
        lead.name = clean(self.name);
        lead.phone = clean(self.phone);
        lead.handle = clean(self.handle);
        lead.email = clean(self.email);
        lead.source = clean(self.source);
        lead.problem = clean(self.problem);
        lead.notes = clean(self.notes);
        lead.assigned_to = clean(self.assigned_to);

        if !lead.has_contact() {
            return Err(LeadPulseError::Validation(
                "lead needs at least one of phone, handle or email".into(),
            ));
        }
        Ok(lead)
    }
}
