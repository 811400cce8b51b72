//! SQLite-backed lead store. Survives restarts and is safe to share between
//! a scheduler process and a one-off CLI run.
//!
//! Records are kept as JSON in a `data` column next to the few fields the
//! scheduler filters on. Reminder markers live in their own table keyed by
//! (lead_id, marker): the primary key is what makes a claim conditional.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use leadpulse_core::error::{LeadPulseError, Result};
use leadpulse_core::traits::LeadStore;
use leadpulse_core::types::{ChannelLink, Lead, LeadStatus, Member, Tenant};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> LeadPulseError {
    LeadPulseError::storage(e)
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| LeadPulseError::storage(format!("encode: {e}")))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| LeadPulseError::storage(format!("decode: {e}")))
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl SqliteStore {
    /// Open or create the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| LeadPulseError::storage(format!("DB open error: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| LeadPulseError::storage(format!("DB pragma error: {e}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS members (
                tenant_id TEXT NOT NULL,
                id TEXT NOT NULL,
                channel_id TEXT,
                data TEXT NOT NULL,
                PRIMARY KEY (tenant_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_members_channel ON members(channel_id);

            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                next_date TEXT,          -- YYYY-MM-DD, tenant-local
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_leads_due ON leads(tenant_id, next_date);
            CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(tenant_id, status);

            CREATE TABLE IF NOT EXISTS lead_markers (
                lead_id TEXT NOT NULL,
                marker TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (lead_id, marker)
            );

            CREATE TABLE IF NOT EXISTS tenant_markers (
                tenant_id TEXT NOT NULL,
                marker TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, marker)
            );
            ",
        )
        .map_err(|e| LeadPulseError::storage(format!("Migration: {e}")))?;

        tracing::debug!("💾 Lead store ready");
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LeadPulseError::storage(format!("connection lock poisoned: {e}")))
    }

    fn query_leads(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Lead>> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0)).map_err(db_err)?;

        let mut leads = Vec::new();
        for raw in rows {
            let mut lead: Lead = decode(&raw.map_err(db_err)?)?;
            lead.reminders = Self::markers(conn, &lead.id)?;
            leads.push(lead);
        }
        Ok(leads)
    }

    fn markers(conn: &Connection, lead_id: &str) -> Result<BTreeMap<String, bool>> {
        let mut stmt = conn
            .prepare("SELECT marker FROM lead_markers WHERE lead_id = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![lead_id], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let markers = rows.map(|r| r.map(|marker| (marker, true)).map_err(db_err)).collect();
        markers
    }

    /// Record the markers a caller set on the lead. Never removes any.
    fn add_markers(conn: &Connection, lead: &Lead) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for (marker, _) in lead.reminders.iter().filter(|(_, set)| **set) {
            conn.execute(
                "INSERT OR IGNORE INTO lead_markers (lead_id, marker, created_at) VALUES (?1, ?2, ?3)",
                params![lead.id, marker, now],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    /// Lead JSON without markers; those are stored separately.
    fn lead_data(lead: &Lead) -> Result<String> {
        let mut bare = lead.clone();
        bare.reminders.clear();
        encode(&bare)
    }

    fn members_where(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Member>> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0)).map_err(db_err)?;
        let decoded = rows.map(|raw| raw.map_err(db_err).and_then(|raw| decode(&raw))).collect();
        decoded
    }

    fn save_member(conn: &Connection, member: &Member) -> Result<()> {
        conn.execute(
            "INSERT INTO members (tenant_id, id, channel_id, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, id) DO UPDATE SET channel_id = excluded.channel_id, data = excluded.data",
            params![member.tenant_id, member.id, member.channel(), encode(member)?],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl LeadStore for SqliteStore {
    /// A row that no longer decodes is skipped with a warning so one broken
    /// tenant cannot stop the others.
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, data FROM tenants ORDER BY rowid")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(db_err)?;

        let mut tenants = Vec::new();
        for row in rows {
            let (id, raw) = row.map_err(db_err)?;
            match decode::<Tenant>(&raw) {
                Ok(tenant) => tenants.push(tenant),
                Err(e) => tracing::warn!("⚠️ Skipping tenant {}: {e}", id),
            }
        }
        Ok(tenants)
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row("SELECT data FROM tenants WHERE id = ?1", params![tenant_id], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        raw.map(|raw| decode(&raw)).transpose()
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        tenant.validate()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tenants (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![tenant.id, encode(tenant)?],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_members(&self, tenant_id: &str) -> Result<Vec<Member>> {
        let conn = self.conn()?;
        Self::members_where(
            &conn,
            "SELECT data FROM members WHERE tenant_id = ?1 ORDER BY rowid",
            params![tenant_id],
        )
    }

    async fn upsert_member(&self, member: &Member) -> Result<()> {
        let conn = self.conn()?;
        Self::save_member(&conn, member)
    }

    async fn bind_channel(&self, tenant_id: &str, member_id: &str, link: &ChannelLink) -> Result<bool> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM members WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id, member_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(raw) = raw else {
            return Ok(false);
        };
        let mut member: Member = decode(&raw)?;
        member.link(link);
        Self::save_member(&conn, &member)?;
        Ok(true)
    }

    async fn members_by_channel(&self, channel_id: &str) -> Result<Vec<Member>> {
        let conn = self.conn()?;
        Self::members_where(
            &conn,
            "SELECT data FROM members WHERE channel_id = ?1 ORDER BY rowid",
            params![channel_id],
        )
    }

    async fn unbind_channel(&self, channel_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let bound: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT data FROM members WHERE channel_id = ?1")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![channel_id], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            let bound = rows.collect::<rusqlite::Result<_>>().map_err(db_err)?;
            bound
        };
        for raw in &bound {
            let mut member: Member = decode(raw)?;
            member.unlink();
            Self::save_member(&conn, &member)?;
        }
        Ok(bound.len())
    }

    async fn list_leads(&self, tenant_id: &str) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        Self::query_leads(
            &conn,
            "SELECT data FROM leads WHERE tenant_id = ?1 ORDER BY rowid",
            params![tenant_id],
        )
    }

    async fn leads_due_on(&self, tenant_id: &str, date: NaiveDate) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        Self::query_leads(
            &conn,
            "SELECT data FROM leads WHERE tenant_id = ?1 AND next_date = ?2 ORDER BY rowid",
            params![tenant_id, day(date)],
        )
    }

    async fn leads_with_status(&self, tenant_id: &str, status: LeadStatus) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        Self::query_leads(
            &conn,
            "SELECT data FROM leads WHERE tenant_id = ?1 AND status = ?2 ORDER BY rowid",
            params![tenant_id, status.as_str()],
        )
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO leads (id, tenant_id, status, next_date, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                lead.id,
                lead.tenant_id,
                lead.status.as_str(),
                lead.next_date.map(day),
                Self::lead_data(lead)?
            ],
        )
        .map_err(|e| LeadPulseError::storage(format!("insert lead {}: {e}", lead.id)))?;
        Self::add_markers(&conn, lead)
    }

    async fn update_lead(&self, lead: &Lead) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE leads SET status = ?3, next_date = ?4, data = ?5 WHERE id = ?1 AND tenant_id = ?2",
                params![
                    lead.id,
                    lead.tenant_id,
                    lead.status.as_str(),
                    lead.next_date.map(day),
                    Self::lead_data(lead)?
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LeadPulseError::NotFound(format!("lead {}", lead.id)));
        }
        Self::add_markers(&conn, lead)
    }

    async fn try_set_marker(&self, tenant_id: &str, lead_id: &str, marker: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM leads WHERE id = ?1 AND tenant_id = ?2",
                params![lead_id, tenant_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();
        if !exists {
            return Err(LeadPulseError::NotFound(format!("lead {lead_id}")));
        }

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO lead_markers (lead_id, marker, created_at) VALUES (?1, ?2, ?3)",
                params![lead_id, marker, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(inserted == 1)
    }

    async fn try_set_tenant_marker(&self, tenant_id: &str, marker: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists = conn
            .query_row("SELECT 1 FROM tenants WHERE id = ?1", params![tenant_id], |_| Ok(()))
            .optional()
            .map_err(db_err)?
            .is_some();
        if !exists {
            return Err(LeadPulseError::NotFound(format!("tenant {tenant_id}")));
        }

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO tenant_markers (tenant_id, marker, created_at) VALUES (?1, ?2, ?3)",
                params![tenant_id, marker, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(inserted == 1)
    }
}
