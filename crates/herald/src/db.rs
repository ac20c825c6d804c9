//! SQLite-backed campaign store and audience queries.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{error, info};

use herald_campaign::{
    AudienceDataProvider, AudienceError, CampaignId, CampaignKind, CampaignRecord, CampaignStore,
    RecipientId, StoreError, TriggerDefinition, TriggerParams,
};

/// Balance history reason recorded when a user claims the daily reward.
const DAILY_REWARD_REASON: &str = "Everyday reward";

/// SQLite-backed campaign store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// A campaign row before its triggers are attached.
struct CampaignRow {
    id: CampaignId,
    name: String,
    kind: String,
    scheduled_at: Option<String>,
    title: Option<String>,
    text: String,
    button_text: Option<String>,
    button_url: Option<String>,
    photo: Option<String>,
    is_active: bool,
}

impl CampaignRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            scheduled_at: row.get(3)?,
            title: row.get(4)?,
            text: row.get(5)?,
            button_text: row.get(6)?,
            button_url: row.get(7)?,
            photo: row.get(8)?,
            is_active: row.get(9)?,
        })
    }
}

/// A linked trigger row; params are still raw JSON text.
struct TriggerRow {
    id: u32,
    name: String,
    cron_expression: String,
    trigger_params: Option<String>,
}

impl SqliteStore {
    /// Open or create the SQLite database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(&conn)?;

        info!(path = %path.display(), "campaign database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory database with the schema applied.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                scheduled_at TEXT,
                title TEXT,
                text TEXT NOT NULL DEFAULT '',
                button_text TEXT,
                button_url TEXT,
                photo TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_campaigns_active ON campaigns(is_active);

            CREATE TABLE IF NOT EXISTS campaigns_triggers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                cron_expression TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaigns_triggers_link (
                id INTEGER PRIMARY KEY,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                trigger_id INTEGER NOT NULL REFERENCES campaigns_triggers(id),
                trigger_params TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_links_campaign ON campaigns_triggers_link(campaign_id);

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                tg_id TEXT UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS users_balances_history (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                type TEXT NOT NULL,
                reason TEXT NOT NULL,
                amount INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_balances_user ON users_balances_history(user_id, created_at);

            CREATE TABLE IF NOT EXISTS users_statistic (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                type TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_statistic_user ON users_statistic(user_id, created_at);

            CREATE TABLE IF NOT EXISTS tasks_templates (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                complete_count INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS user_tasks_complete (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                task_template_id INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_complete ON user_tasks_complete(task_template_id, user_id);
            ",
        )
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // The connection stays usable after a panic elsewhere.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Campaigns
    // =========================================================================

    fn load_campaigns(&self, is_active: bool) -> Result<Vec<CampaignRecord>, StoreError> {
        let conn = self.conn();
        let rows = {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, type, scheduled_at, title, text, button_text, button_url,
                            photo, is_active
                     FROM campaigns WHERE is_active = ?1 ORDER BY id",
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![is_active], CampaignRow::from_row)
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            rows
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            let triggers = load_triggers(&conn, id).map_err(backend)?;
            match decode_campaign(row, triggers) {
                Ok(record) => records.push(record),
                // One undecodable row must not hide the others.
                Err(e) => error!(campaign_id = id, error = %e, "skipping malformed campaign"),
            }
        }
        Ok(records)
    }

    fn set_active(&self, campaign_id: CampaignId, is_active: bool) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE campaigns SET is_active = ?1 WHERE id = ?2",
                params![is_active, campaign_id],
            )
            .map_err(backend)?;

        if changed == 0 {
            return Err(StoreError::NotFound(campaign_id));
        }
        Ok(())
    }

    /// Read one campaign's activity flag.
    pub fn is_active(&self, campaign_id: CampaignId) -> Result<bool, StoreError> {
        self.conn()
            .query_row(
                "SELECT is_active FROM campaigns WHERE id = ?1",
                params![campaign_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?
            .ok_or(StoreError::NotFound(campaign_id))
    }

    // =========================================================================
    // Audience queries
    // =========================================================================

    fn recipients(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RecipientId>, AudienceError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(query_error)?;
        let ids = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(query_error)?
            .map(|id| id.map(RecipientId::from).map_err(query_error))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn load_triggers(
    conn: &Connection,
    campaign_id: CampaignId,
) -> Result<Vec<TriggerRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.cron_expression, l.trigger_params
         FROM campaigns_triggers_link l
         JOIN campaigns_triggers t ON t.id = l.trigger_id
         WHERE l.campaign_id = ?1
         ORDER BY l.id",
    )?;
    let rows = stmt
        .query_map(params![campaign_id], |row| {
            Ok(TriggerRow {
                id: row.get(0)?,
                name: row.get(1)?,
                cron_expression: row.get(2)?,
                trigger_params: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn decode_campaign(
    row: CampaignRow,
    triggers: Vec<TriggerRow>,
) -> Result<CampaignRecord, StoreError> {
    let id = row.id;
    let malformed = |reason: String| StoreError::Malformed { id, reason };

    let kind: CampaignKind = row.kind.parse().map_err(malformed)?;
    let scheduled_at = row
        .scheduled_at
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(parse_timestamp)
        .transpose()
        .map_err(malformed)?;

    let triggers = triggers
        .into_iter()
        .map(|t| {
            let trigger_params = match t.trigger_params.as_deref() {
                None | Some("") => TriggerParams::default(),
                Some(raw) => serde_json::from_str::<serde_json::Value>(raw)
                    .map(TriggerParams::from)
                    .map_err(|e| malformed(format!("trigger {} params: {}", t.id, e)))?,
            };
            Ok(TriggerDefinition {
                id: t.id,
                name: t.name,
                cron_expression: t.cron_expression,
                trigger_params,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    Ok(CampaignRecord {
        id,
        name: row.name,
        kind,
        scheduled_at,
        title: row.title,
        text: row.text,
        button_text: row.button_text,
        button_url: row.button_url,
        photo: row.photo,
        is_active: row.is_active,
        triggers,
    })
}

/// Parse a stored timestamp: RFC 3339, or SQLite's `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid scheduled_at '{}'", raw))
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn query_error(e: rusqlite::Error) -> AudienceError {
    AudienceError::Query(e.to_string())
}

#[async_trait]
impl CampaignStore for SqliteStore {
    async fn get_all(&self, is_active: bool) -> Result<Vec<CampaignRecord>, StoreError> {
        self.load_campaigns(is_active)
    }

    async fn update(&self, campaign_id: CampaignId, is_active: bool) -> Result<(), StoreError> {
        self.set_active(campaign_id, is_active)
    }
}

#[async_trait]
impl AudienceDataProvider for SqliteStore {
    async fn users_missing_daily_reward(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<RecipientId>, AudienceError> {
        self.recipients(
            "SELECT u.tg_id FROM users u
             WHERE u.tg_id IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1 FROM users_balances_history ubh
                   WHERE ubh.user_id = u.id
                     AND ubh.reason LIKE '%' || ?1 || '%'
                     AND date(ubh.created_at) = ?2
               )
             ORDER BY u.id",
            params![DAILY_REWARD_REASON, day.to_string()],
        )
    }

    async fn users_inactive_since(
        &self,
        since: NaiveDate,
    ) -> Result<Vec<RecipientId>, AudienceError> {
        self.recipients(
            "SELECT u.tg_id FROM users u
             WHERE u.tg_id IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1 FROM users_statistic us
                   WHERE us.user_id = u.id AND date(us.created_at) >= ?1
               )
             ORDER BY u.id",
            params![since.to_string()],
        )
    }

    async fn users_below_task_completions(
        &self,
        task_id: i64,
    ) -> Result<Vec<RecipientId>, AudienceError> {
        self.recipients(
            "SELECT u.tg_id FROM users u
             JOIN tasks_templates tt ON tt.id = ?1
             WHERE u.tg_id IS NOT NULL
               AND (
                   SELECT COUNT(*) FROM user_tasks_complete utc
                   WHERE utc.user_id = u.id AND utc.task_template_id = tt.id
               ) < tt.complete_count
             ORDER BY u.id",
            params![task_id],
        )
    }
}
