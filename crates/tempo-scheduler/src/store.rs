//! SQLite-backed event store — events and attendees, always tenant-scoped.
//!
//! Every read and write takes a [`TenantId`] and filters on it in SQL.
//! Soft-deleted rows (`deleted_at IS NOT NULL`) are invisible unless a
//! function says otherwise. Functions take a plain `&Connection` so they
//! compose inside one [`EventStore::write`] transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tempo_core::error::{Result, TempoError};
use uuid::Uuid;

use crate::model::{
    Actor, Attendee, Event, EventPatch, EventStatus, EventType, NewEvent, Priority, TenantId,
    normalize_reminders, normalize_tags, to_millis, validate_title, validate_window,
};

/// SQLite store for scheduling data.
pub struct EventStore {
    conn: Mutex<Connection>,
}

/// Map a rusqlite error into a database error with context.
pub(crate) fn db(context: &'static str) -> impl Fn(rusqlite::Error) -> TempoError {
    move |e| TempoError::Database(format!("{context}: {e}"))
}

/// Fixed-width RFC 3339 (`2026-03-02T09:00:00.000Z`) so text comparison in
/// SQL orders the same way as the instants.
pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl EventStore {
    /// Open or create the schedule database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db("DB open error"))?;

        // WAL lets readers proceed while a writer holds the lock.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db("DB pragma error"))?;

        Self::from_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db("DB open error"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db("DB pragma error"))?;
        migrate(&conn)?;
        crate::effects::requeue_claimed(&conn)?;
        tracing::debug!("🗄️ Schedule store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TempoError::Database(format!("Lock: {e}")))
    }

    /// Run read-only work against the connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction: committed when it returns `Ok`,
    /// rolled back (on drop) when it returns `Err`.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db("Begin transaction"))?;
        let out = f(&tx)?;
        tx.commit().map_err(db("Commit"))?;
        Ok(out)
    }

    // ─── Convenience wrappers ──────────────────────────────

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> Result<Event> {
        self.read(|conn| get_event(conn, tenant, id))
    }

    pub fn list(
        &self,
        tenant: &TenantId,
        viewer: &str,
        filter: &EventFilter,
        page: PageRequest,
        sort: EventSort,
    ) -> Result<EventPage> {
        self.read(|conn| list_events(conn, tenant, viewer, filter, page, sort))
    }
}

/// Run schema migrations.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedule_events (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            start_at TEXT NOT NULL,
            end_at TEXT,
            all_day INTEGER NOT NULL DEFAULT 0,
            event_type TEXT NOT NULL DEFAULT 'event',
            priority TEXT NOT NULL DEFAULT 'medium',
            status TEXT NOT NULL DEFAULT 'scheduled',
            location TEXT,
            meeting_url TEXT,
            client_id TEXT,
            lead_id TEXT,
            sale_id TEXT,
            is_private INTEGER NOT NULL DEFAULT 0,
            recurring INTEGER NOT NULL DEFAULT 0,
            recurring_frequency TEXT,
            recurring_until TEXT,
            recurring_count INTEGER,
            parent_event_id TEXT REFERENCES schedule_events(id),
            created_by TEXT NOT NULL,
            created_by_name TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            custom_fields_json TEXT NOT NULL DEFAULT '{}',
            reminders_json TEXT NOT NULL DEFAULT '[]',
            status_notes TEXT,
            completed_at TEXT,
            cancelled_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            CHECK (end_at IS NULL OR end_at > start_at),
            CHECK (parent_event_id IS NULL OR recurring = 0)
        );

        CREATE INDEX IF NOT EXISTS idx_schedule_events_tenant_start
            ON schedule_events(tenant_id, start_at);
        CREATE INDEX IF NOT EXISTS idx_schedule_events_parent
            ON schedule_events(parent_event_id);

        CREATE TABLE IF NOT EXISTS schedule_attendees (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES schedule_events(id),
            tenant_id TEXT NOT NULL,
            user_id TEXT,
            email TEXT,
            name TEXT,
            participant_key TEXT NOT NULL,
            response TEXT NOT NULL DEFAULT 'invited',
            is_organizer INTEGER NOT NULL DEFAULT 0,
            responded_at TEXT,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        );

        -- One active row per (event, participant)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_attendees_active
            ON schedule_attendees(event_id, participant_key) WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_schedule_attendees_user
            ON schedule_attendees(tenant_id, user_id);

        -- Side effects committed with the primary write, delivered afterwards
        CREATE TABLE IF NOT EXISTS schedule_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            kind TEXT NOT NULL,             -- 'reward_credit', 'audit'
            payload TEXT NOT NULL,          -- JSON
            status TEXT NOT NULL DEFAULT 'pending',  -- pending, dispatching, sent, failed
            last_error TEXT,
            created_at TEXT NOT NULL,
            processed_at TEXT
        );
        ",
    )
    .map_err(db("Migration error"))?;

    // Additive migrations for databases created by earlier builds
    let alter_stmts = [
        "ALTER TABLE schedule_events ADD COLUMN sale_id TEXT",
        "ALTER TABLE schedule_events ADD COLUMN status_notes TEXT",
    ];
    for stmt in &alter_stmts {
        let _ = conn.execute(stmt, []);
    }
    Ok(())
}

// ─── Row mapping ──────────────────────────────────────────

/// Shared SELECT column list for event queries, aliased as `e`.
pub(crate) const EVENT_COLUMNS: &str = "e.id, e.tenant_id, e.title, e.description, e.start_at, e.end_at, \
    e.all_day, e.event_type, e.priority, e.status, e.location, e.meeting_url, e.client_id, \
    e.lead_id, e.sale_id, e.is_private, e.recurring, e.recurring_frequency, e.recurring_until, \
    e.recurring_count, e.parent_event_id, e.created_by, e.created_by_name, e.tags_json, \
    e.custom_fields_json, e.reminders_json, e.status_notes, e.completed_at, e.cancelled_at, \
    e.created_at, e.updated_at, e.deleted_at";

const ATTENDEE_COLUMNS: &str = "id, event_id, user_id, email, name, response, is_organizer, \
    responded_at, created_at, deleted_at";

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_opt_col<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Map a row selected with [`EVENT_COLUMNS`] to an event (attendees empty).
fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let tenant: String = row.get(1)?;
    Ok(Event {
        id: parse_col(row, 0)?,
        tenant_id: TenantId::new(tenant).map_err(|e| conversion_error(1, e))?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_at: parse_col(row, 4)?,
        end_at: parse_opt_col(row, 5)?,
        all_day: row.get(6)?,
        event_type: parse_col(row, 7)?,
        priority: parse_col(row, 8)?,
        status: parse_col(row, 9)?,
        location: row.get(10)?,
        meeting_url: row.get(11)?,
        client_id: row.get(12)?,
        lead_id: row.get(13)?,
        sale_id: row.get(14)?,
        is_private: row.get(15)?,
        recurring: row.get(16)?,
        recurring_frequency: parse_opt_col(row, 17)?,
        recurring_until: parse_opt_col(row, 18)?,
        recurring_count: row.get(19)?,
        parent_event_id: parse_opt_col(row, 20)?,
        created_by: row.get(21)?,
        created_by_name: row.get(22)?,
        tags: json_col(row, 23)?,
        custom_fields: json_col(row, 24)?,
        reminders: json_col(row, 25)?,
        status_notes: row.get(26)?,
        completed_at: parse_opt_col(row, 27)?,
        cancelled_at: parse_opt_col(row, 28)?,
        created_at: parse_col(row, 29)?,
        updated_at: parse_col(row, 30)?,
        deleted_at: parse_opt_col(row, 31)?,
        attendees: Vec::new(),
    })
}

pub(crate) fn row_to_attendee(row: &Row) -> rusqlite::Result<Attendee> {
    Ok(Attendee {
        id: parse_col(row, 0)?,
        event_id: parse_col(row, 1)?,
        user_id: row.get(2)?,
        email: row.get(3)?,
        name: row.get(4)?,
        response: parse_col(row, 5)?,
        is_organizer: row.get(6)?,
        responded_at: parse_opt_col(row, 7)?,
        created_at: parse_col(row, 8)?,
        deleted_at: parse_opt_col(row, 9)?,
    })
}

pub(crate) fn attendee_select() -> String {
    format!("SELECT {ATTENDEE_COLUMNS} FROM schedule_attendees")
}

fn to_json(value: &impl Serialize) -> Result<String> {
    serde_json::to_string(value).map_err(|e| TempoError::Database(format!("Serialize: {e}")))
}

// ─── Event CRUD ──────────────────────────────────────────

/// Validate `input` and persist it as a new base event with a fresh id.
/// Attendees in the input are not written here.
pub fn create_event(conn: &Connection, actor: &Actor, input: &NewEvent) -> Result<Event> {
    let (start, rule) = input.validate()?;
    let now = to_millis(Utc::now());
    let event = Event {
        id: Uuid::new_v4(),
        tenant_id: actor.tenant_id.clone(),
        title: input.title.trim().to_string(),
        description: clean_opt(&input.description),
        start_at: to_millis(start),
        end_at: input.end_at.map(to_millis),
        all_day: input.all_day,
        event_type: input.event_type,
        priority: input.priority,
        status: input.status.unwrap_or_default(),
        location: clean_opt(&input.location),
        meeting_url: clean_opt(&input.meeting_url),
        client_id: clean_opt(&input.client_id),
        lead_id: clean_opt(&input.lead_id),
        sale_id: clean_opt(&input.sale_id),
        is_private: input.is_private,
        recurring: rule.is_some(),
        recurring_frequency: rule.map(|r| r.frequency),
        recurring_until: rule.and_then(|r| r.until).map(to_millis),
        recurring_count: rule.and_then(|r| r.count),
        parent_event_id: None,
        created_by: actor.user_id.clone(),
        created_by_name: actor.display_name.clone(),
        tags: normalize_tags(&input.tags),
        custom_fields: input.custom_fields.clone(),
        reminders: normalize_reminders(&input.reminders),
        status_notes: None,
        completed_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        attendees: Vec::new(),
    };
    insert_event(conn, &event)?;
    Ok(event)
}

fn clean_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Insert a fully-formed event row.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    validate_window(event.start_at, event.end_at)?;
    if event.parent_event_id.is_some() && event.recurring {
        return Err(TempoError::validation(
            "generated instances cannot themselves be recurring",
        ));
    }
    conn.execute(
        "INSERT INTO schedule_events (
            id, tenant_id, title, description, start_at, end_at, all_day, event_type, priority,
            status, location, meeting_url, client_id, lead_id, sale_id, is_private, recurring,
            recurring_frequency, recurring_until, recurring_count, parent_event_id, created_by,
            created_by_name, tags_json, custom_fields_json, reminders_json, status_notes,
            completed_at, cancelled_at, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32)",
        params![
            event.id.to_string(),
            event.tenant_id.as_str(),
            event.title,
            event.description,
            ts(&event.start_at),
            event.end_at.as_ref().map(ts),
            event.all_day,
            event.event_type.as_str(),
            event.priority.as_str(),
            event.status.as_str(),
            event.location,
            event.meeting_url,
            event.client_id,
            event.lead_id,
            event.sale_id,
            event.is_private,
            event.recurring,
            event.recurring_frequency.map(|f| f.as_str()),
            event.recurring_until.as_ref().map(ts),
            event.recurring_count,
            event.parent_event_id.map(|id| id.to_string()),
            event.created_by,
            event.created_by_name,
            to_json(&event.tags)?,
            to_json(&event.custom_fields)?,
            to_json(&event.reminders)?,
            event.status_notes,
            event.completed_at.as_ref().map(ts),
            event.cancelled_at.as_ref().map(ts),
            ts(&event.created_at),
            ts(&event.updated_at),
            event.deleted_at.as_ref().map(ts),
        ],
    )
    .map_err(db("Insert event"))?;
    Ok(())
}

fn fetch_event(conn: &Connection, tenant: &TenantId, id: Uuid, with_deleted: bool) -> Result<Event> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM schedule_events e WHERE e.id = ?1 AND e.tenant_id = ?2{}",
        if with_deleted { "" } else { " AND e.deleted_at IS NULL" }
    );
    let event = conn
        .query_row(&sql, params![id.to_string(), tenant.as_str()], row_to_event)
        .optional()
        .map_err(db("Get event"))?;
    let mut event = event.ok_or_else(|| TempoError::not_found(format!("event {id} not found")))?;
    event.attendees = crate::attendees::list(conn, tenant, id)?;
    Ok(event)
}

/// Active event with its active attendees, or `NotFound`.
pub fn get_event(conn: &Connection, tenant: &TenantId, id: Uuid) -> Result<Event> {
    fetch_event(conn, tenant, id, false)
}

/// Like [`get_event`] but also returns soft-deleted events.
pub fn get_event_including_deleted(conn: &Connection, tenant: &TenantId, id: Uuid) -> Result<Event> {
    fetch_event(conn, tenant, id, true)
}

/// Apply the event-row fields present in `patch` and return the updated
/// event. The attendee list in the patch is not handled here.
pub fn update_event(conn: &Connection, tenant: &TenantId, id: Uuid, patch: &EventPatch) -> Result<Event> {
    if patch.is_empty() {
        return Err(TempoError::validation("update contains no fields"));
    }
    let current = get_event(conn, tenant, id)?;

    if let Some(title) = &patch.title {
        validate_title(title)?;
    }
    if patch.touches_window() {
        let start = patch.start_at.unwrap_or(current.start_at);
        let end = patch.end_at.unwrap_or(current.end_at);
        validate_window(start, end)?;
    }

    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let mut set = |column: &'static str, value: Value| {
        sets.push(column);
        values.push(value);
    };

    if let Some(title) = &patch.title {
        set("title", Value::Text(title.trim().to_string()));
    }
    if let Some(description) = &patch.description {
        set("description", opt_text(clean_opt(description)));
    }
    if let Some(start) = &patch.start_at {
        set("start_at", Value::Text(ts(start)));
    }
    if let Some(end) = &patch.end_at {
        set("end_at", opt_text(end.as_ref().map(ts)));
    }
    if let Some(all_day) = patch.all_day {
        set("all_day", Value::Integer(all_day as i64));
    }
    if let Some(event_type) = patch.event_type {
        set("event_type", Value::Text(event_type.as_str().into()));
    }
    if let Some(priority) = patch.priority {
        set("priority", Value::Text(priority.as_str().into()));
    }
    if let Some(location) = &patch.location {
        set("location", opt_text(clean_opt(location)));
    }
    if let Some(url) = &patch.meeting_url {
        set("meeting_url", opt_text(clean_opt(url)));
    }
    if let Some(client) = &patch.client_id {
        set("client_id", opt_text(clean_opt(client)));
    }
    if let Some(lead) = &patch.lead_id {
        set("lead_id", opt_text(clean_opt(lead)));
    }
    if let Some(sale) = &patch.sale_id {
        set("sale_id", opt_text(clean_opt(sale)));
    }
    if let Some(private) = patch.is_private {
        set("is_private", Value::Integer(private as i64));
    }
    if let Some(tags) = &patch.tags {
        set("tags_json", Value::Text(to_json(&normalize_tags(tags))?));
    }
    if let Some(fields) = &patch.custom_fields {
        set("custom_fields_json", Value::Text(to_json(fields)?));
    }
    if let Some(reminders) = &patch.reminders {
        set("reminders_json", Value::Text(to_json(&normalize_reminders(reminders))?));
    }
    set("updated_at", Value::Text(ts(&Utc::now())));

    let assignments: Vec<String> = sets.iter().map(|c| format!("{c} = ?")).collect();
    let sql = format!(
        "UPDATE schedule_events SET {} WHERE id = ? AND tenant_id = ? AND deleted_at IS NULL",
        assignments.join(", ")
    );
    values.push(Value::Text(id.to_string()));
    values.push(Value::Text(tenant.as_str().to_string()));
    conn.execute(&sql, params_from_iter(values.iter()))
        .map_err(db("Update event"))?;

    get_event(conn, tenant, id)
}

fn opt_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

/// Terminal timestamp written alongside a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStamp {
    None,
    CompletedAt(DateTime<Utc>),
    CancelledAt(DateTime<Utc>),
}

/// Persist a status change, optional notes, and the terminal stamp.
pub fn set_status(
    conn: &Connection,
    tenant: &TenantId,
    id: Uuid,
    status: EventStatus,
    notes: Option<&str>,
    stamp: StatusStamp,
) -> Result<()> {
    let now = ts(&Utc::now());
    let (completed_at, cancelled_at) = match stamp {
        StatusStamp::None => (None, None),
        StatusStamp::CompletedAt(at) => (Some(ts(&at)), None),
        StatusStamp::CancelledAt(at) => (None, Some(ts(&at))),
    };
    let changed = conn
        .execute(
            "UPDATE schedule_events
             SET status = ?1,
                 status_notes = COALESCE(?2, status_notes),
                 completed_at = COALESCE(?3, completed_at),
                 cancelled_at = COALESCE(?4, cancelled_at),
                 updated_at = ?5
             WHERE id = ?6 AND tenant_id = ?7 AND deleted_at IS NULL",
            params![
                status.as_str(),
                notes,
                completed_at,
                cancelled_at,
                now,
                id.to_string(),
                tenant.as_str()
            ],
        )
        .map_err(db("Update status"))?;
    if changed == 0 {
        return Err(TempoError::not_found(format!("event {id} not found")));
    }
    Ok(())
}

/// Soft-delete an event and its attendee rows. Returns `false` when the
/// event was already deleted; unknown ids are `NotFound`.
pub fn soft_delete_event(conn: &Connection, tenant: &TenantId, id: Uuid) -> Result<bool> {
    let existing = get_event_including_deleted(conn, tenant, id)?;
    if existing.deleted_at.is_some() {
        return Ok(false);
    }
    let now = ts(&Utc::now());
    conn.execute(
        "UPDATE schedule_events SET deleted_at = ?1, updated_at = ?1
         WHERE id = ?2 AND tenant_id = ?3 AND deleted_at IS NULL",
        params![now, id.to_string(), tenant.as_str()],
    )
    .map_err(db("Delete event"))?;
    conn.execute(
        "UPDATE schedule_attendees SET deleted_at = ?1
         WHERE event_id = ?2 AND tenant_id = ?3 AND deleted_at IS NULL",
        params![now, id.to_string(), tenant.as_str()],
    )
    .map_err(db("Delete attendees"))?;
    Ok(true)
}

// ─── Listing ──────────────────────────────────────────────

/// Filters for [`list_events`]. Absent fields do not constrain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Creator or active attendee.
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Events intersecting `[from, to]`.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub parent_event_id: Option<Uuid>,
    /// Substring match over title and description.
    #[serde(default)]
    pub search: Option<String>,
    /// Opt in to other users' private events.
    #[serde(default)]
    pub include_all_private: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    StartAt,
    EndAt,
    CreatedAt,
    UpdatedAt,
    Title,
    Priority,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSort {
    #[serde(default)]
    pub field: SortField,
    #[serde(default)]
    pub direction: SortDirection,
}

impl EventSort {
    fn order_by(&self) -> String {
        let column = match self.field {
            SortField::StartAt => "e.start_at",
            SortField::EndAt => "e.end_at",
            SortField::CreatedAt => "e.created_at",
            SortField::UpdatedAt => "e.updated_at",
            SortField::Title => "e.title COLLATE NOCASE",
            SortField::Priority => {
                "CASE e.priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 ELSE 3 END"
            }
            SortField::Status => "e.status",
        };
        let direction = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        format!("{column} {direction}, e.id {direction}")
    }
}

/// Normalized 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Clamp raw caller values: page ≥ 1, `1 ≤ per_page ≤ max`.
    pub fn clamped(page: Option<u32>, per_page: Option<u32>, default_per_page: u32, max_per_page: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(default_per_page).clamp(1, max_per_page.max(1)),
        }
    }

    fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// Bucketed counts for dashboard badges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub pagination: Pagination,
    pub status_summary: StatusSummary,
}

/// Accumulates WHERE clauses with their positional parameters.
#[derive(Default)]
struct SqlFilter {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl SqlFilter {
    fn push(&mut self, clause: impl Into<String>, values: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.values.extend(values);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn text(s: impl Into<String>) -> Value {
    Value::Text(s.into())
}

const ACTIVE_ATTENDEE_MATCH: &str = "EXISTS (SELECT 1 FROM schedule_attendees a \
    WHERE a.event_id = e.id AND a.deleted_at IS NULL AND a.user_id = ?)";

/// Private events are only visible to their creator and attendees.
fn push_visibility(filter: &mut SqlFilter, viewer: &str) {
    filter.push(
        format!("(e.is_private = 0 OR e.created_by = ? OR {ACTIVE_ATTENDEE_MATCH})"),
        [text(viewer), text(viewer)],
    );
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('%');
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn build_filter(tenant: &TenantId, viewer: &str, filter: &EventFilter, with_status: bool) -> SqlFilter {
    let mut sql = SqlFilter::default();
    sql.push("e.tenant_id = ?", [text(tenant.as_str())]);
    sql.clauses.push("e.deleted_at IS NULL".into());
    if !filter.include_all_private {
        push_visibility(&mut sql, viewer);
    }
    if let Some(participant) = &filter.participant {
        sql.push(
            format!("(e.created_by = ? OR {ACTIVE_ATTENDEE_MATCH})"),
            [text(participant.as_str()), text(participant.as_str())],
        );
    }
    if let Some(event_type) = filter.event_type {
        sql.push("e.event_type = ?", [text(event_type.as_str())]);
    }
    if with_status && let Some(status) = filter.status {
        sql.push("e.status = ?", [text(status.as_str())]);
    }
    if let Some(priority) = filter.priority {
        sql.push("e.priority = ?", [text(priority.as_str())]);
    }
    if let Some(from) = &filter.from {
        sql.push("COALESCE(e.end_at, e.start_at) >= ?", [text(ts(from))]);
    }
    if let Some(to) = &filter.to {
        sql.push("e.start_at <= ?", [text(ts(to))]);
    }
    if let Some(client) = &filter.client_id {
        sql.push("e.client_id = ?", [text(client.as_str())]);
    }
    if let Some(lead) = &filter.lead_id {
        sql.push("e.lead_id = ?", [text(lead.as_str())]);
    }
    if let Some(parent) = filter.parent_event_id {
        sql.push("e.parent_event_id = ?", [text(parent.to_string())]);
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = escape_like(search);
        sql.push(
            "(e.title LIKE ? ESCAPE '\\' OR IFNULL(e.description, '') LIKE ? ESCAPE '\\')",
            [text(pattern.clone()), text(pattern)],
        );
    }
    sql
}

/// One page of events plus total count and the status/priority/type summary.
/// The summary uses the same filters except `status`.
pub fn list_events(
    conn: &Connection,
    tenant: &TenantId,
    viewer: &str,
    filter: &EventFilter,
    page: PageRequest,
    sort: EventSort,
) -> Result<EventPage> {
    let scoped = build_filter(tenant, viewer, filter, true);
    let where_sql = scoped.where_sql();

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM schedule_events e{where_sql}"),
            params_from_iter(scoped.values.iter()),
            |r| r.get(0),
        )
        .map_err(db("Count events"))?;

    let mut values = scoped.values.clone();
    values.push(Value::Integer(page.per_page as i64));
    values.push(Value::Integer(page.offset()));
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM schedule_events e{where_sql} ORDER BY {} LIMIT ? OFFSET ?",
        sort.order_by()
    );
    let mut events = query_events(conn, &sql, &values)?;
    attach_attendees(conn, tenant, &mut events)?;

    let summary = summarize(conn, &build_filter(tenant, viewer, filter, false))?;
    let total = total.max(0) as u64;
    let total_pages = total.div_ceil(page.per_page as u64) as u32;

    Ok(EventPage {
        events,
        pagination: Pagination {
            page: page.page,
            per_page: page.per_page,
            total,
            total_pages,
        },
        status_summary: summary,
    })
}

fn summarize(conn: &Connection, scope: &SqlFilter) -> Result<StatusSummary> {
    let sql = format!(
        "SELECT e.status, e.priority, e.event_type, COUNT(*) FROM schedule_events e{} \
         GROUP BY e.status, e.priority, e.event_type",
        scope.where_sql()
    );
    let mut stmt = conn.prepare(&sql).map_err(db("Prepare summary"))?;
    let rows = stmt
        .query_map(params_from_iter(scope.values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(db("Query summary"))?;

    let mut summary = StatusSummary::default();
    for row in rows {
        let (status, priority, event_type, count) = row.map_err(db("Read summary"))?;
        let count = count.max(0) as u64;
        summary.total += count;
        *summary.by_status.entry(status).or_default() += count;
        *summary.by_priority.entry(priority).or_default() += count;
        *summary.by_type.entry(event_type).or_default() += count;
    }
    Ok(summary)
}

pub(crate) fn query_events(conn: &Connection, sql: &str, values: &[Value]) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(sql).map_err(db("Prepare events"))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), row_to_event)
        .map_err(db("Query events"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db("Read events"))
}

/// Fill `attendees` for every event with one query.
pub(crate) fn attach_attendees(conn: &Connection, tenant: &TenantId, events: &mut [Event]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
    let mut by_event = crate::attendees::for_events(conn, tenant, &ids)?;
    for event in events.iter_mut() {
        event.attendees = by_event.remove(&event.id).unwrap_or_default();
    }
    Ok(())
}

/// Visible, non-deleted events intersecting `[start, end]`, ordered by start.
pub fn events_in_range(
    conn: &Connection,
    tenant: &TenantId,
    viewer: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let filter = EventFilter {
        from: Some(start),
        to: Some(end),
        ..EventFilter::default()
    };
    let scope = build_filter(tenant, viewer, &filter, true);
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM schedule_events e{} ORDER BY e.start_at ASC, e.id ASC",
        scope.where_sql()
    );
    let mut events = query_events(conn, &sql, &scope.values)?;
    attach_attendees(conn, tenant, &mut events)?;
    Ok(events)
}

/// Count of generated instances of `parent`.
pub fn count_children(conn: &Connection, tenant: &TenantId, parent: Uuid) -> Result<u64> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM schedule_events
             WHERE tenant_id = ?1 AND parent_event_id = ?2 AND deleted_at IS NULL",
            params![tenant.as_str(), parent.to_string()],
            |r| r.get(0),
        )
        .map_err(db("Count children"))?;
    Ok(n.max(0) as u64)
}

/// Group helper shared with the attendee module.
pub(crate) fn group_by_event(attendees: Vec<Attendee>) -> HashMap<Uuid, Vec<Attendee>> {
    let mut out: HashMap<Uuid, Vec<Attendee>> = HashMap::new();
    for attendee in attendees {
        out.entry(attendee.event_id).or_default().push(attendee);
    }
    out
}
