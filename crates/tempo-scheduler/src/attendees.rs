//! Attendee lifecycle: who takes part in an event and how they answered.
//!
//! An attendee's response is tracked independently of the event status and
//! moves freely between the six response states. Rows are never physically
//! removed; removal and list replacement soft-delete them.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::{HashMap, HashSet};
use tempo_core::error::{Result, TempoError};
use uuid::Uuid;

use crate::model::{Attendee, AttendeeInput, ResponseStatus, TenantId};
use crate::store::{attendee_select, db, group_by_event, row_to_attendee, ts};

/// Active attendees of one event, in the order they were added.
pub fn list(conn: &Connection, tenant: &TenantId, event_id: Uuid) -> Result<Vec<Attendee>> {
    let sql = format!(
        "{} WHERE event_id = ?1 AND tenant_id = ?2 AND deleted_at IS NULL ORDER BY created_at, rowid",
        attendee_select()
    );
    let mut stmt = conn.prepare(&sql).map_err(db("Prepare attendees"))?;
    let rows = stmt
        .query_map(params![event_id.to_string(), tenant.as_str()], row_to_attendee)
        .map_err(db("Query attendees"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db("Read attendees"))
}

/// Active attendees for several events at once, keyed by event id.
pub fn for_events(
    conn: &Connection,
    tenant: &TenantId,
    event_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Attendee>>> {
    if event_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; event_ids.len()].join(", ");
    let sql = format!(
        "{} WHERE tenant_id = ? AND deleted_at IS NULL AND event_id IN ({placeholders}) \
         ORDER BY created_at, rowid",
        attendee_select()
    );
    let mut values = vec![Value::Text(tenant.as_str().to_string())];
    values.extend(event_ids.iter().map(|id| Value::Text(id.to_string())));

    let mut stmt = conn.prepare(&sql).map_err(db("Prepare attendees"))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), row_to_attendee)
        .map_err(db("Query attendees"))?;
    let attendees = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db("Read attendees"))?;
    Ok(group_by_event(attendees))
}

/// One active attendee row of `event_id`, or `NotFound`.
pub fn get(conn: &Connection, tenant: &TenantId, event_id: Uuid, attendee_id: Uuid) -> Result<Attendee> {
    let sql = format!(
        "{} WHERE id = ?1 AND event_id = ?2 AND tenant_id = ?3 AND deleted_at IS NULL",
        attendee_select()
    );
    conn.query_row(
        &sql,
        params![attendee_id.to_string(), event_id.to_string(), tenant.as_str()],
        row_to_attendee,
    )
    .optional()
    .map_err(db("Get attendee"))?
    .ok_or_else(|| TempoError::not_found(format!("attendee {attendee_id} not found")))
}

fn ensure_event(conn: &Connection, tenant: &TenantId, event_id: Uuid) -> Result<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM schedule_events WHERE id = ?1 AND tenant_id = ?2 AND deleted_at IS NULL",
            params![event_id.to_string(), tenant.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map_err(db("Check event"))?;
    exists.ok_or_else(|| TempoError::not_found(format!("event {event_id} not found")))
}

fn is_active(conn: &Connection, event_id: Uuid, key: &str) -> Result<bool> {
    let hit = conn
        .query_row(
            "SELECT 1 FROM schedule_attendees
             WHERE event_id = ?1 AND participant_key = ?2 AND deleted_at IS NULL",
            params![event_id.to_string(), key],
            |_| Ok(()),
        )
        .optional()
        .map_err(db("Check attendee"))?;
    Ok(hit.is_some())
}

fn insert(
    conn: &Connection,
    tenant: &TenantId,
    event_id: Uuid,
    key: &str,
    input: &AttendeeInput,
) -> Result<Attendee> {
    let attendee = Attendee {
        id: Uuid::new_v4(),
        event_id,
        user_id: input.normalized_user_id(),
        email: input.normalized_email(),
        name: input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
        response: ResponseStatus::Invited,
        is_organizer: input.is_organizer,
        responded_at: None,
        created_at: Utc::now(),
        deleted_at: None,
    };
    conn.execute(
        "INSERT INTO schedule_attendees (id, event_id, tenant_id, user_id, email, name,
            participant_key, response, is_organizer, responded_at, created_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, NULL)",
        params![
            attendee.id.to_string(),
            event_id.to_string(),
            tenant.as_str(),
            attendee.user_id,
            attendee.email,
            attendee.name,
            key,
            attendee.response.as_str(),
            attendee.is_organizer,
            ts(&attendee.created_at),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
            TempoError::conflict(format!("participant {key} is already attending"))
        }
        other => TempoError::Database(format!("Insert attendee: {other}")),
    })?;
    Ok(attendee)
}

/// Add one participant. The response starts as `invited`.
///
/// Fails with `Validation` when the input has neither a user id nor a valid
/// email or names the event creator, and with `Conflict` when the
/// participant is already active on the event.
pub fn add(
    conn: &Connection,
    tenant: &TenantId,
    event_id: Uuid,
    creator: &str,
    input: &AttendeeInput,
) -> Result<Attendee> {
    let key = input.participant_key()?;
    ensure_event(conn, tenant, event_id)?;
    if input.normalized_user_id().as_deref() == Some(creator) {
        return Err(TempoError::validation(
            "the event creator cannot be added as an attendee",
        ));
    }
    if is_active(conn, event_id, &key)? {
        return Err(TempoError::conflict(format!(
            "participant {key} is already attending"
        )));
    }
    insert(conn, tenant, event_id, &key, input)
}

/// Set a response. Any state may follow any other; `responded_at` is
/// stamped on every call.
pub fn update_response(
    conn: &Connection,
    tenant: &TenantId,
    event_id: Uuid,
    attendee_id: Uuid,
    response: ResponseStatus,
) -> Result<Attendee> {
    get(conn, tenant, event_id, attendee_id)?;
    conn.execute(
        "UPDATE schedule_attendees SET response = ?1, responded_at = ?2
         WHERE id = ?3 AND tenant_id = ?4 AND deleted_at IS NULL",
        params![
            response.as_str(),
            ts(&Utc::now()),
            attendee_id.to_string(),
            tenant.as_str()
        ],
    )
    .map_err(db("Update response"))?;
    get(conn, tenant, event_id, attendee_id)
}

/// Soft-delete one attendee row.
pub fn remove(conn: &Connection, tenant: &TenantId, event_id: Uuid, attendee_id: Uuid) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE schedule_attendees SET deleted_at = ?1
             WHERE id = ?2 AND event_id = ?3 AND tenant_id = ?4 AND deleted_at IS NULL",
            params![
                ts(&Utc::now()),
                attendee_id.to_string(),
                event_id.to_string(),
                tenant.as_str()
            ],
        )
        .map_err(db("Remove attendee"))?;
    if changed == 0 {
        return Err(TempoError::not_found(format!("attendee {attendee_id} not found")));
    }
    Ok(())
}

/// Hard reset: soft-delete every active attendee, then add `inputs`.
///
/// The creator is skipped and repeated participants collapse to their first
/// occurrence. Prior responses are not carried over.
pub fn replace_all(
    conn: &Connection,
    tenant: &TenantId,
    event_id: Uuid,
    creator: &str,
    inputs: &[AttendeeInput],
) -> Result<Vec<Attendee>> {
    // Validate the whole list before touching any row.
    let keys = inputs
        .iter()
        .map(AttendeeInput::participant_key)
        .collect::<Result<Vec<_>>>()?;
    ensure_event(conn, tenant, event_id)?;

    conn.execute(
        "UPDATE schedule_attendees SET deleted_at = ?1
         WHERE event_id = ?2 AND tenant_id = ?3 AND deleted_at IS NULL",
        params![ts(&Utc::now()), event_id.to_string(), tenant.as_str()],
    )
    .map_err(db("Clear attendees"))?;

    let creator_key = format!("user:{creator}");
    let mut seen = HashSet::new();
    let mut added = Vec::with_capacity(inputs.len());
    for (input, key) in inputs.iter().zip(&keys) {
        if *key == creator_key || !seen.insert(key.as_str()) {
            continue;
        }
        added.push(insert(conn, tenant, event_id, key, input)?);
    }
    tracing::debug!("Replaced attendees of {event_id}: {} active", added.len());
    Ok(added)
}

/// User ids among `inputs`, skipping the creator and duplicates.
pub fn participant_user_ids(creator: &str, inputs: &[AttendeeInput]) -> Vec<String> {
    let mut ids = vec![creator.to_string()];
    for input in inputs {
        if let Some(user_id) = input.normalized_user_id()
            && !ids.contains(&user_id)
        {
            ids.push(user_id);
        }
    }
    ids
}
