//! Conflict detection — finds existing events that overlap a candidate
//! window and share at least one participant with it.
//!
//! Overlap is half-open: `[s1, e1)` and `[s2, e2)` collide iff
//! `s1 < e2 && s2 < e1`, so back-to-back events never conflict. Cancelled,
//! completed, and deleted events do not occupy time, and neither do events
//! without an end.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tempo_core::error::Result;
use uuid::Uuid;

use crate::model::{Event, EventStatus, EventType, Priority, TenantId};
use crate::store::{attach_attendees, query_events, ts};

/// An existing event that collides with the candidate window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConflict {
    pub id: Uuid,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub event_type: EventType,
    pub priority: Priority,
    pub organizer_name: String,
    /// Queried participants that take part in this event.
    pub involved_participants: Vec<String>,
}

/// Half-open interval overlap.
pub fn overlaps(
    s1: DateTime<Utc>,
    e1: DateTime<Utc>,
    s2: DateTime<Utc>,
    e2: DateTime<Utc>,
) -> bool {
    s1 < e2 && s2 < e1
}

/// Candidate window checked against stored events.
#[derive(Debug, Clone)]
pub struct ConflictQuery<'a> {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    /// User ids of the organizer and attendees.
    pub participants: &'a [String],
    /// The event being updated, never reported against itself.
    pub exclude: Option<Uuid>,
}

/// Conflicts for `query`, ordered by start then id.
pub fn find_conflicts(
    conn: &Connection,
    tenant: &TenantId,
    query: &ConflictQuery<'_>,
) -> Result<Vec<ScheduleConflict>> {
    let Some(end) = query.end else {
        return Ok(Vec::new());
    };
    if query.participants.is_empty() || end <= query.start {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; query.participants.len()].join(", ");
    let mut sql = format!(
        "SELECT {cols} FROM schedule_events e
         WHERE e.tenant_id = ? AND e.deleted_at IS NULL
           AND e.status NOT IN (?, ?)
           AND e.end_at IS NOT NULL AND e.start_at < ? AND e.end_at > ?
           AND (e.created_by IN ({placeholders}) OR EXISTS (
                SELECT 1 FROM schedule_attendees a
                WHERE a.event_id = e.id AND a.deleted_at IS NULL
                  AND a.user_id IN ({placeholders})))",
        cols = crate::store::EVENT_COLUMNS,
    );

    let mut values = vec![
        Value::Text(tenant.as_str().to_string()),
        Value::Text(EventStatus::Cancelled.as_str().into()),
        Value::Text(EventStatus::Completed.as_str().into()),
        Value::Text(ts(&end)),
        Value::Text(ts(&query.start)),
    ];
    for _ in 0..2 {
        values.extend(query.participants.iter().map(|p| Value::Text(p.clone())));
    }
    if let Some(exclude) = query.exclude {
        sql.push_str(" AND e.id != ?");
        values.push(Value::Text(exclude.to_string()));
    }
    sql.push_str(" ORDER BY e.start_at ASC, e.id ASC");

    let mut events = query_events(conn, &sql, &values)?;
    attach_attendees(conn, tenant, &mut events)?;

    let conflicts: Vec<ScheduleConflict> = events
        .iter()
        .filter_map(|event| to_conflict(event, query, end))
        .collect();
    if !conflicts.is_empty() {
        tracing::debug!(
            "⚠️ {} conflict(s) for window {} – {}",
            conflicts.len(),
            query.start,
            end
        );
    }
    Ok(conflicts)
}

fn to_conflict(event: &Event, query: &ConflictQuery<'_>, end: DateTime<Utc>) -> Option<ScheduleConflict> {
    let event_end = event.end_at?;
    if !event.status.blocks_time() || !overlaps(query.start, end, event.start_at, event_end) {
        return None;
    }
    let involved: Vec<String> = query
        .participants
        .iter()
        .filter(|p| event.involves(p))
        .cloned()
        .collect();
    if involved.is_empty() {
        return None;
    }
    Some(ScheduleConflict {
        id: event.id,
        title: event.title.clone(),
        start_at: event.start_at,
        end_at: event_end,
        event_type: event.event_type,
        priority: event.priority,
        organizer_name: event.organizer_name(),
        involved_participants: involved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendees;
    use crate::model::{Actor, AttendeeInput, NewEvent};
    use crate::store::{EventStore, create_event, set_status, StatusStamp};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn seed(store: &EventStore, user: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Event {
        let actor = Actor::new(TenantId::new("acme").unwrap(), user)
            .unwrap()
            .with_name(format!("{user} name"));
        let input = NewEvent {
            title: format!("{user} busy"),
            start_at: Some(start),
            end_at: Some(end),
            ..Default::default()
        };
        store.write(|tx| create_event(tx, &actor, &input)).unwrap()
    }

    fn check(store: &EventStore, start: DateTime<Utc>, end: DateTime<Utc>, who: &[&str], exclude: Option<Uuid>) -> Vec<ScheduleConflict> {
        let participants: Vec<String> = who.iter().map(|s| s.to_string()).collect();
        let query = ConflictQuery {
            start,
            end: Some(end),
            participants: &participants,
            exclude,
        };
        store
            .read(|c| find_conflicts(c, &TenantId::new("acme").unwrap(), &query))
            .unwrap()
    }

    #[test]
    fn test_overlap_predicate() {
        assert!(overlaps(at(10, 0), at(11, 0), at(10, 30), at(11, 30)));
        assert!(!overlaps(at(10, 0), at(11, 0), at(11, 0), at(12, 0)));
        assert!(overlaps(at(9, 0), at(12, 0), at(10, 0), at(11, 0)));
    }

    #[test]
    fn test_touching_boundaries_do_not_conflict() {
        let store = EventStore::open_in_memory().unwrap();
        seed(&store, "u1", at(10, 0), at(11, 0));
        assert!(check(&store, at(11, 0), at(12, 0), &["u1"], None).is_empty());
        assert!(check(&store, at(9, 0), at(10, 0), &["u1"], None).is_empty());
    }

    #[test]
    fn test_overlap_with_shared_participant() {
        let store = EventStore::open_in_memory().unwrap();
        let existing = seed(&store, "u1", at(10, 0), at(11, 0));
        let found = check(&store, at(10, 30), at(11, 30), &["u1", "u9"], None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, existing.id);
        assert_eq!(found[0].organizer_name, "u1 name");
        assert_eq!(found[0].involved_participants, vec!["u1"]);

        assert!(check(&store, at(10, 30), at(11, 30), &["u2"], None).is_empty());
    }

    #[test]
    fn test_attendee_counts_as_participant() {
        let store = EventStore::open_in_memory().unwrap();
        let existing = seed(&store, "u1", at(10, 0), at(11, 0));
        let tenant = existing.tenant_id.clone();
        store
            .write(|tx| attendees::add(tx, &tenant, existing.id, "u1", &AttendeeInput::user("u2")))
            .unwrap();
        let found = check(&store, at(10, 15), at(10, 45), &["u2", "u3"], None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].involved_participants, vec!["u2"]);
    }

    #[test]
    fn test_excludes_self_and_inactive_states() {
        let store = EventStore::open_in_memory().unwrap();
        let a = seed(&store, "u1", at(10, 0), at(11, 0));
        assert!(check(&store, at(10, 0), at(11, 0), &["u1"], Some(a.id)).is_empty());

        store
            .write(|tx| set_status(tx, &a.tenant_id, a.id, EventStatus::Cancelled, None, StatusStamp::CancelledAt(Utc::now())))
            .unwrap();
        assert!(check(&store, at(10, 0), at(11, 0), &["u1"], None).is_empty());
    }

    #[test]
    fn test_ordering_and_open_ended() {
        let store = EventStore::open_in_memory().unwrap();
        let late = seed(&store, "u1", at(11, 0), at(12, 0));
        let early = seed(&store, "u1", at(9, 0), at(10, 30));
        let found = check(&store, at(10, 0), at(11, 30), &["u1"], None);
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let participants = vec!["u1".to_string()];
        let open = ConflictQuery {
            start: at(10, 0),
            end: None,
            participants: &participants,
            exclude: None,
        };
        let tenant = TenantId::new("acme").unwrap();
        assert!(store.read(|c| find_conflicts(c, &tenant, &open)).unwrap().is_empty());
    }

    #[test]
    fn test_events_without_end_never_block() {
        let store = EventStore::open_in_memory().unwrap();
        let actor = Actor::new(TenantId::new("acme").unwrap(), "u1").unwrap();
        let input = NewEvent {
            title: "Reminder".into(),
            start_at: Some(at(10, 30)),
            ..Default::default()
        };
        store.write(|tx| create_event(tx, &actor, &input)).unwrap();
        assert!(check(&store, at(10, 0), at(11, 0), &["u1"], None).is_empty());
    }
}
