//! Calendar aggregation — day and week buckets plus summary counts.
//!
//! [`aggregate`] is a pure function of an already-fetched event list; it
//! re-applies the range and visibility rules so it never depends on the
//! caller having filtered.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use tempo_core::config::SchedulingConfig;
use tempo_core::error::{Result, TempoError};

use crate::model::{Event, TenantId};
use crate::store::events_in_range;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarEntry {
    #[serde(flatten)]
    pub event: Event,
    /// Viewer created or attends the event.
    pub is_participant: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarView {
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub events: Vec<CalendarEntry>,
    /// Keyed by local start date.
    pub by_date: BTreeMap<NaiveDate, Vec<CalendarEntry>>,
    /// Keyed by the Sunday on or before the local start date.
    pub by_week: BTreeMap<NaiveDate, Vec<CalendarEntry>>,
    pub stats: CalendarStats,
}

/// `end >= start` and the span fits within `max_span_days`.
pub fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>, max_span_days: u32) -> Result<()> {
    if end < start {
        return Err(TempoError::validation("calendar end must not be before start"));
    }
    if end - start > Duration::days(i64::from(max_span_days)) {
        return Err(TempoError::validation(format!(
            "calendar range may span at most {max_span_days} days"
        )));
    }
    Ok(())
}

/// Offset used for local day keys.
pub fn local_offset(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60)
        .ok_or_else(|| TempoError::Config(format!("invalid calendar UTC offset {minutes} minutes")))
}

/// Sunday on or before `date`.
pub fn week_key(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// Build the view from `events`. Events outside `[start, end]` or not
/// visible to `viewer` are dropped.
pub fn aggregate(
    events: Vec<Event>,
    viewer: &str,
    offset: FixedOffset,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CalendarView {
    let mut entries: Vec<CalendarEntry> = events
        .into_iter()
        .filter(|e| e.deleted_at.is_none())
        .filter(|e| e.start_at <= end && e.window_end() >= start)
        .filter(|e| e.is_visible_to(viewer))
        .map(|event| CalendarEntry {
            is_participant: event.involves(viewer),
            event,
        })
        .collect();
    entries.sort_by(|a, b| {
        a.event
            .start_at
            .cmp(&b.event.start_at)
            .then_with(|| a.event.id.cmp(&b.event.id))
    });

    let mut by_date: BTreeMap<NaiveDate, Vec<CalendarEntry>> = BTreeMap::new();
    let mut by_week: BTreeMap<NaiveDate, Vec<CalendarEntry>> = BTreeMap::new();
    let mut stats = CalendarStats::default();

    for entry in &entries {
        let day = entry.event.start_at.with_timezone(&offset).date_naive();
        by_date.entry(day).or_default().push(entry.clone());
        by_week.entry(week_key(day)).or_default().push(entry.clone());

        stats.total += 1;
        *stats.by_status.entry(entry.event.status.to_string()).or_default() += 1;
        *stats.by_type.entry(entry.event.event_type.to_string()).or_default() += 1;
        *stats.by_priority.entry(entry.event.priority.to_string()).or_default() += 1;
    }

    CalendarView {
        range_start: start,
        range_end: end,
        events: entries,
        by_date,
        by_week,
        stats,
    }
}

/// Validate the range, fetch visible events, and aggregate them.
pub fn calendar_view(
    conn: &Connection,
    tenant: &TenantId,
    viewer: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &SchedulingConfig,
) -> Result<CalendarView> {
    validate_range(start, end, config.max_calendar_span_days)?;
    let offset = local_offset(config.calendar_utc_offset_minutes)?;
    let events = events_in_range(conn, tenant, viewer, start, end)?;
    tracing::debug!("📅 Calendar {start} – {end}: {} event(s)", events.len());
    Ok(aggregate(events, viewer, offset, start, end))
}

/// UTC as a fixed offset.
pub fn utc_offset() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendees;
    use crate::model::{Actor, AttendeeInput, EventStatus, EventType, NewEvent};
    use crate::store::{EventStore, create_event};
    use chrono::TimeZone;

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, h, 0, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn seed(store: &EventStore, user: &str, title: &str, start: DateTime<Utc>, private: bool) -> Event {
        let actor = Actor::new(TenantId::new("acme").unwrap(), user).unwrap();
        let input = NewEvent {
            title: title.into(),
            start_at: Some(start),
            end_at: Some(start + Duration::hours(1)),
            is_private: private,
            event_type: EventType::Meeting,
            ..Default::default()
        };
        store.write(|tx| create_event(tx, &actor, &input)).unwrap()
    }

    #[test]
    fn test_week_key_is_sunday() {
        // 2026-03-01 is a Sunday.
        assert_eq!(week_key(date(1)), date(1));
        assert_eq!(week_key(date(4)), date(1));
        assert_eq!(week_key(date(7)), date(1));
        assert_eq!(week_key(date(8)), date(8));
    }

    #[test]
    fn test_range_validation() {
        assert!(validate_range(at(2, 0), at(2, 0), 366).is_ok());
        assert_eq!(validate_range(at(3, 0), at(2, 0), 366).unwrap_err().kind(), "validation_error");
        assert_eq!(validate_range(at(1, 0), at(20, 0), 7).unwrap_err().kind(), "validation_error");
    }

    #[test]
    fn test_groups_and_stats() {
        let store = EventStore::open_in_memory().unwrap();
        seed(&store, "u1", "Mon", at(2, 9), false);
        seed(&store, "u1", "Mon late", at(2, 15), false);
        seed(&store, "u2", "Sun", at(8, 9), false);
        let tenant = TenantId::new("acme").unwrap();

        let view = store
            .read(|c| calendar_view(c, &tenant, "u1", at(1, 0), at(10, 0), &SchedulingConfig::default()))
            .unwrap();
        assert_eq!(view.stats.total, 3);
        assert_eq!(view.stats.by_type["meeting"], 3);
        assert_eq!(view.stats.by_status["scheduled"], 3);
        assert_eq!(view.by_date[&date(2)].len(), 2);
        assert_eq!(view.by_week[&date(1)].len(), 2);
        assert_eq!(view.by_week[&date(8)].len(), 1);

        let flags: Vec<bool> = view.events.iter().map(|e| e.is_participant).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn test_never_leaks_private_events() {
        let store = EventStore::open_in_memory().unwrap();
        let secret = seed(&store, "u1", "Secret", at(2, 9), true);
        let tenant = secret.tenant_id.clone();
        let config = SchedulingConfig::default();

        let outsider = store
            .read(|c| calendar_view(c, &tenant, "u3", at(1, 0), at(5, 0), &config))
            .unwrap();
        assert_eq!(outsider.stats.total, 0);

        store
            .write(|tx| attendees::add(tx, &tenant, secret.id, "u1", &AttendeeInput::user("u3")))
            .unwrap();
        let invited = store
            .read(|c| calendar_view(c, &tenant, "u3", at(1, 0), at(5, 0), &config))
            .unwrap();
        assert_eq!(invited.stats.total, 1);
        assert!(invited.events[0].is_participant);

        // The pure aggregator filters on its own.
        let raw = store.read(|c| crate::store::get_event(c, &tenant, secret.id)).unwrap();
        let view = aggregate(vec![raw], "u9", utc_offset(), at(1, 0), at(5, 0));
        assert!(view.events.is_empty());
    }

    #[test]
    fn test_local_offset_shifts_day_keys() {
        let store = EventStore::open_in_memory().unwrap();
        seed(&store, "u1", "Late UTC", at(2, 20), false);
        let tenant = TenantId::new("acme").unwrap();
        let config = SchedulingConfig {
            calendar_utc_offset_minutes: 7 * 60,
            ..SchedulingConfig::default()
        };
        let view = store
            .read(|c| calendar_view(c, &tenant, "u1", at(1, 0), at(5, 0), &config))
            .unwrap();
        assert!(view.by_date.contains_key(&date(3)));
    }

    #[test]
    fn test_intersection_includes_overhanging_and_instants() {
        let spanning = sample(at(1, 22), Some(at(2, 2)));
        let instant = sample(at(3, 12), None);
        let outside = sample(at(6, 9), Some(at(6, 10)));
        let mut cancelled = sample(at(3, 9), Some(at(3, 10)));
        cancelled.status = EventStatus::Cancelled;

        let view = aggregate(
            vec![outside, instant, spanning, cancelled],
            "u1",
            utc_offset(),
            at(2, 0),
            at(4, 0),
        );
        assert_eq!(view.stats.total, 3);
        assert_eq!(view.stats.by_status["cancelled"], 1);
        assert_eq!(view.events[0].event.start_at, at(1, 22));
    }

    fn sample(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Event {
        let now = Utc::now();
        Event {
            id: uuid::Uuid::new_v4(),
            tenant_id: TenantId::new("acme").unwrap(),
            title: "x".into(),
            description: None,
            start_at: start,
            end_at: end,
            all_day: false,
            event_type: EventType::Task,
            priority: Default::default(),
            status: Default::default(),
            location: None,
            meeting_url: None,
            client_id: None,
            lead_id: None,
            sale_id: None,
            is_private: false,
            recurring: false,
            recurring_frequency: None,
            recurring_until: None,
            recurring_count: None,
            parent_event_id: None,
            created_by: "u2".into(),
            created_by_name: None,
            tags: Vec::new(),
            custom_fields: Default::default(),
            reminders: Vec::new(),
            status_notes: None,
            completed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            attendees: Vec::new(),
        }
    }
}
