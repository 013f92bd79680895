//! Recurrence expansion — materializes child instances of a recurring event.
//!
//! Dates come from [`Occurrences`], a pure iterator: every date is one
//! frequency unit after the previous date (not after the base date), and
//! iteration stops at the until-bound, the count bound, or the safety cap,
//! whichever comes first. Month and year steps clamp to the last valid day
//! of the target month, so Jan 31 steps to Feb 28 and then to Mar 28.

use chrono::{DateTime, Duration, Months, Utc};
use rusqlite::Connection;
use tempo_core::config::SchedulingConfig;
use tempo_core::error::Result;
use uuid::Uuid;

use crate::model::{Event, Frequency, to_millis};
use crate::store::insert_event;

/// Advance `from` by one unit of `frequency`. `None` past chrono's range.
pub fn step(from: DateTime<Utc>, frequency: Frequency) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Daily => from.checked_add_signed(Duration::days(1)),
        Frequency::Weekly => from.checked_add_signed(Duration::days(7)),
        Frequency::Monthly => from.checked_add_months(Months::new(1)),
        Frequency::Yearly => from.checked_add_months(Months::new(12)),
    }
}

/// Start instants of the generated children, base start excluded.
#[derive(Debug, Clone)]
pub struct Occurrences {
    frequency: Frequency,
    cursor: DateTime<Utc>,
    duration: Duration,
    until: DateTime<Utc>,
    remaining: u32,
}

impl Occurrences {
    pub fn new(
        start: DateTime<Utc>,
        duration: Duration,
        frequency: Frequency,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Self {
        Self {
            frequency,
            cursor: start,
            duration,
            until,
            remaining: limit,
        }
    }

    /// Bounds for a stored base event, or `None` when it does not recur.
    pub fn for_event(base: &Event, config: &SchedulingConfig) -> Option<Self> {
        if !base.recurring || base.parent_event_id.is_some() {
            return None;
        }
        let frequency = base.recurring_frequency?;
        let horizon = Duration::days(i64::from(config.recurrence_horizon_days));
        let until = base
            .recurring_until
            .or_else(|| base.start_at.checked_add_signed(horizon))?;
        let limit = base
            .recurring_count
            .map_or(config.recurrence_cap, |count| count.min(config.recurrence_cap));
        Some(Self::new(
            base.start_at,
            base.duration().unwrap_or_else(Duration::zero),
            frequency,
            until,
            limit,
        ))
    }
}

impl Iterator for Occurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let next = step(self.cursor, self.frequency)?;
        let end = next.checked_add_signed(self.duration)?;
        if next >= self.until || end >= self.until {
            self.remaining = 0;
            return None;
        }
        self.cursor = next;
        self.remaining -= 1;
        Some(next)
    }
}

/// Build the child instance of `base` starting at `start`.
pub fn child_of(base: &Event, start: DateTime<Utc>, now: DateTime<Utc>) -> Event {
    Event {
        id: Uuid::new_v4(),
        start_at: start,
        end_at: base.duration().map(|d| start + d),
        recurring: false,
        recurring_frequency: None,
        recurring_until: None,
        recurring_count: None,
        parent_event_id: Some(base.id),
        status_notes: None,
        completed_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        attendees: Vec::new(),
        ..base.clone()
    }
}

/// Persist every child of `base`. Must run in the transaction that
/// inserted `base`; an error aborts the whole write.
pub fn expand(conn: &Connection, base: &Event, config: &SchedulingConfig) -> Result<Vec<Event>> {
    let Some(occurrences) = Occurrences::for_event(base, config) else {
        return Ok(Vec::new());
    };
    let now = to_millis(Utc::now());
    let mut children = Vec::new();
    for start in occurrences {
        let child = child_of(base, start, now);
        insert_event(conn, &child)?;
        children.push(child);
    }
    tracing::debug!(
        "🔁 Expanded {} into {} instance(s) ({:?})",
        base.id,
        children.len(),
        base.recurring_frequency
    );
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, NewEvent, TenantId};
    use crate::store::{EventStore, count_children, create_event};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_until_three_days() {
        let start = at(2026, 3, 2, 9);
        let dates: Vec<_> = Occurrences::new(start, Duration::hours(1), Frequency::Daily, start + Duration::days(3), 50).collect();
        assert_eq!(dates, vec![at(2026, 3, 3, 9), at(2026, 3, 4, 9)]);
    }

    #[test]
    fn test_child_end_reaching_bound_stops() {
        let start = at(2026, 3, 2, 9);
        let until = at(2026, 3, 4, 9) + Duration::minutes(30);
        let dates: Vec<_> = Occurrences::new(start, Duration::hours(1), Frequency::Daily, until, 50).collect();
        assert_eq!(dates, vec![at(2026, 3, 3, 9)]);
    }

    #[test]
    fn test_touching_bound_is_excluded() {
        let start = at(2026, 3, 2, 9);
        let dates: Vec<_> = Occurrences::new(start, Duration::zero(), Frequency::Weekly, at(2026, 3, 16, 9), 50).collect();
        assert_eq!(dates, vec![at(2026, 3, 9, 9)]);
    }

    #[test]
    fn test_count_and_cap() {
        let start = at(2026, 1, 1, 9);
        let far = at(2030, 1, 1, 0);
        assert_eq!(Occurrences::new(start, Duration::hours(1), Frequency::Daily, far, 5).count(), 5);

        let mut config = SchedulingConfig::default();
        let mut base = sample_base(start);
        base.recurring_until = Some(far);
        base.recurring_count = Some(500);
        assert_eq!(Occurrences::for_event(&base, &config).unwrap().count(), 50);

        base.recurring_count = None;
        assert_eq!(Occurrences::for_event(&base, &config).unwrap().count(), 50);

        config.recurrence_cap = 7;
        base.recurring_count = Some(3);
        assert_eq!(Occurrences::for_event(&base, &config).unwrap().count(), 3);
    }

    #[test]
    fn test_default_horizon_is_one_year() {
        let start = at(2026, 1, 15, 9);
        let mut base = sample_base(start);
        base.recurring_frequency = Some(Frequency::Monthly);
        let dates: Vec<_> = Occurrences::for_event(&base, &SchedulingConfig::default()).unwrap().collect();
        assert_eq!(dates.len(), 11);
        assert_eq!(dates.last().copied(), Some(at(2026, 12, 15, 9)));
    }

    #[test]
    fn test_monthly_clamps_and_drifts() {
        let start = at(2026, 1, 31, 9);
        let dates: Vec<_> = Occurrences::new(start, Duration::hours(1), Frequency::Monthly, at(2026, 5, 1, 0), 50).collect();
        assert_eq!(dates, vec![at(2026, 2, 28, 9), at(2026, 3, 28, 9), at(2026, 4, 28, 9)]);
    }

    #[test]
    fn test_yearly_from_leap_day() {
        let start = at(2028, 2, 29, 9);
        let dates: Vec<_> = Occurrences::new(start, Duration::hours(1), Frequency::Yearly, at(2031, 1, 1, 0), 50).collect();
        assert_eq!(dates, vec![at(2029, 2, 28, 9), at(2030, 2, 28, 9)]);
    }

    #[test]
    fn test_non_recurring_and_children_yield_nothing() {
        let mut base = sample_base(at(2026, 3, 2, 9));
        base.recurring = false;
        assert!(Occurrences::for_event(&base, &SchedulingConfig::default()).is_none());

        let mut child = sample_base(at(2026, 3, 2, 9));
        child.parent_event_id = Some(Uuid::new_v4());
        assert!(Occurrences::for_event(&child, &SchedulingConfig::default()).is_none());

        let mut unset = sample_base(at(2026, 3, 2, 9));
        unset.recurring_frequency = None;
        assert!(Occurrences::for_event(&unset, &SchedulingConfig::default()).is_none());
    }

    #[test]
    fn test_expand_persists_children() {
        let store = EventStore::open_in_memory().unwrap();
        let actor = Actor::new(TenantId::new("acme").unwrap(), "u1").unwrap();
        let start = at(2026, 3, 2, 9);
        let input = NewEvent {
            title: "Standup".into(),
            start_at: Some(start),
            end_at: Some(start + Duration::hours(1)),
            recurring: true,
            recurring_frequency: Some("daily".into()),
            recurring_until: Some(start + Duration::days(3)),
            tags: vec!["team".into()],
            ..Default::default()
        };

        let (base, children) = store
            .write(|tx| {
                let base = create_event(tx, &actor, &input)?;
                let children = expand(tx, &base, &SchedulingConfig::default())?;
                Ok((base, children))
            })
            .unwrap();

        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.parent_event_id, Some(base.id));
            assert!(!child.recurring);
            assert_eq!(child.duration(), base.duration());
            assert_eq!(child.tags, base.tags);
            assert_eq!(child.created_by, "u1");
        }
        assert_eq!(store.read(|c| count_children(c, &actor.tenant_id, base.id)).unwrap(), 2);
        let stored = store.get(&actor.tenant_id, children[0].id).unwrap();
        assert_eq!(stored.start_at, at(2026, 3, 3, 9));
    }

    fn sample_base(start: DateTime<Utc>) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            tenant_id: TenantId::new("acme").unwrap(),
            title: "Base".into(),
            description: None,
            start_at: start,
            end_at: Some(start + Duration::hours(1)),
            all_day: false,
            event_type: Default::default(),
            priority: Default::default(),
            status: Default::default(),
            location: None,
            meeting_url: None,
            client_id: None,
            lead_id: None,
            sale_id: None,
            is_private: false,
            recurring: true,
            recurring_frequency: Some(Frequency::Daily),
            recurring_until: None,
            recurring_count: None,
            parent_event_id: None,
            created_by: "u1".into(),
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
