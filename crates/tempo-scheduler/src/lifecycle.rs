//! Event lifecycle — the caller-facing scheduling operations.
//!
//! [`ScheduleService`] authorizes the actor, runs the optional conflict
//! check, performs each multi-step write in one transaction, and queues the
//! reward and audit effects inside that transaction. Effects are delivered
//! after commit.
//!
//! ## Status machine
//! ```text
//! scheduled → confirmed → in_progress → completed
//!     └──────────┴────────────┴──────→ cancelled | no_show
//! ```
//! Under the default permissive policy any transition is accepted. The
//! strict policy rejects leaving a terminal state and no-op transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempo_core::config::{TempoConfig, TransitionPolicy};
use tempo_core::error::{Result, TempoError};
use uuid::Uuid;

use crate::attendees;
use crate::calendar::{self, CalendarView};
use crate::conflict::{ConflictQuery, ScheduleConflict, find_conflicts};
use crate::effects::{
    AuditEntry, AuditLog, DrainReport, EffectDispatcher, RewardAmount, RewardLedger, SideEffect,
    enqueue,
};
use crate::model::{
    Actor, Attendee, AttendeeInput, Event, EventPatch, EventStatus, EventType, NewEvent,
    ResponseStatus, to_millis,
};
use crate::recurrence;
use crate::store::{self, EventFilter, EventPage, EventSort, EventStore, PageRequest, StatusStamp};

/// Caller control over the advisory conflict check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    #[serde(default)]
    pub check_conflicts: bool,
    /// Proceed even when conflicts exist.
    #[serde(default)]
    pub ignore_conflicts: bool,
}

impl WriteOptions {
    pub fn checked() -> Self {
        Self {
            check_conflicts: true,
            ignore_conflicts: false,
        }
    }

    fn should_check(&self) -> bool {
        self.check_conflicts && !self.ignore_conflicts
    }
}

/// Result of a write that may be held back by scheduling conflicts.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    Done(T),
    /// Nothing was written.
    Conflicts(Vec<ScheduleConflict>),
}

impl<T> WriteOutcome<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Conflicts(_) => None,
        }
    }
}

/// A created base event and the instances generated from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedEvent {
    #[serde(flatten)]
    pub event: Event,
    pub generated_instances: Vec<Uuid>,
}

/// Dry-run conflict query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConflictCheck {
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attendees: Vec<AttendeeInput>,
    #[serde(default)]
    pub exclude_event_id: Option<Uuid>,
}

/// Listing parameters as supplied by a caller, before clamping.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: EventFilter,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: EventSort,
}

/// Scheduling engine entry point.
pub struct ScheduleService {
    store: EventStore,
    config: TempoConfig,
    dispatcher: EffectDispatcher,
}

impl ScheduleService {
    pub fn new(
        store: EventStore,
        config: TempoConfig,
        ledger: Arc<dyn RewardLedger>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            config,
            dispatcher: EffectDispatcher::new(ledger, audit),
        }
    }

    /// Open the database named by `config` and build the service.
    pub fn open(
        config: TempoConfig,
        ledger: Arc<dyn RewardLedger>,
        audit: Arc<dyn AuditLog>,
    ) -> Result<Self> {
        let store = EventStore::open(&config.database.resolved_path())?;
        Ok(Self::new(store, config, ledger, audit))
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    /// Deliver queued effects. Errors are logged, never returned.
    pub fn flush_effects(&self) -> DrainReport {
        match self.dispatcher.drain(&self.store) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Outbox drain failed: {e}");
                DrainReport::default()
            }
        }
    }

    // ─── Events ──────────────────────────────────────────

    /// Create an event with its attendees and, when recurring, its
    /// generated instances, all in one transaction.
    pub fn create_event(
        &self,
        actor: &Actor,
        input: &NewEvent,
        options: WriteOptions,
    ) -> Result<WriteOutcome<CreatedEvent>> {
        let (start, _) = input.validate()?;

        if options.should_check() {
            let participants = attendees::participant_user_ids(&actor.user_id, &input.attendees);
            let conflicts = self.conflicts_for(actor, start, input.end_at, &participants, None)?;
            if !conflicts.is_empty() {
                return Ok(WriteOutcome::Conflicts(conflicts));
            }
        }

        let created = self.store.write(|tx| {
            let mut event = store::create_event(tx, actor, input)?;
            if !input.attendees.is_empty() {
                event.attendees =
                    attendees::replace_all(tx, &actor.tenant_id, event.id, &actor.user_id, &input.attendees)?;
            }
            let children = recurrence::expand(tx, &event, &self.config.scheduling)?;

            if let Some(amount) = self.creation_reward(event.event_type) {
                enqueue(tx, &reward(actor, amount, "schedule_event_created"))?;
            }
            enqueue(
                tx,
                &SideEffect::Audit(AuditEntry::event(
                    actor,
                    "create",
                    event.id,
                    format!("Created {} '{}'", event.event_type, event.title),
                )),
            )?;
            Ok(CreatedEvent {
                event,
                generated_instances: children.iter().map(|c| c.id).collect(),
            })
        })?;

        tracing::info!(
            "📅 Event {} created by {} in {} ({} instance(s))",
            created.event.id,
            actor.user_id,
            actor.tenant_id,
            created.generated_instances.len()
        );
        self.flush_effects();
        Ok(WriteOutcome::Done(created))
    }

    /// Fetch one event. Private events the actor does not take part in are
    /// reported as missing.
    pub fn get_event(&self, actor: &Actor, id: Uuid) -> Result<Event> {
        let event = self.store.get(&actor.tenant_id, id)?;
        if !event.is_visible_to(&actor.user_id) {
            return Err(TempoError::not_found(format!("event {id} not found")));
        }
        Ok(event)
    }

    fn owned_event(&self, actor: &Actor, id: Uuid) -> Result<Event> {
        let event = self.get_event(actor, id)?;
        ensure_owner(&event, actor)?;
        Ok(event)
    }

    /// Apply `patch`; a present attendee list replaces the current one.
    pub fn update_event(
        &self,
        actor: &Actor,
        id: Uuid,
        patch: &EventPatch,
        options: WriteOptions,
    ) -> Result<WriteOutcome<Event>> {
        if patch.is_empty() {
            return Err(TempoError::validation("update contains no fields"));
        }
        let current = self.owned_event(actor, id)?;

        if options.should_check() && (patch.touches_window() || patch.attendees.is_some()) {
            let start = patch.start_at.unwrap_or(current.start_at);
            let end = patch.end_at.unwrap_or(current.end_at);
            let participants = match &patch.attendees {
                Some(list) => attendees::participant_user_ids(&current.created_by, list),
                None => current_participants(&current),
            };
            let conflicts = self.conflicts_for(actor, start, end, &participants, Some(id))?;
            if !conflicts.is_empty() {
                return Ok(WriteOutcome::Conflicts(conflicts));
            }
        }

        let updated = self.store.write(|tx| {
            store::update_event(tx, &actor.tenant_id, id, patch)?;
            if let Some(list) = &patch.attendees {
                attendees::replace_all(tx, &actor.tenant_id, id, &current.created_by, list)?;
            }
            enqueue(
                tx,
                &SideEffect::Audit(AuditEntry::event(
                    actor,
                    "update",
                    id,
                    format!("Updated event '{}'", current.title),
                )),
            )?;
            store::get_event(tx, &actor.tenant_id, id)
        })?;

        tracing::info!("✏️ Event {id} updated by {}", actor.user_id);
        self.flush_effects();
        Ok(WriteOutcome::Done(updated))
    }

    /// Soft-delete an event and its attendees. Returns `false` when it was
    /// already deleted.
    pub fn delete_event(&self, actor: &Actor, id: Uuid) -> Result<bool> {
        let current = self
            .store
            .read(|conn| store::get_event_including_deleted(conn, &actor.tenant_id, id))?;
        if !current.is_visible_to(&actor.user_id) {
            return Err(TempoError::not_found(format!("event {id} not found")));
        }
        ensure_owner(&current, actor)?;

        let deleted = self.store.write(|tx| {
            let changed = store::soft_delete_event(tx, &actor.tenant_id, id)?;
            if changed {
                enqueue(
                    tx,
                    &SideEffect::Audit(AuditEntry::event(
                        actor,
                        "delete",
                        id,
                        format!("Deleted event '{}'", current.title),
                    )),
                )?;
            }
            Ok(changed)
        })?;

        if deleted {
            tracing::info!("🗑️ Event {id} deleted by {}", actor.user_id);
            self.flush_effects();
        }
        Ok(deleted)
    }

    /// Move the event to `status`, stamping terminal timestamps and
    /// crediting the owner on entering `completed`.
    pub fn update_status(
        &self,
        actor: &Actor,
        id: Uuid,
        status: EventStatus,
        notes: Option<&str>,
    ) -> Result<Event> {
        self.owned_event(actor, id)?;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());

        // The current status is re-read under the write lock so concurrent
        // requests see each other's transitions.
        let (previous, updated) = self.store.write(|tx| {
            let current = store::get_event(tx, &actor.tenant_id, id)?;
            check_transition(self.config.scheduling.transition_policy, current.status, status)?;

            let entering = current.status != status;
            let now = Utc::now();
            let stamp = match status {
                EventStatus::Completed if entering => StatusStamp::CompletedAt(now),
                EventStatus::Cancelled if entering => StatusStamp::CancelledAt(now),
                _ => StatusStamp::None,
            };
            store::set_status(tx, &actor.tenant_id, id, status, notes, stamp)?;
            if entering
                && status == EventStatus::Completed
                && let Some(amount) = self.completion_reward(current.event_type)
            {
                let owner = Actor {
                    user_id: current.created_by.clone(),
                    ..actor.clone()
                };
                enqueue(tx, &reward(&owner, amount, "schedule_event_completed"))?;
            }
            enqueue(
                tx,
                &SideEffect::Audit(AuditEntry::event(
                    actor,
                    "status_change",
                    id,
                    format!("Status {} → {}", current.status, status),
                )),
            )?;
            Ok((current.status, store::get_event(tx, &actor.tenant_id, id)?))
        })?;

        tracing::info!("🔄 Event {id}: {previous} → {status}");
        self.flush_effects();
        Ok(updated)
    }

    pub fn list_events(&self, actor: &Actor, query: &ListQuery) -> Result<EventPage> {
        let page = PageRequest::clamped(
            query.page,
            query.per_page,
            self.config.listing.default_per_page,
            self.config.listing.max_per_page,
        );
        self.store
            .list(&actor.tenant_id, &actor.user_id, &query.filter, page, query.sort)
    }

    pub fn calendar_view(
        &self,
        actor: &Actor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CalendarView> {
        self.store.read(|conn| {
            calendar::calendar_view(
                conn,
                &actor.tenant_id,
                &actor.user_id,
                start,
                end,
                &self.config.scheduling,
            )
        })
    }

    // ─── Attendees ───────────────────────────────────────

    pub fn add_attendee(&self, actor: &Actor, event_id: Uuid, input: &AttendeeInput) -> Result<Attendee> {
        let event = self.owned_event(actor, event_id)?;
        let attendee = self
            .store
            .write(|tx| attendees::add(tx, &actor.tenant_id, event_id, &event.created_by, input))?;
        tracing::info!("👤 Attendee {} added to {event_id}", attendee.id);
        Ok(attendee)
    }

    /// Set an attendee's response. Allowed for the attendee themself and for
    /// the event owner.
    pub fn respond(
        &self,
        actor: &Actor,
        event_id: Uuid,
        attendee_id: Uuid,
        response: ResponseStatus,
    ) -> Result<Attendee> {
        let event = self.get_event(actor, event_id)?;
        let attendee = self
            .store
            .read(|conn| attendees::get(conn, &actor.tenant_id, event_id, attendee_id))?;
        let is_self = attendee.user_id.as_deref() == Some(actor.user_id.as_str());
        if !is_self && !event.is_owned_by(&actor.user_id) {
            return Err(TempoError::forbidden(
                "only the attendee or the event owner can set this response",
            ));
        }
        self.store.write(|tx| {
            attendees::update_response(tx, &actor.tenant_id, event_id, attendee_id, response)
        })
    }

    pub fn remove_attendee(&self, actor: &Actor, event_id: Uuid, attendee_id: Uuid) -> Result<()> {
        self.owned_event(actor, event_id)?;
        self.store
            .write(|tx| attendees::remove(tx, &actor.tenant_id, event_id, attendee_id))?;
        tracing::info!("👤 Attendee {attendee_id} removed from {event_id}");
        Ok(())
    }

    pub fn list_attendees(&self, actor: &Actor, event_id: Uuid) -> Result<Vec<Attendee>> {
        Ok(self.get_event(actor, event_id)?.attendees)
    }

    // ─── Conflicts ───────────────────────────────────────

    /// Dry-run conflict check for the actor and the listed attendees.
    pub fn check_conflicts(&self, actor: &Actor, check: &ConflictCheck) -> Result<Vec<ScheduleConflict>> {
        let start = check
            .start_at
            .ok_or_else(|| TempoError::validation("start_at is required"))?;
        crate::model::validate_window(start, check.end_at)?;
        for attendee in &check.attendees {
            attendee.participant_key()?;
        }
        let participants = attendees::participant_user_ids(&actor.user_id, &check.attendees);
        self.conflicts_for(actor, start, check.end_at, &participants, check.exclude_event_id)
    }

    fn conflicts_for(
        &self,
        actor: &Actor,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        participants: &[String],
        exclude: Option<Uuid>,
    ) -> Result<Vec<ScheduleConflict>> {
        let query = ConflictQuery {
            start: to_millis(start),
            end: end.map(to_millis),
            participants,
            exclude,
        };
        self.store
            .read(|conn| find_conflicts(conn, &actor.tenant_id, &query))
    }

    // ─── Rewards ─────────────────────────────────────────

    fn creation_reward(&self, event_type: EventType) -> Option<RewardAmount> {
        let r = &self.config.rewards;
        r.enabled.then(|| match event_type {
            EventType::Meeting => RewardAmount {
                points: r.create_meeting_points,
                coins: r.create_meeting_coins,
            },
            _ => RewardAmount {
                points: r.create_other_points,
                coins: r.create_other_coins,
            },
        })
    }

    fn completion_reward(&self, event_type: EventType) -> Option<RewardAmount> {
        let r = &self.config.rewards;
        r.enabled.then(|| match event_type {
            EventType::Meeting => RewardAmount {
                points: r.complete_meeting_points,
                coins: r.complete_meeting_coins,
            },
            _ => RewardAmount {
                points: r.complete_other_points,
                coins: r.complete_other_coins,
            },
        })
    }
}

fn reward(actor: &Actor, amount: RewardAmount, reason: &str) -> SideEffect {
    SideEffect::RewardCredit {
        user_id: actor.user_id.clone(),
        tenant_id: actor.tenant_id.clone(),
        points: amount.points,
        coins: amount.coins,
        reason: reason.to_string(),
    }
}

fn ensure_owner(event: &Event, actor: &Actor) -> Result<()> {
    if event.is_owned_by(&actor.user_id) {
        Ok(())
    } else {
        Err(TempoError::forbidden("only the event creator can modify this event"))
    }
}

fn current_participants(event: &Event) -> Vec<String> {
    let mut ids = vec![event.created_by.clone()];
    for attendee in &event.attendees {
        if let Some(user_id) = &attendee.user_id
            && !ids.contains(user_id)
        {
            ids.push(user_id.clone());
        }
    }
    ids
}

/// Reject transitions the policy forbids.
pub fn check_transition(policy: TransitionPolicy, from: EventStatus, to: EventStatus) -> Result<()> {
    match policy {
        TransitionPolicy::Permissive => Ok(()),
        TransitionPolicy::Strict if from.is_terminal() => Err(TempoError::validation(format!(
            "event is {from}; no further status changes are allowed"
        ))),
        TransitionPolicy::Strict if from == to => {
            Err(TempoError::validation(format!("event is already {to}")))
        }
        TransitionPolicy::Strict => Ok(()),
    }
}
