//! # Tempo Scheduler
//!
//! Multi-tenant scheduling engine: calendar events, participant conflict
//! detection, recurrence expansion, attendee responses, and calendar views.
//!
//! ## Architecture
//! ```text
//! ScheduleService (lifecycle)
//!   ├── conflict::find_conflicts   — advisory overlap check
//!   ├── store (SQLite, one transaction per write)
//!   │     ├── recurrence::expand   — child instances
//!   │     ├── attendees            — participant rows
//!   │     └── effects::enqueue     — outbox rows
//!   ├── calendar::calendar_view    — day/week buckets + stats
//!   └── EffectDispatcher (after commit)
//!         ├── RewardLedger::credit
//!         └── AuditLog::record
//! ```

pub mod attendees;
pub mod calendar;
pub mod conflict;
pub mod effects;
pub mod lifecycle;
pub mod model;
pub mod recurrence;
pub mod store;

pub use calendar::{CalendarEntry, CalendarStats, CalendarView};
pub use conflict::{ConflictQuery, ScheduleConflict};
pub use effects::{
    AuditEntry, AuditLog, EffectDispatcher, MemoryLedger, NoopLedger, RewardAmount, RewardLedger,
    SideEffect, TracingAuditLog, TracingLedger,
};
pub use lifecycle::{
    ConflictCheck, CreatedEvent, ListQuery, ScheduleService, WriteOptions, WriteOutcome,
};
pub use model::{
    Actor, Attendee, AttendeeInput, Event, EventPatch, EventStatus, EventType, Frequency, NewEvent,
    Priority, ResponseStatus, TenantId,
};
pub use recurrence::Occurrences;
pub use store::{EventFilter, EventPage, EventSort, EventStore, PageRequest, SortDirection, SortField};
