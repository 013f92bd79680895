//! Scheduling data model — events, attendees, write inputs, and the trusted
//! identity context every operation runs under.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tempo_core::error::{Result, TempoError};
use uuid::Uuid;

/// Longest accepted event title.
pub const MAX_TITLE_LEN: usize = 255;

/// Declares a closed, string-backed enum with `as_str`, `Display`, and a
/// `FromStr` that fails with a validation error.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident ($label:literal) { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = TempoError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(TempoError::validation(format!(
                        "unknown {} '{}'",
                        $label, other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// What kind of appointment an event is.
    EventType ("event type") {
        Meeting => "meeting",
        Call => "call",
        Task => "task",
        Reminder => "reminder",
        Event => "event",
        Appointment => "appointment",
        Deadline => "deadline",
        FollowUp => "follow_up",
    }
}

string_enum! {
    Priority ("priority") {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

string_enum! {
    /// Event status. `Completed`, `Cancelled` and `NoShow` are terminal.
    EventStatus ("status") {
        Scheduled => "scheduled",
        Confirmed => "confirmed",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

string_enum! {
    /// A participant's answer, tracked independently of the event status.
    ResponseStatus ("response status") {
        Invited => "invited",
        Accepted => "accepted",
        Declined => "declined",
        Maybe => "maybe",
        Attended => "attended",
        NoShow => "no_show",
    }
}

string_enum! {
    Frequency ("recurring frequency") {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
        Yearly => "yearly",
    }
}

impl Default for EventType {
    fn default() -> Self {
        Self::Event
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl Default for ResponseStatus {
    fn default() -> Self {
        Self::Invited
    }
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }

    /// Statuses that still hold a slot in participants' calendars.
    pub fn blocks_time(&self) -> bool {
        !matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl Priority {
    /// Numeric rank, low = 0 … urgent = 3.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

// ─── Identity ──────────────────────────────────────────────

/// Tenant scope. Every store function takes one, so unscoped access does not
/// type-check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(TempoError::validation("tenant id is required"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authenticated caller. Trusted as already validated upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub tenant_id: TenantId,
    pub user_id: String,
    pub display_name: Option<String>,
}

impl Actor {
    pub fn new(tenant_id: TenantId, user_id: impl Into<String>) -> Result<Self> {
        let user_id = user_id.into().trim().to_string();
        if user_id.is_empty() {
            return Err(TempoError::validation("user id is required"));
        }
        Ok(Self {
            tenant_id,
            user_id,
            display_name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.display_name = Some(name.trim().to_string());
        }
        self
    }
}

// ─── Records ──────────────────────────────────────────────

/// A stored calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub event_type: EventType,
    pub priority: Priority,
    pub status: EventStatus,
    pub location: Option<String>,
    pub meeting_url: Option<String>,
    pub client_id: Option<String>,
    pub lead_id: Option<String>,
    pub sale_id: Option<String>,
    pub is_private: bool,
    pub recurring: bool,
    pub recurring_frequency: Option<Frequency>,
    pub recurring_until: Option<DateTime<Utc>>,
    pub recurring_count: Option<u32>,
    /// Set only on instances generated from a recurring base event.
    pub parent_event_id: Option<Uuid>,
    pub created_by: String,
    pub created_by_name: Option<String>,
    pub tags: Vec<String>,
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
    /// Minutes before `start_at`.
    pub reminders: Vec<u32>,
    pub status_notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
}

impl Event {
    pub fn duration(&self) -> Option<Duration> {
        self.end_at.map(|end| end - self.start_at)
    }

    /// End of the occupied window; an event without end is an instant.
    pub fn window_end(&self) -> DateTime<Utc> {
        self.end_at.unwrap_or(self.start_at)
    }

    pub fn is_attendee(&self, user_id: &str) -> bool {
        self.attendees
            .iter()
            .any(|a| a.deleted_at.is_none() && a.user_id.as_deref() == Some(user_id))
    }

    /// Creator or active attendee.
    pub fn involves(&self, user_id: &str) -> bool {
        self.created_by == user_id || self.is_attendee(user_id)
    }

    pub fn is_visible_to(&self, user_id: &str) -> bool {
        !self.is_private || self.involves(user_id)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }

    /// Organizer label used in conflict reports.
    pub fn organizer_name(&self) -> String {
        self.created_by_name
            .clone()
            .unwrap_or_else(|| self.created_by.clone())
    }
}

/// A participant's relationship to one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub response: ResponseStatus,
    pub is_organizer: bool,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ─── Inputs ──────────────────────────────────────────────

/// Participant as supplied by a caller: a system user, a bare email, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendeeInput {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_organizer: bool,
}

impl AttendeeInput {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn normalized_user_id(&self) -> Option<String> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
    }

    /// Identity of the (event, participant) pair: `user:<id>` when a system
    /// user is given, otherwise `email:<address>`.
    pub fn participant_key(&self) -> Result<String> {
        if let Some(user_id) = self.normalized_user_id() {
            return Ok(format!("user:{user_id}"));
        }
        match self.normalized_email() {
            Some(email) if is_plausible_email(&email) => Ok(format!("email:{email}")),
            Some(email) => Err(TempoError::validation(format!(
                "invalid attendee email '{email}'"
            ))),
            None => Err(TempoError::validation(
                "attendee needs a user id or an email",
            )),
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Fields accepted when creating an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub sale_id: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub recurring: bool,
    /// Raw frequency; validated into [`Frequency`] before anything is written.
    #[serde(default)]
    pub recurring_frequency: Option<String>,
    #[serde(default)]
    pub recurring_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurring_count: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub reminders: Vec<u32>,
    #[serde(default)]
    pub attendees: Vec<AttendeeInput>,
}

/// Recurrence settings that survived validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub until: Option<DateTime<Utc>>,
    pub count: Option<u32>,
}

impl NewEvent {
    /// Check every field and return the start instant and recurrence rule.
    pub fn validate(&self) -> Result<(DateTime<Utc>, Option<RecurrenceRule>)> {
        validate_title(&self.title)?;
        let start = self
            .start_at
            .ok_or_else(|| TempoError::validation("start_at is required"))?;
        validate_window(start, self.end_at)?;
        for attendee in &self.attendees {
            attendee.participant_key()?;
        }

        if !self.recurring {
            return Ok((start, None));
        }

        let raw = self
            .recurring_frequency
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| TempoError::validation("recurring events need a recurring_frequency"))?;
        let frequency: Frequency = raw.parse()?;
        if matches!(self.recurring_until, Some(until) if to_millis(until) <= to_millis(start)) {
            return Err(TempoError::validation(
                "recurring_until must be after start_at",
            ));
        }
        if self.recurring_count == Some(0) {
            return Err(TempoError::validation("recurring_count must be at least 1"));
        }
        Ok((
            start,
            Some(RecurrenceRule {
                frequency,
                until: self.recurring_until,
                count: self.recurring_count,
            }),
        ))
    }
}

pub(crate) fn validate_title(title: &str) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TempoError::validation("title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(TempoError::validation(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Instants are stored with millisecond precision; compare and persist
/// them at that precision.
pub fn to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// `end > start` at stored precision whenever an end is present.
pub fn validate_window(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<()> {
    match end {
        Some(end) if to_millis(end) <= to_millis(start) => Err(TempoError::validation(
            "end_at must be after start_at",
        )),
        _ => Ok(()),
    }
}

/// Trim, drop blanks, and de-duplicate while keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

pub fn normalize_reminders(reminders: &[u32]) -> Vec<u32> {
    let mut out = reminders.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

/// Partial update. A field is applied when present; nullable fields use
/// `Some(None)` for an explicit clear.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "present")]
    pub end_at: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub all_day: Option<bool>,
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "present")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub meeting_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub client_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub lead_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub sale_id: Option<Option<String>>,
    #[serde(default)]
    pub is_private: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub custom_fields: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub reminders: Option<Vec<u32>>,
    /// Full replacement of the attendee list.
    #[serde(default)]
    pub attendees: Option<Vec<AttendeeInput>>,
}

/// Distinguishes an explicit `null` from an absent key.
fn present<'de, T, D>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

impl EventPatch {
    /// True when no column of the event row would change.
    pub fn has_no_fields(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start_at.is_none()
            && self.end_at.is_none()
            && self.all_day.is_none()
            && self.event_type.is_none()
            && self.priority.is_none()
            && self.location.is_none()
            && self.meeting_url.is_none()
            && self.client_id.is_none()
            && self.lead_id.is_none()
            && self.sale_id.is_none()
            && self.is_private.is_none()
            && self.tags.is_none()
            && self.custom_fields.is_none()
            && self.reminders.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.has_no_fields() && self.attendees.is_none()
    }

    pub fn touches_window(&self) -> bool {
        self.start_at.is_some() || self.end_at.is_some()
    }
}
