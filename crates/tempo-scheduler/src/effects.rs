//! Side effects — reward credits and audit records.
//!
//! Effects are written to `schedule_outbox` inside the same transaction as
//! the write that caused them, so they exist only if that write commits.
//! [`EffectDispatcher::drain`] delivers them afterwards. A collaborator
//! failure marks the row `failed` and is logged; it never reaches the caller.

use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tempo_core::error::{Result, TempoError};
use uuid::Uuid;

use crate::model::{Actor, TenantId};
use crate::store::{EventStore, db, ts};

/// Points and secondary coins credited together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAmount {
    pub points: u32,
    pub coins: u32,
}

/// One audit-log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub tenant_id: TenantId,
    /// `create`, `update`, `delete`, `status_change`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub description: String,
}

impl AuditEntry {
    /// Audit record about a schedule event.
    pub fn event(actor: &Actor, action: &str, entity_id: Uuid, description: impl Into<String>) -> Self {
        Self {
            actor: actor.user_id.clone(),
            tenant_id: actor.tenant_id.clone(),
            action: action.to_string(),
            entity_type: "schedule_event".to_string(),
            entity_id,
            description: description.into(),
        }
    }
}

/// Message for an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    RewardCredit {
        user_id: String,
        tenant_id: TenantId,
        points: u32,
        coins: u32,
        reason: String,
    },
    Audit(AuditEntry),
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RewardCredit { .. } => "reward_credit",
            Self::Audit(_) => "audit",
        }
    }

    fn tenant(&self) -> &TenantId {
        match self {
            Self::RewardCredit { tenant_id, .. } => tenant_id,
            Self::Audit(entry) => &entry.tenant_id,
        }
    }
}

/// Gamification collaborator.
pub trait RewardLedger: Send + Sync {
    fn credit(&self, user_id: &str, tenant: &TenantId, amount: RewardAmount, reason: &str) -> Result<()>;
}

/// Audit-log collaborator.
pub trait AuditLog: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Writes each audit entry as a structured log line.
#[derive(Debug, Default)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        tracing::info!(
            target: "tempo::audit",
            actor = %entry.actor,
            tenant = %entry.tenant_id,
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "📝 {}",
            entry.description
        );
        Ok(())
    }
}

/// Writes each credit as a structured log line for an external ledger to
/// pick up. Keeps no state.
#[derive(Debug, Default)]
pub struct TracingLedger;

impl RewardLedger for TracingLedger {
    fn credit(&self, user_id: &str, tenant: &TenantId, amount: RewardAmount, reason: &str) -> Result<()> {
        tracing::info!(
            target: "tempo::rewards",
            user = %user_id,
            tenant = %tenant,
            points = amount.points,
            coins = amount.coins,
            reason = %reason,
            "🎁 Reward credited"
        );
        Ok(())
    }
}

/// Ledger that accepts and discards every credit.
#[derive(Debug, Default)]
pub struct NoopLedger;

impl RewardLedger for NoopLedger {
    fn credit(&self, _user_id: &str, _tenant: &TenantId, _amount: RewardAmount, _reason: &str) -> Result<()> {
        Ok(())
    }
}

/// A credit kept by [`MemoryLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub user_id: String,
    pub tenant_id: TenantId,
    pub amount: RewardAmount,
    pub reason: String,
}

/// In-process ledger for tests and embedding. Credits accumulate for the
/// lifetime of the value.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    credits: Mutex<Vec<Credit>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credits(&self) -> Vec<Credit> {
        self.credits.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Sum of everything credited to `user_id` in `tenant`.
    pub fn balance(&self, tenant: &TenantId, user_id: &str) -> RewardAmount {
        self.credits()
            .iter()
            .filter(|c| &c.tenant_id == tenant && c.user_id == user_id)
            .fold(RewardAmount::default(), |acc, c| RewardAmount {
                points: acc.points + c.amount.points,
                coins: acc.coins + c.amount.coins,
            })
    }
}

impl RewardLedger for MemoryLedger {
    fn credit(&self, user_id: &str, tenant: &TenantId, amount: RewardAmount, reason: &str) -> Result<()> {
        let mut credits = self
            .credits
            .lock()
            .map_err(|e| TempoError::Database(format!("Lock: {e}")))?;
        credits.push(Credit {
            user_id: user_id.to_string(),
            tenant_id: tenant.clone(),
            amount,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

// ─── Outbox ──────────────────────────────────────────────

/// Queue `effect` in the current transaction.
pub fn enqueue(conn: &Connection, effect: &SideEffect) -> Result<()> {
    let payload = serde_json::to_string(effect)
        .map_err(|e| TempoError::Database(format!("Serialize effect: {e}")))?;
    conn.execute(
        "INSERT INTO schedule_outbox (tenant_id, kind, payload, status, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4)",
        params![effect.tenant().as_str(), effect.kind(), payload, ts(&Utc::now())],
    )
    .map_err(db("Enqueue effect"))?;
    Ok(())
}

/// Return rows left `dispatching` by an interrupted drain to `pending`.
/// Only safe before any dispatcher runs against `conn`.
pub(crate) fn requeue_claimed(conn: &Connection) -> Result<usize> {
    let n = conn
        .execute(
            "UPDATE schedule_outbox SET status = 'pending' WHERE status = 'dispatching'",
            [],
        )
        .map_err(db("Requeue outbox"))?;
    if n > 0 {
        tracing::info!("📬 Requeued {n} interrupted side effect(s)");
    }
    Ok(n)
}

/// Outcome of one [`EffectDispatcher::drain`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
}

/// Delivers queued effects to the collaborators.
#[derive(Clone)]
pub struct EffectDispatcher {
    ledger: Arc<dyn RewardLedger>,
    audit: Arc<dyn AuditLog>,
}

impl EffectDispatcher {
    pub fn new(ledger: Arc<dyn RewardLedger>, audit: Arc<dyn AuditLog>) -> Self {
        Self { ledger, audit }
    }

    /// Deliver every pending row once. Rows are claimed (`dispatching`) in
    /// one transaction, so concurrent drains never deliver the same row.
    pub fn drain(&self, store: &EventStore) -> Result<DrainReport> {
        let claimed: Vec<(i64, String)> = store.write(|tx| {
            let rows = {
                let mut stmt = tx
                    .prepare("SELECT id, payload FROM schedule_outbox WHERE status = 'pending' ORDER BY id")
                    .map_err(db("Prepare outbox"))?;
                let mapped = stmt
                    .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))
                    .map_err(db("Query outbox"))?;
                mapped
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(db("Read outbox"))?
            };
            for (id, _) in &rows {
                tx.execute(
                    "UPDATE schedule_outbox SET status = 'dispatching' WHERE id = ?1",
                    params![id],
                )
                .map_err(db("Claim outbox row"))?;
            }
            Ok(rows)
        })?;

        let mut report = DrainReport::default();
        for (id, payload) in claimed {
            let outcome = serde_json::from_str::<SideEffect>(&payload)
                .map_err(|e| TempoError::Database(format!("Corrupt outbox payload: {e}")))
                .and_then(|effect| self.deliver(&effect));
            let (status, error) = match &outcome {
                Ok(()) => {
                    report.sent += 1;
                    ("sent", None)
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("Side effect #{id} failed: {e}");
                    ("failed", Some(e.to_string()))
                }
            };
            let finished = store.write(|tx| {
                tx.execute(
                    "UPDATE schedule_outbox SET status = ?1, last_error = ?2, processed_at = ?3
                     WHERE id = ?4",
                    params![status, error, ts(&Utc::now()), id],
                )
                .map_err(db("Finish outbox row"))?;
                Ok(())
            });
            // The row stays claimed and is requeued when the store reopens.
            if let Err(e) = finished {
                tracing::warn!("Side effect #{id} delivered but not marked {status}: {e}");
            }
        }
        if report.sent + report.failed > 0 {
            tracing::debug!("📤 Outbox drained: {} sent, {} failed", report.sent, report.failed);
        }
        Ok(report)
    }

    fn deliver(&self, effect: &SideEffect) -> Result<()> {
        match effect {
            SideEffect::RewardCredit {
                user_id,
                tenant_id,
                points,
                coins,
                reason,
            } => self.ledger.credit(
                user_id,
                tenant_id,
                RewardAmount {
                    points: *points,
                    coins: *coins,
                },
                reason,
            ),
            SideEffect::Audit(entry) => self.audit.record(entry),
        }
    }
}

/// Outbox rows with the given status.
pub fn count_with_status(store: &EventStore, status: &str) -> Result<u64> {
    store.read(|conn| {
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schedule_outbox WHERE status = ?1",
                params![status],
                |r| r.get(0),
            )
            .map_err(db("Count outbox"))?;
        Ok(n.max(0) as u64)
    })
}
