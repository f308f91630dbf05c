//! Periodic lifecycle sweep.
//!
//! One pass runs four independent steps:
//!
//! 1. expire cash holds past the collection window
//! 2. activate paid reservations whose range has started (backfilling
//!    missing identifiers)
//! 3. expire paid reservations whose range has ended
//! 4. purge registration drafts past their expiry
//!
//! Each record is changed through a guarded [`StatusChange`], so a pass that
//! finds nothing to do writes nothing and overlapping passes (in this or
//! another process) cannot corrupt state. A failure on one record is counted
//! and skipped; transitions already written stay written.

use crate::engine::EngineEnvironment;
use crate::issuer::SequenceIssuer;
use crate::metrics::{
    SWEEPER_ERRORS_TOTAL, SWEEPER_PASS_DURATION_SECONDS, SWEEPER_TRANSITIONS_TOTAL,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use studyhall_core::status::StatusChange;
use studyhall_core::store::{ApplyOutcome, StoreFuture};
use studyhall_core::types::{Reservation, ReservationId};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Sweeper settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between passes
    pub interval: std::time::Duration,
    /// Records listed per storage round-trip
    pub batch_size: usize,
    /// Cash collection window
    pub cash_window: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(300),
            batch_size: 500,
            cash_window: Duration::hours(48),
        }
    }
}

/// What one pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// `cash_pending → expired`
    pub cash_holds_expired: u64,
    /// `not_yet_active → active`
    pub activated: u64,
    /// `→ expired` after the range ended
    pub expired: u64,
    /// Identifiers issued for activated reservations that had none
    pub identifiers_backfilled: u64,
    /// Registration drafts deleted
    pub drafts_purged: u64,
    /// Failures counted (and skipped) during the pass
    pub errors: u64,
}

impl SweepReport {
    /// Total state changes written
    #[must_use]
    pub const fn changes(&self) -> u64 {
        self.cash_holds_expired + self.activated + self.expired + self.drafts_purged
    }
}

/// Health snapshot for operators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweeperStatus {
    /// Passes completed since start
    pub passes: u64,
    /// Whether a pass is in progress
    pub running: bool,
    /// When the latest pass started
    pub last_started_at: Option<DateTime<Utc>>,
    /// When the latest pass finished
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Report of the latest finished pass
    pub last_report: Option<SweepReport>,
    /// Errors across all passes
    pub total_errors: u64,
    /// Most recent error message
    pub last_error: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Step {
    ExpireCashHolds,
    Activate,
    Expire,
    PurgeDrafts,
}

impl Step {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ExpireCashHolds => "expire_cash_hold",
            Self::Activate => "activate",
            Self::Expire => "expire",
            Self::PurgeDrafts => "purge_drafts",
        }
    }
}

/// Time-driven status transitions.
pub struct LifecycleSweeper {
    env: EngineEnvironment,
    issuer: SequenceIssuer,
    config: SweeperConfig,
    status: RwLock<SweeperStatus>,
    wake: Notify,
}

impl std::fmt::Debug for LifecycleSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LifecycleSweeper {
    /// Create a sweeper. Nothing runs until [`Self::run_pass`] or [`Self::spawn`].
    #[must_use]
    pub fn new(env: EngineEnvironment, issuer: SequenceIssuer, config: SweeperConfig) -> Self {
        Self {
            env,
            issuer,
            config,
            status: RwLock::new(SweeperStatus::default()),
            wake: Notify::new(),
        }
    }

    /// Settings in use
    #[must_use]
    pub const fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Health snapshot.
    #[must_use]
    pub fn status(&self) -> SweeperStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the background loop to run a pass now. A trigger while a pass is
    /// running queues exactly one more pass.
    pub fn trigger(&self) {
        tracing::info!("Sweep pass requested");
        self.wake.notify_one();
    }

    /// Run passes every `interval` (and on [`Self::trigger`]) until `shutdown` fires.
    ///
    /// The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = self.config.interval.as_secs(),
                batch_size = self.config.batch_size,
                "Lifecycle sweeper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Lifecycle sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {}
                    () = self.wake.notified() => {}
                }
                self.run_pass().await;
            }
        })
    }

    /// Run one full pass.
    #[tracing::instrument(skip(self), name = "sweep_pass")]
    pub async fn run_pass(&self) -> SweepReport {
        let started = Instant::now();
        let now = self.env.clock.now();
        let today = now.date_naive();
        let cash_window = self.config.cash_window;
        self.update_status(|status| {
            status.running = true;
            status.last_started_at = Some(now);
        });

        let mut pass = Pass::default();

        pass.report.cash_holds_expired = self
            .drain(
                Step::ExpireCashHolds,
                &mut pass,
                |limit| {
                    self.env
                        .reservations
                        .stale_cash_holds(now, cash_window, limit)
                },
                || StatusChange::ExpireCashHold {
                    at: now,
                    cash_window,
                },
            )
            .await;

        pass.report.activated = self
            .drain(
                Step::Activate,
                &mut pass,
                |limit| self.env.reservations.due_for_activation(today, limit),
                || StatusChange::Activate { today, at: now },
            )
            .await;

        pass.report.expired = self
            .drain(
                Step::Expire,
                &mut pass,
                |limit| self.env.reservations.due_for_expiry(today, limit),
                || StatusChange::Expire { today, at: now },
            )
            .await;

        pass.report.drafts_purged = self.purge_drafts(now, &mut pass).await;

        let report = pass.report;
        let elapsed = started.elapsed();
        metrics::histogram!(SWEEPER_PASS_DURATION_SECONDS).record(elapsed.as_secs_f64());
        tracing::info!(
            cash_holds_expired = report.cash_holds_expired,
            activated = report.activated,
            expired = report.expired,
            identifiers_backfilled = report.identifiers_backfilled,
            drafts_purged = report.drafts_purged,
            errors = report.errors,
            elapsed_ms = elapsed.as_millis(),
            "Sweep pass finished"
        );

        let finished_at = self.env.clock.now();
        let last_error = pass.last_error;
        self.update_status(|status| {
            status.running = false;
            status.passes += 1;
            status.last_finished_at = Some(finished_at);
            status.total_errors += report.errors;
            if last_error.is_some() {
                status.last_error = last_error;
            }
            status.last_report = Some(report.clone());
        });
        report
    }

    /// Apply `change` to every record `list` returns until none is left.
    ///
    /// Records that fail or are refused are remembered and skipped for the
    /// rest of the pass, so a stuck record cannot stall the loop.
    async fn drain<'a, L, C>(&'a self, step: Step, pass: &mut Pass, list: L, change: C) -> u64
    where
        L: Fn(usize) -> StoreFuture<'a, Vec<ReservationId>>,
        C: Fn() -> StatusChange,
    {
        let batch_size = self.config.batch_size.max(1);
        let mut skipped: HashSet<ReservationId> = HashSet::new();
        let mut applied = 0;

        loop {
            let listed = match list(batch_size + skipped.len()).await {
                Ok(ids) => ids,
                Err(error) => {
                    pass.fail(step, format!("listing for {} failed: {error}", step.as_str()));
                    break;
                }
            };
            let batch: Vec<ReservationId> = listed
                .into_iter()
                .filter(|id| !skipped.contains(id))
                .take(batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            for id in batch {
                match self.env.reservations.apply(id, change()).await {
                    Ok(ApplyOutcome::Applied(reservation)) => {
                        applied += 1;
                        metrics::counter!(SWEEPER_TRANSITIONS_TOTAL, "transition" => step.as_str())
                            .increment(1);
                        tracing::info!(
                            reservation_id = %id,
                            user_id = %reservation.user_id,
                            transition = step.as_str(),
                            "Reservation transitioned"
                        );
                        if step == Step::Activate {
                            self.backfill_identifier(&reservation, pass).await;
                        }
                    }
                    Ok(
                        ApplyOutcome::Rejected(_)
                        | ApplyOutcome::Missing
                        | ApplyOutcome::SeatTaken { .. }
                        | ApplyOutcome::MembershipHeld { .. },
                    ) => {
                        tracing::debug!(
                            reservation_id = %id,
                            transition = step.as_str(),
                            "Already transitioned"
                        );
                        skipped.insert(id);
                    }
                    Err(error) => {
                        pass.fail(step, format!("{} {id}: {error}", step.as_str()));
                        skipped.insert(id);
                    }
                }
            }
        }
        applied
    }

    async fn backfill_identifier(&self, reservation: &Reservation, pass: &mut Pass) {
        match self.env.memberships.identity_of(reservation.user_id).await {
            Ok(Some(_)) => {}
            Ok(None) => match self.issuer.issue_identifier(reservation.user_id).await {
                Ok(identity) => {
                    pass.report.identifiers_backfilled += 1;
                    tracing::info!(
                        user_id = %reservation.user_id,
                        identifier = %identity.identifier,
                        "Identifier backfilled on activation"
                    );
                }
                Err(error) => pass.fail(Step::Activate, format!("identifier backfill: {error}")),
            },
            Err(error) => pass.fail(Step::Activate, format!("identifier lookup: {error}")),
        }
    }

    async fn purge_drafts(&self, now: DateTime<Utc>, pass: &mut Pass) -> u64 {
        let batch_size = self.config.batch_size.max(1);
        let mut purged = 0;
        loop {
            match self.env.drafts.purge_expired_drafts(now, batch_size).await {
                Ok(count) => {
                    purged += count;
                    if count > 0 {
                        metrics::counter!(
                            SWEEPER_TRANSITIONS_TOTAL,
                            "transition" => Step::PurgeDrafts.as_str()
                        )
                        .increment(count);
                    }
                    if usize::try_from(count).map_or(true, |count| count < batch_size) {
                        break;
                    }
                }
                Err(error) => {
                    pass.fail(Step::PurgeDrafts, format!("draft purge failed: {error}"));
                    break;
                }
            }
        }
        purged
    }

    fn update_status(&self, update: impl FnOnce(&mut SweeperStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut status);
    }
}

#[derive(Default)]
struct Pass {
    report: SweepReport,
    last_error: Option<String>,
}

impl Pass {
    fn fail(&mut self, step: Step, message: String) {
        metrics::counter!(SWEEPER_ERRORS_TOTAL, "step" => step.as_str()).increment(1);
        tracing::warn!(step = step.as_str(), error = %message, "Sweep step failed");
        self.report.errors += 1;
        self.last_error = Some(message);
    }
}
