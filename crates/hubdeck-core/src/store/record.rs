// ── Per-entity sync record ──
//
// The observable `EntityState` plus the bookkeeping that decides which
// remote updates to trust: in-flight command fencing, the grace window
// after local changes and the blocking window after acknowledgments.
// Everything here is synchronous; the store applies it under the
// record's map guard and never awaits while holding it.

use std::time::Duration;

use chrono::Utc;
use strum::Display;
use tokio::time::Instant;

use crate::model::{ChangeSource, EntityId, EntityState, RemoteReading, same_value};

/// Result of offering a remote reading to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Accepted: confirmed, target and display now mirror the hub.
    Applied,
    /// The echo of the in-flight command.
    Confirmed,
    /// Already in agreement, or nothing usable to apply.
    Unchanged,
    Discarded(StaleReason),
}

/// Why a remote update lost the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StaleReason {
    /// A command is scheduled or in flight.
    Pending,
    /// Arrived within the grace window after a local change.
    GraceWindow,
    /// Disagrees with a freshly acknowledged value.
    BlockingWindow,
    /// Observed before the last acknowledgment.
    PredatesAck,
}

/// The command currently on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct InFlight {
    pub command_id: u64,
    pub value: f64,
}

/// What to do after a command resolves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum AfterCommand {
    /// Send this queued value next (already marked in flight).
    Next(InFlight),
    Idle,
    /// The result belonged to a superseded command.
    Ignored,
}

#[derive(Debug, Clone)]
pub(crate) struct SyncRecord {
    pub state: EntityState,
    pub last_local_change: Option<Instant>,
    /// The dispatcher holds a not-yet-fired value.
    pub awaiting_dispatch: bool,
    pub in_flight: Option<InFlight>,
    /// Value that arrived while a command was in flight; last wins.
    pub queued: Option<f64>,
    pub last_command_id: u64,
    pub last_command_value: Option<f64>,
    pub last_ack_at: Option<Instant>,
    pub blocked_until: Option<Instant>,
    /// Value to re-issue on retry.
    pub failed_value: Option<f64>,
    /// Last non-zero level, restored by toggle.
    pub last_on_level: Option<f64>,
    /// The hub reported a newer value while the current command was in
    /// flight; its ack must not overwrite that value.
    pub superseded_in_flight: bool,
    /// See [`Domain::value_tolerance`](crate::model::Domain::value_tolerance).
    tolerance: f64,
}

impl SyncRecord {
    pub fn new(entity_id: EntityId) -> Self {
        let tolerance = entity_id.value_tolerance();
        Self {
            state: EntityState::new(entity_id),
            last_local_change: None,
            awaiting_dispatch: false,
            in_flight: None,
            queued: None,
            last_command_id: 0,
            last_command_value: None,
            last_ack_at: None,
            blocked_until: None,
            failed_value: None,
            last_on_level: None,
            superseded_in_flight: false,
            tolerance,
        }
    }

    fn same(&self, a: f64, b: f64) -> bool {
        same_value(a, b, self.tolerance)
    }

    fn remember_level(&mut self, value: f64) {
        if value > 0.0 {
            self.last_on_level = Some(value);
        }
    }

    // ── Local changes ────────────────────────────────────────────────

    /// Seed or force a value: no command, no race checks.
    pub fn apply_initial(&mut self, value: f64) {
        self.state.confirmed_value = value;
        self.state.target_value = value;
        self.state.display_value = value;
        self.state.source = ChangeSource::Initial;
        self.remember_level(value);
    }

    /// Optimistic user change; a command will follow.
    pub fn apply_user(&mut self, value: f64, now: Instant) {
        self.state.target_value = value;
        self.state.display_value = value;
        self.state.is_pending = true;
        self.state.source = ChangeSource::User;
        self.state.last_local_change_at = Some(Utc::now());
        self.last_local_change = Some(now);
        self.awaiting_dispatch = true;
        self.remember_level(value);
    }

    /// Override everything with the hub's view. Any in-flight command is
    /// orphaned: its result will no longer match and is ignored.
    pub fn force(&mut self, reading: &RemoteReading) -> bool {
        self.apply_metadata(reading);
        let Some(value) = reading.value else {
            return false;
        };
        self.in_flight = None;
        self.superseded_in_flight = false;
        self.queued = None;
        self.awaiting_dispatch = false;
        self.blocked_until = None;
        self.state.is_pending = false;
        self.apply_initial(value);
        self.state.playback.clone_from(&reading.playback);
        true
    }

    // ── Command lifecycle ────────────────────────────────────────────

    /// The dispatcher fired `value`. Returns the command to send now, or
    /// `None` if it was queued behind one already in flight.
    pub fn on_fire(&mut self, value: f64, command_id: u64) -> Option<InFlight> {
        self.awaiting_dispatch = false;
        self.state.is_pending = true;
        if self.in_flight.is_some() {
            self.queued = Some(value);
            return None;
        }
        Some(self.begin(command_id, value))
    }

    fn begin(&mut self, command_id: u64, value: f64) -> InFlight {
        let command = InFlight { command_id, value };
        self.in_flight = Some(command);
        self.superseded_in_flight = false;
        self.last_command_id = command_id;
        self.last_command_value = Some(value);
        command
    }

    /// The hub accepted command `command_id`. `next_id` numbers the
    /// queued follow-up, if any.
    pub fn on_ack(
        &mut self,
        command_id: u64,
        now: Instant,
        blocking_window: Duration,
        next_id: impl FnOnce() -> u64,
    ) -> AfterCommand {
        let Some(current) = self.in_flight.filter(|f| f.command_id == command_id) else {
            return AfterCommand::Ignored;
        };

        self.in_flight = None;
        self.state.has_error = false;
        self.failed_value = None;
        if self.superseded_in_flight {
            // The hub has already moved past this command
            self.superseded_in_flight = false;
        } else {
            self.state.confirmed_value = current.value;
            self.last_ack_at = Some(now);
            self.blocked_until = Some(now + blocking_window);
        }

        if let Some(value) = self.queued.take() {
            return AfterCommand::Next(self.begin(next_id(), value));
        }
        if !self.awaiting_dispatch {
            self.state.is_pending = false;
        }
        AfterCommand::Idle
    }

    /// Command `command_id` failed. Rolls target and display back to the
    /// confirmed value unless a newer change is still waiting to fire.
    /// Returns the value a retry should re-issue.
    pub fn on_failure(&mut self, command_id: u64) -> Option<f64> {
        let current = self.in_flight.filter(|f| f.command_id == command_id)?;

        self.in_flight = None;
        let failed = self.queued.take().unwrap_or(current.value);
        self.failed_value = Some(failed);
        self.state.has_error = true;

        if !self.awaiting_dispatch {
            self.state.is_pending = false;
            self.state.target_value = self.state.confirmed_value;
            self.state.display_value = self.state.confirmed_value;
        }
        Some(failed)
    }

    // ── Remote updates ───────────────────────────────────────────────

    fn apply_metadata(&mut self, reading: &RemoteReading) {
        if reading.name.is_some() {
            self.state.name.clone_from(&reading.name);
        }
        if reading.unit.is_some() {
            self.state.unit.clone_from(&reading.unit);
        }
    }

    /// Offer a remote reading observed at `observed_at`.
    pub fn reconcile(
        &mut self,
        reading: &RemoteReading,
        observed_at: Instant,
        now: Instant,
        grace_window: Duration,
    ) -> ReconcileOutcome {
        self.apply_metadata(reading);
        let Some(value) = reading.value else {
            return ReconcileOutcome::Unchanged;
        };

        if self.state.is_pending {
            return match self.in_flight {
                Some(f) if self.same(value, f.value) => {
                    self.state.confirmed_value = value;
                    if self.queued.is_none() && !self.awaiting_dispatch {
                        self.state.is_pending = false;
                    }
                    ReconcileOutcome::Confirmed
                }
                _ => ReconcileOutcome::Discarded(StaleReason::Pending),
            };
        }

        let agrees_with_confirmed = self.same(value, self.state.confirmed_value);
        let agrees_with_target = self.same(value, self.state.target_value);

        if !agrees_with_confirmed && self.last_ack_at.is_some_and(|ack| observed_at < ack) {
            return ReconcileOutcome::Discarded(StaleReason::PredatesAck);
        }
        if !agrees_with_confirmed && self.blocked_until.is_some_and(|until| now < until) {
            return ReconcileOutcome::Discarded(StaleReason::BlockingWindow);
        }
        if !agrees_with_target
            && self
                .last_local_change
                .is_some_and(|at| now.saturating_duration_since(at) < grace_window)
        {
            return ReconcileOutcome::Discarded(StaleReason::GraceWindow);
        }

        let playback_changed = reading.playback.is_some() && reading.playback != self.state.playback;
        if agrees_with_confirmed
            && agrees_with_target
            && self.same(value, self.state.display_value)
            && !playback_changed
        {
            return ReconcileOutcome::Unchanged;
        }

        self.state.confirmed_value = value;
        self.state.target_value = value;
        self.state.display_value = value;
        self.state.source = ChangeSource::External;
        if self.in_flight.is_some() {
            self.superseded_in_flight = true;
        }
        if reading.playback.is_some() {
            self.state.playback.clone_from(&reading.playback);
        }
        self.remember_level(value);
        ReconcileOutcome::Applied
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_millis(500);
    const BLOCK: Duration = Duration::from_millis(600);

    fn record() -> SyncRecord {
        SyncRecord::new(EntityId::parse("light.door").unwrap())
    }

    fn reading(value: f64) -> RemoteReading {
        RemoteReading::value(EntityId::parse("light.door").unwrap(), value)
    }

    #[test]
    fn pending_rejects_foreign_values_but_accepts_echo() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_user(40.0, t0);
        let cmd = rec.on_fire(40.0, 1).unwrap();
        assert_eq!(cmd.value, 40.0);

        let foreign = rec.reconcile(&reading(25.0), t0, t0, GRACE);
        assert_eq!(foreign, ReconcileOutcome::Discarded(StaleReason::Pending));
        assert_eq!(rec.state.target_value, 40.0);
        assert_eq!(rec.state.confirmed_value, 0.0);

        let echo = rec.reconcile(&reading(40.0), t0, t0, GRACE);
        assert_eq!(echo, ReconcileOutcome::Confirmed);
        assert_eq!(rec.state.confirmed_value, 40.0);
        assert!(!rec.state.is_pending);
    }

    #[test]
    fn ack_sets_confirmed_and_blocks_disagreeing_updates() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_user(70.0, t0);
        rec.on_fire(70.0, 1).unwrap();
        assert_eq!(rec.on_ack(1, t0, BLOCK, || 2), AfterCommand::Idle);
        assert_eq!(rec.state.confirmed_value, 70.0);
        assert!(!rec.state.is_pending);

        let later = t0 + GRACE + Duration::from_millis(10);
        let stale = rec.reconcile(&reading(10.0), later, later, GRACE);
        assert_eq!(stale, ReconcileOutcome::Discarded(StaleReason::BlockingWindow));

        let after = t0 + BLOCK + Duration::from_millis(1);
        let fresh = rec.reconcile(&reading(10.0), after, after, GRACE);
        assert_eq!(fresh, ReconcileOutcome::Applied);
        assert_eq!(rec.state.confirmed_value, 10.0);
        assert_eq!(rec.state.source, ChangeSource::External);
    }

    #[test]
    fn results_observed_before_ack_are_fenced() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_user(70.0, t0);
        rec.on_fire(70.0, 1).unwrap();
        let ack_at = t0 + Duration::from_millis(100);
        rec.on_ack(1, ack_at, BLOCK, || 2);

        let much_later = t0 + Duration::from_secs(5);
        let outcome = rec.reconcile(&reading(0.0), t0, much_later, GRACE);
        assert_eq!(outcome, ReconcileOutcome::Discarded(StaleReason::PredatesAck));
    }

    #[test]
    fn grace_window_discards_echo_unless_it_matches_target() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_initial(20.0);
        rec.last_local_change = Some(t0);
        rec.state.target_value = 60.0;

        let soon = t0 + Duration::from_millis(100);
        assert_eq!(
            rec.reconcile(&reading(20.0), soon, soon, GRACE),
            ReconcileOutcome::Discarded(StaleReason::GraceWindow)
        );
        assert_eq!(
            rec.reconcile(&reading(60.0), soon, soon, GRACE),
            ReconcileOutcome::Applied
        );
    }

    #[test]
    fn failure_rolls_back_and_remembers_value() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_initial(30.0);
        rec.apply_user(80.0, t0);
        rec.on_fire(80.0, 1).unwrap();

        assert_eq!(rec.on_failure(1), Some(80.0));
        assert_eq!(rec.state.target_value, 30.0);
        assert_eq!(rec.state.display_value, 30.0);
        assert!(rec.state.has_error);
        assert!(!rec.state.is_pending);
        assert_eq!(rec.failed_value, Some(80.0));
    }

    #[test]
    fn queued_value_follows_the_in_flight_command() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_user(10.0, t0);
        rec.on_fire(10.0, 1).unwrap();
        rec.apply_user(90.0, t0);
        assert!(rec.on_fire(90.0, 2).is_none());

        match rec.on_ack(1, t0, BLOCK, || 2) {
            AfterCommand::Next(next) => assert_eq!(next, InFlight { command_id: 2, value: 90.0 }),
            other => panic!("expected queued command, got {other:?}"),
        }
        assert!(rec.state.is_pending);
        assert_eq!(rec.on_ack(2, t0, BLOCK, || 3), AfterCommand::Idle);
        assert_eq!(rec.state.confirmed_value, 90.0);
    }

    #[test]
    fn superseded_results_are_ignored() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_user(10.0, t0);
        rec.on_fire(10.0, 1).unwrap();
        rec.force(&reading(55.0));

        assert_eq!(rec.on_ack(1, t0, BLOCK, || 2), AfterCommand::Ignored);
        assert_eq!(rec.on_failure(1), None);
        assert_eq!(rec.state.confirmed_value, 55.0);
    }

    #[test]
    fn late_ack_does_not_overwrite_a_newer_hub_value() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_user(75.0, t0);
        rec.on_fire(75.0, 1).unwrap();

        let echo_at = t0 + Duration::from_millis(100);
        assert_eq!(
            rec.reconcile(&reading(75.0), echo_at, echo_at, GRACE),
            ReconcileOutcome::Confirmed
        );

        // Someone else changes the light before our ack comes back
        let foreign_at = t0 + Duration::from_millis(800);
        assert_eq!(
            rec.reconcile(&reading(40.0), foreign_at, foreign_at, GRACE),
            ReconcileOutcome::Applied
        );

        let ack_at = t0 + Duration::from_millis(900);
        assert_eq!(rec.on_ack(1, ack_at, BLOCK, || 2), AfterCommand::Idle);
        assert_eq!(rec.state.display_value, 40.0);
        assert_eq!(rec.state.confirmed_value, 40.0);
        assert_eq!(rec.state.target_value, 40.0);
        assert!(!rec.state.is_pending);
        assert!(rec.state.is_settled());

        // Nothing left to fence: the next reading converges
        let next = ack_at + Duration::from_millis(50);
        assert_eq!(
            rec.reconcile(&reading(45.0), next, next, GRACE),
            ReconcileOutcome::Applied
        );
    }

    #[test]
    fn sensors_apply_small_changes() {
        let t0 = Instant::now();
        let sensor = EntityId::parse("sensor.hall_temp").unwrap();
        let mut rec = SyncRecord::new(sensor.clone());
        rec.apply_initial(21.2);

        let outcome = rec.reconcile(&RemoteReading::value(sensor, 21.6), t0, t0, GRACE);
        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(rec.state.display_value, 21.6);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let t0 = Instant::now();
        let mut rec = record();
        assert_eq!(rec.reconcile(&reading(42.0), t0, t0, GRACE), ReconcileOutcome::Applied);
        let once = rec.state.clone();
        assert_eq!(rec.reconcile(&reading(42.0), t0, t0, GRACE), ReconcileOutcome::Unchanged);
        assert_eq!(rec.state, once);
    }

    #[test]
    fn metadata_only_reading_keeps_value() {
        let t0 = Instant::now();
        let mut rec = record();
        rec.apply_initial(50.0);
        let mut r = reading(0.0);
        r.value = None;
        r.unit = Some("%".into());
        assert_eq!(rec.reconcile(&r, t0, t0, GRACE), ReconcileOutcome::Unchanged);
        assert_eq!(rec.state.confirmed_value, 50.0);
        assert_eq!(rec.state.unit.as_deref(), Some("%"));
    }
}
