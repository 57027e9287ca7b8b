//! Escalation scheduling.
//!
//! Each due, unpaid (obligation, cycle) walks through the configured
//! offsets: step 0 when it falls due, then one step per offset measured
//! from step 0's emission. The host keeps no timers for us, so the wait for
//! the next step is itself a notification: a silent placeholder tagged with
//! the next step's [`DedupKey`] and scheduled for that step's target time.
//! When it fires the dispatcher calls back in here, the visible reminder
//! replaces the placeholder under the same tag, and the next placeholder is
//! armed.
//!
//! ```text
//! NotDue -> Due(0) -> AwaitingTrigger(1) -> Due(1) -> ... -> Escalated
//!              \____________________\___________________\__> Paid | CycleRolled
//! ```
//!
//! No state is kept besides the ledger. Step 0's ledger record is the
//! anchor for all later targets, and the first offset without a record is
//! the next step.

use chrono::{DateTime, Days, FixedOffset, TimeZone};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cycle::{self, current_cycle, DueOccurrence};
use crate::dispatcher::{Outcome, WakeReport};
use crate::error::{CoreError, PresentError, StoreError};
use crate::ledger::{DedupKey, DedupLedger};
use crate::messages::PushPayload;
use crate::model::{Cycle, DailyTime, Obligation, SchedulerSettings};
use crate::presenter::{NotificationRequest, Presenter, DAILY_CHECK_TAG};
use crate::storage::{DurableStore, EscalationConfig};

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Where one (obligation, cycle) stands in its reminder sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EscalationState {
    /// Not due (yet) in this cycle, and nothing has fired.
    NotDue,
    /// `step` should be shown now.
    Due { step: usize },
    /// `step` is next, at `at_ms`.
    AwaitingTrigger { step: usize, at_ms: i64 },
    /// Every step has been shown.
    Escalated,
    Paid,
    /// The cycle is over; its keys are inert.
    CycleRolled,
    /// The obligation no longer exists.
    Removed,
}

impl EscalationState {
    /// Paid, rolled, or removed: nothing for this cycle may fire again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::CycleRolled | Self::Removed)
    }
}

/// The next daily check after `now`: today at `time` if that is still
/// ahead, otherwise tomorrow at `time`.
pub fn next_daily_check(now: &DateTime<FixedOffset>, time: DailyTime) -> DateTime<FixedOffset> {
    let at_on = |days: u64| {
        now.date_naive()
            .checked_add_days(Days::new(days))
            .and_then(|date| {
                now.offset()
                    .from_local_datetime(&date.and_time(time.as_naive()))
                    .single()
            })
    };
    match at_on(0) {
        Some(today) if today > *now => today,
        _ => at_on(1).unwrap_or_else(|| *now + chrono::Duration::hours(24)),
    }
}

fn target_ms(anchor_ms: i64, offsets: &[u32], step: usize) -> i64 {
    let base = offsets.first().copied().unwrap_or(0);
    let delta = offsets.get(step).copied().unwrap_or(base).saturating_sub(base);
    anchor_ms + i64::from(delta) * HOUR_MS
}

/// Drives reminder sequences over one store and one presenter.
pub struct EscalationScheduler<'a> {
    store: &'a dyn DurableStore,
    presenter: Presenter<'a>,
    config: &'a EscalationConfig,
}

impl<'a> EscalationScheduler<'a> {
    pub fn new(
        store: &'a dyn DurableStore,
        presenter: Presenter<'a>,
        config: &'a EscalationConfig,
    ) -> Self {
        Self {
            store,
            presenter,
            config,
        }
    }

    fn ledger(&self) -> DedupLedger<'a> {
        DedupLedger::new(self.store)
    }

    /// Configured offsets with repeats removed; repeated offsets would share
    /// a dedup key.
    fn offsets(&self) -> Vec<u32> {
        let mut offsets = self.config.offsets_hours.clone();
        offsets.dedup();
        offsets
    }

    /// The dedup key of `step` for one obligation and cycle.
    pub fn key_for(&self, obligation_id: &str, cycle: Cycle, step: usize) -> Option<DedupKey> {
        self.offsets()
            .get(step)
            .map(|&hours| DedupKey::new(obligation_id, cycle, hours))
    }

    fn occurrence(
        &self,
        obligation: &Obligation,
        cycle: Cycle,
        now: &DateTime<FixedOffset>,
    ) -> Option<DueOccurrence> {
        cycle::due_occurrence(obligation, now.date_naive(), self.config.due_soon_window_days)
            .filter(|occ| occ.cycle == cycle)
    }

    /// Current state of `(obligation_id, cycle)`. `obligation` is `None`
    /// when the record has been deleted.
    ///
    /// # Errors
    /// Returns an error if the ledger cannot be read.
    pub fn evaluate(
        &self,
        obligation_id: &str,
        obligation: Option<&Obligation>,
        cycle: Cycle,
        now: &DateTime<FixedOffset>,
    ) -> Result<EscalationState, StoreError> {
        let Some(obligation) = obligation else {
            return Ok(EscalationState::Removed);
        };
        if obligation.is_paid(cycle) {
            return Ok(EscalationState::Paid);
        }
        if cycle < current_cycle(now) {
            return Ok(EscalationState::CycleRolled);
        }

        let offsets = self.offsets();
        let Some(&first) = offsets.first() else {
            return Ok(EscalationState::NotDue);
        };
        let records = self.ledger().records_for_cycle(obligation_id, cycle)?;
        let Some(anchor) = records
            .iter()
            .find(|r| r.offset_hours == first)
            .map(|r| r.fired_at_ms)
        else {
            return Ok(if self.occurrence(obligation, cycle, now).is_some() {
                EscalationState::Due { step: 0 }
            } else {
                EscalationState::NotDue
            });
        };

        let pending = (1..offsets.len())
            .find(|&step| !records.iter().any(|r| r.offset_hours == offsets[step]));
        Ok(match pending {
            None => EscalationState::Escalated,
            Some(step) => {
                let at_ms = target_ms(anchor, &offsets, step);
                if at_ms <= now.timestamp_millis() {
                    EscalationState::Due { step }
                } else {
                    EscalationState::AwaitingTrigger { step, at_ms }
                }
            }
        })
    }

    /// Bring `(obligation, cycle)` up to date at `now`: show the due step,
    /// arm the next one, or cancel what a terminal state left behind.
    ///
    /// # Errors
    /// Returns an error if the store or host fails. A failed emission
    /// releases its ledger claim so a later wake can retry it.
    pub fn advance(
        &self,
        obligation: &Obligation,
        cycle: Cycle,
        now: &DateTime<FixedOffset>,
        report: &mut WakeReport,
    ) -> Result<EscalationState, CoreError> {
        self.advance_with(obligation, cycle, now, None, report)
    }

    /// [`advance`](Self::advance) for a wake caused by a push naming this
    /// obligation. If step 0 is due it is shown with the push's text.
    ///
    /// # Errors
    /// See [`advance`](Self::advance).
    pub fn advance_from_push(
        &self,
        obligation: &Obligation,
        cycle: Cycle,
        now: &DateTime<FixedOffset>,
        push: &PushPayload,
        report: &mut WakeReport,
    ) -> Result<EscalationState, CoreError> {
        self.advance_with(obligation, cycle, now, Some(push), report)
    }

    fn advance_with(
        &self,
        obligation: &Obligation,
        cycle: Cycle,
        now: &DateTime<FixedOffset>,
        push: Option<&PushPayload>,
        report: &mut WakeReport,
    ) -> Result<EscalationState, CoreError> {
        let state = self.evaluate(&obligation.id, Some(obligation), cycle, now)?;
        debug!(obligation_id = %obligation.id, %cycle, ?state, "evaluated");
        match state {
            EscalationState::Due { step } => self.fire(obligation, cycle, step, now, push, report),
            EscalationState::AwaitingTrigger { step, at_ms } => {
                self.ensure_armed(obligation, cycle, step, at_ms, now.timestamp_millis(), report)?;
                Ok(state)
            }
            EscalationState::Paid | EscalationState::CycleRolled | EscalationState::Removed => {
                self.cancel_cycle(&obligation.id, cycle, report)?;
                Ok(state)
            }
            EscalationState::NotDue | EscalationState::Escalated => Ok(state),
        }
    }

    fn fire(
        &self,
        obligation: &Obligation,
        cycle: Cycle,
        step: usize,
        now: &DateTime<FixedOffset>,
        push: Option<&PushPayload>,
        report: &mut WakeReport,
    ) -> Result<EscalationState, CoreError> {
        let offsets = self.offsets();
        let ledger = self.ledger();
        let now_ms = now.timestamp_millis();

        let anchor = if step == 0 {
            now_ms
        } else {
            let first = DedupKey::new(obligation.id.as_str(), cycle, offsets[0]);
            ledger
                .fired_record(&first)?
                .map_or(now_ms, |r| r.fired_at_ms)
        };

        // Steps that elapsed while nothing woke us collapse into the latest.
        let mut last = step;
        while last + 1 < offsets.len() && target_ms(anchor, &offsets, last + 1) <= now_ms {
            last += 1;
        }
        for skipped in step..last {
            let key = DedupKey::new(obligation.id.as_str(), cycle, offsets[skipped]);
            if ledger.mark_superseded(&key, now_ms)? {
                report.push(Outcome::Superseded {
                    tag: key.to_string(),
                });
            }
        }

        let key = DedupKey::new(obligation.id.as_str(), cycle, offsets[last]);
        if !ledger.mark_fired(&key, now_ms)? {
            debug!(tag = %key, "already fired");
            report.push(Outcome::DuplicateSuppressed {
                tag: key.to_string(),
            });
            return Ok(self.evaluate(&obligation.id, Some(obligation), cycle, now)?);
        }

        self.close_earlier(&key, report)?;

        let due_date = cycle::due_date(obligation, cycle);
        let occurrence = self.occurrence(obligation, cycle, now);
        let mut request =
            self.presenter
                .reminder_request(obligation, &key, last, due_date, occurrence.as_ref());
        if let Some(push) = push.filter(|_| last == 0) {
            request.title = push.title.clone();
            request.body = push.body.clone();
            request.icon = Some(push.icon.clone());
        }
        if let Err(err) = self.presenter.emit_request(request, now_ms) {
            warn!(tag = %key, error = %err, "emit failed; releasing claim");
            ledger.release(&key)?;
            return Err(err.into());
        }
        info!(obligation_id = %obligation.id, %cycle, step = last, tag = %key, "reminder emitted");
        report.push(Outcome::Emitted {
            tag: key.to_string(),
            step: Some(last),
        });

        match offsets.get(last + 1) {
            Some(&hours) => {
                let next = DedupKey::new(obligation.id.as_str(), cycle, hours);
                let at_ms = target_ms(anchor, &offsets, last + 1);
                self.arm_step(obligation, &next, at_ms, now_ms, report)?;
                Ok(EscalationState::AwaitingTrigger {
                    step: last + 1,
                    at_ms,
                })
            }
            None => Ok(EscalationState::Escalated),
        }
    }

    /// Close the visible reminder of earlier steps in the same cycle.
    fn close_earlier(&self, key: &DedupKey, report: &mut WakeReport) -> Result<(), CoreError> {
        let prefix = DedupKey::obligation_prefix(key.obligation_id());
        for handle in self.presenter.list_outstanding(Some(&prefix))? {
            let earlier = handle.dedup_key().is_some_and(|k| {
                k.belongs_to(key.obligation_id())
                    && k.cycle() == key.cycle()
                    && k.offset_hours() < key.offset_hours()
            });
            if earlier && self.presenter.close(&handle)? {
                report.push(Outcome::Cancelled {
                    tag: handle.tag().to_string(),
                });
            }
        }
        Ok(())
    }

    fn arm_step(
        &self,
        obligation: &Obligation,
        key: &DedupKey,
        at_ms: i64,
        now_ms: i64,
        report: &mut WakeReport,
    ) -> Result<(), CoreError> {
        let mut request = NotificationRequest::new(
            self.presenter.config().default_title.clone(),
            format!("Next reminder for {}", obligation.name),
            key.to_string(),
        );
        request.trigger_at_ms = Some(at_ms);
        request.silent = true;
        request.data.obligation_id = Some(obligation.id.clone());

        match self.presenter.emit_request(request, now_ms) {
            Ok(_) => {
                debug!(tag = %key, at_ms, "armed");
                report.push(Outcome::Armed {
                    tag: key.to_string(),
                    at_ms,
                });
                Ok(())
            }
            Err(PresentError::TriggerUnsupported) => {
                info!(tag = %key, "host cannot schedule; step waits for a later wake");
                report.degrade(key.to_string());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn ensure_armed(
        &self,
        obligation: &Obligation,
        cycle: Cycle,
        step: usize,
        at_ms: i64,
        now_ms: i64,
        report: &mut WakeReport,
    ) -> Result<(), CoreError> {
        let Some(key) = self.key_for(&obligation.id, cycle, step) else {
            return Ok(());
        };
        if !self.presenter.supports_triggers() {
            report.degrade(key.to_string());
            return Ok(());
        }
        let armed = self
            .presenter
            .find(&key.to_string())?
            .is_some_and(|h| h.request.trigger_at_ms == Some(at_ms) && h.is_pending(now_ms));
        if armed {
            return Ok(());
        }
        self.arm_step(obligation, &key, at_ms, now_ms, report)
    }

    /// Close every outstanding reminder and placeholder of one obligation
    /// in one cycle.
    ///
    /// # Errors
    /// Returns an error if the host fails.
    pub fn cancel_cycle(
        &self,
        obligation_id: &str,
        cycle: Cycle,
        report: &mut WakeReport,
    ) -> Result<usize, CoreError> {
        let prefix = DedupKey::obligation_prefix(obligation_id);
        let mut closed = 0;
        for handle in self.presenter.list_outstanding(Some(&prefix))? {
            let in_cycle = handle
                .dedup_key()
                .is_some_and(|k| k.belongs_to(obligation_id) && k.cycle() == cycle);
            if in_cycle && self.presenter.close(&handle)? {
                closed += 1;
                report.push(Outcome::Cancelled {
                    tag: handle.tag().to_string(),
                });
            }
        }
        Ok(closed)
    }

    /// Close every outstanding reminder and placeholder of one obligation,
    /// in any cycle.
    ///
    /// # Errors
    /// Returns an error if the host fails.
    pub fn cancel_obligation(
        &self,
        obligation_id: &str,
        report: &mut WakeReport,
    ) -> Result<usize, CoreError> {
        let closed = self.presenter.cancel_for_obligation(obligation_id)?;
        for handle in &closed {
            report.push(Outcome::Cancelled {
                tag: handle.tag().to_string(),
            });
        }
        if !closed.is_empty() {
            info!(obligation_id, count = closed.len(), "cancelled reminders");
        }
        Ok(closed.len())
    }

    /// Arm the silent daily-check trigger for the next configured time.
    ///
    /// With `replace` unset an already pending trigger is kept. Disabled
    /// settings cancel it instead.
    ///
    /// # Errors
    /// Returns an error if the host fails for a reason other than missing
    /// trigger support.
    pub fn arm_daily_check(
        &self,
        settings: &SchedulerSettings,
        now: &DateTime<FixedOffset>,
        replace: bool,
        report: &mut WakeReport,
    ) -> Result<(), CoreError> {
        let now_ms = now.timestamp_millis();
        if !settings.enabled {
            for handle in self.presenter.cancel_all_with_prefix(DAILY_CHECK_TAG)? {
                report.push(Outcome::Cancelled {
                    tag: handle.tag().to_string(),
                });
            }
            return Ok(());
        }

        if !replace {
            if let Some(at_ms) = self
                .presenter
                .find(DAILY_CHECK_TAG)?
                .filter(|h| h.is_pending(now_ms))
                .and_then(|h| h.request.trigger_at_ms)
            {
                report.push(Outcome::AlreadyArmed {
                    tag: DAILY_CHECK_TAG.to_string(),
                    at_ms,
                });
                return Ok(());
            }
        }

        let at = next_daily_check(now, settings.time);
        match self.presenter.arm_daily_check(&at, now_ms) {
            Ok(_) => {
                info!(at = %at, "daily check armed");
                report.push(Outcome::Armed {
                    tag: DAILY_CHECK_TAG.to_string(),
                    at_ms: at.timestamp_millis(),
                });
                Ok(())
            }
            Err(PresentError::TriggerUnsupported) => {
                info!("host cannot schedule; daily check runs on host wakes only");
                report.degrade(DAILY_CHECK_TAG.to_string());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::{Handle, MemoryHost, NotificationHost};
    use crate::storage::{NotificationsConfig, SqliteStore};

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, day, hour, minute, 0)
            .unwrap()
    }

    fn april_first() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 4, 1, 0, 0, 0)
            .unwrap()
    }

    fn march() -> Cycle {
        Cycle::new(2024, 3).unwrap()
    }

    fn obligation() -> Obligation {
        Obligation::new("A", "Rent", 15, Cycle::new(2024, 1).unwrap())
    }

    struct Fixture {
        store: SqliteStore,
        host: MemoryHost,
        notifications: NotificationsConfig,
        escalation: EscalationConfig,
    }

    impl Fixture {
        fn new(host: MemoryHost) -> Self {
            Self {
                store: SqliteStore::open_memory().unwrap(),
                host,
                notifications: NotificationsConfig::default(),
                escalation: EscalationConfig::default(),
            }
        }

        fn scheduler(&self) -> EscalationScheduler<'_> {
            EscalationScheduler::new(
                &self.store,
                Presenter::new(&self.host, &self.notifications),
                &self.escalation,
            )
        }
    }

    fn emitted(report: &WakeReport) -> Vec<String> {
        report
            .outcomes
            .iter()
            .filter_map(|o| match o {
                Outcome::Emitted { tag, .. } => Some(tag.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn daily_check_later_today() {
        let next = next_daily_check(&at(15, 8, 0), DailyTime::new(9, 0).unwrap());
        assert_eq!(next, at(15, 9, 0));
    }

    #[test]
    fn daily_check_tomorrow_once_passed() {
        let time = DailyTime::new(9, 0).unwrap();
        assert_eq!(next_daily_check(&at(15, 10, 0), time), at(16, 9, 0));
        assert_eq!(next_daily_check(&at(15, 9, 0), time), at(16, 9, 0));
    }

    #[test]
    fn daily_check_keeps_local_offset() {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 31, 23, 30, 0).unwrap();
        let next = next_daily_check(&now, DailyTime::new(7, 30).unwrap());
        assert_eq!(next, tz.with_ymd_and_hms(2024, 4, 1, 7, 30, 0).unwrap());
    }

    #[test]
    fn evaluate_walks_the_state_machine() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let ob = obligation();

        assert_eq!(
            sched.evaluate("A", Some(&ob), march(), &at(14, 9, 0)).unwrap(),
            EscalationState::NotDue
        );
        assert_eq!(
            sched.evaluate("A", Some(&ob), march(), &at(15, 9, 0)).unwrap(),
            EscalationState::Due { step: 0 }
        );

        let mut report = WakeReport::new("test");
        let state = sched.advance(&ob, march(), &at(15, 9, 0), &mut report).unwrap();
        let step1_at = at(15, 12, 0).timestamp_millis();
        assert_eq!(
            state,
            EscalationState::AwaitingTrigger {
                step: 1,
                at_ms: step1_at
            }
        );
        assert_eq!(
            sched.evaluate("A", Some(&ob), march(), &at(15, 12, 0)).unwrap(),
            EscalationState::Due { step: 1 }
        );

        let mut paid = ob.clone();
        paid.set_paid(march(), true);
        assert_eq!(
            sched.evaluate("A", Some(&paid), march(), &at(15, 12, 0)).unwrap(),
            EscalationState::Paid
        );
        assert_eq!(
            sched.evaluate("A", Some(&ob), march(), &april_first()).unwrap(),
            EscalationState::CycleRolled
        );
        assert_eq!(
            sched.evaluate("A", None, march(), &at(15, 12, 0)).unwrap(),
            EscalationState::Removed
        );
    }

    #[test]
    fn first_step_arms_the_next() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let mut report = WakeReport::new("test");
        sched.advance(&obligation(), march(), &at(15, 9, 0), &mut report).unwrap();

        assert_eq!(emitted(&report), vec!["A-2024-03-0h"]);
        let placeholder = fx.host.outstanding(Some("A-2024-03-3h")).unwrap();
        assert_eq!(placeholder.len(), 1);
        assert!(placeholder[0].request.silent);
        assert_eq!(
            placeholder[0].request.trigger_at_ms,
            Some(at(15, 12, 0).timestamp_millis())
        );
    }

    #[test]
    fn repeated_advance_is_a_no_op() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let ob = obligation();
        let mut report = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 9, 0), &mut report).unwrap();
        let mut again = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 9, 30), &mut again).unwrap();
        assert!(emitted(&again).is_empty());
        assert_eq!(fx.host.history().iter().filter(|h| h.tag() == "A-2024-03-0h").count(), 1);
    }

    #[test]
    fn trigger_step_replaces_previous_notification() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let ob = obligation();
        let mut report = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 9, 0), &mut report).unwrap();
        let mut report = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 12, 0), &mut report).unwrap();

        assert_eq!(emitted(&report), vec!["A-2024-03-3h"]);
        let now_ms = at(15, 12, 0).timestamp_millis();
        assert!(fx.host.outstanding(Some("A-2024-03-0h")).unwrap().is_empty());
        assert_eq!(fx.host.visible_count("A-2024-03-0h", now_ms), 1);
        assert_eq!(fx.host.visible_count("A-2024-03-3h", now_ms), 1);
        assert_eq!(fx.host.outstanding(Some("A-2024-03-6h")).unwrap().len(), 1);
    }

    #[test]
    fn elapsed_steps_collapse_into_the_latest() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let ob = obligation();
        let mut report = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 9, 0), &mut report).unwrap();

        let mut report = WakeReport::new("test");
        let state = sched.advance(&ob, march(), &at(15, 16, 0), &mut report).unwrap();
        assert_eq!(emitted(&report), vec!["A-2024-03-6h"]);
        assert!(report.outcomes.contains(&Outcome::Superseded {
            tag: "A-2024-03-3h".into()
        }));
        assert_eq!(
            state,
            EscalationState::AwaitingTrigger {
                step: 3,
                at_ms: at(15, 18, 0).timestamp_millis()
            }
        );

        let ledger = DedupLedger::new(&fx.store);
        let skipped = ledger
            .fired_record(&DedupKey::new("A", march(), 3))
            .unwrap()
            .unwrap();
        assert!(skipped.superseded);
    }

    #[test]
    fn last_step_escalates() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let ob = obligation();
        let mut report = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 9, 0), &mut report).unwrap();
        let state = sched.advance(&ob, march(), &at(15, 20, 0), &mut report).unwrap();
        assert_eq!(state, EscalationState::Escalated);
        assert!(fx.host.outstanding(None).unwrap().iter().all(|h| !h.is_pending(0)));
    }

    #[test]
    fn hosts_without_triggers_degrade() {
        let fx = Fixture::new(MemoryHost::without_triggers());
        let sched = fx.scheduler();
        let ob = obligation();
        let mut report = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 9, 0), &mut report).unwrap();
        assert_eq!(emitted(&report), vec!["A-2024-03-0h"]);
        assert!(report.degraded);
        assert!(report.errors.is_empty());

        let mut later = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 12, 30), &mut later).unwrap();
        assert_eq!(emitted(&later), vec!["A-2024-03-3h"]);
    }

    struct RefusingHost;

    impl NotificationHost for RefusingHost {
        fn supports_triggers(&self) -> bool {
            true
        }

        fn show(&self, request: NotificationRequest, _now_ms: i64) -> Result<Handle, PresentError> {
            Err(PresentError::Rejected {
                tag: request.tag,
                message: "permission denied".into(),
            })
        }

        fn outstanding(&self, _tag_prefix: Option<&str>) -> Result<Vec<Handle>, PresentError> {
            Ok(Vec::new())
        }

        fn close(&self, _handle_id: u64) -> Result<bool, PresentError> {
            Ok(false)
        }

        fn open_url(&self, _url: &str) -> Result<(), PresentError> {
            Ok(())
        }
    }

    #[test]
    fn failed_emit_releases_the_claim() {
        let store = SqliteStore::open_memory().unwrap();
        let notifications = NotificationsConfig::default();
        let escalation = EscalationConfig::default();
        let sched = EscalationScheduler::new(
            &store,
            Presenter::new(&RefusingHost, &notifications),
            &escalation,
        );
        let mut report = WakeReport::new("test");
        assert!(sched.advance(&obligation(), march(), &at(15, 9, 0), &mut report).is_err());
        let ledger = DedupLedger::new(&store);
        assert!(!ledger.has_fired(&DedupKey::new("A", march(), 0)).unwrap());
    }

    #[test]
    fn paid_cycle_cancels_its_handles() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let mut ob = obligation();
        let mut report = WakeReport::new("test");
        sched.advance(&ob, march(), &at(15, 9, 0), &mut report).unwrap();

        ob.set_paid(march(), true);
        let mut report = WakeReport::new("test");
        let state = sched.advance(&ob, march(), &at(15, 10, 0), &mut report).unwrap();
        assert_eq!(state, EscalationState::Paid);
        assert!(fx.host.outstanding(None).unwrap().is_empty());
    }

    #[test]
    fn daily_check_is_kept_unless_replaced() {
        let fx = Fixture::new(MemoryHost::new());
        let sched = fx.scheduler();
        let settings = SchedulerSettings::default();
        let mut report = WakeReport::new("test");
        sched.arm_daily_check(&settings, &at(15, 8, 0), false, &mut report).unwrap();
        sched.arm_daily_check(&settings, &at(15, 8, 30), false, &mut report).unwrap();
        assert_eq!(
            report.outcomes[1],
            Outcome::AlreadyArmed {
                tag: DAILY_CHECK_TAG.into(),
                at_ms: at(15, 9, 0).timestamp_millis()
            }
        );

        let disabled = SchedulerSettings {
            enabled: false,
            ..settings
        };
        sched.arm_daily_check(&disabled, &at(15, 8, 30), true, &mut report).unwrap();
        assert!(fx.host.outstanding(Some(DAILY_CHECK_TAG)).unwrap().is_empty());
    }
}
