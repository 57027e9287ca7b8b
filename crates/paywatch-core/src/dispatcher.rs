//! Wake dispatcher.
//!
//! The host activates the engine for discrete reasons and may tear the
//! process down as soon as the handler returns. [`WakeDispatcher::dispatch`]
//! is the only entry point: it opens the store, routes the wake to one
//! handler, and folds every failure into the returned [`WakeReport`]. The
//! call returning is the completion signal.
//!
//! Handlers read current store state rather than trusting the wake payload,
//! and every emission goes through the ledger, so repeating a wake (or
//! running two at once) cannot show a reminder twice.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::cycle::{current_cycle, due_occurrence};
use crate::error::{CoreError, StoreError};
use crate::escalation::{EscalationScheduler, EscalationState};
use crate::ledger::{DedupKey, DedupLedger};
use crate::messages::{AppMessage, PushPayload};
use crate::model::{Cycle, Obligation, SchedulerSettings};
use crate::presenter::{
    Handle, NotificationHost, NotificationRequest, Presenter, ACTION_MARK_PAID, DAILY_CHECK_TAG,
    PUSH_TAG_PREFIX,
};
use crate::storage::{Collection, Config, DurableStore, OpenStore, StoreExt};

/// Meta key of the scheduler settings.
pub const SETTINGS_KEY: &str = "settings";
const INSTALL_KEY: &str = "installed";

/// How the user interacted with a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Interaction {
    /// The body or one of its buttons was clicked.
    Click { action: Option<String> },
    Dismiss,
}

/// Why the host woke the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    Install,
    Activate,
    ExternalPush { payload: Vec<u8> },
    PeriodicTick { tag: String },
    /// A scheduled notification reached its trigger time.
    TriggerFired { tag: String },
    UserInteraction {
        handle: Handle,
        interaction: Interaction,
    },
    Message(AppMessage),
}

impl Wake {
    pub fn reason(&self) -> &'static str {
        match self {
            Wake::Install => "install",
            Wake::Activate => "activate",
            Wake::ExternalPush { .. } => "push",
            Wake::PeriodicTick { .. } => "periodic-tick",
            Wake::TriggerFired { .. } => "trigger-fired",
            Wake::UserInteraction { .. } => "user-interaction",
            Wake::Message(_) => "message",
        }
    }

    /// Shorthand for an `update-settings` message.
    pub fn settings(settings: SchedulerSettings) -> Self {
        Wake::Message(AppMessage::UpdateSettings { settings })
    }
}

/// One observable effect of a wake.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Outcome {
    /// A visible notification was shown.
    Emitted { tag: String, step: Option<usize> },
    /// A trigger notification was scheduled.
    Armed { tag: String, at_ms: i64 },
    AlreadyArmed { tag: String, at_ms: i64 },
    /// The ledger already held this key.
    DuplicateSuppressed { tag: String },
    /// Recorded as fired without being shown; a later step replaced it.
    Superseded { tag: String },
    Cancelled { tag: String },
    /// The host cannot schedule; this step waits for a later wake.
    Degraded { tag: String },
    PayloadDefaulted { issue: String },
    MarkedPaid { obligation_id: String, cycle: Cycle },
    Opened { url: String },
    SettingsSaved { settings: SchedulerSettings },
    LedgerCleared { obligation_id: String, removed: usize },
    LedgerPruned { removed: usize },
    Installed { first: bool },
    Ignored { reason: String },
}

/// Everything a wake did, and everything that went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct WakeReport {
    pub reason: &'static str,
    pub outcomes: Vec<Outcome>,
    pub errors: Vec<String>,
    /// Some step or check could not be scheduled on this host.
    pub degraded: bool,
    /// The store was unavailable and the wake did nothing.
    pub skipped: bool,
}

impl WakeReport {
    pub fn new(reason: &'static str) -> Self {
        Self {
            reason,
            outcomes: Vec::new(),
            errors: Vec::new(),
            degraded: false,
            skipped: false,
        }
    }

    pub fn push(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub fn degrade(&mut self, tag: String) {
        self.degraded = true;
        self.outcomes.push(Outcome::Degraded { tag });
    }

    pub fn fail(&mut self, err: &CoreError) {
        warn!(error = %err, "wake step failed");
        self.errors.push(err.to_string());
    }

    /// Tags of the notifications shown during this wake.
    pub fn emitted(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                Outcome::Emitted { tag, .. } => Some(tag.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Entry point invoked by the host for every wake.
pub struct WakeDispatcher {
    stores: Box<dyn OpenStore>,
    host: Arc<dyn NotificationHost>,
    config: Config,
}

impl WakeDispatcher {
    pub fn new(stores: impl OpenStore + 'static, host: Arc<dyn NotificationHost>, config: Config) -> Self {
        Self {
            stores: Box::new(stores),
            host,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn NotificationHost> {
        &self.host
    }

    /// Handle one wake. Never fails: errors are logged and reported.
    pub fn dispatch(&self, wake: Wake, now: DateTime<FixedOffset>) -> WakeReport {
        let span = info_span!("wake", reason = wake.reason());
        let _enter = span.enter();
        let mut report = WakeReport::new(wake.reason());

        let store = match self.stores.open_store() {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "store unavailable; skipping wake");
                report.skipped = true;
                report.errors.push(err.to_string());
                let presenter = Presenter::new(self.host.as_ref(), &self.config.notifications);
                if let Wake::UserInteraction {
                    handle,
                    interaction: Interaction::Click { action },
                } = &wake
                {
                    if action.as_deref() != Some(ACTION_MARK_PAID) {
                        open_clicked(&presenter, handle, &mut report);
                    }
                }
                return report;
            }
        };

        let presenter = Presenter::new(self.host.as_ref(), &self.config.notifications);
        let run = WakeRun {
            store: store.as_ref(),
            presenter,
            scheduler: EscalationScheduler::new(store.as_ref(), presenter, &self.config.escalation),
            config: &self.config,
            now,
            now_ms: now.timestamp_millis(),
        };
        if let Err(err) = run.handle(wake, &mut report) {
            if matches!(&err, CoreError::Store(e) if e.is_unavailable()) {
                report.skipped = true;
            }
            report.fail(&err);
        }

        info!(
            outcomes = report.outcomes.len(),
            errors = report.errors.len(),
            degraded = report.degraded,
            "wake complete"
        );
        report
    }
}

fn open_clicked(presenter: &Presenter<'_>, handle: &Handle, report: &mut WakeReport) {
    let url = handle
        .request
        .data
        .url
        .clone()
        .or_else(|| {
            handle
                .request
                .data
                .obligation_id
                .as_deref()
                .map(|id| presenter.deep_link(id))
        })
        .unwrap_or_else(|| presenter.config().app_url.clone());
    match presenter.open_url(&url) {
        Ok(()) => report.push(Outcome::Opened { url }),
        Err(err) => report.fail(&CoreError::from(err)),
    }
}

/// State for one wake; dropped when the handler returns.
struct WakeRun<'a> {
    store: &'a dyn DurableStore,
    presenter: Presenter<'a>,
    scheduler: EscalationScheduler<'a>,
    config: &'a Config,
    now: DateTime<FixedOffset>,
    now_ms: i64,
}

impl WakeRun<'_> {
    fn handle(&self, wake: Wake, report: &mut WakeReport) -> Result<(), CoreError> {
        match wake {
            Wake::Install => self.install(report),
            Wake::Activate => self.activate(report),
            Wake::ExternalPush { payload } => self.push(&payload, report),
            Wake::PeriodicTick { tag } => self.tick(&tag, report),
            Wake::TriggerFired { tag } => self.trigger_fired(&tag, report),
            Wake::UserInteraction {
                handle,
                interaction,
            } => self.interaction(&handle, interaction, report),
            Wake::Message(message) => self.message(message, report),
        }
    }

    fn ledger(&self) -> DedupLedger<'_> {
        DedupLedger::new(self.store)
    }

    fn settings(&self) -> Result<SchedulerSettings, StoreError> {
        Ok(self
            .store
            .get_json(Collection::Meta, SETTINGS_KEY)?
            .unwrap_or_default())
    }

    fn obligation(&self, id: &str) -> Result<Option<Obligation>, StoreError> {
        self.store.get_json(Collection::Obligations, id)
    }

    fn install(&self, report: &mut WakeReport) -> Result<(), CoreError> {
        let marker = serde_json::json!({ "installedAtMs": self.now_ms });
        let first = self
            .store
            .put_json_if_absent(Collection::Meta, INSTALL_KEY, &marker)?;
        info!(first, "installed");
        report.push(Outcome::Installed { first });
        let settings = self.settings()?;
        self.scheduler
            .arm_daily_check(&settings, &self.now, false, report)
    }

    fn activate(&self, report: &mut WakeReport) -> Result<(), CoreError> {
        let retention = self.config.escalation.retention_cycles;
        let cutoff = current_cycle(&self.now).months_before(retention);
        let push_cutoff_ms = TimeDelta::try_days(i64::from(retention) * 31)
            .and_then(|age| self.now.checked_sub_signed(age))
            .map_or(i64::MIN, |at| at.timestamp_millis());
        let removed = self.ledger().prune_before(cutoff, push_cutoff_ms)?;
        if removed > 0 {
            info!(removed, %cutoff, "ledger pruned");
            report.push(Outcome::LedgerPruned { removed });
        }

        let settings = self.settings()?;
        self.scheduler
            .arm_daily_check(&settings, &self.now, true, report)?;
        self.check_all(&settings, report)
    }

    fn tick(&self, tag: &str, report: &mut WakeReport) -> Result<(), CoreError> {
        debug!(tag, "periodic tick");
        let settings = self.settings()?;
        self.check_all(&settings, report)?;
        self.scheduler
            .arm_daily_check(&settings, &self.now, false, report)
    }

    /// Advance every obligation, then close handles that should no longer
    /// be outstanding.
    fn check_all(&self, settings: &SchedulerSettings, report: &mut WakeReport) -> Result<(), CoreError> {
        let obligations: Vec<Obligation> = self.store.get_all_json(Collection::Obligations)?;

        if settings.enabled {
            let current = current_cycle(&self.now);
            let window = self.config.escalation.due_soon_window_days;
            for obligation in &obligations {
                let mut cycles = BTreeSet::from([current]);
                if let Some(occ) = due_occurrence(obligation, self.now.date_naive(), window) {
                    cycles.insert(occ.cycle);
                }
                for cycle in cycles {
                    if let Err(err) = self.scheduler.advance(obligation, cycle, &self.now, report) {
                        if matches!(&err, CoreError::Store(e) if e.is_unavailable()) {
                            return Err(err);
                        }
                        report.fail(&err);
                    }
                }
            }
        } else {
            debug!("reminders disabled; skipping check");
        }

        self.sweep(&obligations, report)
    }

    /// Close reminders of deleted obligations, rolled cycles, and paid cycles.
    fn sweep(&self, obligations: &[Obligation], report: &mut WakeReport) -> Result<(), CoreError> {
        let by_id: HashMap<&str, &Obligation> =
            obligations.iter().map(|o| (o.id.as_str(), o)).collect();
        let current = current_cycle(&self.now);
        for handle in self.presenter.list_outstanding(None)? {
            let Some(key) = handle.dedup_key() else {
                continue;
            };
            let stale = match by_id.get(key.obligation_id()) {
                None => true,
                Some(ob) => key.cycle() < current || ob.is_paid(key.cycle()),
            };
            if stale && self.presenter.close(&handle)? {
                debug!(tag = %handle.tag(), "swept");
                report.push(Outcome::Cancelled {
                    tag: handle.tag().to_string(),
                });
            }
        }
        Ok(())
    }

    fn push(&self, raw: &[u8], report: &mut WakeReport) -> Result<(), CoreError> {
        let (payload, issue) = PushPayload::parse(raw, &self.config.notifications);
        if let Some(issue) = issue {
            warn!(%issue, "push payload replaced by defaults");
            report.push(Outcome::PayloadDefaulted { issue });
        }

        let settings = self.settings()?;
        let known = match payload.obligation_id.as_deref() {
            Some(id) => self.obligation(id)?,
            None => None,
        };
        match known {
            Some(_) if !settings.enabled => {
                debug!("reminders disabled; push for obligation not shown");
                report.push(Outcome::Ignored {
                    reason: "reminders disabled".into(),
                });
            }
            Some(obligation) => self.push_for_obligation(&obligation, &payload, report)?,
            None => self.push_anonymous(&payload, report)?,
        }

        self.check_all(&settings, report)
    }

    fn push_for_obligation(
        &self,
        obligation: &Obligation,
        payload: &PushPayload,
        report: &mut WakeReport,
    ) -> Result<(), CoreError> {
        let window = self.config.escalation.due_soon_window_days;
        let cycle = due_occurrence(obligation, self.now.date_naive(), window)
            .map_or_else(|| current_cycle(&self.now), |occ| occ.cycle);
        let before = report.outcomes.len();
        let state = self
            .scheduler
            .advance_from_push(obligation, cycle, &self.now, payload, report)?;
        let emitted = report.outcomes[before..]
            .iter()
            .any(|o| matches!(o, Outcome::Emitted { .. }));
        if !emitted {
            if state.is_terminal() || state == EscalationState::NotDue {
                report.push(Outcome::Ignored {
                    reason: format!("obligation {} is not due", obligation.id),
                });
            } else if let Some(key) = self.scheduler.key_for(&obligation.id, cycle, 0) {
                report.push(Outcome::DuplicateSuppressed {
                    tag: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn push_anonymous(&self, payload: &PushPayload, report: &mut WakeReport) -> Result<(), CoreError> {
        let digest = payload.digest(self.now.date_naive());
        let tag = format!("{PUSH_TAG_PREFIX}{digest}");
        let ledger = self.ledger();
        if !ledger.mark_push_fired(&digest, self.now_ms)? {
            report.push(Outcome::DuplicateSuppressed { tag });
            return Ok(());
        }

        let mut request = NotificationRequest::new(payload.title.clone(), payload.body.clone(), tag.clone());
        request.icon = Some(payload.icon.clone());
        request.badge = self.config.notifications.badge.clone();
        request.data.url = Some(self.config.notifications.app_url.clone());
        if let Err(err) = self.presenter.emit_request(request, self.now_ms) {
            ledger.release_push(&digest)?;
            return Err(err.into());
        }
        info!(%tag, "push shown");
        report.push(Outcome::Emitted { tag, step: None });
        Ok(())
    }

    fn trigger_fired(&self, tag: &str, report: &mut WakeReport) -> Result<(), CoreError> {
        if tag == DAILY_CHECK_TAG {
            let settings = self.settings()?;
            self.check_all(&settings, report)?;
            return self
                .scheduler
                .arm_daily_check(&settings, &self.now, true, report);
        }
        match tag.parse::<DedupKey>() {
            Ok(key) => self.wake_obligation(&key, report),
            Err(_) => {
                report.push(Outcome::Ignored {
                    reason: format!("no reminder for tag {tag}"),
                });
                Ok(())
            }
        }
    }

    /// A reminder's own notification woke us. Re-check the obligation now:
    /// whatever was true when the trigger was armed may no longer hold.
    fn wake_obligation(&self, key: &DedupKey, report: &mut WakeReport) -> Result<(), CoreError> {
        let id = key.obligation_id();
        let obligation = self.obligation(id)?;
        let settings = self.settings()?;
        let state = self
            .scheduler
            .evaluate(id, obligation.as_ref(), key.cycle(), &self.now)?;

        match (obligation, state) {
            (Some(obligation), state) if settings.enabled && !state.is_terminal() => {
                self.scheduler.advance(&obligation, key.cycle(), &self.now, report)?;
            }
            (_, state) if state.is_terminal() => {
                info!(obligation_id = id, cycle = %key.cycle(), ?state, "gate closed; cancelling");
                if state == EscalationState::CycleRolled {
                    self.scheduler.cancel_cycle(id, key.cycle(), report)?;
                } else {
                    self.scheduler.cancel_obligation(id, report)?;
                }
            }
            _ => {
                // Disabled: leave visible reminders, drop pending steps.
                for handle in self.presenter.list_outstanding(Some(&key.to_string()))? {
                    if handle.tag() == key.to_string()
                        && handle.request.silent
                        && self.presenter.close(&handle)?
                    {
                        report.push(Outcome::Cancelled {
                            tag: handle.tag().to_string(),
                        });
                    }
                }
                report.push(Outcome::Ignored {
                    reason: "reminders disabled".into(),
                });
            }
        }
        Ok(())
    }

    fn interaction(
        &self,
        handle: &Handle,
        interaction: Interaction,
        report: &mut WakeReport,
    ) -> Result<(), CoreError> {
        let key = handle.dedup_key();
        match interaction {
            Interaction::Click { action } if action.as_deref() == Some(ACTION_MARK_PAID) => {
                let id = handle
                    .request
                    .data
                    .obligation_id
                    .clone()
                    .or_else(|| key.as_ref().map(|k| k.obligation_id().to_string()));
                let Some(id) = id else {
                    report.push(Outcome::Ignored {
                        reason: "notification names no obligation".into(),
                    });
                    return Ok(());
                };
                let cycle = key.as_ref().map_or_else(|| current_cycle(&self.now), DedupKey::cycle);
                self.mark_paid(&id, cycle, report)
            }
            Interaction::Click { .. } => {
                if self.presenter.close(handle)? {
                    report.push(Outcome::Cancelled {
                        tag: handle.tag().to_string(),
                    });
                }
                open_clicked(&self.presenter, handle, report);
                match key {
                    Some(key) => self.wake_obligation(&key, report),
                    None => Ok(()),
                }
            }
            Interaction::Dismiss => {
                self.presenter.close(handle)?;
                if handle.tag() == DAILY_CHECK_TAG {
                    return self.trigger_fired(DAILY_CHECK_TAG, report);
                }
                match key {
                    Some(key) => self.wake_obligation(&key, report),
                    None => Ok(()),
                }
            }
        }
    }

    fn mark_paid(&self, id: &str, cycle: Cycle, report: &mut WakeReport) -> Result<(), CoreError> {
        let Some(mut obligation) = self.obligation(id)? else {
            self.scheduler.cancel_obligation(id, report)?;
            report.push(Outcome::Ignored {
                reason: format!("obligation {id} no longer exists"),
            });
            return Ok(());
        };
        obligation.set_paid(cycle, true);
        self.store
            .put_json(Collection::Obligations, &obligation.id, &obligation)?;
        info!(obligation_id = id, %cycle, "marked paid");
        report.push(Outcome::MarkedPaid {
            obligation_id: obligation.id.clone(),
            cycle,
        });
        self.scheduler.cancel_obligation(id, report)?;
        Ok(())
    }

    fn message(&self, message: AppMessage, report: &mut WakeReport) -> Result<(), CoreError> {
        match message {
            AppMessage::UpdateSettings { settings } => {
                self.store.put_json(Collection::Meta, SETTINGS_KEY, &settings)?;
                info!(enabled = settings.enabled, time = %settings.time, "settings saved");
                report.push(Outcome::SettingsSaved { settings });
                if !settings.enabled {
                    self.drop_pending_steps(report)?;
                }
                self.scheduler
                    .arm_daily_check(&settings, &self.now, true, report)
            }
            AppMessage::CancelNotifications { obligation_id } => {
                self.scheduler.cancel_obligation(&obligation_id, report)?;
                // A still-existing obligation keeps its ledger so the
                // reminders just closed cannot come back.
                if self.obligation(&obligation_id)?.is_none() {
                    let removed = self.ledger().clear_for_obligation(&obligation_id)?;
                    report.push(Outcome::LedgerCleared {
                        obligation_id,
                        removed,
                    });
                }
                Ok(())
            }
        }
    }

    fn drop_pending_steps(&self, report: &mut WakeReport) -> Result<(), CoreError> {
        for handle in self.presenter.list_outstanding(None)? {
            if handle.dedup_key().is_some()
                && handle.is_pending(self.now_ms)
                && self.presenter.close(&handle)?
            {
                report.push(Outcome::Cancelled {
                    tag: handle.tag().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::MemoryHost;
    use crate::storage::SqliteStore;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, day, hour, 0, 0)
            .unwrap()
    }

    fn setup() -> (Arc<SqliteStore>, Arc<MemoryHost>, WakeDispatcher) {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let host = Arc::new(MemoryHost::new());
        let ob = Obligation::new("A", "Rent", 15, Cycle::new(2024, 1).unwrap());
        store.put_json(Collection::Obligations, "A", &ob).unwrap();
        let dispatcher = WakeDispatcher::new(Arc::clone(&store), host.clone(), Config::default());
        (store, host, dispatcher)
    }

    #[test]
    fn tick_emits_due_reminder_and_arms_daily_check() {
        let (_, host, dispatcher) = setup();
        let report = dispatcher.dispatch(Wake::PeriodicTick { tag: "sync".into() }, at(15, 9));
        assert_eq!(report.emitted(), vec!["A-2024-03-0h"]);
        assert!(report.errors.is_empty());
        assert_eq!(host.outstanding(Some(DAILY_CHECK_TAG)).unwrap().len(), 1);
    }

    #[test]
    fn store_unavailable_skips_the_wake() {
        struct Broken;
        impl OpenStore for Broken {
            fn open_store(&self) -> Result<Arc<dyn DurableStore>, StoreError> {
                Err(StoreError::Unavailable {
                    path: "paywatch.db".into(),
                    reason: "corrupt".into(),
                })
            }
        }
        let host = Arc::new(MemoryHost::new());
        let dispatcher = WakeDispatcher::new(Broken, host.clone(), Config::default());
        let report = dispatcher.dispatch(
            Wake::ExternalPush {
                payload: br#"{"title":"x"}"#.to_vec(),
            },
            at(15, 9),
        );
        assert!(report.skipped);
        assert_eq!(report.errors.len(), 1);
        assert!(host.history().is_empty());
    }

    #[test]
    fn anonymous_push_is_shown_once() {
        let (_, host, dispatcher) = setup();
        let wake = Wake::ExternalPush {
            payload: br#"{"notification":{"title":"News","body":"Hello"}}"#.to_vec(),
        };
        let first = dispatcher.dispatch(wake.clone(), at(10, 9));
        let second = dispatcher.dispatch(wake, at(10, 10));
        assert_eq!(first.emitted().len(), 1);
        assert!(first.emitted()[0].starts_with(PUSH_TAG_PREFIX));
        assert!(second.emitted().is_empty());
        assert_eq!(
            host.history()
                .iter()
                .filter(|h| h.tag().starts_with(PUSH_TAG_PREFIX))
                .count(),
            1
        );
    }

    #[test]
    fn malformed_push_is_defaulted() {
        let (_, host, dispatcher) = setup();
        let report = dispatcher.dispatch(
            Wake::ExternalPush {
                payload: b"garbage".to_vec(),
            },
            at(10, 9),
        );
        assert!(matches!(report.outcomes[0], Outcome::PayloadDefaulted { .. }));
        let shown = host.history();
        assert_eq!(shown[0].request.title, "Payment reminder");
    }

    #[test]
    fn push_for_due_obligation_is_step_zero() {
        let (_, host, dispatcher) = setup();
        let report = dispatcher.dispatch(
            Wake::ExternalPush {
                payload: br#"{"title":"Pay rent","obligationId":"A"}"#.to_vec(),
            },
            at(15, 8),
        );
        assert_eq!(report.emitted(), vec!["A-2024-03-0h"]);
        let shown = host.outstanding(Some("A-2024-03-0h")).unwrap();
        assert_eq!(shown[0].request.title, "Pay rent");

        let tick = dispatcher.dispatch(Wake::PeriodicTick { tag: "sync".into() }, at(15, 9));
        assert!(tick.emitted().is_empty());
    }

    #[test]
    fn anonymous_push_is_shown_again_next_cycle() {
        let (_, host, dispatcher) = setup();
        let wake = Wake::ExternalPush {
            payload: br#"{"notification":{"title":"Payments","body":"You have payments due"}}"#.to_vec(),
        };
        let march = dispatcher.dispatch(wake.clone(), at(1, 9));
        let april = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 4, 1, 9, 0, 0)
            .unwrap();
        let next = dispatcher.dispatch(wake, april);
        assert_eq!(march.emitted().len(), 1);
        assert_eq!(next.emitted().len(), 1);
        assert!(next
            .outcomes
            .iter()
            .all(|o| !matches!(o, Outcome::DuplicateSuppressed { .. })));
        let shown = host
            .history()
            .iter()
            .filter(|h| h.tag().starts_with(PUSH_TAG_PREFIX))
            .count();
        assert_eq!(shown, 2);
    }

    #[test]
    fn redelivered_push_with_message_id_is_shown_once() {
        let (_, _, dispatcher) = setup();
        let wake = Wake::ExternalPush {
            payload: br#"{"title":"News","messageId":"0:1700000000"}"#.to_vec(),
        };
        let first = dispatcher.dispatch(wake.clone(), at(10, 23));
        let again = dispatcher.dispatch(wake, at(11, 1));
        assert_eq!(first.emitted().len(), 1);
        assert!(again.emitted().is_empty());
    }

    #[test]
    fn push_for_obligation_is_ignored_while_disabled() {
        let (_, host, dispatcher) = setup();
        let settings = SchedulerSettings {
            enabled: false,
            ..SchedulerSettings::default()
        };
        dispatcher.dispatch(Wake::settings(settings), at(15, 7));

        let report = dispatcher.dispatch(
            Wake::ExternalPush {
                payload: br#"{"obligationId":"A"}"#.to_vec(),
            },
            at(15, 8),
        );
        assert!(report.emitted().is_empty());
        assert!(report
            .outcomes
            .iter()
            .all(|o| !matches!(o, Outcome::Armed { .. })));
        assert!(report.outcomes.contains(&Outcome::Ignored {
            reason: "reminders disabled".into()
        }));
        assert!(host.outstanding(Some("A-")).unwrap().is_empty());
    }

    #[test]
    fn activate_survives_huge_retention() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let host = Arc::new(MemoryHost::new());
        let mut config = Config::default();
        config.escalation.retention_cycles = u32::MAX;
        let dispatcher = WakeDispatcher::new(Arc::clone(&store), host, config);
        let report = dispatcher.dispatch(Wake::Activate, at(1, 9));
        assert!(report.errors.is_empty());
        assert!(!report.skipped);
    }

    #[test]
    fn push_for_undue_obligation_is_suppressed() {
        let (_, host, dispatcher) = setup();
        let report = dispatcher.dispatch(
            Wake::ExternalPush {
                payload: br#"{"title":"Pay rent","obligationId":"A"}"#.to_vec(),
            },
            at(10, 8),
        );
        assert!(report.emitted().is_empty());
        assert!(report
            .outcomes
            .iter()
            .any(|o| matches!(o, Outcome::Ignored { .. })));
        assert!(host.history().iter().all(|h| h.request.silent));
    }

    #[test]
    fn mark_paid_action_updates_store_and_cancels() {
        let (store, host, dispatcher) = setup();
        dispatcher.dispatch(Wake::PeriodicTick { tag: "sync".into() }, at(15, 9));
        let handle = host.outstanding(Some("A-2024-03-0h")).unwrap().remove(0);

        let report = dispatcher.dispatch(
            Wake::UserInteraction {
                handle,
                interaction: Interaction::Click {
                    action: Some(ACTION_MARK_PAID.into()),
                },
            },
            at(15, 10),
        );
        assert!(report.outcomes.contains(&Outcome::MarkedPaid {
            obligation_id: "A".into(),
            cycle: Cycle::new(2024, 3).unwrap()
        }));
        let ob: Obligation = store.get_json(Collection::Obligations, "A").unwrap().unwrap();
        assert!(ob.is_paid(Cycle::new(2024, 3).unwrap()));
        assert!(host.outstanding(Some("A-")).unwrap().is_empty());
    }

    #[test]
    fn click_opens_deep_link() {
        let (_, host, dispatcher) = setup();
        dispatcher.dispatch(Wake::PeriodicTick { tag: "sync".into() }, at(15, 9));
        let handle = host.outstanding(Some("A-2024-03-0h")).unwrap().remove(0);
        let report = dispatcher.dispatch(
            Wake::UserInteraction {
                handle,
                interaction: Interaction::Click { action: None },
            },
            at(15, 10),
        );
        assert!(report.outcomes.contains(&Outcome::Opened {
            url: "/?obligation=A".into()
        }));
        assert_eq!(host.opened_urls(), vec!["/?obligation=A".to_string()]);
        assert!(host.outstanding(Some("A-2024-03-0h")).unwrap().is_empty());
    }

    #[test]
    fn cancel_message_keeps_ledger_of_existing_obligation() {
        let (store, host, dispatcher) = setup();
        dispatcher.dispatch(Wake::PeriodicTick { tag: "sync".into() }, at(15, 9));
        dispatcher.dispatch(
            Wake::Message(AppMessage::CancelNotifications {
                obligation_id: "A".into(),
            }),
            at(15, 9),
        );
        assert!(host.outstanding(Some("A-")).unwrap().is_empty());
        let tick = dispatcher.dispatch(Wake::PeriodicTick { tag: "sync".into() }, at(15, 10));
        assert!(tick.emitted().is_empty());

        store.delete(Collection::Obligations, "A").unwrap();
        let report = dispatcher.dispatch(
            Wake::Message(AppMessage::CancelNotifications {
                obligation_id: "A".into(),
            }),
            at(15, 11),
        );
        assert!(report.outcomes.contains(&Outcome::LedgerCleared {
            obligation_id: "A".into(),
            removed: 1
        }));
    }

    #[test]
    fn disabled_settings_silence_the_engine() {
        let (_, host, dispatcher) = setup();
        let mut settings = SchedulerSettings::default();
        settings.enabled = false;
        dispatcher.dispatch(Wake::settings(settings), at(15, 8));
        let report = dispatcher.dispatch(Wake::PeriodicTick { tag: "sync".into() }, at(15, 9));
        assert!(report.emitted().is_empty());
        assert!(host.outstanding(None).unwrap().is_empty());
    }

    #[test]
    fn activate_prunes_old_cycles() {
        let (store, _, dispatcher) = setup();
        let ledger = DedupLedger::new(store.as_ref());
        ledger
            .mark_fired(&DedupKey::new("A", Cycle::new(2023, 10).unwrap(), 0), 0)
            .unwrap();
        let report = dispatcher.dispatch(Wake::Activate, at(1, 9));
        assert!(report.outcomes.contains(&Outcome::LedgerPruned { removed: 1 }));
    }

    #[test]
    fn install_is_recorded_once() {
        let (_, _, dispatcher) = setup();
        let first = dispatcher.dispatch(Wake::Install, at(1, 9));
        let second = dispatcher.dispatch(Wake::Install, at(1, 10));
        assert_eq!(first.outcomes[0], Outcome::Installed { first: true });
        assert_eq!(second.outcomes[0], Outcome::Installed { first: false });
    }
}
