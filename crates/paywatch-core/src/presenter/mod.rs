//! Notification presentation.
//!
//! The host owns the visible notification surface. [`NotificationHost`] is
//! the seam to it; [`Presenter`] renders reminder text, applies the tag
//! policy, and tracks outstanding handles for cancellation.
//!
//! ## Tags
//!
//! - Reminders are tagged with their [`DedupKey`] (`A-2024-03-3h`).
//! - Engine-internal notifications use the reserved `paywatch:` prefix,
//!   which never parses as a dedup key.
//!
//! A host shows at most one notification per tag: showing a tag again
//! replaces the outstanding one. The engine does not rely on that for
//! dedup; it checks the ledger before calling [`Presenter::emit`].

mod local;
mod memory;

pub use local::LocalHost;
pub use memory::MemoryHost;

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cycle::DueOccurrence;
use crate::error::PresentError;
use crate::ledger::DedupKey;
use crate::model::Obligation;
use crate::storage::NotificationsConfig;

/// Reserved tag of the silent trigger that schedules the next daily check.
pub const DAILY_CHECK_TAG: &str = "paywatch:daily-check";

/// Prefix of tags for push notifications that name no known obligation.
pub const PUSH_TAG_PREFIX: &str = "paywatch:push:";

pub const ACTION_MARK_PAID: &str = "mark-paid";
pub const ACTION_OPEN: &str = "open";

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Data carried with a notification and handed back on interaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obligation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Everything the host needs to show (or schedule) one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    pub tag: String,
    /// Epoch milliseconds at which the host should surface it. `None` shows
    /// it immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_at_ms: Option<i64>,
    /// Silent notifications make no sound and exist only as wake triggers.
    #[serde(default)]
    pub silent: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
    #[serde(default)]
    pub data: NotificationData,
}

impl NotificationRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: None,
            badge: None,
            tag: tag.into(),
            trigger_at_ms: None,
            silent: false,
            actions: Vec::new(),
            data: NotificationData::default(),
        }
    }
}

/// A host-assigned handle to an outstanding notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handle {
    pub id: u64,
    pub created_at_ms: i64,
    pub request: NotificationRequest,
}

impl Handle {
    pub fn tag(&self) -> &str {
        &self.request.tag
    }

    /// Still waiting for its trigger time at `now_ms`.
    pub fn is_pending(&self, now_ms: i64) -> bool {
        self.request.trigger_at_ms.is_some_and(|at| at > now_ms)
    }

    /// The reminder key this handle stands for, if any.
    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.request.tag.parse().ok()
    }
}

/// The host's notification surface.
pub trait NotificationHost: Send + Sync {
    /// Whether notifications can be scheduled for a future time.
    fn supports_triggers(&self) -> bool;

    /// Show or schedule a notification, replacing any outstanding one with
    /// the same tag.
    fn show(&self, request: NotificationRequest, now_ms: i64) -> Result<Handle, PresentError>;

    /// Outstanding notifications (shown or pending) whose tag starts with
    /// `tag_prefix`, or all of them.
    fn outstanding(&self, tag_prefix: Option<&str>) -> Result<Vec<Handle>, PresentError>;

    /// Close one notification. Returns whether it was outstanding.
    fn close(&self, handle_id: u64) -> Result<bool, PresentError>;

    /// Focus an open application window at `url`, or open a new one.
    fn open_url(&self, url: &str) -> Result<(), PresentError>;
}

/// Renders and tracks engine notifications on a [`NotificationHost`].
#[derive(Clone, Copy)]
pub struct Presenter<'a> {
    host: &'a dyn NotificationHost,
    config: &'a NotificationsConfig,
}

impl<'a> Presenter<'a> {
    pub fn new(host: &'a dyn NotificationHost, config: &'a NotificationsConfig) -> Self {
        Self { host, config }
    }

    pub fn config(&self) -> &'a NotificationsConfig {
        self.config
    }

    pub fn supports_triggers(&self) -> bool {
        self.host.supports_triggers()
    }

    /// Show `title`/`body` under `tag`, now or at `trigger`.
    ///
    /// # Errors
    /// Fails with [`PresentError::TriggerUnsupported`] when a trigger is
    /// requested from a host that cannot schedule.
    pub fn emit<Tz: TimeZone>(
        &self,
        title: &str,
        body: &str,
        tag: &str,
        trigger: Option<&DateTime<Tz>>,
        now_ms: i64,
    ) -> Result<Handle, PresentError> {
        let mut request = NotificationRequest::new(title, body, tag);
        request.icon = Some(self.config.icon.clone());
        request.badge = self.config.badge.clone();
        request.trigger_at_ms = trigger.map(|t| t.timestamp_millis());
        self.emit_request(request, now_ms)
    }

    /// # Errors
    /// See [`Presenter::emit`].
    pub fn emit_request(&self, request: NotificationRequest, now_ms: i64) -> Result<Handle, PresentError> {
        if request.trigger_at_ms.is_some() && !self.host.supports_triggers() {
            return Err(PresentError::TriggerUnsupported);
        }
        debug!(tag = %request.tag, trigger_at_ms = ?request.trigger_at_ms, silent = request.silent, "emit");
        self.host.show(request, now_ms)
    }

    /// Close every outstanding notification whose tag starts with `prefix`.
    pub fn cancel_all_with_prefix(&self, prefix: &str) -> Result<Vec<Handle>, PresentError> {
        self.close_matching(prefix, |_| true)
    }

    /// Close every outstanding reminder of one obligation, any cycle, any step.
    pub fn cancel_for_obligation(&self, obligation_id: &str) -> Result<Vec<Handle>, PresentError> {
        self.close_matching(&DedupKey::obligation_prefix(obligation_id), |h| {
            h.dedup_key().is_some_and(|k| k.belongs_to(obligation_id))
        })
    }

    fn close_matching(
        &self,
        prefix: &str,
        keep: impl Fn(&Handle) -> bool,
    ) -> Result<Vec<Handle>, PresentError> {
        let mut closed = Vec::new();
        for handle in self.host.outstanding(Some(prefix))? {
            if keep(&handle) && self.host.close(handle.id)? {
                debug!(tag = %handle.tag(), "cancelled");
                closed.push(handle);
            }
        }
        Ok(closed)
    }

    pub fn close(&self, handle: &Handle) -> Result<bool, PresentError> {
        self.host.close(handle.id)
    }

    pub fn list_outstanding(&self, tag_filter: Option<&str>) -> Result<Vec<Handle>, PresentError> {
        self.host.outstanding(tag_filter)
    }

    /// The outstanding handle with exactly `tag`, if any.
    pub fn find(&self, tag: &str) -> Result<Option<Handle>, PresentError> {
        Ok(self
            .host
            .outstanding(Some(tag))?
            .into_iter()
            .find(|h| h.tag() == tag))
    }

    pub fn open_url(&self, url: &str) -> Result<(), PresentError> {
        self.host.open_url(url)
    }

    /// Deep link into the application for one obligation.
    pub fn deep_link(&self, obligation_id: &str) -> String {
        let base = &self.config.app_url;
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}obligation={}", urlencoding::encode(obligation_id))
    }

    /// Build the request for one reminder step.
    ///
    /// `step` is the index into the escalation offsets; step 0 announces the
    /// due date, later steps nag.
    pub fn reminder_request(
        &self,
        obligation: &Obligation,
        key: &DedupKey,
        step: usize,
        due_date: Option<NaiveDate>,
        occurrence: Option<&DueOccurrence>,
    ) -> NotificationRequest {
        let (title, body) = render_reminder(obligation, key, step, due_date, occurrence);
        let mut request = NotificationRequest::new(title, body, key.to_string());
        request.icon = Some(self.config.icon.clone());
        request.badge = self.config.badge.clone();
        request.data = NotificationData {
            obligation_id: Some(obligation.id.clone()),
            url: Some(self.deep_link(&obligation.id)),
        };
        if self.config.actions {
            request.actions = vec![
                NotificationAction {
                    action: ACTION_MARK_PAID.into(),
                    title: "Mark paid".into(),
                },
                NotificationAction {
                    action: ACTION_OPEN.into(),
                    title: "Open".into(),
                },
            ];
        }
        request
    }

    /// Schedule the silent trigger for the next daily check.
    ///
    /// # Errors
    /// Fails with [`PresentError::TriggerUnsupported`] on hosts that cannot
    /// schedule.
    pub fn arm_daily_check<Tz: TimeZone>(&self, at: &DateTime<Tz>, now_ms: i64) -> Result<Handle, PresentError> {
        let mut request = NotificationRequest::new(
            self.config.default_title.clone(),
            "Checking for payments due today.",
            DAILY_CHECK_TAG,
        );
        request.trigger_at_ms = Some(at.timestamp_millis());
        request.silent = true;
        self.emit_request(request, now_ms)
    }
}

fn render_reminder(
    obligation: &Obligation,
    key: &DedupKey,
    step: usize,
    due_date: Option<NaiveDate>,
    occurrence: Option<&DueOccurrence>,
) -> (String, String) {
    let amount = obligation
        .amount
        .map(|a| format!(" ({a:.2})"))
        .unwrap_or_default();
    let on_date = due_date
        .map(|d| format!(" on {}", d.format("%-d %B")))
        .unwrap_or_default();

    if step == 0 {
        let title = match occurrence.map(|o| o.days_until) {
            None | Some(0) => format!("{} is due today", obligation.name),
            Some(1) => format!("{} is due tomorrow", obligation.name),
            Some(n) => format!("{} is due in {n} days", obligation.name),
        };
        let body = format!("Payment for {}{amount} is due{on_date}.", obligation.name);
        (title, body)
    } else {
        let title = format!("Reminder: {} is still unpaid", obligation.name);
        let body = format!(
            "Payment for {}{amount} was due{on_date}. First reminded {}h ago.",
            obligation.name,
            key.offset_hours()
        );
        (title, body)
    }
}
