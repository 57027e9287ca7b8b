//! In-memory notification host for tests and simulations.

use std::sync::{Mutex, MutexGuard};

use super::{Handle, NotificationHost, NotificationRequest};
use crate::error::PresentError;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    outstanding: Vec<Handle>,
    /// Every notification ever shown or scheduled, in order.
    history: Vec<Handle>,
    opened_urls: Vec<String>,
}

/// A [`NotificationHost`] that keeps everything in memory.
///
/// Besides the host contract it exposes the full history so tests can
/// assert how many times a tag was ever presented.
#[derive(Debug)]
pub struct MemoryHost {
    state: Mutex<State>,
    triggers: bool,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            triggers: true,
        }
    }

    /// A host without scheduled-notification support.
    pub fn without_triggers() -> Self {
        Self {
            state: Mutex::new(State::default()),
            triggers: false,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, PresentError> {
        self.state
            .lock()
            .map_err(|_| PresentError::HostFailure("memory host poisoned".into()))
    }

    pub fn history(&self) -> Vec<Handle> {
        self.state().map(|s| s.history.clone()).unwrap_or_default()
    }

    /// Non-silent presentations of `tag`: immediate ones, plus scheduled ones
    /// whose trigger time has passed at `now_ms`.
    pub fn visible_count(&self, tag: &str, now_ms: i64) -> usize {
        self.history()
            .iter()
            .filter(|h| h.tag() == tag && !h.request.silent && !h.is_pending(now_ms))
            .count()
    }

    /// Outstanding handles whose trigger time has arrived at `now_ms`, i.e.
    /// the ones a real host would be firing right now.
    pub fn due_triggers(&self, now_ms: i64) -> Vec<Handle> {
        self.state()
            .map(|s| {
                s.outstanding
                    .iter()
                    .filter(|h| h.request.trigger_at_ms.is_some_and(|at| at <= now_ms))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state().map(|s| s.opened_urls.clone()).unwrap_or_default()
    }
}

impl NotificationHost for MemoryHost {
    fn supports_triggers(&self) -> bool {
        self.triggers
    }

    fn show(&self, request: NotificationRequest, now_ms: i64) -> Result<Handle, PresentError> {
        if request.trigger_at_ms.is_some() && !self.triggers {
            return Err(PresentError::TriggerUnsupported);
        }
        let mut state = self.state()?;
        state.next_id += 1;
        let handle = Handle {
            id: state.next_id,
            created_at_ms: now_ms,
            request,
        };
        state.outstanding.retain(|h| h.tag() != handle.tag());
        state.outstanding.push(handle.clone());
        state.history.push(handle.clone());
        Ok(handle)
    }

    fn outstanding(&self, tag_prefix: Option<&str>) -> Result<Vec<Handle>, PresentError> {
        let state = self.state()?;
        Ok(state
            .outstanding
            .iter()
            .filter(|h| tag_prefix.map_or(true, |p| h.tag().starts_with(p)))
            .cloned()
            .collect())
    }

    fn close(&self, handle_id: u64) -> Result<bool, PresentError> {
        let mut state = self.state()?;
        let before = state.outstanding.len();
        state.outstanding.retain(|h| h.id != handle_id);
        Ok(state.outstanding.len() != before)
    }

    fn open_url(&self, url: &str) -> Result<(), PresentError> {
        self.state()?.opened_urls.push(url.to_string());
        Ok(())
    }
}
