//! Dedup ledger: durable record of which reminders have already fired.
//!
//! Each unit of notification work is identified by a [`DedupKey`]
//! `(obligation, cycle, step offset)`, rendered `<id>-<YYYY-MM>-<N>h`. The
//! ledger records a key *before* the notification is shown: a crash between
//! the two loses at most that one reminder and can never show it twice.
//!
//! Claims go through [`DurableStore::put_if_absent`], so concurrent wakes
//! racing for the same key get exactly one winner.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, ValidationError};
use crate::model::Cycle;
use crate::storage::{Collection, DurableStore, StoreExt};

const FIRED_PREFIX: &str = "fired:";
const PUSH_PREFIX: &str = "push:";

/// Identity of one reminder: obligation, cycle, and escalation offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    obligation_id: String,
    cycle: Cycle,
    offset_hours: u32,
}

impl DedupKey {
    pub fn new(obligation_id: impl Into<String>, cycle: Cycle, offset_hours: u32) -> Self {
        Self {
            obligation_id: obligation_id.into(),
            cycle,
            offset_hours,
        }
    }

    pub fn obligation_id(&self) -> &str {
        &self.obligation_id
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn offset_hours(&self) -> u32 {
        self.offset_hours
    }

    /// Tag prefix shared by every key of an obligation.
    ///
    /// Prefix matching alone would also catch obligation `A-B` when asked
    /// for `A`; use [`DedupKey::belongs_to`] on parsed keys to be exact.
    pub fn obligation_prefix(obligation_id: &str) -> String {
        format!("{obligation_id}-")
    }

    pub fn belongs_to(&self, obligation_id: &str) -> bool {
        self.obligation_id == obligation_id
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}h", self.obligation_id, self.cycle, self.offset_hours)
    }
}

impl FromStr for DedupKey {
    type Err = ValidationError;

    /// Parses from the right, so obligation ids may themselves contain `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidDedupKey(s.to_string());

        let (rest, step) = s.rsplit_once('-').ok_or_else(invalid)?;
        let hours = step.strip_suffix('h').ok_or_else(invalid)?;
        if hours.is_empty() || !hours.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let offset_hours = hours.parse::<u32>().map_err(|_| invalid())?;

        // "YYYY-MM" is the last seven bytes of `rest`, preceded by '-'.
        let split = rest.len().checked_sub(7).ok_or_else(invalid)?;
        let (head, cycle) = (rest.get(..split).ok_or_else(invalid)?, &rest[split..]);
        let cycle = cycle.parse::<Cycle>().map_err(|_| invalid())?;
        let obligation_id = head.strip_suffix('-').ok_or_else(invalid)?;
        if obligation_id.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(obligation_id, cycle, offset_hours))
    }
}

/// Ledger entry for a fired (or deliberately skipped) reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiredRecord {
    pub obligation_id: String,
    pub cycle: Cycle,
    pub offset_hours: u32,
    pub fired_at_ms: i64,
    /// Recorded without being shown because a later step replaced it.
    #[serde(default)]
    pub superseded: bool,
}

impl FiredRecord {
    pub fn key(&self) -> DedupKey {
        DedupKey::new(self.obligation_id.clone(), self.cycle, self.offset_hours)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushRecord {
    digest: String,
    fired_at_ms: i64,
}

/// Dedup ledger over a [`DurableStore`]'s meta collection.
pub struct DedupLedger<'a> {
    store: &'a dyn DurableStore,
}

impl<'a> DedupLedger<'a> {
    pub fn new(store: &'a dyn DurableStore) -> Self {
        Self { store }
    }

    fn record_key(key: &DedupKey) -> String {
        format!("{FIRED_PREFIX}{key}")
    }

    pub fn has_fired(&self, key: &DedupKey) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(Collection::Meta, &Self::record_key(key))?
            .is_some())
    }

    pub fn fired_record(&self, key: &DedupKey) -> Result<Option<FiredRecord>, StoreError> {
        self.store.get_json(Collection::Meta, &Self::record_key(key))
    }

    /// Claim `key`. Returns `false` if it was already claimed, by this or
    /// any earlier wake.
    pub fn mark_fired(&self, key: &DedupKey, at_ms: i64) -> Result<bool, StoreError> {
        self.claim(key, at_ms, false)
    }

    /// Claim `key` as skipped so it can never fire later.
    pub fn mark_superseded(&self, key: &DedupKey, at_ms: i64) -> Result<bool, StoreError> {
        self.claim(key, at_ms, true)
    }

    fn claim(&self, key: &DedupKey, at_ms: i64, superseded: bool) -> Result<bool, StoreError> {
        let record = FiredRecord {
            obligation_id: key.obligation_id.clone(),
            cycle: key.cycle,
            offset_hours: key.offset_hours,
            fired_at_ms: at_ms,
            superseded,
        };
        let claimed = self
            .store
            .put_json_if_absent(Collection::Meta, &Self::record_key(key), &record)?;
        debug!(key = %key, claimed, superseded, "ledger claim");
        Ok(claimed)
    }

    /// Undo a claim whose notification was definitely never shown.
    pub fn release(&self, key: &DedupKey) -> Result<bool, StoreError> {
        self.store.delete(Collection::Meta, &Self::record_key(key))
    }

    fn records_for(&self, obligation_id: &str) -> Result<Vec<FiredRecord>, StoreError> {
        let prefix = format!("{FIRED_PREFIX}{}", DedupKey::obligation_prefix(obligation_id));
        let mut out = Vec::new();
        for (_, raw) in self.store.entries_with_prefix(Collection::Meta, &prefix)? {
            if let Ok(record) = serde_json::from_str::<FiredRecord>(&raw) {
                if record.obligation_id == obligation_id {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// Fired records for one obligation and cycle, in offset order.
    pub fn records_for_cycle(
        &self,
        obligation_id: &str,
        cycle: Cycle,
    ) -> Result<Vec<FiredRecord>, StoreError> {
        let mut records: Vec<FiredRecord> = self
            .records_for(obligation_id)?
            .into_iter()
            .filter(|r| r.cycle == cycle)
            .collect();
        records.sort_by_key(|r| r.offset_hours);
        Ok(records)
    }

    /// Forget every entry for an obligation, across all cycles.
    pub fn clear_for_obligation(&self, obligation_id: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for record in self.records_for(obligation_id)? {
            if self.release(&record.key())? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drop entries for cycles before `cutoff`, and push records older than
    /// `push_cutoff_ms`. Those cycles are inert already; this only bounds
    /// the ledger's size.
    pub fn prune_before(&self, cutoff: Cycle, push_cutoff_ms: i64) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (key, raw) in self.store.entries_with_prefix(Collection::Meta, FIRED_PREFIX)? {
            if let Ok(record) = serde_json::from_str::<FiredRecord>(&raw) {
                if record.cycle < cutoff && self.store.delete(Collection::Meta, &key)? {
                    removed += 1;
                }
            }
        }
        for (key, raw) in self.store.entries_with_prefix(Collection::Meta, PUSH_PREFIX)? {
            if let Ok(record) = serde_json::from_str::<PushRecord>(&raw) {
                if record.fired_at_ms < push_cutoff_ms && self.store.delete(Collection::Meta, &key)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Claim a push payload that names no known obligation, by digest.
    pub fn mark_push_fired(&self, digest: &str, at_ms: i64) -> Result<bool, StoreError> {
        let record = PushRecord {
            digest: digest.to_string(),
            fired_at_ms: at_ms,
        };
        self.store
            .put_json_if_absent(Collection::Meta, &format!("{PUSH_PREFIX}{digest}"), &record)
    }

    /// Undo a push claim whose notification was never shown.
    pub fn release_push(&self, digest: &str) -> Result<bool, StoreError> {
        self.store
            .delete(Collection::Meta, &format!("{PUSH_PREFIX}{digest}"))
    }
}
