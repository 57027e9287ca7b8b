//! SQLite-backed notification host for the command-line front end.
//!
//! Scheduled notifications have to outlive the CLI process that created
//! them, so outstanding notifications live in their own database file next
//! to the store. A `host run` loop polls it for triggers that have come due.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use super::{Handle, NotificationHost, NotificationRequest};
use crate::error::PresentError;

/// A [`NotificationHost`] persisted in SQLite.
pub struct LocalHost {
    conn: Mutex<Connection>,
    path: PathBuf,
    triggers: bool,
}

fn host_err(err: impl std::fmt::Display) -> PresentError {
    PresentError::HostFailure(err.to_string())
}

impl LocalHost {
    /// Open (or create) the host database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open_at(path: impl AsRef<Path>, triggers: bool) -> Result<Self, PresentError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(host_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(host_err)?;
        Self::init(conn, path, triggers)
    }

    /// Open an in-memory host database (for tests).
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_memory(triggers: bool) -> Result<Self, PresentError> {
        let conn = Connection::open_in_memory().map_err(host_err)?;
        Self::init(conn, PathBuf::from(":memory:"), triggers)
    }

    fn init(conn: Connection, path: PathBuf, triggers: bool) -> Result<Self, PresentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS host_notifications (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                tag           TEXT NOT NULL UNIQUE,
                request       TEXT NOT NULL,
                trigger_at_ms INTEGER,
                delivered     INTEGER NOT NULL DEFAULT 0,
                created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_host_notifications_trigger
                ON host_notifications(delivered, trigger_at_ms);",
        )
        .map_err(host_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            triggers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PresentError> {
        self.conn
            .lock()
            .map_err(|_| PresentError::HostFailure("host database poisoned".into()))
    }

    /// Scheduled notifications whose trigger time has arrived and that have
    /// not been delivered yet. Each is returned once: it is marked delivered
    /// in the same transaction.
    ///
    /// # Errors
    /// Returns an error if the host database cannot be read or updated.
    pub fn take_due_triggers(&self, now_ms: i64) -> Result<Vec<Handle>, PresentError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(host_err)?;
        let due = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, created_at_ms, request FROM host_notifications
                     WHERE delivered = 0 AND trigger_at_ms IS NOT NULL AND trigger_at_ms <= ?1
                     ORDER BY trigger_at_ms, id",
                )
                .map_err(host_err)?;
            let rows = stmt
                .query_map(params![now_ms], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(host_err)?;
            let mut due = Vec::new();
            for row in rows {
                let (id, created_at_ms, raw) = row.map_err(host_err)?;
                match decode(id, created_at_ms, &raw) {
                    Some(handle) => due.push(handle),
                    None => warn!(id, "dropping undecodable host notification"),
                }
            }
            due
        };
        tx.execute(
            "UPDATE host_notifications SET delivered = 1
             WHERE delivered = 0 AND trigger_at_ms IS NOT NULL AND trigger_at_ms <= ?1",
            params![now_ms],
        )
        .map_err(host_err)?;
        tx.commit().map_err(host_err)?;
        Ok(due)
    }

    /// Earliest undelivered trigger time, if any.
    ///
    /// # Errors
    /// Returns an error if the host database cannot be read.
    pub fn next_trigger_ms(&self) -> Result<Option<i64>, PresentError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT MIN(trigger_at_ms) FROM host_notifications
             WHERE delivered = 0 AND trigger_at_ms IS NOT NULL",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(host_err)
    }

    /// Look up an outstanding notification by exact tag.
    ///
    /// # Errors
    /// Returns an error if the host database cannot be read.
    pub fn find_by_tag(&self, tag: &str) -> Result<Option<Handle>, PresentError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, created_at_ms, request FROM host_notifications WHERE tag = ?1",
                params![tag],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(host_err)?;
        Ok(row.and_then(|(id, created_at_ms, raw)| decode(id, created_at_ms, &raw)))
    }
}

fn decode(id: i64, created_at_ms: i64, raw: &str) -> Option<Handle> {
    let request: NotificationRequest = serde_json::from_str(raw).ok()?;
    Some(Handle {
        id: u64::try_from(id).ok()?,
        created_at_ms,
        request,
    })
}

impl NotificationHost for LocalHost {
    fn supports_triggers(&self) -> bool {
        self.triggers
    }

    fn show(&self, request: NotificationRequest, now_ms: i64) -> Result<Handle, PresentError> {
        if request.trigger_at_ms.is_some() && !self.triggers {
            return Err(PresentError::TriggerUnsupported);
        }
        let raw = serde_json::to_string(&request).map_err(host_err)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(host_err)?;
        tx.execute(
            "DELETE FROM host_notifications WHERE tag = ?1",
            params![request.tag],
        )
        .map_err(host_err)?;
        tx.execute(
            "INSERT INTO host_notifications (tag, request, trigger_at_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![request.tag, raw, request.trigger_at_ms, now_ms],
        )
        .map_err(host_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(host_err)?;

        if !request.silent && request.trigger_at_ms.is_none() {
            info!(tag = %request.tag, title = %request.title, "notification shown");
        }
        Ok(Handle {
            id: u64::try_from(id).map_err(host_err)?,
            created_at_ms: now_ms,
            request,
        })
    }

    fn outstanding(&self, tag_prefix: Option<&str>) -> Result<Vec<Handle>, PresentError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at_ms, request FROM host_notifications
                 WHERE substr(tag, 1, length(?1)) = ?1
                 ORDER BY id",
            )
            .map_err(host_err)?;
        let rows = stmt
            .query_map(params![tag_prefix.unwrap_or("")], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(host_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, created_at_ms, raw) = row.map_err(host_err)?;
            if let Some(handle) = decode(id, created_at_ms, &raw) {
                out.push(handle);
            }
        }
        Ok(out)
    }

    fn close(&self, handle_id: u64) -> Result<bool, PresentError> {
        let id = i64::try_from(handle_id).map_err(host_err)?;
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM host_notifications WHERE id = ?1", params![id])
            .map_err(host_err)?;
        Ok(removed > 0)
    }

    fn open_url(&self, url: &str) -> Result<(), PresentError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            open::that(url).map_err(host_err)?;
        }
        info!(url, "open application");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled(tag: &str, at: i64) -> NotificationRequest {
        let mut request = NotificationRequest::new("t", "b", tag);
        request.trigger_at_ms = Some(at);
        request
    }

    #[test]
    fn show_replaces_by_tag() {
        let host = LocalHost::open_memory(true).unwrap();
        host.show(NotificationRequest::new("a", "b", "T"), 0).unwrap();
        let second = host.show(NotificationRequest::new("c", "d", "T"), 1).unwrap();
        let all = host.outstanding(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[0].request.title, "c");
    }

    #[test]
    fn due_triggers_are_taken_once() {
        let host = LocalHost::open_memory(true).unwrap();
        host.show(scheduled("early", 100), 0).unwrap();
        host.show(scheduled("late", 500), 0).unwrap();
        assert_eq!(host.next_trigger_ms().unwrap(), Some(100));

        let due = host.take_due_triggers(200).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].tag(), "early");
        assert!(host.take_due_triggers(200).unwrap().is_empty());
        assert_eq!(host.next_trigger_ms().unwrap(), Some(500));
        // Delivered notifications stay outstanding until closed.
        assert!(host.find_by_tag("early").unwrap().is_some());
    }

    #[test]
    fn rescheduling_a_tag_rearms_delivery() {
        let host = LocalHost::open_memory(true).unwrap();
        host.show(scheduled("T", 100), 0).unwrap();
        assert_eq!(host.take_due_triggers(100).unwrap().len(), 1);
        host.show(scheduled("T", 300), 150).unwrap();
        assert!(host.take_due_triggers(200).unwrap().is_empty());
        assert_eq!(host.take_due_triggers(300).unwrap().len(), 1);
    }

    #[test]
    fn rejects_triggers_when_unsupported() {
        let host = LocalHost::open_memory(false).unwrap();
        assert_eq!(
            host.show(scheduled("T", 100), 0).unwrap_err(),
            PresentError::TriggerUnsupported
        );
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.db");
        let id = {
            let host = LocalHost::open_at(&path, true).unwrap();
            host.show(scheduled("T", 100), 0).unwrap().id
        };
        let host = LocalHost::open_at(&path, true).unwrap();
        assert_eq!(host.find_by_tag("T").unwrap().unwrap().id, id);
        assert!(host.close(id).unwrap());
        assert!(host.outstanding(None).unwrap().is_empty());
    }
}
