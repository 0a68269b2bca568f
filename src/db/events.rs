//! Session event log: one row per start/stop/reset/quit transition.

use anyhow::Result;
use rusqlite::params;

use super::{unix_timestamp, Database};
use crate::session::{SessionEvent, SessionEventKind};

impl Database {
    pub fn append_event(&self, event: &SessionEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO event_log (timestamp, event, total_bytes) VALUES (?1, ?2, ?3)",
            params![event.timestamp, event.kind.as_str(), event.total_bytes],
        )?;
        Ok(())
    }

    /// Most recent events first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<SessionEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, event, total_bytes FROM event_log
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], map_event_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// The newest logged event, if any.
    pub fn last_event(&self) -> Result<Option<SessionEvent>> {
        Ok(self.recent_events(1)?.into_iter().next())
    }

    /// Delete events older than the specified number of days.
    pub fn prune_events(&self, max_age_days: u64) -> Result<usize> {
        let cutoff = unix_timestamp() - (max_age_days * 86400) as i64;
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM event_log WHERE timestamp < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            tracing::info!("Pruned {deleted} session events older than {max_age_days} days");
        }
        Ok(deleted)
    }
}

fn map_event_row(row: &rusqlite::Row) -> rusqlite::Result<SessionEvent> {
    let kind: String = row.get(1)?;
    let kind = kind.parse::<SessionEventKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(SessionEvent {
        kind,
        timestamp: row.get(0)?,
        total_bytes: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_memory_db;
    use super::*;

    fn event(kind: SessionEventKind, timestamp: i64, total_bytes: u64) -> SessionEvent {
        SessionEvent {
            kind,
            timestamp,
            total_bytes,
        }
    }

    #[test]
    fn test_append_and_read_newest_first() {
        let db = open_memory_db();
        db.append_event(&event(SessionEventKind::Start, 1000, 0)).unwrap();
        db.append_event(&event(SessionEventKind::Stop, 1060, 4096)).unwrap();
        db.append_event(&event(SessionEventKind::Reset, 1070, 0)).unwrap();

        let events = db.recent_events(10).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], event(SessionEventKind::Reset, 1070, 0));
        assert_eq!(events[1], event(SessionEventKind::Stop, 1060, 4096));
        assert_eq!(events[2].kind, SessionEventKind::Start);

        let latest = db.recent_events(1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].kind, SessionEventKind::Reset);
    }

    #[test]
    fn test_last_event() {
        let db = open_memory_db();
        assert_eq!(db.last_event().unwrap(), None);

        db.append_event(&event(SessionEventKind::Start, 2000, 0)).unwrap();
        db.append_event(&event(SessionEventKind::Quit, 2100, 512)).unwrap();
        assert_eq!(
            db.last_event().unwrap(),
            Some(event(SessionEventKind::Quit, 2100, 512))
        );
    }

    #[test]
    fn test_prune_old_events() {
        let db = open_memory_db();
        let now = unix_timestamp();
        db.append_event(&event(SessionEventKind::Start, now - 400 * 86400, 0))
            .unwrap();
        db.append_event(&event(SessionEventKind::Stop, now - 399 * 86400, 10))
            .unwrap();
        db.append_event(&event(SessionEventKind::Start, now - 86400, 10))
            .unwrap();

        assert_eq!(db.prune_events(365).unwrap(), 2);
        let remaining = db.recent_events(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].total_bytes, 10);
    }

    #[test]
    fn test_unknown_event_kind_is_an_error() {
        let db = open_memory_db();
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO event_log (timestamp, event, total_bytes) VALUES (1, 'PAUSE', 0)",
                [],
            )
            .unwrap();
        assert!(db.recent_events(5).is_err());
    }
}
