//! Persisted settings row.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::config::Settings;
use crate::core::units::DisplayUnit;

impl Database {
    /// Load the saved settings, or `None` on first run.
    ///
    /// An unknown unit index falls back to `Auto`; a negative device index
    /// is clamped to 0.
    pub fn load_settings(&self) -> Result<Option<Settings>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT total_bytes, display_unit, device_index, soft_limit, hard_limit
                 FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, u64>(3)?,
                        row.get::<_, u64>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(total_bytes, unit, device, soft_limit, hard_limit)| {
            let display_unit = u32::try_from(unit)
                .ok()
                .and_then(DisplayUnit::from_index)
                .unwrap_or_default();
            Settings {
                total_bytes,
                display_unit,
                device_index: usize::try_from(device).unwrap_or(0),
                soft_limit,
                hard_limit,
            }
        }))
    }

    /// Insert or replace the settings row.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (id, total_bytes, display_unit, device_index, soft_limit, hard_limit)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                settings.total_bytes,
                settings.display_unit.index(),
                i64::try_from(settings.device_index).unwrap_or(i64::MAX),
                settings.soft_limit,
                settings.hard_limit,
            ],
        )?;
        tracing::debug!("Settings saved: {settings:?}");
        Ok(())
    }
}
