//! SQLite-backed persistence for triggers: survives restarts.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::triggers::{FireSpec, Trigger, TriggerRole};

/// SQLite trigger table.
pub struct TriggerDb {
    conn: rusqlite::Connection,
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

impl TriggerDb {
    /// Open or create the trigger database.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = rusqlite::Connection::open(path).map_err(|e| format!("DB open: {e}"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| format!("DB pragma: {e}"))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, String> {
        Self::open(Path::new(":memory:"))
    }

    fn migrate(&self) -> Result<(), String> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                role TEXT NOT NULL,              -- 'start', 'end', 'monitor'
                task_id INTEGER NOT NULL,
                fire_kind TEXT NOT NULL,         -- 'at', 'every'
                fire_at TEXT,
                every_secs INTEGER,
                next_fire TEXT,
                created_at TEXT NOT NULL,
                last_fired TEXT,
                run_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_triggers_task ON triggers(task_id);
         ",
            )
            .map_err(|e| format!("Migration: {e}"))
    }

    /// Changes whenever another connection commits to this database.
    pub fn data_version(&self) -> Result<i64, String> {
        self.conn
            .query_row("PRAGMA data_version", [], |row| row.get(0))
            .map_err(|e| format!("Data version: {e}"))
    }

    /// Insert or replace a trigger.
    pub fn save(&self, trigger: &Trigger) -> Result<(), String> {
        let (kind, at, every) = match &trigger.fire {
            FireSpec::At { at } => ("at", Some(at.to_rfc3339()), None),
            FireSpec::Every { every_secs } => ("every", None, Some(*every_secs as i64)),
        };
        self.conn
            .execute(
                "INSERT OR REPLACE INTO triggers
                 (id, name, role, task_id, fire_kind, fire_at, every_secs, next_fire, created_at, last_fired, run_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    trigger.id,
                    trigger.name,
                    trigger.role.as_str(),
                    trigger.task_id,
                    kind,
                    at,
                    every,
                    trigger.next_fire.map(|t| t.to_rfc3339()),
                    trigger.created_at.to_rfc3339(),
                    trigger.last_fired.map(|t| t.to_rfc3339()),
                    trigger.run_count,
                ],
            )
            .map_err(|e| format!("Save trigger: {e}"))?;
        Ok(())
    }

    /// Delete a trigger. Returns whether a row existed.
    pub fn delete(&self, id: &str) -> Result<bool, String> {
        let n = self
            .conn
            .execute("DELETE FROM triggers WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| format!("Delete trigger: {e}"))?;
        Ok(n > 0)
    }

    /// Load all triggers. Malformed rows are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<Trigger>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, role, task_id, fire_kind, fire_at, every_secs, next_fire, created_at, last_fired, run_count
                 FROM triggers ORDER BY created_at",
            )
            .map_err(|e| format!("Load triggers: {e}"))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, u32>(10)?,
                ))
            })
            .map_err(|e| format!("Load triggers: {e}"))?;

        let mut triggers = Vec::new();
        for row in rows {
            let (id, name, role, task_id, kind, fire_at, every_secs, next_fire, created_at, last_fired, run_count) =
                row.map_err(|e| format!("Load triggers: {e}"))?;

            let Some(role) = TriggerRole::parse(&role) else {
                tracing::warn!("⚠️ Skipping trigger '{id}' with unknown role '{role}'");
                continue;
            };
            let fire = match (kind.as_str(), fire_at.as_deref().and_then(parse_ts), every_secs) {
                ("at", Some(at), _) => FireSpec::At { at },
                ("every", _, Some(secs)) if secs > 0 => FireSpec::Every {
                    every_secs: secs as u64,
                },
                _ => {
                    tracing::warn!("⚠️ Skipping trigger '{id}' with malformed fire spec");
                    continue;
                }
            };

            triggers.push(Trigger {
                id,
                name,
                role,
                task_id,
                fire,
                next_fire: next_fire.as_deref().and_then(parse_ts),
                created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
                last_fired: last_fired.as_deref().and_then(parse_ts),
                run_count,
            });
        }
        Ok(triggers)
    }
}
