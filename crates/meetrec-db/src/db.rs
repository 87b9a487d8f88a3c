//! Meeting/task database: SQLite schema, CRUD and compare-and-set status updates.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use meetrec_core::error::{MeetRecError, Result};
use meetrec_core::types::{Meeting, MeetingDraft, Task, TaskStatus, TaskView};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::query::{
    MeetingQuery, MeetingSort, TaskQuery, TaskSort, clamp_limit, like_pattern,
};

/// Meeting/task database manager.
pub struct MeetingDb {
    conn: Mutex<Connection>,
}

const MEETING_SELECT: &str = "SELECT id,meeting_name,platform,meeting_url,room_id,meeting_password,layout,creator_name,creator_email,start_time,end_time,repeat,repeat_unit,repeat_end_date,created_at,updated_at FROM meetings";

const TASK_SELECT: &str =
    "SELECT id,meeting_id,status,start_time,end_time,save_path,created_at,updated_at FROM tasks";

const TASK_VIEW_SELECT: &str = "SELECT t.id,t.meeting_id,t.status,t.start_time,t.end_time,t.save_path,t.created_at,t.updated_at,m.meeting_name,m.creator_name,m.creator_email FROM tasks t JOIN meetings m ON m.id = t.meeting_id";

/// Timestamps are stored as fixed-width RFC3339 UTC text so they sort lexically.
pub(crate) fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn get_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn get_parsed<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = MeetRecError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_meeting(row: &rusqlite::Row) -> rusqlite::Result<Meeting> {
    Ok(Meeting {
        id: row.get(0)?,
        name: row.get(1)?,
        platform: get_parsed(row, 2)?,
        meeting_url: row.get(3)?,
        room_id: row.get(4)?,
        password: row.get(5)?,
        layout: get_parsed(row, 6)?,
        creator_name: row.get(7)?,
        creator_email: row.get(8)?,
        start_time: get_ts(row, 9)?,
        end_time: get_ts(row, 10)?,
        repeat: row.get(11)?,
        repeat_unit: row.get(12)?,
        repeat_end_date: get_opt_ts(row, 13)?,
        created_at: get_ts(row, 14)?,
        updated_at: get_ts(row, 15)?,
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        meeting_id: row.get(1)?,
        status: get_parsed(row, 2)?,
        start_time: get_ts(row, 3)?,
        end_time: get_ts(row, 4)?,
        save_path: row.get(5)?,
        created_at: get_ts(row, 6)?,
        updated_at: get_ts(row, 7)?,
    })
}

fn row_to_task_view(row: &rusqlite::Row) -> rusqlite::Result<TaskView> {
    Ok(TaskView {
        task: row_to_task(row)?,
        meeting_name: row.get(8)?,
        creator_name: row.get(9)?,
        creator_email: row.get(10)?,
    })
}

fn fetch_meeting(conn: &Connection, id: i64) -> Result<Meeting> {
    conn.query_row(&format!("{MEETING_SELECT} WHERE id = ?1"), params![id], row_to_meeting)
        .optional()
        .map_err(MeetRecError::database)?
        .ok_or_else(|| MeetRecError::not_found(format!("Meeting {id}")))
}

fn fetch_task(conn: &Connection, id: i64) -> Result<Task> {
    conn.query_row(&format!("{TASK_SELECT} WHERE id = ?1"), params![id], row_to_task)
        .optional()
        .map_err(MeetRecError::database)?
        .ok_or_else(|| MeetRecError::not_found(format!("Task {id}")))
}

impl MeetingDb {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| MeetRecError::Database(format!("DB open error: {e}")))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| MeetRecError::Database(format!("DB pragma error: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        tracing::debug!("🗄️ Meeting database ready at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MeetRecError::database("connection lock poisoned"))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS meetings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                meeting_name TEXT NOT NULL,
                platform TEXT NOT NULL,
                meeting_url TEXT,
                room_id TEXT,
                meeting_password TEXT,
                layout TEXT NOT NULL,
                creator_name TEXT NOT NULL,
                creator_email TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                repeat INTEGER NOT NULL DEFAULT 0,
                repeat_unit INTEGER,
                repeat_end_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                meeting_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'upcoming',
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                save_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (meeting_id) REFERENCES meetings(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_meeting ON tasks(meeting_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_start ON tasks(start_time);
            ",
            )
            .map_err(|e| MeetRecError::Database(format!("Migration: {e}")))
    }

    // ─── Meetings ──────────────────────────────────────

    /// Insert a validated meeting.
    pub fn create_meeting(&self, draft: &MeetingDraft, now: DateTime<Utc>) -> Result<Meeting> {
        let conn = self.lock()?;
        let ts = fmt_ts(now);
        conn.execute(
            "INSERT INTO meetings (meeting_name,platform,meeting_url,room_id,meeting_password,layout,creator_name,creator_email,start_time,end_time,repeat,repeat_unit,repeat_end_date,created_at,updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?14)",
            params![
                draft.name,
                draft.platform.as_str(),
                draft.meeting_url,
                draft.room_id,
                draft.password,
                draft.layout.as_str(),
                draft.creator_name,
                draft.creator_email,
                fmt_ts(draft.start_time),
                fmt_ts(draft.end_time),
                draft.repeat,
                draft.repeat_unit,
                draft.repeat_end_date.map(fmt_ts),
                ts,
            ],
        )
        .map_err(MeetRecError::database)?;
        let id = conn.last_insert_rowid();
        fetch_meeting(&conn, id)
    }

    pub fn get_meeting(&self, id: i64) -> Result<Meeting> {
        fetch_meeting(&*self.lock()?, id)
    }

    /// Overwrite all editable fields of a meeting.
    pub fn update_meeting(&self, id: i64, draft: &MeetingDraft, now: DateTime<Utc>) -> Result<Meeting> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE meetings SET meeting_name=?1,platform=?2,meeting_url=?3,room_id=?4,meeting_password=?5,layout=?6,creator_name=?7,creator_email=?8,start_time=?9,end_time=?10,repeat=?11,repeat_unit=?12,repeat_end_date=?13,updated_at=?14 WHERE id=?15",
                params![
                    draft.name,
                    draft.platform.as_str(),
                    draft.meeting_url,
                    draft.room_id,
                    draft.password,
                    draft.layout.as_str(),
                    draft.creator_name,
                    draft.creator_email,
                    fmt_ts(draft.start_time),
                    fmt_ts(draft.end_time),
                    draft.repeat,
                    draft.repeat_unit,
                    draft.repeat_end_date.map(fmt_ts),
                    fmt_ts(now),
                    id,
                ],
            )
            .map_err(MeetRecError::database)?;
        if changed == 0 {
            return Err(MeetRecError::not_found(format!("Meeting {id}")));
        }
        fetch_meeting(&conn, id)
    }

    /// Delete a meeting; its tasks go with it.
    pub fn delete_meeting(&self, id: i64) -> Result<()> {
        let changed = self
            .lock()?
            .execute("DELETE FROM meetings WHERE id = ?1", params![id])
            .map_err(MeetRecError::database)?;
        if changed == 0 {
            return Err(MeetRecError::not_found(format!("Meeting {id}")));
        }
        Ok(())
    }

    pub fn list_meetings(&self, query: &MeetingQuery, now: DateTime<Utc>) -> Result<Vec<Meeting>> {
        let mut sql = format!("{MEETING_SELECT} WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(name) = &query.name {
            values.push(Value::Text(like_pattern(name)));
            sql.push_str(&format!(" AND meeting_name LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(from) = query.start_time_ge {
            values.push(Value::Text(fmt_ts(from)));
            sql.push_str(&format!(" AND start_time >= ?{}", values.len()));
        }

        match query.sort {
            Some(MeetingSort::StartTime) => {
                sql.push_str(&format!(" ORDER BY start_time {}, id", query.order.sql()));
            }
            Some(MeetingSort::Name) => {
                sql.push_str(&format!(" ORDER BY meeting_name {}, id", query.order.sql()));
            }
            None => {
                values.push(Value::Text(fmt_ts(now)));
                let finished = format!(
                    "(COALESCE(CASE WHEN repeat = 1 THEN repeat_end_date END, end_time) < ?{})",
                    values.len()
                );
                sql.push_str(&format!(
                    " ORDER BY {finished} ASC, CASE WHEN NOT {finished} THEN start_time END ASC, CASE WHEN {finished} THEN start_time END DESC, id"
                ));
            }
        }

        values.push(Value::Integer(clamp_limit(query.limit) as i64));
        values.push(Value::Integer(query.skip as i64));
        sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", values.len() - 1, values.len()));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(MeetRecError::database)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), row_to_meeting)
            .map_err(MeetRecError::database)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MeetRecError::database)?;
        Ok(rows)
    }

    // ─── Tasks ──────────────────────────────────────

    /// Insert one UPCOMING task per window, atomically.
    pub fn insert_tasks(
        &self,
        meeting_id: i64,
        windows: &[(DateTime<Utc>, DateTime<Utc>)],
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut conn = self.lock()?;
        fetch_meeting(&conn, meeting_id)?;

        let tx = conn.transaction().map_err(MeetRecError::database)?;
        let mut ids = Vec::with_capacity(windows.len());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO tasks (meeting_id,status,start_time,end_time,created_at,updated_at)
                     VALUES (?1,?2,?3,?4,?5,?5)",
                )
                .map_err(MeetRecError::database)?;
            let ts = fmt_ts(now);
            for (start, end) in windows {
                stmt.execute(params![
                    meeting_id,
                    TaskStatus::Upcoming.as_str(),
                    fmt_ts(*start),
                    fmt_ts(*end),
                    ts,
                ])
                .map_err(MeetRecError::database)?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit().map_err(MeetRecError::database)?;

        ids.into_iter().map(|id| fetch_task(&conn, id)).collect()
    }

    pub fn get_task(&self, id: i64) -> Result<Task> {
        fetch_task(&*self.lock()?, id)
    }

    pub fn get_task_view(&self, id: i64) -> Result<TaskView> {
        self.lock()?
            .query_row(&format!("{TASK_VIEW_SELECT} WHERE t.id = ?1"), params![id], row_to_task_view)
            .optional()
            .map_err(MeetRecError::database)?
            .ok_or_else(|| MeetRecError::not_found(format!("Task {id}")))
    }

    /// Task together with its owning meeting, read in one lock.
    pub fn get_task_with_meeting(&self, id: i64) -> Result<(Task, Meeting)> {
        let conn = self.lock()?;
        let task = fetch_task(&conn, id)?;
        let meeting = fetch_meeting(&conn, task.meeting_id)?;
        Ok((task, meeting))
    }

    pub fn tasks_for_meeting(&self, meeting_id: i64, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let mut sql = format!("{TASK_SELECT} WHERE meeting_id = ?1");
        let mut values = vec![Value::Integer(meeting_id)];
        if let Some(status) = status {
            values.push(Value::Text(status.as_str().into()));
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(" ORDER BY start_time, id");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(MeetRecError::database)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), row_to_task)
            .map_err(MeetRecError::database)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MeetRecError::database)?;
        Ok(rows)
    }

    pub fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskView>> {
        let mut sql = format!("{TASK_VIEW_SELECT} WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            values.push(Value::Text(status.as_str().into()));
            sql.push_str(&format!(" AND t.status = ?{}", values.len()));
        }
        if let Some(meeting_id) = query.meeting_id {
            values.push(Value::Integer(meeting_id));
            sql.push_str(&format!(" AND t.meeting_id = ?{}", values.len()));
        }
        if let Some(name) = &query.meeting_name {
            values.push(Value::Text(like_pattern(name)));
            sql.push_str(&format!(" AND m.meeting_name LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(from) = query.start_time_ge {
            values.push(Value::Text(fmt_ts(from)));
            sql.push_str(&format!(" AND t.start_time >= ?{}", values.len()));
        }
        if let Some(until) = query.end_time_le {
            values.push(Value::Text(fmt_ts(until)));
            sql.push_str(&format!(" AND t.end_time <= ?{}", values.len()));
        }

        let order = query.order.sql();
        match query.sort {
            TaskSort::StartTime => sql.push_str(&format!(" ORDER BY t.start_time {order}, t.id")),
            TaskSort::Status => sql.push_str(&format!(
                " ORDER BY CASE t.status WHEN 'upcoming' THEN 0 WHEN 'recording' THEN 1 WHEN 'completed' THEN 2 ELSE 3 END {order}, t.start_time, t.id"
            )),
        }

        values.push(Value::Integer(clamp_limit(query.limit) as i64));
        values.push(Value::Integer(query.skip as i64));
        sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", values.len() - 1, values.len()));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(MeetRecError::database)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), row_to_task_view)
            .map_err(MeetRecError::database)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MeetRecError::database)?;
        Ok(rows)
    }

    /// Move a task to `to` only if its current status is a legal predecessor.
    /// Returns false when the row was not in such a state (lost the race or terminal).
    pub fn transition_status(&self, id: i64, to: TaskStatus, now: DateTime<Utc>) -> Result<bool> {
        let from = to.allowed_predecessors();
        if from.is_empty() {
            return Ok(false);
        }
        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status IN ({placeholders})"
        );
        let mut values = vec![
            Value::Text(to.as_str().into()),
            Value::Text(fmt_ts(now)),
            Value::Integer(id),
        ];
        values.extend(from.iter().map(|s| Value::Text(s.as_str().into())));

        let conn = self.lock()?;
        let changed = conn
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(MeetRecError::database)?;
        if changed == 0 {
            // distinguish "absent" from "not in a legal state"
            fetch_task(&conn, id)?;
            return Ok(false);
        }
        Ok(true)
    }

    pub fn set_save_path(&self, id: i64, path: &str, now: DateTime<Utc>) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE tasks SET save_path = ?1, updated_at = ?2 WHERE id = ?3",
                params![path, fmt_ts(now), id],
            )
            .map_err(MeetRecError::database)?;
        if changed == 0 {
            return Err(MeetRecError::not_found(format!("Task {id}")));
        }
        Ok(())
    }

    /// Move an UPCOMING task's window. Any other status is rejected.
    pub fn update_task_window(
        &self,
        id: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET start_time = ?1, end_time = ?2, updated_at = ?3 WHERE id = ?4 AND status = 'upcoming'",
                params![fmt_ts(start_time), fmt_ts(end_time), fmt_ts(now), id],
            )
            .map_err(MeetRecError::database)?;
        if changed == 0 {
            let task = fetch_task(&conn, id)?;
            return Err(MeetRecError::InvalidState(format!(
                "Task {id} is {} and can no longer be edited",
                task.status
            )));
        }
        fetch_task(&conn, id)
    }

    /// Delete a task only while it is still UPCOMING. Returns whether a row went.
    pub fn delete_upcoming_task(&self, id: i64) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND status = 'upcoming'",
                params![id],
            )
            .map_err(MeetRecError::database)?;
        Ok(changed > 0)
    }

    pub fn delete_task(&self, id: i64) -> Result<()> {
        let changed = self
            .lock()?
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .map_err(MeetRecError::database)?;
        if changed == 0 {
            return Err(MeetRecError::not_found(format!("Task {id}")));
        }
        Ok(())
    }
}
