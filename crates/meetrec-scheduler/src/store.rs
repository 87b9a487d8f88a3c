//! Trigger store: in-memory index with SQLite write-through.
//! Reads never touch disk; writes happen only on add/remove/fire.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::persistence::TriggerDb;
use crate::triggers::{FireSpec, Trigger, TriggerInfo};

/// Persistent store of scheduled triggers.
///
/// `add` is an upsert keyed by trigger id; `remove` of a missing id is not an error.
pub trait TriggerStore: Send + Sync {
    fn add(&self, trigger: Trigger) -> Result<(), String>;

    /// Returns whether a trigger with this id existed.
    fn remove(&self, id: &str) -> Result<bool, String>;

    fn get(&self, id: &str) -> Option<Trigger>;

    fn exists(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn list(&self) -> Vec<TriggerInfo>;

    /// Pop everything due at `now`. One-shots are consumed, intervals rescheduled.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<Trigger>;

    /// Pick up changes written by other processes sharing the backing store.
    /// Returns the triggers that disappeared in the reload.
    fn sync(&self) -> Result<Vec<Trigger>, String> {
        Ok(Vec::new())
    }
}

struct Inner {
    triggers: HashMap<String, Trigger>,
    db: TriggerDb,
    data_version: i64,
}

/// SQLite-backed [`TriggerStore`].
pub struct SqliteTriggerStore {
    inner: Mutex<Inner>,
}

impl SqliteTriggerStore {
    /// Open the store and reload persisted triggers.
    pub fn open(path: &Path) -> Result<Self, String> {
        Self::from_db(TriggerDb::open(path)?, Utc::now())
    }

    pub fn in_memory() -> Result<Self, String> {
        Self::from_db(TriggerDb::open_in_memory()?, Utc::now())
    }

    fn from_db(db: TriggerDb, now: DateTime<Utc>) -> Result<Self, String> {
        let mut triggers = HashMap::new();
        for mut trigger in db.load_all()? {
            match trigger.fire {
                // overdue one-shots stay overdue and fire on the first tick
                FireSpec::At { .. } if trigger.next_fire.is_none() => {
                    db.delete(&trigger.id)?;
                    continue;
                }
                FireSpec::At { .. } => {}
                FireSpec::Every { every_secs } => {
                    trigger.next_fire = Some(now + Duration::seconds(every_secs as i64));
                }
            }
            triggers.insert(trigger.id.clone(), trigger);
        }
        if !triggers.is_empty() {
            tracing::info!("📂 Reloaded {} pending trigger(s)", triggers.len());
        }
        let data_version = db.data_version()?;
        Ok(Self {
            inner: Mutex::new(Inner {
                triggers,
                db,
                data_version,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, String> {
        self.inner
            .lock()
            .map_err(|_| "trigger store lock poisoned".to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|i| i.triggers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TriggerStore for SqliteTriggerStore {
    fn add(&self, trigger: Trigger) -> Result<(), String> {
        let mut inner = self.lock()?;
        inner.db.save(&trigger)?;
        tracing::debug!("📅 Trigger registered: '{}' next={:?}", trigger.id, trigger.next_fire);
        inner.triggers.insert(trigger.id.clone(), trigger);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, String> {
        let mut inner = self.lock()?;
        inner.db.delete(id)?;
        Ok(inner.triggers.remove(id).is_some())
    }

    fn get(&self, id: &str) -> Option<Trigger> {
        self.lock().ok()?.triggers.get(id).cloned()
    }

    fn list(&self) -> Vec<TriggerInfo> {
        let Ok(inner) = self.lock() else {
            return Vec::new();
        };
        let mut infos: Vec<TriggerInfo> = inner.triggers.values().map(Trigger::info).collect();
        infos.sort_by(|a, b| {
            a.next_fire_time
                .cmp(&b.next_fire_time)
                .then_with(|| a.trigger_id.cmp(&b.trigger_id))
        });
        infos
    }

    fn take_due(&self, now: DateTime<Utc>) -> Vec<Trigger> {
        let Ok(mut inner) = self.lock() else {
            return Vec::new();
        };
        let Inner { triggers, db, .. } = &mut *inner;

        let mut due_ids: Vec<String> = triggers
            .values()
            .filter(|t| t.is_due(now))
            .map(|t| t.id.clone())
            .collect();
        due_ids.sort();

        let mut fired = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            let Some(trigger) = triggers.get_mut(&id) else {
                continue;
            };
            let snapshot = trigger.clone();
            let persist = if trigger.mark_fired(now) {
                db.save(trigger)
            } else {
                triggers.remove(&id);
                db.delete(&id).map(|_| ())
            };
            if let Err(e) = persist {
                tracing::warn!("⚠️ Failed to persist fired trigger '{id}': {e}");
            }
            fired.push(snapshot);
        }
        fired
    }

    fn sync(&self) -> Result<Vec<Trigger>, String> {
        let mut inner = self.lock()?;
        let version = inner.db.data_version()?;
        if version == inner.data_version {
            return Ok(Vec::new());
        }
        let mut triggers: HashMap<String, Trigger> = inner
            .db
            .load_all()?
            .into_iter()
            .filter(|t| t.next_fire.is_some())
            .map(|t| (t.id.clone(), t))
            .collect();
        tracing::debug!("🔄 Trigger store changed externally, {} trigger(s) loaded", triggers.len());
        std::mem::swap(&mut inner.triggers, &mut triggers);
        inner.data_version = version;

        let dropped: Vec<Trigger> = triggers
            .into_values()
            .filter(|t| !inner.triggers.contains_key(&t.id))
            .collect();
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::{TriggerRole, trigger_id};

    #[test]
    fn test_add_is_upsert() {
        let store = SqliteTriggerStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .add(Trigger::at(1, TriggerRole::Start, "start", now + Duration::minutes(5)))
            .unwrap();
        store
            .add(Trigger::at(1, TriggerRole::Start, "start", now + Duration::minutes(10)))
            .unwrap();
        assert_eq!(store.len(), 1);
        let t = store.get(&trigger_id(1, TriggerRole::Start)).unwrap();
        assert_eq!(t.next_fire, Some(now + Duration::minutes(10)));
    }

    #[test]
    fn test_remove_tolerates_missing() {
        let store = SqliteTriggerStore::in_memory().unwrap();
        assert!(!store.remove("task_end_404").unwrap());
        store
            .add(Trigger::at(2, TriggerRole::End, "end", Utc::now()))
            .unwrap();
        assert!(store.exists("task_end_2"));
        assert!(store.remove("task_end_2").unwrap());
        assert!(!store.exists("task_end_2"));
    }

    #[test]
    fn test_take_due_consumes_one_shots() {
        let store = SqliteTriggerStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .add(Trigger::at(1, TriggerRole::Start, "start", now - Duration::seconds(1)))
            .unwrap();
        store
            .add(Trigger::at(1, TriggerRole::End, "end", now + Duration::hours(1)))
            .unwrap();
        store
            .add(Trigger::every(1, TriggerRole::Monitor, "monitor", 30, now - Duration::seconds(30)))
            .unwrap();

        let due = store.take_due(now);
        let ids: Vec<&str> = due.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["task_monitor_1", "task_start_1"]);

        // start is spent, monitor rescheduled, end untouched
        assert!(!store.exists("task_start_1"));
        assert_eq!(
            store.get("task_monitor_1").unwrap().next_fire,
            Some(now + Duration::seconds(30))
        );
        assert!(store.take_due(now).is_empty());
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_reload_keeps_overdue_one_shots() {
        let db = TriggerDb::open_in_memory().unwrap();
        let now = Utc::now();
        db.save(&Trigger::at(5, TriggerRole::Start, "start", now - Duration::minutes(3)))
            .unwrap();
        db.save(&Trigger::every(5, TriggerRole::Monitor, "monitor", 30, now - Duration::hours(1)))
            .unwrap();

        let store = SqliteTriggerStore::from_db(db, now).unwrap();
        assert!(store.get("task_start_5").unwrap().is_due(now));
        assert_eq!(
            store.get("task_monitor_5").unwrap().next_fire,
            Some(now + Duration::seconds(30))
        );
    }

    #[test]
    fn test_sync_sees_other_connections() {
        let path = std::env::temp_dir().join(format!(
            "meetrec-triggers-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let daemon = SqliteTriggerStore::open(&path).unwrap();
        let cli = SqliteTriggerStore::open(&path).unwrap();
        let now = Utc::now();

        cli.add(Trigger::at(9, TriggerRole::Start, "start", now + Duration::minutes(1)))
            .unwrap();
        assert!(!daemon.exists("task_start_9"));
        daemon.sync().unwrap();
        assert!(daemon.exists("task_start_9"));

        cli.remove("task_start_9").unwrap();
        let dropped = daemon.sync().unwrap();
        assert!(!daemon.exists("task_start_9"));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].task_id, 9);
        assert_eq!(dropped[0].role, TriggerRole::Start);

        // own writes do not force a reload
        daemon
            .add(Trigger::at(10, TriggerRole::End, "end", now + Duration::minutes(2)))
            .unwrap();
        assert!(daemon.sync().unwrap().is_empty());
        assert!(daemon.exists("task_end_10"));

        drop((daemon, cli));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_list_sorted_by_next_fire() {
        let store = SqliteTriggerStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .add(Trigger::at(2, TriggerRole::Start, "later", now + Duration::hours(2)))
            .unwrap();
        store
            .add(Trigger::at(1, TriggerRole::Start, "sooner", now + Duration::hours(1)))
            .unwrap();
        let list = store.list();
        assert_eq!(list[0].display_name, "sooner");
        assert_eq!(list[1].display_name, "later");
    }
}
