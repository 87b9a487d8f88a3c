//! Shared handles every runtime component works through.

use std::sync::Arc;

use meetrec_core::config::{MeetRecConfig, expand_path};
use meetrec_core::error::{MeetRecError, Result};
use meetrec_db::MeetingDb;
use meetrec_recorder::{Joiners, ObsRecorder, Recorder};
use meetrec_scheduler::{AlertSink, NotifyRouter, SqliteTriggerStore, TriggerStore, sink_from_config};

use crate::alerts::TaskAlerts;
use crate::lifecycle::TaskService;
use crate::meetings::MeetingService;
use crate::monitor::{CrashMonitor, MonitorStates};
use crate::supervisor::RecordingSupervisor;

/// Cheap to clone; all members are shared.
#[derive(Clone)]
pub struct RuntimeContext {
    pub config: Arc<MeetRecConfig>,
    pub db: Arc<MeetingDb>,
    pub triggers: Arc<dyn TriggerStore>,
    pub recorder: Arc<dyn Recorder>,
    pub joiners: Joiners,
    pub states: Arc<MonitorStates>,
    pub alerts: Arc<TaskAlerts>,
}

impl RuntimeContext {
    pub fn new(
        config: MeetRecConfig,
        db: Arc<MeetingDb>,
        triggers: Arc<dyn TriggerStore>,
        recorder: Arc<dyn Recorder>,
        joiners: Joiners,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let states = Arc::new(MonitorStates::new());
        let router = Arc::new(NotifyRouter::new(sink));
        let alerts = Arc::new(TaskAlerts::new(
            router,
            states.clone(),
            config.alert.cooldown_secs,
        ));
        Self {
            config: Arc::new(config),
            db,
            triggers,
            recorder,
            joiners,
            states,
            alerts,
        }
    }

    /// Open both databases and build the production recorder, joiners and alert sinks.
    pub fn open(config: MeetRecConfig) -> Result<Self> {
        let db_path = expand_path(&config.database.path);
        let trigger_path = expand_path(&config.database.scheduler_path);
        for path in [&db_path, &trigger_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Arc::new(MeetingDb::open(&db_path)?);
        let triggers: Arc<dyn TriggerStore> =
            Arc::new(SqliteTriggerStore::open(&trigger_path).map_err(MeetRecError::Database)?);
        let recorder: Arc<dyn Recorder> = Arc::new(ObsRecorder::new(config.recorder.clone()));
        let joiners = Joiners::from_config(&config);
        let sink = sink_from_config(&config.alert);

        tracing::info!(
            "🗄️ Databases: meetings={} triggers={}",
            db_path.display(),
            trigger_path.display()
        );
        Ok(Self::new(config, db, triggers, recorder, joiners, sink))
    }

    pub fn tasks(&self) -> TaskService {
        TaskService::new(self.clone())
    }

    pub fn meetings(&self) -> MeetingService {
        MeetingService::new(self.clone())
    }

    pub fn supervisor(&self) -> RecordingSupervisor {
        RecordingSupervisor::new(self.clone())
    }

    pub fn monitor(&self) -> CrashMonitor {
        CrashMonitor::new(self.clone())
    }
}
