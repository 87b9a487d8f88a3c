//! Fake collaborators and a wired-up context for runtime tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use meetrec_core::config::{Environment, MeetRecConfig};
use meetrec_core::error::{MeetRecError, Result};
use meetrec_core::types::{Layout, Meeting, MeetingDraft, Platform, Task, TaskStatus};
use meetrec_db::MeetingDb;
use meetrec_recorder::{Joiners, MeetingJoiner, Recorder};
use meetrec_scheduler::{
    AlertSink, Notification, SqliteTriggerStore, Trigger, TriggerInfo, TriggerRole, TriggerStore,
};

use crate::context::RuntimeContext;
use crate::lifecycle::TaskService;
use crate::meetings::MeetingService;
use crate::monitor::CrashMonitor;
use crate::supervisor::RecordingSupervisor;

pub const FAKE_SAVE_PATH: &str = "/recordings/meeting.mkv";

fn record(calls: &Mutex<Vec<String>>, call: impl Into<String>) {
    calls.lock().unwrap().push(call.into());
}

fn count(calls: &Mutex<Vec<String>>, name: &str) -> usize {
    calls.lock().unwrap().iter().filter(|c| c.as_str() == name).count()
}

// ─── Recorder ───────────────────────────────────────

#[derive(Default)]
pub struct FakeRecorder {
    pub alive: AtomicBool,
    pub capturing: AtomicBool,
    pub fail_launch: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_kill: AtomicBool,
    pub launch_delay_ms: AtomicU64,
    calls: Mutex<Vec<String>>,
}

impl FakeRecorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        count(&self.calls, name)
    }
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn launch(&self) -> Result<()> {
        record(&self.calls, "launch");
        let delay = self.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(StdDuration::from_millis(delay)).await;
        }
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(MeetRecError::recorder("executable missing"));
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, _retries: u32, _timeout: StdDuration) -> Result<()> {
        record(&self.calls, "connect");
        if !self.alive.load(Ordering::SeqCst) {
            return Err(MeetRecError::recorder("connection refused"));
        }
        Ok(())
    }

    async fn setup_scene(&self, scene: &str) -> Result<()> {
        record(&self.calls, format!("setup_scene:{scene}"));
        Ok(())
    }

    async fn start_capture(&self) -> Result<()> {
        record(&self.calls, "start_capture");
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<Option<String>> {
        record(&self.calls, "stop_capture");
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(MeetRecError::recorder("StopRecord refused"));
        }
        if self.capturing.swap(false, Ordering::SeqCst) {
            Ok(Some(FAKE_SAVE_PATH.to_string()))
        } else {
            Ok(None)
        }
    }

    async fn is_capturing(&self) -> Result<bool> {
        Ok(self.capturing.load(Ordering::SeqCst))
    }

    async fn is_process_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn kill_process(&self) -> Result<()> {
        record(&self.calls, "kill_process");
        if self.fail_kill.load(Ordering::SeqCst) {
            return Err(MeetRecError::recorder("access denied"));
        }
        self.alive.store(false, Ordering::SeqCst);
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        record(&self.calls, "disconnect");
    }

    async fn retarget_window(&self, _source: &str, _window_match: &str) -> Result<()> {
        record(&self.calls, "retarget_window");
        Ok(())
    }
}

// ─── Joiner ─────────────────────────────────────────

pub struct FakeJoiner {
    platform: Platform,
    pub alive: AtomicBool,
    pub fail_join: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeJoiner {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            alive: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self, name: &str) -> usize {
        count(&self.calls, name)
    }
}

#[async_trait]
impl MeetingJoiner for FakeJoiner {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn join_and_apply_layout(&self, _meeting: &Meeting) -> Result<()> {
        record(&self.calls, "join");
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(MeetRecError::Timeout("client did not start".into()));
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_client_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn kill_client(&self) -> Result<()> {
        record(&self.calls, "kill_client");
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Alerts ─────────────────────────────────────────

#[derive(Default)]
pub struct CapturingSink {
    sent: Mutex<Vec<Notification>>,
}

impl CapturingSink {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for CapturingSink {
    fn name(&self) -> &str {
        "capture"
    }

    async fn send(&self, notification: &Notification) -> std::result::Result<(), String> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ─── Trigger store ──────────────────────────────────

/// In-memory trigger store that can be told to reject one role.
pub struct FlakyStore {
    inner: SqliteTriggerStore,
    fail_role: Mutex<Option<TriggerRole>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteTriggerStore::in_memory().unwrap(),
            fail_role: Mutex::new(None),
        }
    }

    pub fn fail_role(&self, role: Option<TriggerRole>) {
        *self.fail_role.lock().unwrap() = role;
    }
}

impl TriggerStore for FlakyStore {
    fn add(&self, trigger: Trigger) -> std::result::Result<(), String> {
        if *self.fail_role.lock().unwrap() == Some(trigger.role) {
            return Err("job store unavailable".into());
        }
        self.inner.add(trigger)
    }

    fn remove(&self, id: &str) -> std::result::Result<bool, String> {
        self.inner.remove(id)
    }

    fn get(&self, id: &str) -> Option<Trigger> {
        self.inner.get(id)
    }

    fn list(&self) -> Vec<TriggerInfo> {
        self.inner.list()
    }

    fn take_due(&self, now: DateTime<Utc>) -> Vec<Trigger> {
        self.inner.take_due(now)
    }

    fn sync(&self) -> std::result::Result<Vec<Trigger>, String> {
        self.inner.sync()
    }
}

// ─── Harness ────────────────────────────────────────

pub struct Harness {
    pub ctx: RuntimeContext,
    pub recorder: Arc<FakeRecorder>,
    pub zoom: Arc<FakeJoiner>,
    pub webex: Arc<FakeJoiner>,
    pub sink: Arc<CapturingSink>,
    pub store: Arc<FlakyStore>,
}

/// Prod environment, fakes everywhere.
pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(configure: impl FnOnce(&mut MeetRecConfig)) -> Harness {
    let mut config = MeetRecConfig::default();
    config.recorder.environment = Environment::Prod;
    configure(&mut config);

    let recorder = Arc::new(FakeRecorder::default());
    let zoom = Arc::new(FakeJoiner::new(Platform::Zoom));
    let webex = Arc::new(FakeJoiner::new(Platform::Webex));
    let sink = Arc::new(CapturingSink::default());
    let store = Arc::new(FlakyStore::new());

    let ctx = RuntimeContext::new(
        config,
        Arc::new(MeetingDb::open_in_memory().unwrap()),
        store.clone(),
        recorder.clone(),
        Joiners::new(zoom.clone(), webex.clone()),
        sink.clone(),
    );

    Harness {
        ctx,
        recorder,
        zoom,
        webex,
        sink,
        store,
    }
}

/// A valid creation draft for `platform` over the given window.
pub fn draft(platform: Platform, start: DateTime<Utc>, end: DateTime<Utc>) -> MeetingDraft {
    let (meeting_url, layout) = match platform {
        Platform::Zoom => ("https://zoom.us/j/123456789?pwd=abc", Layout::Speaker),
        Platform::Webex => ("https://acme.webex.com/meet/standup", Layout::Grid),
    };
    MeetingDraft {
        name: "Weekly sync".into(),
        platform,
        meeting_url: Some(meeting_url.into()),
        room_id: None,
        password: None,
        layout,
        creator_name: "Ops".into(),
        creator_email: "ops@example.com".into(),
        start_time: start,
        end_time: end,
        repeat: false,
        repeat_unit: None,
        repeat_end_date: None,
    }
}

impl Harness {
    pub fn tasks(&self) -> TaskService {
        self.ctx.tasks()
    }

    pub fn meetings(&self) -> MeetingService {
        self.ctx.meetings()
    }

    pub fn supervisor(&self) -> RecordingSupervisor {
        self.ctx.supervisor()
    }

    pub fn monitor(&self) -> CrashMonitor {
        self.ctx.monitor()
    }

    /// Persist a meeting directly, skipping creation-time validation.
    pub fn meeting(&self, platform: Platform, start: DateTime<Utc>, end: DateTime<Utc>) -> Meeting {
        self.ctx
            .db
            .create_meeting(&draft(platform, start, end), Utc::now())
            .unwrap()
    }

    /// A one-hour meeting repeating every `every_days` days, `count` times.
    pub fn recurring_meeting(&self, start: DateTime<Utc>, every_days: i64, count: i64) -> Meeting {
        let mut d = draft(Platform::Zoom, start, start + Duration::hours(1));
        d.repeat = true;
        d.repeat_unit = Some(every_days);
        d.repeat_end_date = Some(start + Duration::days(every_days * (count - 1)));
        let d = d.normalized(self.ctx.config.utc_offset());
        self.ctx.db.create_meeting(&d, Utc::now()).unwrap()
    }

    pub fn task(&self, meeting: &Meeting, start: DateTime<Utc>, end: DateTime<Utc>) -> Task {
        self.ctx
            .db
            .insert_tasks(meeting.id, &[(start, end)], Utc::now())
            .unwrap()
            .remove(0)
    }

    /// UPCOMING zoom task one hour out.
    pub fn upcoming_task(&self) -> Task {
        let now = Utc::now();
        let (start, end) = (now + Duration::hours(1), now + Duration::hours(2));
        let meeting = self.meeting(Platform::Zoom, start, end);
        self.task(&meeting, start, end)
    }

    pub fn recording_task(&self) -> Task {
        self.recording_task_on(Platform::Zoom)
    }

    /// RECORDING task with its monitor registered, a live recorder with active
    /// output and a running client.
    pub fn recording_task_on(&self, platform: Platform) -> Task {
        let now = Utc::now();
        let (start, end) = (now - Duration::minutes(5), now + Duration::minutes(55));
        let meeting = self.meeting(platform, start, end);
        let task = self.task(&meeting, start, end);
        assert!(
            self.ctx
                .db
                .transition_status(task.id, TaskStatus::Recording, now)
                .unwrap()
        );

        let every = self.ctx.config.scheduler.monitor_interval_secs;
        self.ctx
            .triggers
            .add(Trigger::every(task.id, TriggerRole::Monitor, "Monitor", every, now))
            .unwrap();

        self.recorder.alive.store(true, Ordering::SeqCst);
        self.recorder.capturing.store(true, Ordering::SeqCst);
        match platform {
            Platform::Zoom => self.zoom.alive.store(true, Ordering::SeqCst),
            Platform::Webex => self.webex.alive.store(true, Ordering::SeqCst),
        }
        self.ctx.db.get_task(task.id).unwrap()
    }

    pub fn db_status(&self, task_id: i64) -> TaskStatus {
        self.ctx.db.get_task(task_id).unwrap().status
    }
}
