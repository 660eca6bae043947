//! Recording scheduler
//!
//! Launches a [`RecordingTask`] for every recording due within the soon window
//! and keeps the wake alarm armed for the next one. Re-evaluated on startup,
//! on every wake alarm, and on data manager events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dvr::alarm::WakeAlarm;
use crate::dvr::clock::Clock;
use crate::dvr::config::SchedulerConfig;
use crate::dvr::data_manager::{DvrDataListener, DvrDataManager};
use crate::dvr::error::{DvrError, Result};
use crate::dvr::models::{Recording, RecordingState};
use crate::dvr::recording_task::RecordingTask;
use crate::dvr::session::DvrSessionManager;

/// In-flight task bound to a recording id
struct PendingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    /// Distinguishes a relaunch from the entry it replaced
    generation: u64,
}

type PendingMap = Arc<Mutex<HashMap<i64, PendingTask>>>;

pub struct Scheduler {
    session_manager: Arc<DvrSessionManager>,
    data_manager: Arc<DvrDataManager>,
    clock: Arc<dyn Clock>,
    alarm: Arc<dyn WakeAlarm>,
    config: SchedulerConfig,
    pending: PendingMap,
    next_generation: AtomicU64,
    runtime: Handle,
}

impl Scheduler {
    /// Must be called from within a tokio runtime; tasks launched from
    /// listener callbacks on other threads are spawned onto it.
    pub fn new(
        session_manager: Arc<DvrSessionManager>,
        data_manager: Arc<DvrDataManager>,
        clock: Arc<dyn Clock>,
        alarm: Arc<dyn WakeAlarm>,
        config: SchedulerConfig,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|e| DvrError::NoRuntime(e.to_string()))?;
        Ok(Arc::new(Self {
            session_manager,
            data_manager,
            clock,
            alarm,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            runtime,
        }))
    }

    /// Listen for data changes, recover from a previous run, and schedule.
    pub fn start(self: &Arc<Self>) {
        info!(
            "Starting DVR scheduler (soon window {}s)",
            self.config.soon_window.as_secs()
        );
        self.data_manager.add_listener(self.clone());
        self.recover_interrupted();
        self.fail_missed();
        self.update();
    }

    /// Stop listening, disarm the alarm, and cancel every pending task.
    ///
    /// Waits for the cancelled tasks to release their sessions.
    pub async fn stop(self: &Arc<Self>) {
        let me: Arc<dyn DvrDataListener> = self.clone();
        self.data_manager.remove_listener(&me);
        self.alarm.cancel();

        let drained: Vec<PendingTask> = self.pending.lock().drain().map(|(_, t)| t).collect();
        info!("Stopping DVR scheduler, cancelling {} tasks", drained.len());
        for task in &drained {
            task.cancel.cancel();
        }
        for task in drained {
            if let Err(e) = task.handle.await {
                error!("Recording task ended abnormally: {}", e);
            }
        }
    }

    /// Launch tasks for recordings due soon and re-arm the wake alarm.
    pub fn update(&self) {
        if !self.data_manager.is_initialized() {
            debug!("Data manager not ready, skipping scheduler update");
            return;
        }
        let now = self.clock.current_time_millis();
        let upper = now + self.config.soon_window.as_millis() as i64;
        for recording in self.data_manager.get_recordings_that_overlap_with(now, upper) {
            if recording.state == RecordingState::NotStarted {
                self.schedule_recording_soon(recording);
            }
        }
        self.update_next_alarm();
    }

    /// Arm the wake alarm ahead of the next recording beyond the soon window.
    ///
    /// Recordings inside the window already have a task, so the alarm always
    /// lands in the future.
    pub fn update_next_alarm(&self) {
        let now = self.clock.current_time_millis();
        let soon_window = self.config.soon_window.as_millis() as i64;
        let lead = self.config.wake_before_start.min(self.config.soon_window);

        match self
            .data_manager
            .get_next_scheduled_start_time_after(now + soon_window)
        {
            Some(start) => {
                let wake_at = start - lead.as_millis() as i64;
                debug!("Next recording starts at {}, waking at {}", start, wake_at);
                self.alarm.set(wake_at);
            }
            None => {
                debug!("No upcoming recordings, wake alarm disarmed");
                self.alarm.cancel();
            }
        }
    }

    /// Whether `recording` starts within `window` from now
    pub fn starts_within(&self, recording: &Recording, window: Duration) -> bool {
        self.clock.current_time_millis() >= recording.start_time_ms - window.as_millis() as i64
    }

    /// Launch a task for `recording` unless one is already pending.
    fn schedule_recording_soon(&self, recording: Recording) {
        let id = recording.id;
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            debug!(recording_id = id, "Recording task already pending");
            return;
        }

        info!(recording_id = id, "Launching recording task for {}", recording);
        let task = Arc::new(RecordingTask::new(
            recording,
            self.session_manager.clone(),
            self.data_manager.clone(),
            self.clock.clone(),
            self.config.task,
        ));
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = self.runtime.spawn({
            let cancel = cancel.clone();
            let pending = self.pending.clone();
            async move {
                task.run(cancel).await;
                let mut pending = pending.lock();
                if pending.get(&id).map(|t| t.generation) == Some(generation) {
                    pending.remove(&id);
                }
                debug!(recording_id = id, "Recording task finished");
            }
        });
        pending.insert(
            id,
            PendingTask {
                cancel,
                handle,
                generation,
            },
        );
    }

    /// IN_PROGRESS recordings with no task were cut off by a previous shutdown.
    fn recover_interrupted(&self) {
        for recording in self.data_manager.get_started_recordings() {
            if self.is_pending(recording.id) {
                continue;
            }
            warn!(recording_id = recording.id, "Recording was interrupted by shutdown");
            let stopped = recording.with_state(RecordingState::UnexpectedlyStopped);
            if let Err(e) = self.data_manager.update_recording(stopped) {
                error!("Failed to mark interrupted recording: {}", e);
            }
        }
    }

    /// NOT_STARTED recordings whose window closed while nothing was running.
    fn fail_missed(&self) {
        let now = self.clock.current_time_millis();
        for recording in self.data_manager.get_scheduled_recordings() {
            if recording.end_time_ms < now {
                self.fail_elapsed(&recording);
            }
        }
    }

    fn fail_elapsed(&self, recording: &Recording) {
        warn!(recording_id = recording.id, "Recording window already passed, marking failed");
        let failed = recording.clone().with_state(RecordingState::Failed);
        if let Err(e) = self.data_manager.update_recording(failed) {
            error!("Failed to mark missed recording: {}", e);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, recording_id: i64) -> bool {
        self.pending.lock().contains_key(&recording_id)
    }
}

impl DvrDataListener for Scheduler {
    fn on_recording_added(&self, recording: &Recording) {
        if recording.state != RecordingState::NotStarted {
            self.update_next_alarm();
        } else if recording.end_time_ms < self.clock.current_time_millis() {
            self.fail_elapsed(recording);
        } else if self.starts_within(recording, self.config.soon_window) {
            self.schedule_recording_soon(recording.clone());
        } else {
            self.update_next_alarm();
        }
    }

    fn on_recording_removed(&self, recording: &Recording) {
        let removed = self.pending.lock().remove(&recording.id);
        match removed {
            Some(task) => {
                info!(recording_id = recording.id, "Cancelling task of removed recording");
                task.cancel.cancel();
            }
            None => self.update_next_alarm(),
        }
    }

    fn on_recording_status_changed(&self, recording: &Recording) {
        // Reset to not started, e.g. by a retry
        if recording.state == RecordingState::NotStarted {
            self.on_recording_added(recording);
        }
    }
}
