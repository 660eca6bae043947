//! Recording task
//!
//! Drives one recording from session acquisition to release: wait for the
//! start boundary, start the tuner, wait for the end boundary, stop it.
//! Session events arrive on foreign threads through [`SessionCallback`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dvr::clock::Clock;
use crate::dvr::config::RecordingTaskConfig;
use crate::dvr::data_manager::DvrDataManager;
use crate::dvr::error::DvrError;
use crate::dvr::models::{RecordStopReason, Recording, RecordingState};
use crate::dvr::session::{DvrSession, DvrSessionManager, SessionCallback};

/// Progress of a [`RecordingTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Acquiring,
    WaitingToStart,
    Recording,
    WaitingToStop,
    Stopping,
    Done,
    Failed,
}

/// What ended the wait for the end boundary
enum StopCause {
    EndReached,
    StoppedBySession,
    Cancelled,
}

pub struct RecordingTask {
    recording: Mutex<Recording>,
    state: Mutex<TaskState>,
    session_manager: Arc<DvrSessionManager>,
    data_manager: Arc<DvrDataManager>,
    clock: Arc<dyn Clock>,
    config: RecordingTaskConfig,
    session: Mutex<Option<Arc<DvrSession>>>,
    /// Fired when the session stops recording on its own
    stopped: CancellationToken,
}

/// Releases the task's session when dropped, on every exit path
struct SessionRelease {
    task: Arc<RecordingTask>,
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        let session = self.task.session.lock().take();
        if let Some(session) = session {
            self.task.session_manager.release_dvr_session(&session);
        }
    }
}

impl RecordingTask {
    pub fn new(
        recording: Recording,
        session_manager: Arc<DvrSessionManager>,
        data_manager: Arc<DvrDataManager>,
        clock: Arc<dyn Clock>,
        config: RecordingTaskConfig,
    ) -> Self {
        debug!(recording_id = recording.id, "Created recording task for {}", recording);
        Self {
            recording: Mutex::new(recording),
            state: Mutex::new(TaskState::Created),
            session_manager,
            data_manager,
            clock,
            config,
            session: Mutex::new(None),
            stopped: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Latest snapshot of the recording as seen by this task
    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }

    /// Run the task to completion or until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let recording = self.recording();
        let recording_id = recording.id;
        let input_id = recording.channel.input_id.clone();

        self.set_state(TaskState::Acquiring);
        if !self
            .session_manager
            .can_acquire_dvr_session(&input_id, &recording.channel)
        {
            warn!(recording_id, "No recording session available on {}", input_id);
            self.fail();
            return;
        }
        // Capacity can vanish between the check and the acquire.
        let Some(session) = self
            .session_manager
            .acquire_dvr_session(&input_id, &recording.channel)
        else {
            warn!(recording_id, "Lost the race for a session on {}", input_id);
            self.fail();
            return;
        };
        *self.session.lock() = Some(session.clone());
        let _release = SessionRelease { task: self.clone() };

        if let Err(e) = session.connect(self.clone()) {
            error!(recording_id, "{}", e);
            self.fail();
            return;
        }

        let start_at = recording.start_time_ms - self.config.before_start.as_millis() as i64;
        if !self.transition(TaskState::Acquiring, TaskState::WaitingToStart) {
            // Session stopped while connecting
            return;
        }
        tokio::select! {
            _ = self.clock.sleep_until_millis(start_at) => {}
            _ = self.stopped.cancelled() => {
                debug!(recording_id, "Session stopped before recording started");
                return;
            }
            _ = cancel.cancelled() => {
                info!(recording_id, "Recording cancelled before start");
                self.transition(TaskState::WaitingToStart, TaskState::Done);
                return;
            }
        }

        if !self.transition(TaskState::WaitingToStart, TaskState::Recording) {
            // Session stopped as the start boundary passed
            return;
        }
        info!(recording_id, "Starting recording on {}", recording.channel.uri);
        if let Err(e) = session.start_record(&recording.channel.uri, &recording.media_uri()) {
            error!(recording_id, "{}", e);
            self.fail();
            return;
        }
        if !self.transition(TaskState::Recording, TaskState::WaitingToStop) {
            // Session stopped while starting
            return;
        }

        let stop_at = recording.end_time_ms + self.config.after_end.as_millis() as i64;
        let cause = tokio::select! {
            _ = self.clock.sleep_until_millis(stop_at) => StopCause::EndReached,
            _ = self.stopped.cancelled() => StopCause::StoppedBySession,
            _ = cancel.cancelled() => StopCause::Cancelled,
        };

        match cause {
            StopCause::EndReached => {
                if !self.transition(TaskState::WaitingToStop, TaskState::Stopping) {
                    return;
                }
                if let Err(e) = session.stop_record() {
                    error!(recording_id, "{}", e);
                    self.fail();
                    return;
                }
                let mut state = self.state.lock();
                if self.recording.lock().state == RecordingState::InProgress {
                    self.persist(RecordingState::Finished, None);
                    info!(recording_id, "Recording finished");
                } else {
                    warn!(recording_id, "Session never reported the recording as started");
                    self.persist(RecordingState::Failed, None);
                }
                *state = TaskState::Done;
            }
            StopCause::StoppedBySession => {
                debug!(recording_id, "Recording task ends after session stop");
            }
            StopCause::Cancelled => {
                if !self.transition(TaskState::WaitingToStop, TaskState::Stopping) {
                    return;
                }
                info!(recording_id, "Recording cancelled while in progress");
                if let Err(e) = session.stop_record() {
                    warn!(recording_id, "{}", e);
                }
                let mut state = self.state.lock();
                self.persist(RecordingState::UnexpectedlyStopped, None);
                *state = TaskState::Done;
            }
        }
    }

    fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    /// Move `from -> to`; false if another thread moved the task first.
    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn fail(&self) {
        let mut state = self.state.lock();
        *state = TaskState::Failed;
        self.persist(RecordingState::Failed, None);
    }

    /// Store a new state (and optionally a media uri) for the recording.
    ///
    /// Callers hold the task state lock, so a stored recording state always
    /// agrees with the task state it was decided under.
    fn persist(&self, state: RecordingState, uri: Option<&str>) {
        let mut recording = self.recording.lock();
        let mut updated = recording.clone().with_state(state);
        if let Some(uri) = uri {
            updated = updated.with_uri(uri);
        }
        *recording = updated.clone();

        match self.data_manager.update_recording(updated) {
            Ok(()) => {}
            Err(DvrError::RecordingNotFound(id)) => {
                debug!(recording_id = id, "Recording is gone, {:?} not stored", state);
            }
            Err(e) => {
                error!(recording_id = recording.id, "Failed to store {:?}: {}", state, e);
            }
        }
    }
}

impl SessionCallback for RecordingTask {
    fn on_connected(&self) {
        debug!(recording_id = self.recording.lock().id, "Session connected");
    }

    fn on_disconnected(&self) {
        debug!(recording_id = self.recording.lock().id, "Session disconnected");
    }

    fn on_record_started(&self, media_uri: &str) {
        let state = self.state.lock();
        if matches!(*state, TaskState::Recording | TaskState::WaitingToStop) {
            self.persist(RecordingState::InProgress, Some(media_uri));
        } else {
            debug!("Ignoring late record start for {}", media_uri);
        }
    }

    fn on_record_stopped(&self, media_uri: &str, reason: RecordStopReason) {
        {
            let mut state = self.state.lock();
            match *state {
                TaskState::Acquiring
                | TaskState::WaitingToStart
                | TaskState::Recording
                | TaskState::WaitingToStop => {
                    warn!("Session stopped recording {} early: {:?}", media_uri, reason);
                    *state = TaskState::Failed;
                    self.persist(RecordingState::Failed, None);
                }
                _ => {
                    // Acknowledgement of our own stop, or the task is over
                    debug!("Stop of {} acknowledged ({:?})", media_uri, reason);
                    return;
                }
            }
        }
        self.stopped.cancel();
    }
}
