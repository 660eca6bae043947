//! Fakes shared by the DVR unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dvr::alarm::WakeAlarm;
use crate::dvr::data_manager::DvrDataListener;
use crate::dvr::models::{Channel, RecordStopReason, Recording, RecordingCapability};
use crate::dvr::session::{RecordingClient, RecordingClientFactory, SessionCallback};

pub const TEST_INPUT: &str = "tuner/test";

pub fn test_channel() -> Channel {
    Channel {
        id: 1,
        input_id: TEST_INPUT.to_string(),
        uri: "content://channel/1".to_string(),
        display_number: "1".to_string(),
        display_name: "Test channel".to_string(),
    }
}

pub fn capability(input_id: &str, sessions: usize) -> RecordingCapability {
    RecordingCapability {
        input_id: input_id.to_string(),
        max_concurrent_tuned_sessions: sessions,
        max_concurrent_playing_sessions: sessions,
        max_concurrent_sessions_of_all_types: sessions + 1,
    }
}

pub fn timed_recording(start_time_ms: i64, end_time_ms: i64) -> Recording {
    Recording::timed(test_channel(), start_time_ms, end_time_ms)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    Added(Recording),
    Removed(Recording),
    StatusChanged(Recording),
}

/// Listener capturing every event
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordingEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecordingEvent> {
        self.events.lock().clone()
    }
}

impl DvrDataListener for EventLog {
    fn on_recording_added(&self, recording: &Recording) {
        self.events
            .lock()
            .push(RecordingEvent::Added(recording.clone()));
    }

    fn on_recording_removed(&self, recording: &Recording) {
        self.events
            .lock()
            .push(RecordingEvent::Removed(recording.clone()));
    }

    fn on_recording_status_changed(&self, recording: &Recording) {
        self.events
            .lock()
            .push(RecordingEvent::StatusChanged(recording.clone()));
    }
}

/// Scripted recording client
#[derive(Default)]
pub struct FakeClient {
    connects: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    releases: AtomicUsize,
    fail_connect: AtomicBool,
    /// Report `on_record_started` from inside `start_record`
    ack_start: AtomicBool,
    callback: Mutex<Option<Arc<dyn SessionCallback>>>,
    media_uri: Mutex<Option<String>>,
}

impl FakeClient {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn media_uri(&self) -> Option<String> {
        self.media_uri.lock().clone()
    }

    /// Report a started recording later, as a real tuner session does
    pub fn emit_record_started(&self, media_uri: &str) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.on_record_started(media_uri);
        }
    }

    /// Simulate the session stopping on its own
    pub fn emit_record_stopped(&self, reason: RecordStopReason) {
        let callback = self.callback.lock().clone();
        let uri = self.media_uri().unwrap_or_default();
        if let Some(callback) = callback {
            callback.on_record_stopped(&uri, reason);
        }
    }
}

impl RecordingClient for FakeClient {
    fn connect(&self, _input_id: &str, callback: Arc<dyn SessionCallback>) -> anyhow::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            anyhow::bail!("tuner unavailable");
        }
        *self.callback.lock() = Some(callback.clone());
        callback.on_connected();
        Ok(())
    }

    fn start_record(&self, _channel_uri: &str, media_uri: &str) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.media_uri.lock() = Some(media_uri.to_string());
        if self.ack_start.load(Ordering::SeqCst) {
            let callback = self.callback.lock().clone();
            if let Some(callback) = callback {
                callback.on_record_started(media_uri);
            }
        }
        Ok(())
    }

    fn stop_record(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`FakeClient`]s and keeping them for inspection
pub struct FakeClientFactory {
    clients: Mutex<Vec<Arc<FakeClient>>>,
    fail_next_create: AtomicBool,
    fail_connect: AtomicBool,
    ack_start: AtomicBool,
}

impl FakeClientFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(Vec::new()),
            fail_next_create: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            ack_start: AtomicBool::new(true),
        })
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn without_start_ack(&self) {
        self.ack_start.store(false, Ordering::SeqCst);
    }

    pub fn client(&self, index: usize) -> Arc<FakeClient> {
        self.clients.lock()[index].clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

impl RecordingClientFactory for FakeClientFactory {
    fn create_client(
        &self,
        _input_id: &str,
        _channel: &Channel,
    ) -> anyhow::Result<Arc<dyn RecordingClient>> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            anyhow::bail!("no tuner");
        }
        let client = Arc::new(FakeClient::default());
        client
            .fail_connect
            .store(self.fail_connect.load(Ordering::SeqCst), Ordering::SeqCst);
        client
            .ack_start
            .store(self.ack_start.load(Ordering::SeqCst), Ordering::SeqCst);
        self.clients.lock().push(client.clone());
        Ok(client)
    }
}

/// Wake alarm recording every request
#[derive(Default)]
pub struct FakeWakeAlarm {
    armed: Mutex<Vec<i64>>,
    cancels: AtomicUsize,
}

impl FakeWakeAlarm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn armed(&self) -> Vec<i64> {
        self.armed.lock().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl WakeAlarm for FakeWakeAlarm {
    fn set(&self, wake_at_ms: i64) {
        self.armed.lock().push(wake_at_ms);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
