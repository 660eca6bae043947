//! Recording data manager
//!
//! Owns the authoritative, start-time ordered set of recordings, persists every
//! change through a [`RecordingStore`], and fans events out to listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::dvr::error::{DvrError, Result};
use crate::dvr::models::{Recording, RecordingState, ID_NOT_SET};

/// Persistence backend for recordings
pub trait RecordingStore: Send + Sync {
    fn load_all(&self) -> anyhow::Result<Vec<Recording>>;

    /// Insert a recording, assigning an id when it is `ID_NOT_SET`
    fn insert(&self, recording: &Recording) -> anyhow::Result<Recording>;

    /// Replace the row with the same id; returns the number of rows changed
    fn update(&self, recording: &Recording) -> anyhow::Result<usize>;

    /// Returns the number of rows removed
    fn delete(&self, id: i64) -> anyhow::Result<usize>;
}

/// Non-persistent store, for tests and ephemeral setups
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    rows: Mutex<HashMap<i64, Recording>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordingStore for MemoryStore {
    fn load_all(&self) -> anyhow::Result<Vec<Recording>> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    fn insert(&self, recording: &Recording) -> anyhow::Result<Recording> {
        let mut rows = self.rows.lock();
        let id = if recording.id == ID_NOT_SET {
            // Skip ids taken by explicit inserts
            loop {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                if !rows.contains_key(&id) {
                    break id;
                }
            }
        } else {
            recording.id
        };
        if rows.contains_key(&id) {
            anyhow::bail!("id {} already stored", id);
        }
        let stored = recording.clone().with_id(id);
        rows.insert(id, stored.clone());
        Ok(stored)
    }

    fn update(&self, recording: &Recording) -> anyhow::Result<usize> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&recording.id) {
            Some(row) => {
                *row = recording.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn delete(&self, id: i64) -> anyhow::Result<usize> {
        Ok(self.rows.lock().remove(&id).map_or(0, |_| 1))
    }
}

/// Receives recording change events.
///
/// Events are delivered synchronously on the thread that made the change, after
/// the data manager has released its internal locks.
pub trait DvrDataListener: Send + Sync {
    fn on_recording_added(&self, recording: &Recording);
    fn on_recording_removed(&self, recording: &Recording);
    fn on_recording_status_changed(&self, recording: &Recording);
}

/// Listener set with snapshot-then-iterate delivery, so a listener may add or
/// remove listeners from inside a callback.
#[derive(Default)]
struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn DvrDataListener>>>,
}

impl ListenerSet {
    fn add(&self, listener: Arc<dyn DvrDataListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn remove(&self, listener: &Arc<dyn DvrDataListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn len(&self) -> usize {
        self.listeners.read().len()
    }

    fn for_each(&self, f: impl Fn(&dyn DvrDataListener)) {
        let snapshot = self.listeners.read().clone();
        for listener in snapshot {
            f(listener.as_ref());
        }
    }
}

/// Manages the set of recordings and notifies listeners about changes
pub struct DvrDataManager {
    store: Box<dyn RecordingStore>,
    /// Sorted by start time, then id
    recordings: RwLock<Vec<Recording>>,
    initialized: AtomicBool,
    listeners: ListenerSet,
}

impl DvrDataManager {
    /// Create a data manager over `store`. Call [`Self::start`] before use.
    pub fn new(store: Box<dyn RecordingStore>) -> Self {
        Self {
            store,
            recordings: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
            listeners: ListenerSet::default(),
        }
    }

    /// In-memory data manager that is ready immediately
    pub fn in_memory() -> Self {
        let manager = Self::new(Box::new(MemoryStore::new()));
        manager.initialized.store(true, Ordering::SeqCst);
        manager
    }

    /// Load recordings from the store and mark the manager initialized
    pub fn start(&self) -> Result<()> {
        let mut loaded = self.store.load_all()?;
        loaded.sort_by_key(sort_key);
        let count = loaded.len();
        *self.recordings.write() = loaded;
        self.initialized.store(true, Ordering::SeqCst);
        info!("DVR data manager loaded {} recordings", count);
        Ok(())
    }

    /// Whether queries reflect the store yet
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn DvrDataListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DvrDataListener>) {
        self.listeners.remove(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Persist a new recording and notify listeners. Returns the stored value.
    pub fn add_recording(&self, recording: Recording) -> Result<Recording> {
        self.check_initialized()?;
        recording.validate().map_err(DvrError::InvalidRecording)?;

        let stored = {
            let mut recordings = self.recordings.write();
            if recording.id != ID_NOT_SET && recordings.iter().any(|r| r.id == recording.id) {
                return Err(DvrError::DuplicateRecording(recording.id));
            }
            let stored = self.store.insert(&recording)?;
            let index = recordings.partition_point(|r| sort_key(r) < sort_key(&stored));
            recordings.insert(index, stored.clone());
            stored
        };

        debug!(recording_id = stored.id, "Added {}", stored);
        self.listeners.for_each(|l| l.on_recording_added(&stored));
        Ok(stored)
    }

    /// Remove a recording by id. Unknown ids are a no-op and return `false`.
    pub fn remove_recording(&self, recording: &Recording) -> Result<bool> {
        let removed = {
            let mut recordings = self.recordings.write();
            let Some(index) = recordings.iter().position(|r| r.id == recording.id) else {
                debug!(recording_id = recording.id, "Remove of unknown recording ignored");
                return Ok(false);
            };
            if self.store.delete(recording.id)? == 0 {
                warn!(recording_id = recording.id, "Recording was already gone from the store");
            }
            recordings.remove(index)
        };

        debug!(recording_id = removed.id, "Removed {}", removed);
        self.listeners.for_each(|l| l.on_recording_removed(&removed));
        Ok(true)
    }

    /// Replace the stored recording with the same id.
    ///
    /// Fails with [`DvrError::RecordingNotFound`] if the id was never added.
    pub fn update_recording(&self, recording: Recording) -> Result<()> {
        recording.validate().map_err(DvrError::InvalidRecording)?;
        {
            let mut recordings = self.recordings.write();
            let index = recordings
                .iter()
                .position(|r| r.id == recording.id)
                .ok_or(DvrError::RecordingNotFound(recording.id))?;
            if self.store.update(&recording)? == 0 {
                return Err(DvrError::RecordingNotFound(recording.id));
            }
            recordings.remove(index);
            let index = recordings.partition_point(|r| sort_key(r) < sort_key(&recording));
            recordings.insert(index, recording.clone());
        }

        debug!(recording_id = recording.id, "Updated {}", recording);
        self.listeners
            .for_each(|l| l.on_recording_status_changed(&recording));
        Ok(())
    }

    /// All recordings ordered by start time
    pub fn get_recordings(&self) -> Vec<Recording> {
        if !self.is_initialized() {
            return Vec::new();
        }
        self.recordings.read().clone()
    }

    pub fn get_recording(&self, id: i64) -> Option<Recording> {
        if !self.is_initialized() {
            return None;
        }
        self.recordings.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn get_scheduled_recordings(&self) -> Vec<Recording> {
        self.get_recordings_with_state(RecordingState::NotStarted)
    }

    pub fn get_started_recordings(&self) -> Vec<Recording> {
        self.get_recordings_with_state(RecordingState::InProgress)
    }

    pub fn get_finished_recordings(&self) -> Vec<Recording> {
        self.get_recordings_with_state(RecordingState::Finished)
    }

    pub fn get_recordings_with_state(&self, state: RecordingState) -> Vec<Recording> {
        if !self.is_initialized() {
            return Vec::new();
        }
        self.recordings
            .read()
            .iter()
            .filter(|r| r.state == state)
            .cloned()
            .collect()
    }

    /// Recordings whose window intersects `[lower, upper]`, both ends inclusive
    pub fn get_recordings_that_overlap_with(&self, lower: i64, upper: i64) -> Vec<Recording> {
        if !self.is_initialized() {
            return Vec::new();
        }
        let recordings = self.recordings.read();
        // Nothing starting after `upper` can overlap.
        let end = recordings.partition_point(|r| r.start_time_ms <= upper);
        recordings[..end]
            .iter()
            .filter(|r| r.is_overlapping(lower, upper))
            .cloned()
            .collect()
    }

    /// Smallest start time strictly after `time` among not-started recordings.
    ///
    /// `None` means there is no such recording.
    pub fn get_next_scheduled_start_time_after(&self, time: i64) -> Option<i64> {
        if !self.is_initialized() {
            return None;
        }
        let recordings = self.recordings.read();
        let start = recordings.partition_point(|r| r.start_time_ms <= time);
        recordings[start..]
            .iter()
            .find(|r| r.state == RecordingState::NotStarted)
            .map(|r| r.start_time_ms)
    }

    fn check_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(DvrError::NotInitialized)
        }
    }
}

fn sort_key(recording: &Recording) -> (i64, i64) {
    (recording.start_time_ms, recording.id)
}
