//! Recording session broker
//!
//! Each TV input exposes a fixed number of tuner sessions that can record at
//! the same time. [`DvrSessionManager`] owns one semaphore per input and is the
//! single place where "can I record on this input" is decided.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::dvr::error::{DvrError, Result};
use crate::dvr::models::{Channel, RecordStopReason, RecordingCapability};

/// Events reported by a recording session. May arrive on any thread.
pub trait SessionCallback: Send + Sync {
    fn on_connected(&self) {}

    fn on_disconnected(&self) {}

    fn on_record_started(&self, media_uri: &str);

    fn on_record_stopped(&self, media_uri: &str, reason: RecordStopReason);
}

/// Platform handle able to record from one tuner
pub trait RecordingClient: Send + Sync {
    fn connect(&self, input_id: &str, callback: Arc<dyn SessionCallback>) -> anyhow::Result<()>;

    fn start_record(&self, channel_uri: &str, media_uri: &str) -> anyhow::Result<()>;

    fn stop_record(&self) -> anyhow::Result<()>;

    fn release(&self);
}

/// Creates platform recording clients for an input
pub trait RecordingClientFactory: Send + Sync {
    fn create_client(
        &self,
        input_id: &str,
        channel: &Channel,
    ) -> anyhow::Result<Arc<dyn RecordingClient>>;
}

/// An acquired recording session holding one slot of its input's pool
pub struct DvrSession {
    id: u64,
    input_id: String,
    client: Arc<dyn RecordingClient>,
    /// Dropping the permit returns the slot to the pool.
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl DvrSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn input_id(&self) -> &str {
        &self.input_id
    }

    pub fn is_released(&self) -> bool {
        self.permit.lock().is_none()
    }

    pub fn connect(&self, callback: Arc<dyn SessionCallback>) -> Result<()> {
        self.client
            .connect(&self.input_id, callback)
            .map_err(|e| DvrError::Session(format!("connect to {} failed: {}", self.input_id, e)))
    }

    pub fn start_record(&self, channel_uri: &str, media_uri: &str) -> Result<()> {
        self.client
            .start_record(channel_uri, media_uri)
            .map_err(|e| DvrError::Session(format!("start record failed: {}", e)))
    }

    pub fn stop_record(&self) -> Result<()> {
        self.client
            .stop_record()
            .map_err(|e| DvrError::Session(format!("stop record failed: {}", e)))
    }
}

impl std::fmt::Debug for DvrSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DvrSession")
            .field("id", &self.id)
            .field("input_id", &self.input_id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Arbitrates the per-input pools of recording sessions
pub struct DvrSessionManager {
    factory: Arc<dyn RecordingClientFactory>,
    capabilities: HashMap<String, RecordingCapability>,
    pools: HashMap<String, Arc<Semaphore>>,
    next_session_id: AtomicU64,
}

impl DvrSessionManager {
    pub fn new(
        factory: Arc<dyn RecordingClientFactory>,
        capabilities: impl IntoIterator<Item = RecordingCapability>,
    ) -> Self {
        let mut manager = Self {
            factory,
            capabilities: HashMap::new(),
            pools: HashMap::new(),
            next_session_id: AtomicU64::new(1),
        };
        for capability in capabilities {
            manager.register_capability(capability);
        }
        manager
    }

    /// Register (or replace) the recording capability of an input.
    ///
    /// Must be called before the manager is shared; sessions acquired from a
    /// replaced pool release into the old pool.
    pub fn register_capability(&mut self, capability: RecordingCapability) {
        info!(
            "Input {} can record {} sessions at once",
            capability.input_id, capability.max_concurrent_tuned_sessions
        );
        self.pools.insert(
            capability.input_id.clone(),
            Arc::new(Semaphore::new(capability.max_concurrent_tuned_sessions)),
        );
        self.capabilities
            .insert(capability.input_id.clone(), capability);
    }

    pub fn get_recording_capability(&self, input_id: &str) -> Option<&RecordingCapability> {
        self.capabilities.get(input_id)
    }

    /// Whether the input has a free session right now. No side effects.
    pub fn can_acquire_dvr_session(&self, input_id: &str, _channel: &Channel) -> bool {
        self.pools
            .get(input_id)
            .map(|pool| pool.available_permits() > 0)
            .unwrap_or(false)
    }

    /// Reserve a session, or `None` if the input has none free
    pub fn acquire_dvr_session(&self, input_id: &str, channel: &Channel) -> Option<Arc<DvrSession>> {
        let pool = self.pools.get(input_id)?;
        let permit = match pool.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("No free recording session on {}", input_id);
                return None;
            }
        };

        let client = match self.factory.create_client(input_id, channel) {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to create recording client for {}: {}", input_id, e);
                return None;
            }
        };

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        debug!(session_id = id, "Acquired recording session on {}", input_id);
        Some(Arc::new(DvrSession {
            id,
            input_id: input_id.to_string(),
            client,
            permit: Mutex::new(Some(permit)),
        }))
    }

    /// Return a session to its pool. Releasing twice is a no-op.
    pub fn release_dvr_session(&self, session: &DvrSession) {
        let permit = session.permit.lock().take();
        match permit {
            Some(permit) => {
                session.client.release();
                drop(permit);
                debug!(session_id = session.id, "Released recording session on {}", session.input_id);
            }
            None => {
                debug!(session_id = session.id, "Recording session already released");
            }
        }
    }

    /// Sessions currently held on `input_id`
    pub fn sessions_in_use(&self, input_id: &str) -> usize {
        match (self.pools.get(input_id), self.capabilities.get(input_id)) {
            (Some(pool), Some(capability)) => {
                capability.max_concurrent_tuned_sessions - pool.available_permits()
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvr::testing::{capability, test_channel, FakeClientFactory, TEST_INPUT};

    #[test]
    fn test_pool_capacity_is_enforced() {
        let factory = FakeClientFactory::new();
        let manager = DvrSessionManager::new(factory.clone(), [capability(TEST_INPUT, 2)]);
        let channel = test_channel();

        let first = manager.acquire_dvr_session(TEST_INPUT, &channel).unwrap();
        assert!(manager.can_acquire_dvr_session(TEST_INPUT, &channel));
        let second = manager.acquire_dvr_session(TEST_INPUT, &channel).unwrap();
        assert_ne!(first.id(), second.id());

        assert!(!manager.can_acquire_dvr_session(TEST_INPUT, &channel));
        assert!(manager.acquire_dvr_session(TEST_INPUT, &channel).is_none());
        assert_eq!(manager.sessions_in_use(TEST_INPUT), 2);

        manager.release_dvr_session(&first);
        assert!(manager.can_acquire_dvr_session(TEST_INPUT, &channel));
        assert_eq!(manager.sessions_in_use(TEST_INPUT), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let factory = FakeClientFactory::new();
        let manager = DvrSessionManager::new(factory.clone(), [capability(TEST_INPUT, 1)]);
        let channel = test_channel();

        let session = manager.acquire_dvr_session(TEST_INPUT, &channel).unwrap();
        manager.release_dvr_session(&session);
        manager.release_dvr_session(&session);

        assert!(session.is_released());
        assert_eq!(factory.client(0).release_count(), 1);
        assert_eq!(manager.sessions_in_use(TEST_INPUT), 0);
    }

    #[test]
    fn test_unknown_input_cannot_record() {
        let manager = DvrSessionManager::new(FakeClientFactory::new(), Vec::new());
        let channel = test_channel();

        assert!(manager.get_recording_capability(TEST_INPUT).is_none());
        assert!(!manager.can_acquire_dvr_session(TEST_INPUT, &channel));
        assert!(manager.acquire_dvr_session(TEST_INPUT, &channel).is_none());
    }

    #[test]
    fn test_factory_failure_returns_slot() {
        let factory = FakeClientFactory::new();
        factory.fail_next_create();
        let manager = DvrSessionManager::new(factory.clone(), [capability(TEST_INPUT, 1)]);
        let channel = test_channel();

        assert!(manager.acquire_dvr_session(TEST_INPUT, &channel).is_none());
        assert!(manager.can_acquire_dvr_session(TEST_INPUT, &channel));
        assert!(manager.acquire_dvr_session(TEST_INPUT, &channel).is_some());
    }
}
