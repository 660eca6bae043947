//! Wake alarm
//!
//! One-shot timer that wakes the scheduler shortly before the next recording.
//! Arming replaces whatever was armed before.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::dvr::clock::Clock;
use crate::dvr::error::{DvrError, Result};

pub trait WakeAlarm: Send + Sync {
    /// Arm the alarm for the epoch time `wake_at_ms`, replacing any armed one
    fn set(&self, wake_at_ms: i64);

    fn cancel(&self);
}

/// Wake alarm backed by a tokio timer task.
///
/// Each firing sends the armed time on the channel returned by [`TokioWakeAlarm::new`].
pub struct TokioWakeAlarm {
    clock: Arc<dyn Clock>,
    sender: mpsc::UnboundedSender<i64>,
    armed: Mutex<Option<CancellationToken>>,
    runtime: Handle,
}

impl TokioWakeAlarm {
    /// Must be called from within a tokio runtime.
    pub fn new(clock: Arc<dyn Clock>) -> Result<(Self, mpsc::UnboundedReceiver<i64>)> {
        let runtime = Handle::try_current().map_err(|e| DvrError::NoRuntime(e.to_string()))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let alarm = Self {
            clock,
            sender,
            armed: Mutex::new(None),
            runtime,
        };
        Ok((alarm, receiver))
    }

    pub fn is_armed(&self) -> bool {
        self.armed
            .lock()
            .as_ref()
            .map(|token| !token.is_cancelled())
            .unwrap_or(false)
    }
}

impl WakeAlarm for TokioWakeAlarm {
    fn set(&self, wake_at_ms: i64) {
        let token = CancellationToken::new();
        if let Some(previous) = self.armed.lock().replace(token.clone()) {
            previous.cancel();
        }

        debug!(
            "Wake alarm armed for {}",
            chrono::DateTime::from_timestamp_millis(wake_at_ms)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| wake_at_ms.to_string())
        );
        let clock = self.clock.clone();
        let sender = self.sender.clone();
        // May be called off the runtime, so the timer is created inside the task.
        self.runtime.spawn(async move {
            tokio::select! {
                _ = clock.sleep_until_millis(wake_at_ms) => {
                    token.cancel();
                    // Receiver gone means the owner shut down
                    let _ = sender.send(wake_at_ms);
                }
                _ = token.cancelled() => {
                    trace!("Wake alarm for {} replaced", wake_at_ms);
                }
            }
        });
    }

    fn cancel(&self) {
        if let Some(token) = self.armed.lock().take() {
            token.cancel();
            debug!("Wake alarm cancelled");
        }
    }
}

impl Drop for TokioWakeAlarm {
    fn drop(&mut self) {
        self.cancel();
    }
}
