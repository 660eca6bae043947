//! DVR (Digital Video Recorder) module
//!
//! Schedules recordings on the tuner sessions of the live TV inputs and keeps
//! their state in a persistent store.

pub mod alarm;
pub mod clock;
pub mod config;
pub mod data_manager;
pub mod database;
pub mod error;
pub mod manager;
pub mod models;
pub mod recording_task;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;

use crate::dvr::alarm::TokioWakeAlarm;
use crate::dvr::clock::{Clock, SystemClock};
use crate::dvr::config::DvrConfig;
use crate::dvr::data_manager::{DvrDataManager, RecordingStore};
use crate::dvr::database::DvrDatabase;
use crate::dvr::manager::DvrManager;
use crate::dvr::scheduler::Scheduler;
use crate::dvr::session::{DvrSessionManager, RecordingClientFactory};

/// Shared state for DVR operations
pub struct DvrState {
    pub data_manager: Arc<DvrDataManager>,
    pub session_manager: Arc<DvrSessionManager>,
    pub scheduler: Arc<Scheduler>,
    pub manager: Arc<DvrManager>,
    alarm_wakes: Mutex<Option<UnboundedReceiver<i64>>>,
    shutdown: CancellationToken,
}

impl DvrState {
    /// Initialize the DVR system on the configured SQLite database.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &DvrConfig,
        factory: Arc<dyn RecordingClientFactory>,
    ) -> anyhow::Result<Self> {
        let db = DvrDatabase::open(&config.database_path()?)?;
        Self::with_store(config, Box::new(db), factory, Arc::new(SystemClock))
    }

    /// Initialize the DVR system over an arbitrary store and clock
    pub fn with_store(
        config: &DvrConfig,
        store: Box<dyn RecordingStore>,
        factory: Arc<dyn RecordingClientFactory>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        info!("Initializing DVR system...");

        let data_manager = Arc::new(DvrDataManager::new(store));
        let session_manager = Arc::new(DvrSessionManager::new(
            factory,
            config.capabilities.iter().cloned(),
        ));
        let (alarm, alarm_wakes) = TokioWakeAlarm::new(clock.clone())?;
        let scheduler = Scheduler::new(
            session_manager.clone(),
            data_manager.clone(),
            clock,
            Arc::new(alarm),
            config.scheduler_config(),
        )?;
        let manager = Arc::new(DvrManager::new(
            data_manager.clone(),
            session_manager.clone(),
        ));

        info!("DVR system initialized successfully");
        Ok(Self {
            data_manager,
            session_manager,
            scheduler,
            manager,
            alarm_wakes: Mutex::new(Some(alarm_wakes)),
            shutdown: CancellationToken::new(),
        })
    }

    /// Load the store, start the scheduler and the wake alarm loop
    pub fn start_background_tasks(&self) -> anyhow::Result<()> {
        info!("Starting DVR background tasks...");

        let Some(mut wakes) = self.alarm_wakes.lock().take() else {
            anyhow::bail!("DVR background tasks already started");
        };
        self.data_manager.start()?;
        self.scheduler.start();

        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    wake = wakes.recv() => match wake {
                        Some(at) => {
                            debug!("Wake alarm fired ({})", at);
                            scheduler.update();
                        }
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Wake alarm loop stopped");
        });

        info!("All DVR background tasks started");
        Ok(())
    }

    /// Stop all background tasks gracefully
    pub async fn stop(&self) {
        info!("Stopping DVR system...");
        self.shutdown.cancel();
        self.scheduler.stop().await;
        info!("DVR system stopped");
    }
}

/// Initialize logging for DVR operations
///
/// When debug_logging is false, r2d2 pool chatter is suppressed. With a
/// `log_dir`, logs also go to a daily rolling file; keep the returned guard
/// alive or buffered lines are lost.
pub fn init_logging(debug_logging: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if debug_logging {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info,r2d2=warn")
    };

    let console = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "livetv-dvr.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer().with_ansi(false).with_writer(writer);
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file);
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        None => {
            let subscriber = tracing_subscriber::registry().with(filter).with(console);
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    }
}
