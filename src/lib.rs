//! Live TV DVR core: recording store, tuner session broker, recording tasks
//! and the scheduler that drives them.

pub mod dvr;

pub use dvr::clock::{Clock, FakeClock, SystemClock};
pub use dvr::config::DvrConfig;
pub use dvr::data_manager::{DvrDataListener, DvrDataManager, MemoryStore, RecordingStore};
pub use dvr::error::{DvrError, Result};
pub use dvr::manager::DvrManager;
pub use dvr::models::{
    Channel, Program, RecordStopReason, Recording, RecordingCapability, RecordingState,
    RecordingType,
};
pub use dvr::scheduler::Scheduler;
pub use dvr::session::{
    DvrSession, DvrSessionManager, RecordingClient, RecordingClientFactory, SessionCallback,
};
pub use dvr::{init_logging, DvrState};
