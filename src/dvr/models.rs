//! Data models for DVR operations

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Id of a recording that has not been persisted yet
pub const ID_NOT_SET: i64 = -1;

/// Priority given to new recordings; lower values win.
pub const DEFAULT_PRIORITY: i64 = i64::MAX;

const RECORD_URI_PREFIX: &str = "record://livetv.dvr";

/// State of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    NotStarted,
    InProgress,
    UnexpectedlyStopped,
    Finished,
    Failed,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::NotStarted => "not_started",
            RecordingState::InProgress => "in_progress",
            RecordingState::UnexpectedlyStopped => "unexpectedly_stopped",
            RecordingState::Finished => "finished",
            RecordingState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RecordingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(RecordingState::NotStarted),
            "in_progress" => Ok(RecordingState::InProgress),
            "unexpectedly_stopped" => Ok(RecordingState::UnexpectedlyStopped),
            "finished" => Ok(RecordingState::Finished),
            "failed" => Ok(RecordingState::Failed),
            _ => Err(format!("Unknown recording state: {}", s)),
        }
    }
}

/// How the recording window was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingType {
    /// Record a raw time range on a channel
    Timed,
    /// Record the span of one program
    Program,
}

impl RecordingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingType::Timed => "timed",
            RecordingType::Program => "program",
        }
    }
}

impl std::str::FromStr for RecordingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timed" => Ok(RecordingType::Timed),
            "program" => Ok(RecordingType::Program),
            _ => Err(format!("Unknown recording type: {}", s)),
        }
    }
}

/// Why a session stopped recording on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStopReason {
    DiskFull,
    Conflict,
    ConnectFailed,
    Disconnected,
    Unknown,
}

/// Snapshot of a channel taken when a recording is created
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub input_id: String,
    pub uri: String,
    pub display_number: String,
    pub display_name: String,
}

/// Snapshot of a program
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Program {
    pub id: i64,
    pub channel_id: i64,
    pub title: String,
    pub start_time_utc_millis: i64,
    pub end_time_utc_millis: i64,
}

/// Recording limits of one TV input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingCapability {
    pub input_id: String,
    pub max_concurrent_tuned_sessions: usize,
    #[serde(default)]
    pub max_concurrent_playing_sessions: usize,
    #[serde(default)]
    pub max_concurrent_sessions_of_all_types: usize,
}

/// A past, present or future capture of broadcast content.
///
/// Values are never mutated once stored: a state transition produces a new
/// `Recording` (see the `with_*` methods) which replaces the stored one through
/// `DvrDataManager::update_recording`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub id: i64,
    /// Lower value is recorded first; ties go to the lower id.
    pub priority: i64,
    pub recording_type: RecordingType,
    /// Identifier used with the recording session. Absent until persisted.
    pub uri: Option<String>,
    pub channel: Channel,
    /// Usually one program; a timed recording may span several.
    pub programs: Vec<Program>,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub media_size: i64,
    pub state: RecordingState,
}

impl Recording {
    /// Timed recording of `channel` over `[start_time_ms, end_time_ms]`
    pub fn timed(channel: Channel, start_time_ms: i64, end_time_ms: i64) -> Self {
        Self {
            id: ID_NOT_SET,
            priority: DEFAULT_PRIORITY,
            recording_type: RecordingType::Timed,
            uri: None,
            channel,
            programs: Vec::new(),
            start_time_ms,
            end_time_ms,
            media_size: 0,
            state: RecordingState::NotStarted,
        }
    }

    /// Recording spanning exactly `program`
    pub fn for_program(channel: Channel, program: Program) -> Self {
        Self {
            recording_type: RecordingType::Program,
            start_time_ms: program.start_time_utc_millis,
            end_time_ms: program.end_time_utc_millis,
            programs: vec![program],
            ..Self::timed(channel, 0, 0)
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        if self.uri.is_none() && id >= 0 {
            self.uri = Some(default_record_uri(id, &self.channel.input_id));
        }
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_state(mut self, state: RecordingState) -> Self {
        self.state = state;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_programs(mut self, programs: Vec<Program>) -> Self {
        self.programs = programs;
        self
    }

    pub fn with_media_size(mut self, media_size: i64) -> Self {
        self.media_size = media_size;
        self
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time_ms - self.start_time_ms
    }

    /// Whether `[lower, upper]` intersects the recording window (both ends inclusive)
    pub fn is_overlapping(&self, lower: i64, upper: i64) -> bool {
        self.start_time_ms <= upper && self.end_time_ms >= lower
    }

    /// Media URI handed to the session when recording starts
    pub fn media_uri(&self) -> String {
        default_record_uri(self.id, &self.channel.input_id)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.end_time_ms < self.start_time_ms {
            return Err(format!(
                "end time {} is before start time {}",
                self.end_time_ms, self.start_time_ms
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Recording[{}](startTime={},endTime={},state={},priority={})",
            self.id,
            format_millis(self.start_time_ms),
            format_millis(self.end_time_ms),
            self.state.as_str(),
            self.priority
        )
    }
}

fn default_record_uri(id: i64, input_id: &str) -> String {
    format!("{}/{}?input_id={}", RECORD_URI_PREFIX, id, input_id)
}

fn format_millis(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Orders by start time
pub fn cmp_start_time(lhs: &Recording, rhs: &Recording) -> Ordering {
    lhs.start_time_ms.cmp(&rhs.start_time_ms)
}

/// Orders by priority, then id
pub fn cmp_priority(lhs: &Recording, rhs: &Recording) -> Ordering {
    lhs.priority
        .cmp(&rhs.priority)
        .then_with(|| lhs.id.cmp(&rhs.id))
}

pub fn cmp_start_time_then_priority(lhs: &Recording, rhs: &Recording) -> Ordering {
    cmp_start_time(lhs, rhs).then_with(|| cmp_priority(lhs, rhs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(id: i64, start: i64, end: i64) -> Recording {
        Recording::timed(Channel::default(), start, end).with_id(id)
    }

    #[test]
    fn test_is_overlapping() {
        let r = recording(1, 10, 20);

        assert!(!r.is_overlapping(1, 9));
        assert!(r.is_overlapping(1, 20));
        assert!(r.is_overlapping(1, 10));
        assert!(r.is_overlapping(10, 19));
        assert!(r.is_overlapping(10, 20));
        assert!(r.is_overlapping(11, 20));
        assert!(r.is_overlapping(11, 21));
        assert!(r.is_overlapping(20, 21));
        assert!(!r.is_overlapping(21, 29));
    }

    #[test]
    fn test_with_state_leaves_original_untouched() {
        let original = recording(4, 1_000, 2_000).with_priority(7);
        let failed = original.clone().with_state(RecordingState::Failed);

        assert_eq!(original.state, RecordingState::NotStarted);
        assert_eq!(
            failed,
            Recording {
                state: RecordingState::Failed,
                ..original.clone()
            }
        );
    }

    #[test]
    fn test_timed_recording_spanning_programs() {
        let programs = vec![
            Program {
                id: 1,
                channel_id: 1,
                title: "News".to_string(),
                start_time_utc_millis: 0,
                end_time_utc_millis: 1_800_000,
            },
            Program {
                id: 2,
                channel_id: 1,
                title: "Weather".to_string(),
                start_time_utc_millis: 1_800_000,
                end_time_utc_millis: 2_700_000,
            },
        ];
        let r = recording(3, 0, 2_700_000).with_programs(programs.clone());

        assert_eq!(r.recording_type, RecordingType::Timed);
        assert_eq!(r.programs, programs);
        assert_eq!(r.duration_ms(), 2_700_000);
    }

    #[test]
    fn test_priority_ties_break_on_id() {
        let mut list = vec![
            recording(7, 0, 10).with_priority(5),
            recording(3, 0, 10).with_priority(5),
            recording(9, 0, 10).with_priority(1),
        ];
        list.sort_by(cmp_priority);
        let ids: Vec<i64> = list.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![9, 3, 7]);
    }

    #[test]
    fn test_start_time_then_priority() {
        let mut list = vec![
            recording(2, 100, 200).with_priority(3),
            recording(1, 100, 200).with_priority(3),
            recording(5, 50, 200),
        ];
        list.sort_by(cmp_start_time_then_priority);
        let ids: Vec<i64> = list.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 1, 2]);
    }

    #[test]
    fn test_program_recording_takes_program_window() {
        let program = Program {
            id: 11,
            channel_id: 2,
            title: "News".to_string(),
            start_time_utc_millis: 5_000,
            end_time_utc_millis: 8_000,
        };
        let r = Recording::for_program(Channel::default(), program.clone());

        assert_eq!(r.recording_type, RecordingType::Program);
        assert_eq!(r.start_time_ms, 5_000);
        assert_eq!(r.end_time_ms, 8_000);
        assert_eq!(r.programs, vec![program]);
        assert_eq!(r.id, ID_NOT_SET);
        assert_eq!(r.priority, DEFAULT_PRIORITY);
        assert!(r.uri.is_none());
    }

    #[test]
    fn test_persisted_recording_gets_record_uri() {
        let channel = Channel {
            input_id: "tuner/1".to_string(),
            ..Default::default()
        };
        let r = Recording::timed(channel, 0, 1).with_id(42);
        assert_eq!(
            r.uri.as_deref(),
            Some("record://livetv.dvr/42?input_id=tuner/1")
        );
        assert_eq!(r.media_uri(), "record://livetv.dvr/42?input_id=tuner/1");
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            RecordingState::NotStarted,
            RecordingState::InProgress,
            RecordingState::UnexpectedlyStopped,
            RecordingState::Finished,
            RecordingState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<RecordingState>(), Ok(state));
        }
        assert!("paused".parse::<RecordingState>().is_err());
    }
}
