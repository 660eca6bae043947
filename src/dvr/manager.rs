//! DVR manager
//!
//! Entry point for user-initiated schedule changes and conflict queries.

use std::sync::Arc;

use tracing::info;

use crate::dvr::data_manager::DvrDataManager;
use crate::dvr::error::Result;
use crate::dvr::models::{
    cmp_priority, Channel, Program, Recording, RecordingState, DEFAULT_PRIORITY,
};
use crate::dvr::session::DvrSessionManager;

pub struct DvrManager {
    data_manager: Arc<DvrDataManager>,
    session_manager: Arc<DvrSessionManager>,
}

impl DvrManager {
    pub fn new(data_manager: Arc<DvrDataManager>, session_manager: Arc<DvrSessionManager>) -> Self {
        Self {
            data_manager,
            session_manager,
        }
    }

    /// Schedule `program`, taking precedence over `recordings_to_override`.
    ///
    /// The new recording gets a priority just above the strongest overridden one.
    pub fn add_program_schedule(
        &self,
        channel: Channel,
        program: Program,
        recordings_to_override: &[Recording],
    ) -> Result<Recording> {
        info!(
            "Adding scheduled recording of {} instead of {} recordings",
            program.title,
            recordings_to_override.len()
        );
        let priority = recordings_to_override
            .iter()
            .min_by(|a, b| cmp_priority(a, b))
            .map(|r| r.priority.saturating_sub(1))
            .unwrap_or(DEFAULT_PRIORITY);
        let recording = Recording::for_program(channel, program).with_priority(priority);
        self.data_manager.add_recording(recording)
    }

    pub fn add_timed_schedule(
        &self,
        channel: Channel,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> Result<Recording> {
        info!(
            "Adding scheduled recording of channel {} from {} to {}",
            channel.display_name, start_time_ms, end_time_ms
        );
        self.data_manager
            .add_recording(Recording::timed(channel, start_time_ms, end_time_ms))
    }

    /// Remove a scheduled or finished recording
    pub fn remove_recording(&self, recording: &Recording) -> Result<bool> {
        info!(recording_id = recording.id, "Removing {}", recording);
        self.data_manager.remove_recording(recording)
    }

    /// Priority-ordered recordings that would not be recorded if `program` is.
    ///
    /// Empty means no conflict. Otherwise the program must be scheduled with a
    /// priority stronger than the first returned recording.
    pub fn get_scheduled_recordings_that_conflict(
        &self,
        channel: &Channel,
        program: &Program,
    ) -> Vec<Recording> {
        let Some(capability) = self
            .session_manager
            .get_recording_capability(&channel.input_id)
        else {
            return Vec::new();
        };

        let mut overlapping: Vec<Recording> = self
            .data_manager
            .get_recordings_that_overlap_with(
                program.start_time_utc_millis,
                program.end_time_utc_millis,
            )
            .into_iter()
            .filter(|r| r.channel.input_id == channel.input_id)
            .filter(|r| {
                matches!(
                    r.state,
                    RecordingState::NotStarted | RecordingState::InProgress
                )
            })
            .collect();
        overlapping.sort_by(cmp_priority);

        // The strongest ones still get a tuner alongside the new program.
        let fits = capability.max_concurrent_tuned_sessions.saturating_sub(1);
        if fits >= overlapping.len() {
            return Vec::new();
        }
        overlapping.split_off(fits)
    }

    /// Whether `channel` can be tuned without disturbing recordings in progress.
    ///
    /// Tuning is never refused yet; `conflicts` is left empty.
    pub fn can_tune_to(&self, _channel: &Channel, conflicts: &mut Vec<Recording>) -> bool {
        conflicts.clear();
        true
    }

    /// Whether `input_id` supports recording at all
    pub fn can_record(&self, input_id: &str) -> bool {
        self.session_manager
            .get_recording_capability(input_id)
            .map(|c| c.max_concurrent_tuned_sessions > 0)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvr::testing::{capability, test_channel, FakeClientFactory, TEST_INPUT};

    fn manager(sessions: usize) -> DvrManager {
        DvrManager::new(
            Arc::new(DvrDataManager::in_memory()),
            Arc::new(DvrSessionManager::new(
                FakeClientFactory::new(),
                [capability(TEST_INPUT, sessions)],
            )),
        )
    }

    fn program(id: i64, start: i64, end: i64) -> Program {
        Program {
            id,
            channel_id: 1,
            title: format!("Program {}", id),
            start_time_utc_millis: start,
            end_time_utc_millis: end,
        }
    }

    #[test]
    fn test_override_priority_beats_overridden() {
        let dvr = manager(1);
        let weak = dvr
            .add_program_schedule(test_channel(), program(1, 0, 100), &[])
            .unwrap();
        assert_eq!(weak.priority, DEFAULT_PRIORITY);

        let strong = dvr
            .add_program_schedule(test_channel(), program(2, 0, 100), &[weak.clone()])
            .unwrap();
        assert_eq!(strong.priority, DEFAULT_PRIORITY - 1);
        assert_eq!(strong.start_time_ms, 0);
        assert_eq!(strong.end_time_ms, 100);
    }

    #[test]
    fn test_conflicts_skip_recordings_that_still_fit() {
        let dvr = manager(2);
        let a = dvr
            .add_timed_schedule(test_channel(), 0, 100)
            .unwrap();
        let b = dvr
            .add_program_schedule(test_channel(), program(1, 50, 150), &[a.clone()])
            .unwrap();
        let c = dvr
            .add_program_schedule(test_channel(), program(2, 60, 160), &[b.clone()])
            .unwrap();

        // c is strongest and keeps the second tuner; a and b lose theirs.
        let conflicts =
            dvr.get_scheduled_recordings_that_conflict(&test_channel(), &program(3, 70, 80));
        assert_eq!(conflicts, vec![b, a]);
        assert!(c.priority < DEFAULT_PRIORITY - 1);
    }

    #[test]
    fn test_no_conflict_when_tuners_suffice() {
        let dvr = manager(2);
        dvr.add_timed_schedule(test_channel(), 0, 100).unwrap();
        assert!(dvr
            .get_scheduled_recordings_that_conflict(&test_channel(), &program(3, 10, 20))
            .is_empty());
        assert!(dvr
            .get_scheduled_recordings_that_conflict(&test_channel(), &program(4, 200, 300))
            .is_empty());
    }

    #[test]
    fn test_finished_recordings_never_conflict() {
        let dvr = manager(1);
        let r = dvr.add_timed_schedule(test_channel(), 0, 100).unwrap();
        dvr.data_manager
            .update_recording(r.with_state(RecordingState::Finished))
            .unwrap();
        assert!(dvr
            .get_scheduled_recordings_that_conflict(&test_channel(), &program(3, 10, 20))
            .is_empty());
    }

    #[test]
    fn test_can_record_and_tune() {
        let dvr = manager(1);
        assert!(dvr.can_record(TEST_INPUT));
        assert!(!dvr.can_record("tuner/other"));
        assert!(!manager(0).can_record(TEST_INPUT));

        let mut conflicts = vec![timed_placeholder()];
        assert!(dvr.can_tune_to(&test_channel(), &mut conflicts));
        assert!(conflicts.is_empty());
    }

    fn timed_placeholder() -> Recording {
        Recording::timed(test_channel(), 0, 1)
    }

    #[test]
    fn test_remove_recording() {
        let dvr = manager(1);
        let r = dvr.add_timed_schedule(test_channel(), 0, 100).unwrap();
        assert!(dvr.remove_recording(&r).unwrap());
        assert!(!dvr.remove_recording(&r).unwrap());
    }
}
