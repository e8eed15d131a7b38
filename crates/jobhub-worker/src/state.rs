//! Trigger execution summaries, derived from the jobs a trigger produced.

use jobhub_core::Prefix;
use jobhub_database::JobRepository;
use jobhub_entity::job::{Job, JobState};
use jobhub_entity::trigger::{TriggerState, TriggerStatus};

use crate::error::JobResult;

/// Number of recent jobs inspected.
pub const STATE_LOOKBACK: usize = 100;

/// Summarize the most recent jobs of a trigger.
pub async fn trigger_state(
    jobs: &JobRepository,
    prefix: &Prefix,
    trigger_id: &str,
) -> JobResult<TriggerState> {
    let recent = jobs
        .get_jobs_by_trigger(prefix, trigger_id, STATE_LOOKBACK)
        .await?;
    Ok(summarize(trigger_id, &recent))
}

/// `recent` is ordered newest first.
pub fn summarize(trigger_id: &str, recent: &[Job]) -> TriggerState {
    let mut state = TriggerState {
        trigger_id: trigger_id.to_string(),
        ..TriggerState::default()
    };
    let Some(latest) = recent.first() else {
        return state;
    };
    state.status = match latest.state {
        JobState::Queued => TriggerStatus::Queued,
        JobState::Running => TriggerStatus::Running,
        JobState::Done => TriggerStatus::Done,
        JobState::Errored => TriggerStatus::Errored,
    };
    state.last_execution = Some(latest.queued_at);
    state.last_executed_job_id = Some(latest.id.clone());

    for job in recent {
        match job.state {
            JobState::Done if state.last_successful_job_id.is_none() => {
                state.last_success = Some(job.finished_at.unwrap_or(job.queued_at));
                state.last_successful_job_id = Some(job.id.clone());
            }
            JobState::Errored if state.last_failed_job_id.is_none() => {
                state.last_failure = Some(job.finished_at.unwrap_or(job.queued_at));
                state.last_failed_job_id = Some(job.id.clone());
                state.last_error = job.error.clone();
            }
            _ => {}
        }
        if job.manual && state.last_manual_job_id.is_none() {
            state.last_manual_execution = Some(job.queued_at);
            state.last_manual_job_id = Some(job.id.clone());
        }
    }
    state
}
