//! Integration tests for job execution: retries and backoff, worker hooks,
//! timeouts, panics, concurrency limits and shutdown.

mod helpers;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use helpers::{Mode, Recorder, TestSystem, wait_until};
use jobhub_core::config::jobs::JobsConfig;
use jobhub_entity::job::{JobOptions, JobRequest, JobState, Message};
use jobhub_worker::jobs::LogWorker;
use jobhub_worker::{JobError, JobHandler, JobResult, WorkerConfig, WorkerContext};

fn worker(name: &str, recorder: &Arc<Recorder>) -> WorkerConfig {
    WorkerConfig::new(name, recorder.clone()).retry_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn test_failing_job_is_retried_up_to_the_bound() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Fail);
    let app = TestSystem::start(vec![worker("flaky", &recorder).max_exec_count(3)]).await;

    let job = app.system.push_job(&app.prefix, JobRequest::new("flaky", None)).await?;
    assert_eq!(job.state, JobState::Queued);

    let done = app.wait_job(&job.id).await;
    assert_eq!(done.state, JobState::Errored);
    assert_eq!(done.error.as_deref(), Some("boom"));
    assert_eq!(recorder.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_success_on_a_later_attempt_stops_retrying() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::FailTimes(1));
    let app = TestSystem::start(vec![worker("flaky", &recorder).max_exec_count(4)]).await;

    let job = app.system.push_job(&app.prefix, JobRequest::new("flaky", None)).await?;
    let done = app.wait_job(&job.id).await;
    assert_eq!(done.state, JobState::Done);
    assert_eq!(done.error, None);
    assert_eq!(recorder.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_retries_back_off() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Fail);
    let app = TestSystem::start(vec![WorkerConfig::new("flaky", recorder.clone())
        .max_exec_count(3)
        .retry_delay(Duration::from_millis(50))])
    .await;

    let started = Instant::now();
    let job = app.system.push_job(&app.prefix, JobRequest::new("flaky", None)).await?;
    app.wait_job(&job.id).await;
    // 50ms then 100ms, each jittered by at most 10%.
    assert!(started.elapsed() >= Duration::from_millis(135));
    assert_eq!(recorder.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_job_options_lower_the_bound() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Fail);
    let app = TestSystem::start(vec![worker("flaky", &recorder).max_exec_count(5)]).await;

    let mut req = JobRequest::new("flaky", None);
    req.options = Some(JobOptions {
        max_exec_count: Some(2),
        ..Default::default()
    });
    let job = app.system.push_job(&app.prefix, req).await?;
    app.wait_job(&job.id).await;
    assert_eq!(recorder.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_abort_is_acknowledged_without_retry() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Abort);
    let app = TestSystem::start(vec![worker("abort", &recorder).max_exec_count(5)]).await;

    let job = app.system.push_job(&app.prefix, JobRequest::new("abort", None)).await?;
    let done = app.wait_job(&job.id).await;
    assert_eq!(done.state, JobState::Done);
    assert_eq!(recorder.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_panic_is_recovered_and_retried() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Panic);
    let app = TestSystem::start(vec![worker("panicky", &recorder).max_exec_count(2)]).await;

    let job = app.system.push_job(&app.prefix, JobRequest::new("panicky", None)).await?;
    let done = app.wait_job(&job.id).await;
    assert_eq!(done.state, JobState::Errored);
    assert!(done.error.unwrap_or_default().contains("worker exploded"));
    assert_eq!(recorder.calls(), 2);

    // The pool survived the panics.
    let next = app.system.push_job(&app.prefix, JobRequest::new("panicky", None)).await?;
    app.wait_job(&next.id).await;
    assert_eq!(recorder.calls(), 4);
    Ok(())
}

#[tokio::test]
async fn test_attempt_timeout() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Sleep(Duration::from_secs(5)));
    let app = TestSystem::start(vec![worker("slow", &recorder)
        .max_exec_count(1)
        .timeout(Duration::from_millis(100))])
    .await;

    let started = Instant::now();
    let job = app.system.push_job(&app.prefix, JobRequest::new("slow", None)).await?;
    let done = app.wait_job(&job.id).await;
    assert_eq!(done.state, JobState::Errored);
    assert!(done.error.unwrap_or_default().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(3));
    Ok(())
}

#[tokio::test]
async fn test_message_reaches_the_worker() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Succeed);
    let app = TestSystem::start(vec![
        worker("rec", &recorder),
        WorkerConfig::new("log", Arc::new(LogWorker)),
    ])
    .await;

    let message = Message::new(&serde_json::json!({"folder": "photos"}))?;
    let job = app
        .system
        .push_job(&app.prefix, JobRequest::new("rec", Some(message.clone())))
        .await?;
    assert_eq!(app.wait_job(&job.id).await.state, JobState::Done);
    assert_eq!(recorder.seen()[0].message, Some(message.clone()));

    let logged = app
        .system
        .push_job(&app.prefix, JobRequest::new("log", Some(message)))
        .await?;
    assert_eq!(app.wait_job(&logged.id).await.state, JobState::Done);
    Ok(())
}

#[derive(Debug)]
struct Picky;

#[async_trait::async_trait]
impl JobHandler for Picky {
    fn before_enqueue(&self, job: &jobhub_entity::job::Job) -> bool {
        job.message.is_some()
    }

    async fn execute(&self, _ctx: &WorkerContext) -> JobResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_admission_rules() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Succeed);
    let app = TestSystem::start(vec![
        worker("admin", &recorder).admin_only(true),
        WorkerConfig::new("picky", Arc::new(Picky)),
    ])
    .await;

    assert!(matches!(
        app.system.push_job(&app.prefix, JobRequest::new("nope", None)).await,
        Err(JobError::UnknownWorker(_))
    ));
    assert!(matches!(
        app.system.push_job(&app.prefix, JobRequest::new("admin", None)).await,
        Err(JobError::UnknownWorker(_))
    ));
    let mut req = JobRequest::new("admin", None);
    req.admin = true;
    let job = app.system.push_job(&app.prefix, req).await?;
    app.wait_job(&job.id).await;

    let skipped = app.system.push_job(&app.prefix, JobRequest::new("picky", None)).await?;
    assert!(matches!(
        app.system.get_job(&app.prefix, &skipped.id).await,
        Err(JobError::NotFoundJob(_))
    ));

    assert!(matches!(
        app.system.add_worker(WorkerConfig::new("late", Arc::new(LogWorker))).await,
        Err(JobError::RegistryFrozen)
    ));
    Ok(())
}

#[tokio::test]
async fn test_disabled_worker_keeps_jobs_queued() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Succeed);
    let app = TestSystem::start(vec![worker("idle", &recorder).concurrency(0)]).await;

    app.system.push_job(&app.prefix, JobRequest::new("idle", None)).await?;
    app.system.push_job(&app.prefix, JobRequest::new("idle", None)).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.calls(), 0);
    assert_eq!(app.system.worker_queue_len("idle").await?, 2);
    assert_eq!(app.system.get_queued_jobs(&app.prefix, "idle").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_reports_timeout_instead_of_hanging() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Stubborn(Duration::from_secs(10)));
    let app = TestSystem::start(vec![worker("stuck", &recorder)]).await;

    app.system.push_job(&app.prefix, JobRequest::new("stuck", None)).await?;
    helpers::wait_until(Duration::from_secs(2), || async {
        (recorder.calls() > 0).then_some(())
    })
    .await
    .expect("job never started");

    let started = Instant::now();
    let result = app.system.shutdown(Duration::from_millis(200)).await;
    assert!(matches!(result, Err(JobError::ShutdownTimeout)));
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn test_graceful_shutdown_waits_for_running_jobs() -> anyhow::Result<()> {
    let recorder = Recorder::new(Mode::Stubborn(Duration::from_millis(200)));
    let app = TestSystem::start(vec![worker("short", &recorder)]).await;

    let job = app.system.push_job(&app.prefix, JobRequest::new("short", None)).await?;
    helpers::wait_until(Duration::from_secs(2), || async {
        (recorder.calls() > 0).then_some(())
    })
    .await
    .expect("job never started");

    app.system.shutdown(Duration::from_secs(5)).await?;
    let done = app.system.get_job(&app.prefix, &job.id).await?;
    assert_eq!(done.state, JobState::Done);
    assert!(matches!(
        app.system.push_job(&app.prefix, JobRequest::new("short", None)).await,
        Err(JobError::Closed)
    ));
    Ok(())
}

/// Worker failing every attempt while recording its hooks.
#[derive(Debug, Default)]
struct Hooked {
    no_retry: bool,
    refuse_retry: bool,
    calls: AtomicU32,
    commits: Mutex<Vec<Option<String>>>,
}

#[async_trait::async_trait]
impl JobHandler for Hooked {
    async fn start(&self, ctx: &mut WorkerContext) -> JobResult<()> {
        ctx.set_cookie(42u32);
        Ok(())
    }

    async fn execute(&self, ctx: &WorkerContext) -> JobResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ctx.cookie::<u32>() != Some(&42) {
            return Err(JobError::execution("cookie missing"));
        }
        if self.no_retry {
            ctx.set_no_retry();
        }
        Err(JobError::execution("refused"))
    }

    fn should_retry(&self, _err: &JobError) -> bool {
        !self.refuse_retry
    }

    async fn commit(&self, _ctx: &WorkerContext, result: Option<&JobError>) -> JobResult<()> {
        self.commits.lock().unwrap().push(result.map(ToString::to_string));
        Ok(())
    }
}

impl Hooked {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn wait_commit(&self) -> Vec<Option<String>> {
        wait_until(Duration::from_secs(2), || async {
            let commits = self.commits.lock().unwrap().clone();
            (!commits.is_empty()).then_some(commits)
        })
        .await
        .expect("commit hook was not called")
    }
}

#[tokio::test]
async fn test_start_cookie_and_commit_hook() -> anyhow::Result<()> {
    let hooked = Arc::new(Hooked::default());
    let app = TestSystem::start(vec![WorkerConfig::new("hooked", hooked.clone())
        .max_exec_count(3)
        .retry_delay(Duration::from_millis(10))])
    .await;

    let job = app.system.push_job(&app.prefix, JobRequest::new("hooked", None)).await?;
    let done = app.wait_job(&job.id).await;
    assert_eq!(done.error.as_deref(), Some("refused"));
    assert_eq!(hooked.calls(), 3);

    let commits = hooked.wait_commit().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(commits, vec![Some("refused".to_string())]);
    assert_eq!(hooked.commits.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_no_retry_flag_stops_the_loop() -> anyhow::Result<()> {
    let hooked = Arc::new(Hooked {
        no_retry: true,
        ..Default::default()
    });
    let app = TestSystem::start(vec![WorkerConfig::new("once", hooked.clone())
        .max_exec_count(5)
        .retry_delay(Duration::from_millis(10))])
    .await;

    let job = app.system.push_job(&app.prefix, JobRequest::new("once", None)).await?;
    assert_eq!(app.wait_job(&job.id).await.state, JobState::Errored);
    assert_eq!(hooked.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_should_retry_can_refuse() -> anyhow::Result<()> {
    let hooked = Arc::new(Hooked {
        refuse_retry: true,
        ..Default::default()
    });
    let app = TestSystem::start(vec![WorkerConfig::new("picky-retry", hooked.clone())
        .max_exec_count(5)
        .retry_delay(Duration::from_millis(10))])
    .await;

    let job = app
        .system
        .push_job(&app.prefix, JobRequest::new("picky-retry", None))
        .await?;
    assert_eq!(app.wait_job(&job.id).await.state, JobState::Errored);
    assert_eq!(hooked.calls(), 1);
    assert_eq!(hooked.wait_commit().await, vec![Some("refused".to_string())]);
    Ok(())
}

/// Worker measuring how many of its executions overlap.
#[derive(Debug, Default)]
struct Gauge {
    running: AtomicU32,
    peak: AtomicU32,
    done: AtomicU32,
}

#[async_trait::async_trait]
impl JobHandler for Gauge {
    async fn execute(&self, _ctx: &WorkerContext) -> JobResult<()> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Gauge {
    async fn wait_done(&self, count: u32) {
        wait_until(Duration::from_secs(5), || async {
            (self.done.load(Ordering::SeqCst) == count).then_some(())
        })
        .await
        .expect("jobs did not finish");
    }
}

#[tokio::test]
async fn test_concurrency_bounds_parallel_runs() -> anyhow::Result<()> {
    let gauge = Arc::new(Gauge::default());
    let app = TestSystem::start(vec![WorkerConfig::new("wide", gauge.clone()).concurrency(3)]).await;

    for _ in 0..9 {
        app.system.push_job(&app.prefix, JobRequest::new("wide", None)).await?;
    }
    gauge.wait_done(9).await;
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak > 1 && peak <= 3, "peak {peak}");
    Ok(())
}

#[tokio::test]
async fn test_slots_cap_runs_across_worker_types() -> anyhow::Result<()> {
    let gauge = Arc::new(Gauge::default());
    let config = JobsConfig {
        slots: 1,
        ..Default::default()
    };
    let app = TestSystem::start_with(
        config,
        vec![
            WorkerConfig::new("left", gauge.clone()).concurrency(2),
            WorkerConfig::new("right", gauge.clone()).concurrency(2),
        ],
    )
    .await;

    for _ in 0..3 {
        app.system.push_job(&app.prefix, JobRequest::new("left", None)).await?;
        app.system.push_job(&app.prefix, JobRequest::new("right", None)).await?;
    }
    gauge.wait_done(6).await;
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
    Ok(())
}
