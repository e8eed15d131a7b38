//! Integration tests against a real Redis. Run with
//! `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`.

mod helpers;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use helpers::{Mode, Recorder, wait_until};
use jobhub_core::Prefix;
use jobhub_core::traits::{DocumentStore, RealtimeHub};
use jobhub_database::{JobRepository, MemoryStore};
use jobhub_entity::job::{Job, JobRequest};
use jobhub_entity::trigger::TriggerInfos;
use jobhub_realtime::MemoryHub;
use jobhub_worker::broker::{Broker, RedisBroker};
use jobhub_worker::redis::RedisClient;
use jobhub_worker::scheduler::{RedisScheduler, Scheduler};
use jobhub_worker::{JobResult, Trigger, WorkerConfig, WorkerRegistry};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Broker counting the jobs pushed to it.
#[derive(Debug, Default)]
struct CountingBroker {
    pushed: AtomicU32,
}

#[async_trait]
impl Broker for CountingBroker {
    async fn start_workers(
        &self,
        _registry: Arc<WorkerRegistry>,
        _scheduler: Option<Weak<dyn Scheduler>>,
    ) -> JobResult<()> {
        Ok(())
    }

    async fn shutdown_workers(&self, _deadline: Duration) -> JobResult<()> {
        Ok(())
    }

    async fn push_job(&self, prefix: &Prefix, req: JobRequest) -> JobResult<Job> {
        self.pushed.fetch_add(1, Ordering::SeqCst);
        Ok(Job::from_request(prefix, &req))
    }

    async fn worker_queue_len(&self, _worker_type: &str) -> JobResult<usize> {
        Ok(0)
    }

    fn workers_types(&self) -> Vec<String> {
        Vec::new()
    }
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_claim_is_exclusive_across_schedulers() -> anyhow::Result<()> {
    let hub: Arc<dyn RealtimeHub> = Arc::new(MemoryHub::new(64));
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let broker = Arc::new(CountingBroker::default());

    let mut schedulers = Vec::new();
    for _ in 0..2 {
        let client = RedisClient::connect(&redis_url()).await?;
        let scheduler = RedisScheduler::new(client, Arc::clone(&store), Arc::clone(&hub), 2);
        schedulers.push(scheduler);
    }
    schedulers[0].clean_redis().await?;

    let prefix = Prefix::from_db_prefix("redis-claim");
    let at = Utc::now().to_rfc3339();
    for _ in 0..10 {
        let trigger = Trigger::new(TriggerInfos::new(&prefix, "@at", "log", at.clone()))?;
        schedulers[0].add_trigger(trigger).await?;
    }

    for scheduler in &schedulers {
        scheduler.start_scheduler(broker.clone()).await?;
    }
    // Both poll loops run too; every member is still fired once.
    let now = Utc::now() + chrono::Duration::seconds(1);
    let (a, b) = tokio::join!(schedulers[0].poll_scheduler(now), schedulers[1].poll_scheduler(now));
    a?;
    b?;
    for scheduler in &schedulers {
        scheduler.shutdown_scheduler(Duration::from_secs(2)).await?;
    }

    assert_eq!(broker.pushed.load(Ordering::SeqCst), 10);
    assert!(schedulers[0].get_all_triggers(&prefix).await?.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_overdue_trigger_is_fired_once() -> anyhow::Result<()> {
    let hub: Arc<dyn RealtimeHub> = Arc::new(MemoryHub::new(64));
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let broker = Arc::new(CountingBroker::default());

    let first = RedisScheduler::new(
        RedisClient::connect(&redis_url()).await?,
        Arc::clone(&store),
        Arc::clone(&hub),
        1,
    );
    let second = RedisScheduler::new(
        RedisClient::connect(&redis_url()).await?,
        Arc::clone(&store),
        Arc::clone(&hub),
        1,
    );
    first.clean_redis().await?;

    // A minute late: still inside the grace period of an @at.
    let prefix = Prefix::from_db_prefix("redis-overdue");
    let at = (Utc::now() - chrono::Duration::seconds(60)).to_rfc3339();
    first
        .add_trigger(Trigger::new(TriggerInfos::new(&prefix, "@at", "log", at))?)
        .await?;

    first.start_scheduler(broker.clone()).await?;
    second.start_scheduler(broker.clone()).await?;
    let now = Utc::now();
    let (a, b) = tokio::join!(first.poll_scheduler(now), second.poll_scheduler(now));
    a?;
    b?;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    first.shutdown_scheduler(Duration::from_secs(2)).await?;
    second.shutdown_scheduler(Duration::from_secs(2)).await?;

    assert_eq!(broker.pushed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_manual_jobs_are_served_first_more_often() -> anyhow::Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let jobs = JobRepository::new(Arc::clone(&store));
    let worker_type = format!("prio-{}", Utc::now().timestamp_micros());
    let prefix = Prefix::from_db_prefix("redis-prio");

    // A producer process with the worker type disabled.
    let recorder = Recorder::new(Mode::Succeed);
    let mut producer_registry = WorkerRegistry::new();
    producer_registry.add(WorkerConfig::new(&worker_type, recorder.clone()).concurrency(0))?;
    let producer = RedisBroker::new(RedisClient::connect(&redis_url()).await?, jobs.clone(), None);
    producer.start_workers(Arc::new(producer_registry), None).await?;

    for i in 0..60 {
        let mut req = JobRequest::new(&worker_type, None);
        req.manual = i % 2 == 0;
        producer.push_job(&prefix, req).await?;
    }
    assert_eq!(producer.worker_queue_len(&worker_type).await?, 60);

    // A consumer process draining both lanes one job at a time.
    let mut consumer_registry = WorkerRegistry::new();
    consumer_registry.add(WorkerConfig::new(&worker_type, recorder.clone()).concurrency(1))?;
    let consumer = RedisBroker::new(RedisClient::connect(&redis_url()).await?, jobs, None);
    consumer.start_workers(Arc::new(consumer_registry), None).await?;

    wait_until(Duration::from_secs(20), || async {
        (recorder.calls() == 60).then_some(())
    })
    .await
    .expect("jobs were not drained");
    consumer.shutdown_workers(Duration::from_secs(15)).await?;
    producer.shutdown_workers(Duration::from_secs(1)).await?;

    // The manual lane is tried first two times out of three.
    let first_half = recorder.seen().into_iter().take(30).filter(|job| job.manual).count();
    assert!(first_half >= 13, "only {first_half} manual jobs in the first 30");
    Ok(())
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_shutdown_loses_no_popped_job() -> anyhow::Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let jobs = JobRepository::new(Arc::clone(&store));
    let worker_type = format!("drain-{}", Utc::now().timestamp_micros());
    let prefix = Prefix::from_db_prefix("redis-drain");

    let recorder = Recorder::new(Mode::Stubborn(Duration::from_millis(20)));
    let mut producer_registry = WorkerRegistry::new();
    producer_registry.add(WorkerConfig::new(&worker_type, recorder.clone()).concurrency(0))?;
    let client = RedisClient::connect(&redis_url()).await?;
    let producer = RedisBroker::new(client.clone(), jobs.clone(), None);
    producer.start_workers(Arc::new(producer_registry), None).await?;
    for _ in 0..40 {
        producer.push_job(&prefix, JobRequest::new(&worker_type, None)).await?;
    }

    let mut consumer_registry = WorkerRegistry::new();
    consumer_registry.add(WorkerConfig::new(&worker_type, recorder.clone()).concurrency(2))?;
    let consumer = RedisBroker::new(RedisClient::connect(&redis_url()).await?, jobs, None);
    consumer.start_workers(Arc::new(consumer_registry), None).await?;

    tokio::time::sleep(Duration::from_millis(150)).await;
    consumer.shutdown_workers(Duration::from_secs(5)).await?;

    // Every job was either executed or is still queued in Redis.
    let left = producer.worker_queue_len(&worker_type).await?;
    assert!(left > 0, "the consumer drained everything before stopping");
    assert_eq!(recorder.calls() as usize + left, 40);

    producer.shutdown_workers(Duration::from_secs(1)).await?;
    let mut conn = client.conn_mut();
    let _: () = redis::AsyncCommands::del(
        &mut conn,
        &[format!("j/{worker_type}"), format!("j/{worker_type}/p0")],
    )
    .await?;
    Ok(())
}
