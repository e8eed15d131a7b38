//! In-memory job queue.
//!
//! Pushes go into an unbounded FIFO list. A feeder task moves jobs one by
//! one into a single-slot channel read by the pool's consumers, so a push
//! never waits for a consumer. A job counts as pending until a consumer
//! takes it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use jobhub_entity::job::Job;

use crate::error::{JobError, JobResult};
use crate::worker::JobSource;

/// FIFO queue of one worker type.
#[derive(Debug)]
pub struct MemoryQueue {
    list: mpsc::UnboundedSender<Job>,
    out: Arc<Mutex<mpsc::Receiver<Job>>>,
    pending: Arc<AtomicUsize>,
    closed: CancellationToken,
}

impl MemoryQueue {
    /// Create a queue and spawn its feeder.
    pub fn new() -> Self {
        let (list, mut list_rx) = mpsc::unbounded_channel::<Job>();
        let (out_tx, out_rx) = mpsc::channel::<Job>(1);
        let pending = Arc::new(AtomicUsize::new(0));
        let closed = CancellationToken::new();

        let feeder_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    biased;
                    _ = feeder_closed.cancelled() => break,
                    job = list_rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                let sent = tokio::select! {
                    biased;
                    _ = feeder_closed.cancelled() => false,
                    res = out_tx.send(job) => res.is_ok(),
                };
                if !sent {
                    break;
                }
            }
        });

        Self {
            list,
            out: Arc::new(Mutex::new(out_rx)),
            pending,
            closed,
        }
    }

    /// Append a job.
    pub fn push(&self, job: Job) -> JobResult<()> {
        if self.closed.is_cancelled() {
            return Err(JobError::Closed);
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.list.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            JobError::Closed
        })
    }

    /// Number of jobs waiting for a consumer.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether no job is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`MemoryQueue::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stop the feeder. Consumers see the end of the queue; jobs still in
    /// the list stay `queued` in the store.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// The consuming side, shared by every consumer of the pool.
    pub fn source(&self) -> Arc<dyn JobSource> {
        Arc::new(MemorySource {
            out: Arc::clone(&self.out),
            pending: Arc::clone(&self.pending),
        })
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct MemorySource {
    out: Arc<Mutex<mpsc::Receiver<Job>>>,
    pending: Arc<AtomicUsize>,
}

#[async_trait]
impl JobSource for MemorySource {
    async fn next_job(&self, stop: &CancellationToken) -> Option<Job> {
        let mut out = tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            out = self.out.lock() => out,
        };
        // `recv` is cancel safe: a job is either returned or left queued.
        let job = tokio::select! {
            biased;
            _ = stop.cancelled() => return None,
            job = out.recv() => job?,
        };
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhub_core::Prefix;
    use jobhub_entity::job::JobRequest;

    fn job(n: u32) -> Job {
        let mut job = Job::from_request(&Prefix::new("q.example.net", "q"), &JobRequest::new("log", None));
        job.id = format!("job-{n}");
        job
    }

    #[tokio::test]
    async fn test_fifo_and_close() {
        let queue = MemoryQueue::new();
        for n in 0..3 {
            queue.push(job(n)).unwrap();
        }
        let source = queue.source();
        let stop = CancellationToken::new();
        for n in 0..3 {
            assert_eq!(queue.len(), 3 - n as usize);
            assert_eq!(source.next_job(&stop).await.unwrap().id, format!("job-{n}"));
        }
        assert!(queue.is_empty());

        queue.close();
        assert!(matches!(queue.push(job(9)), Err(JobError::Closed)));
        assert!(source.next_job(&stop).await.is_none());
    }

    #[tokio::test]
    async fn test_stopped_consumer_leaves_jobs_pending() {
        let queue = MemoryQueue::new();
        queue.push(job(0)).unwrap();
        queue.push(job(1)).unwrap();
        let source = queue.source();

        let stop = CancellationToken::new();
        assert_eq!(source.next_job(&stop).await.unwrap().id, "job-0");
        stop.cancel();
        assert!(source.next_job(&stop).await.is_none());
        assert_eq!(queue.len(), 1);

        let resumed = CancellationToken::new();
        assert_eq!(source.next_job(&resumed).await.unwrap().id, "job-1");
    }
}
