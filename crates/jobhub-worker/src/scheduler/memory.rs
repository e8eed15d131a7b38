//! In-process scheduler: one task per timed trigger, one subscription per
//! event trigger. Suited to a single process.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use jobhub_core::events::Event;
use jobhub_core::traits::{DocumentStore, RealtimeHub, Subscriber};
use jobhub_core::Prefix;
use jobhub_database::TriggerRepository;
use jobhub_entity::job::JobRequest;

use super::{Scheduler, load_trigger};
use crate::broker::Broker;
use crate::error::{JobError, JobResult};
use crate::trigger::{Trigger, TriggerKind};

/// Capacity of the mailbox between an event subscription and its debouncer.
const MAILBOX_SIZE: usize = 16;

/// Scheduler keeping its triggers in the memory of one process.
#[derive(Debug)]
pub struct MemoryScheduler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    store: Arc<dyn DocumentStore>,
    hub: Arc<dyn RealtimeHub>,
    triggers: TriggerRepository,
    broker: OnceLock<Arc<dyn Broker>>,
    entries: DashMap<String, Entry>,
    tracker: TaskTracker,
    stop: CancellationToken,
}

#[derive(Debug)]
struct Entry {
    trigger: Trigger,
    cancel: CancellationToken,
}

impl MemoryScheduler {
    /// Create a scheduler persisting triggers in `store` and watching `hub`.
    pub fn new(store: Arc<dyn DocumentStore>, hub: Arc<dyn RealtimeHub>) -> Self {
        Self {
            inner: Arc::new(Inner {
                triggers: TriggerRepository::new(Arc::clone(&store)),
                store,
                hub,
                broker: OnceLock::new(),
                entries: DashMap::new(),
                tracker: TaskTracker::new(),
                stop: CancellationToken::new(),
            }),
        }
    }
}

impl Inner {
    fn schedule(self: &Arc<Self>, trigger: Trigger) {
        let cancel = self.stop.child_token();
        let key = trigger.prefix().scoped(trigger.id());
        match trigger.kind() {
            TriggerKind::At(_) | TriggerKind::Cron(_) | TriggerKind::Every(_) => {
                self.tracker
                    .spawn(Arc::clone(self).run_timed(trigger.clone(), cancel.clone()));
            }
            TriggerKind::Event(rules) => {
                // Subscribe before `add_trigger` returns.
                let mut subscriber = self.hub.subscriber(trigger.prefix());
                for doctype in rules.doctypes() {
                    subscriber.subscribe(doctype);
                }
                self.tracker.spawn(Arc::clone(self).run_event(
                    trigger.clone(),
                    subscriber,
                    cancel.clone(),
                ));
            }
            TriggerKind::Webhook(_) | TriggerKind::Client => {}
        }
        if let Some(previous) = self.entries.insert(key, Entry { trigger, cancel }) {
            previous.cancel.cancel();
        }
    }

    async fn push(&self, trigger: &Trigger, req: JobRequest) {
        let Some(broker) = self.broker.get() else {
            return;
        };
        match broker.push_job(trigger.prefix(), req).await {
            Ok(job) => debug!(trigger_id = %trigger.id(), job_id = %job.id, "Trigger fired"),
            Err(err) => {
                error!(trigger_id = %trigger.id(), prefix = %trigger.prefix(), error = %err, "Cannot push job of trigger")
            }
        }
    }

    /// Drop a trigger that will never fire again.
    async fn forget(&self, trigger: &Trigger) {
        self.entries
            .remove(&trigger.prefix().scoped(trigger.id()));
        match self.triggers.delete(trigger.infos()).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(trigger_id = %trigger.id(), error = %err, "Cannot delete fired trigger"),
        }
    }

    async fn run_timed(self: Arc<Self>, trigger: Trigger, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let Some(next) = trigger.next_execution(now) else {
                break;
            };
            if let TriggerKind::At(at) = trigger.kind() {
                if at.is_expired(now) {
                    warn!(trigger_id = %trigger.id(), at = %at.at(), "Dropping expired trigger");
                    self.forget(&trigger).await;
                    break;
                }
            }
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.push(&trigger, trigger.job_request()).await;
            if trigger.is_one_shot() {
                self.forget(&trigger).await;
                break;
            }
        }
    }

    async fn run_event(
        self: Arc<Self>,
        trigger: Trigger,
        mut subscriber: Box<dyn Subscriber>,
        cancel: CancellationToken,
    ) {
        let TriggerKind::Event(rules) = trigger.kind() else {
            return;
        };

        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        self.tracker
            .spawn(Arc::clone(&self).debounce(trigger.clone(), rx));

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscriber.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            if rules.matches(self.store.as_ref(), &event).await && tx.send(event).await.is_err() {
                break;
            }
        }
        subscriber.close();
    }

    /// Forward matching events as jobs. With a debounce window, the first
    /// event of a window is kept and pushed when the window closes; later
    /// ones are dropped.
    async fn debounce(self: Arc<Self>, trigger: Trigger, mut rx: mpsc::Receiver<Event>) {
        let Some(window) = trigger.debounce() else {
            while let Some(event) = rx.recv().await {
                self.push_event(&trigger, &event, false).await;
            }
            return;
        };

        let mut pending: Option<(Event, Instant)> = None;
        loop {
            let deadline = pending.as_ref().map(|(_, deadline)| *deadline);
            let received = match deadline {
                Some(deadline) => tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        if let Some((event, _)) = pending.take() {
                            self.push_event(&trigger, &event, true).await;
                        }
                        continue;
                    }
                    received = rx.recv() => received,
                },
                None => rx.recv().await,
            };
            match received {
                Some(event) => {
                    if pending.is_none() {
                        pending = Some((event, Instant::now() + window));
                    }
                }
                None => break,
            }
        }

        // Closed by shutdown: flush. Closed by deletion: drop.
        if let Some((event, _)) = pending {
            if self.stop.is_cancelled() {
                self.push_event(&trigger, &event, true).await;
            }
        }
    }

    async fn push_event(&self, trigger: &Trigger, event: &Event, debounced: bool) {
        match trigger.event_request(event) {
            Ok(mut req) => {
                req.debounced = debounced;
                self.push(trigger, req).await;
            }
            Err(err) => error!(trigger_id = %trigger.id(), error = %err, "Cannot attach event to job"),
        }
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn start_scheduler(&self, broker: Arc<dyn Broker>) -> JobResult<()> {
        if self.inner.broker.set(broker).is_err() {
            return Ok(());
        }
        let mut count = 0usize;
        for prefix in self.inner.triggers.prefixes().await? {
            for infos in self.inner.triggers.all(&prefix).await? {
                let id = infos.id.clone();
                match Trigger::new(infos) {
                    Ok(trigger) => {
                        self.inner.schedule(trigger);
                        count += 1;
                    }
                    Err(err) => warn!(prefix = %prefix, trigger_id = %id, error = %err, "Skipping invalid trigger"),
                }
            }
        }
        info!(triggers = count, "Memory scheduler started");
        Ok(())
    }

    async fn shutdown_scheduler(&self, deadline: Duration) -> JobResult<()> {
        self.inner.stop.cancel();
        self.inner.tracker.close();
        if tokio::time::timeout(deadline, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!("Memory scheduler did not stop before the deadline");
            return Err(JobError::ShutdownTimeout);
        }
        info!("Memory scheduler shut down");
        Ok(())
    }

    async fn add_trigger(&self, mut trigger: Trigger) -> JobResult<()> {
        self.inner.triggers.create(trigger.infos_mut()).await?;
        debug!(trigger_id = %trigger.id(), trigger_type = %trigger.trigger_type(), "Trigger added");
        if self.inner.broker.get().is_some() && !self.inner.stop.is_cancelled() {
            self.inner.schedule(trigger);
        }
        Ok(())
    }

    async fn get_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<Trigger> {
        if let Some(entry) = self.inner.entries.get(&prefix.scoped(trigger_id)) {
            return Ok(entry.trigger.clone());
        }
        load_trigger(self.inner.triggers.get(prefix, trigger_id).await, trigger_id)
    }

    async fn delete_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<()> {
        let infos = match self.inner.triggers.get(prefix, trigger_id).await {
            Ok(infos) => infos,
            Err(err) if err.is_not_found() => {
                return Err(JobError::NotFoundTrigger(trigger_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if let Some((_, entry)) = self.inner.entries.remove(&prefix.scoped(trigger_id)) {
            entry.cancel.cancel();
        }
        self.inner.triggers.delete(&infos).await?;
        Ok(())
    }

    async fn get_all_triggers(&self, prefix: &Prefix) -> JobResult<Vec<Trigger>> {
        let mut triggers = Vec::new();
        for infos in self.inner.triggers.all(prefix).await? {
            if let Some(entry) = self.inner.entries.get(&prefix.scoped(&infos.id)) {
                triggers.push(entry.trigger.clone());
                continue;
            }
            match Trigger::new(infos) {
                Ok(trigger) => triggers.push(trigger),
                Err(err) => warn!(prefix = %prefix, error = %err, "Skipping invalid trigger"),
            }
        }
        Ok(triggers)
    }
}

#[cfg(test)]
mod tests {
    use jobhub_database::{JobRepository, MemoryStore};
    use jobhub_entity::trigger::TriggerInfos;
    use jobhub_realtime::MemoryHub;

    use super::*;
    use crate::broker::MemoryBroker;

    fn setup() -> (Arc<dyn DocumentStore>, MemoryScheduler, Arc<dyn Broker>) {
        let hub: Arc<dyn RealtimeHub> = Arc::new(MemoryHub::new(64));
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::with_hub(Arc::clone(&hub)));
        let scheduler = MemoryScheduler::new(Arc::clone(&store), hub);
        let broker: Arc<dyn Broker> =
            Arc::new(MemoryBroker::new(JobRepository::new(Arc::clone(&store)), None));
        (store, scheduler, broker)
    }

    #[tokio::test]
    async fn test_add_get_delete() {
        let (_store, scheduler, broker) = setup();
        scheduler.start_scheduler(broker).await.unwrap();
        let prefix = Prefix::from_db_prefix("alice");

        let trigger = Trigger::new(TriggerInfos::new(&prefix, "@every", "log", "1h")).unwrap();
        let id = trigger.id().to_string();
        scheduler.add_trigger(trigger).await.unwrap();

        assert_eq!(scheduler.get_trigger(&prefix, &id).await.unwrap().id(), id);
        assert_eq!(scheduler.get_all_triggers(&prefix).await.unwrap().len(), 1);

        scheduler.delete_trigger(&prefix, &id).await.unwrap();
        assert!(matches!(
            scheduler.get_trigger(&prefix, &id).await,
            Err(JobError::NotFoundTrigger(_))
        ));
        assert!(matches!(
            scheduler.delete_trigger(&prefix, &id).await,
            Err(JobError::NotFoundTrigger(_))
        ));
        scheduler.shutdown_scheduler(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_at_is_dropped_on_start() {
        let (store, scheduler, broker) = setup();
        let prefix = Prefix::from_db_prefix("alice");
        let mut infos = TriggerInfos::new(&prefix, "@at", "log", "2020-01-01T00:00:00Z");
        TriggerRepository::new(store).create(&mut infos).await.unwrap();

        scheduler.start_scheduler(broker).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.get_all_triggers(&prefix).await.unwrap().is_empty());
    }
}
