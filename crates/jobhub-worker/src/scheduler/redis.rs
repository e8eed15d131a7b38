//! Redis scheduler, shared by cooperating processes.
//!
//! Timed triggers live in two sorted sets scored by Unix time:
//!
//! - `triggers`: members `"<prefix>/<triggerID>"` waiting for their time;
//! - `scheduling`: members claimed by a poller and not yet rescheduled.
//!
//! A Lua script claims one due member atomically. A claim left in
//! `scheduling` for more than ten seconds belongs to a crashed poller and
//! is claimed again, so every firing happens at least once.
//!
//! Event triggers are not polled: each process watches the realtime
//! firehose. A debounced event trigger is put in `triggers` at
//! `now + debounce` (`ZADD NX` keeps the first window) and recorded in the
//! hash `events-<prefix>`; the claim of that entry is the debounce echo.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{AsyncCommands, Script};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use jobhub_core::events::{Event, Verb};
use jobhub_core::traits::{DocumentStore, RealtimeHub};
use jobhub_core::Prefix;
use jobhub_database::TriggerRepository;
use jobhub_entity::doctypes;
use jobhub_entity::job::JobRequest;
use jobhub_entity::trigger::TriggerInfos;

use super::{Scheduler, load_trigger};
use crate::broker::Broker;
use crate::error::{JobError, JobResult};
use crate::redis::RedisClient;
use crate::trigger::{Trigger, TriggerKind};

/// Sorted set of timed members waiting for their next firing.
pub const TRIGGERS_KEY: &str = "triggers";
/// Sorted set of members claimed by a poller, scored by claim time.
pub const SCHEDULING_KEY: &str = "scheduling";

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const DISPATCH_BUFFER: usize = 64;

/// Claim one due member. `KEYS[1]` is `triggers`, `KEYS[2]` is
/// `scheduling`, `ARGV[1]` is the current Unix time. Returns
/// `{member, score}` or an empty array.
///
/// A claimed member is scored with the claim time in `scheduling`, so its
/// lease lasts 10 seconds however late the firing was.
const CLAIM_SCRIPT: &str = r"
local w = tonumber(ARGV[1]) - 10
local s = redis.call('ZRANGEBYSCORE', KEYS[2], 0, w, 'WITHSCORES', 'LIMIT', 0, 1)
if #s > 0 then
  redis.call('ZADD', KEYS[2], ARGV[1], s[1])
  return s
end
local t = redis.call('ZRANGEBYSCORE', KEYS[1], 0, ARGV[1], 'WITHSCORES', 'LIMIT', 0, 1)
if #t > 0 then
  redis.call('ZREM', KEYS[1], t[1])
  redis.call('ZADD', KEYS[2], ARGV[1], t[1])
end
return t
";

/// Hash of the pending debounce echoes of a tenant.
pub fn events_key(prefix: &Prefix) -> String {
    format!("events-{}", prefix.db_prefix())
}

/// Scheduler shared by every process connected to the same Redis.
#[derive(Debug)]
pub struct RedisScheduler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: RedisClient,
    store: Arc<dyn DocumentStore>,
    hub: Arc<dyn RealtimeHub>,
    triggers: TriggerRepository,
    broker: OnceLock<Arc<dyn Broker>>,
    claim: Script,
    /// Event triggers by tenant, then by id.
    events: DashMap<String, HashMap<String, Trigger>>,
    dispatchers: usize,
    tracker: TaskTracker,
    stop: CancellationToken,
}

impl RedisScheduler {
    /// Create a scheduler fanning realtime events out to `dispatchers`
    /// loops.
    pub fn new(
        client: RedisClient,
        store: Arc<dyn DocumentStore>,
        hub: Arc<dyn RealtimeHub>,
        dispatchers: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                triggers: TriggerRepository::new(Arc::clone(&store)),
                store,
                hub,
                broker: OnceLock::new(),
                claim: Script::new(CLAIM_SCRIPT),
                events: DashMap::new(),
                dispatchers: dispatchers.max(1),
                tracker: TaskTracker::new(),
                stop: CancellationToken::new(),
            }),
        }
    }
}

/// Errors worth claiming the entry again for.
fn is_transient(err: &JobError) -> bool {
    matches!(err, JobError::Redis(_) | JobError::App(_))
}

fn dispatcher_index(prefix: &Prefix, dispatchers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    prefix.db_prefix().hash(&mut hasher);
    (hasher.finish() % dispatchers as u64) as usize
}

impl Inner {
    fn cache_event_trigger(&self, trigger: Trigger) {
        self.events
            .entry(trigger.prefix().db_prefix().to_string())
            .or_default()
            .insert(trigger.id().to_string(), trigger);
    }

    fn uncache_event_trigger(&self, prefix: &Prefix, trigger_id: &str) {
        if let Some(mut triggers) = self.events.get_mut(prefix.db_prefix()) {
            triggers.remove(trigger_id);
        }
    }

    async fn schedule(&self, trigger: &Trigger, now: DateTime<Utc>) -> JobResult<()> {
        if let TriggerKind::Event(_) = trigger.kind() {
            self.cache_event_trigger(trigger.clone());
            return Ok(());
        }
        let Some(next) = trigger.next_execution(now) else {
            return Ok(());
        };
        let member = trigger.prefix().scoped(trigger.id());
        let mut conn = self.client.conn_mut();
        let _: () = conn.zadd(TRIGGERS_KEY, &member, next.timestamp()).await?;
        debug!(trigger_id = %trigger.id(), next = %next, "Trigger scheduled");
        Ok(())
    }

    async fn lookup(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<Trigger> {
        if let Some(trigger) = self
            .events
            .get(prefix.db_prefix())
            .and_then(|triggers| triggers.get(trigger_id).cloned())
        {
            return Ok(trigger);
        }
        load_trigger(self.triggers.get(prefix, trigger_id).await, trigger_id)
    }

    async fn push(&self, trigger: &Trigger, req: JobRequest) -> JobResult<()> {
        let Some(broker) = self.broker.get() else {
            return Err(JobError::Closed);
        };
        match broker.push_job(trigger.prefix(), req).await {
            Ok(job) => {
                debug!(trigger_id = %trigger.id(), job_id = %job.id, "Trigger fired");
                Ok(())
            }
            Err(err) if is_transient(&err) => Err(err),
            Err(err) => {
                error!(trigger_id = %trigger.id(), error = %err, "Cannot push job of trigger");
                Ok(())
            }
        }
    }

    async fn delete(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<()> {
        let infos = match self.triggers.get(prefix, trigger_id).await {
            Ok(infos) => Some(infos),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        let member = prefix.scoped(trigger_id);
        let mut conn = self.client.conn_mut();
        let _: () = redis::pipe()
            .atomic()
            .zrem(TRIGGERS_KEY, &member)
            .ignore()
            .zrem(SCHEDULING_KEY, &member)
            .ignore()
            .hdel(events_key(prefix), trigger_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        self.uncache_event_trigger(prefix, trigger_id);

        let Some(infos) = infos else {
            return Err(JobError::NotFoundTrigger(trigger_id.to_string()));
        };
        match self.triggers.delete(&infos).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Claim and fire every due member.
    async fn poll(&self, now: DateTime<Utc>) -> JobResult<()> {
        let mut conn = self.client.conn_mut();
        loop {
            let claimed: Vec<String> = self
                .claim
                .key(TRIGGERS_KEY)
                .key(SCHEDULING_KEY)
                .arg(now.timestamp())
                .invoke_async(&mut conn)
                .await?;
            let Some(member) = claimed.into_iter().next() else {
                return Ok(());
            };
            if let Err(err) = self.fire(&member, now).await {
                // Left in `scheduling`: reclaimed once stale.
                warn!(member = %member, error = %err, "Cannot fire claimed trigger");
                return Err(err);
            }
        }
    }

    async fn fire(&self, member: &str, now: DateTime<Utc>) -> JobResult<()> {
        let mut conn = self.client.conn_mut();
        let Some((prefix, trigger_id)) = member.split_once('/') else {
            warn!(member, "Malformed scheduling member");
            let _: () = conn.zrem(SCHEDULING_KEY, member).await?;
            return Ok(());
        };
        let prefix = Prefix::from_db_prefix(prefix);

        let trigger = match self.lookup(&prefix, trigger_id).await {
            Ok(trigger) => trigger,
            Err(err @ (JobError::NotFoundTrigger(_)
            | JobError::UnknownTrigger(_)
            | JobError::MalformedTrigger(_))) => {
                warn!(member, error = %err, "Dropping unusable trigger");
                let _: () = conn.zrem(SCHEDULING_KEY, member).await?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match trigger.kind() {
            TriggerKind::At(at) => {
                if at.is_expired(now) {
                    warn!(trigger_id, at = %at.at(), "Dropping expired trigger");
                } else {
                    self.push(&trigger, trigger.job_request()).await?;
                }
                match self.delete(&prefix, trigger_id).await {
                    Ok(()) | Err(JobError::NotFoundTrigger(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            TriggerKind::Cron(_) | TriggerKind::Every(_) => {
                self.push(&trigger, trigger.job_request()).await?;
                let mut pipe = redis::pipe();
                pipe.atomic().zrem(SCHEDULING_KEY, member).ignore();
                if let Some(next) = trigger.next_execution(now) {
                    pipe.zadd(TRIGGERS_KEY, member, next.timestamp()).ignore();
                }
                let _: () = pipe.query_async(&mut conn).await?;
            }
            TriggerKind::Event(_) => {
                let key = events_key(&prefix);
                let pending: Option<String> = conn.hget(&key, trigger_id).await?;
                if pending.is_some() {
                    let mut req = trigger.job_request();
                    req.debounced = true;
                    self.push(&trigger, req).await?;
                }
                let _: () = redis::pipe()
                    .atomic()
                    .hdel(&key, trigger_id)
                    .ignore()
                    .zrem(SCHEDULING_KEY, member)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
            }
            TriggerKind::Webhook(_) | TriggerKind::Client => {
                let _: () = conn.zrem(SCHEDULING_KEY, member).await?;
            }
        }
        Ok(())
    }

    /// Route firehose events to dispatchers, one dispatcher per tenant.
    async fn read_firehose(self: Arc<Self>, senders: Vec<mpsc::Sender<Event>>) {
        let mut firehose = self.hub.firehose();
        loop {
            let event = tokio::select! {
                _ = self.stop.cancelled() => break,
                event = firehose.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            let index = dispatcher_index(&event.prefix, senders.len());
            if senders[index].send(event).await.is_err() {
                break;
            }
        }
        firehose.close();
    }

    async fn dispatch(self: Arc<Self>, mut rx: mpsc::Receiver<Event>) {
        loop {
            let event = tokio::select! {
                _ = self.stop.cancelled() => break,
                event = rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            if event.doc.doctype == doctypes::TRIGGERS {
                self.refresh_cache(&event);
            }
            let triggers: Vec<Trigger> = self
                .events
                .get(event.prefix.db_prefix())
                .map(|triggers| triggers.values().cloned().collect())
                .unwrap_or_default();
            for trigger in triggers {
                let TriggerKind::Event(rules) = trigger.kind() else {
                    continue;
                };
                if !rules.matches(self.store.as_ref(), &event).await {
                    continue;
                }
                if let Err(err) = self.fire_event(&trigger, &event).await {
                    error!(trigger_id = %trigger.id(), error = %err, "Cannot fire event trigger");
                }
            }
        }
    }

    /// Keep the event-trigger cache in line with trigger documents written
    /// by any process.
    fn refresh_cache(&self, event: &Event) {
        if event.verb == Verb::Deleted {
            self.uncache_event_trigger(&event.prefix, &event.doc.id);
            return;
        }
        let mut infos = match TriggerInfos::from_doc(event.doc.clone()) {
            Ok(infos) => infos,
            Err(err) => {
                warn!(trigger_id = %event.doc.id, error = %err, "Cannot decode trigger document");
                return;
            }
        };
        infos.prefix = event.prefix.clone();
        match Trigger::new(infos) {
            Ok(trigger) if matches!(trigger.kind(), TriggerKind::Event(_)) => {
                self.cache_event_trigger(trigger);
            }
            Ok(_) => {}
            Err(err) => warn!(trigger_id = %event.doc.id, error = %err, "Invalid trigger document"),
        }
    }

    async fn fire_event(&self, trigger: &Trigger, event: &Event) -> JobResult<()> {
        let Some(window) = trigger.debounce() else {
            return self.push(trigger, trigger.event_request(event)?).await;
        };
        let at = Utc::now() + chrono::Duration::from_std(window).unwrap_or_default();
        let member = trigger.prefix().scoped(trigger.id());
        let mut conn = self.client.conn_mut();
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(TRIGGERS_KEY)
            .arg("NX")
            .arg(at.timestamp())
            .arg(&member)
            .ignore()
            .hset(events_key(trigger.prefix()), trigger.id(), &trigger.infos().arguments)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn load_event_triggers(&self) -> JobResult<usize> {
        let mut count = 0;
        for prefix in self.triggers.prefixes().await? {
            for infos in self.triggers.all(&prefix).await? {
                if infos.trigger_type != "@event" {
                    continue;
                }
                let id = infos.id.clone();
                match Trigger::new(infos) {
                    Ok(trigger) => {
                        self.cache_event_trigger(trigger);
                        count += 1;
                    }
                    Err(err) => warn!(prefix = %prefix, trigger_id = %id, error = %err, "Skipping invalid trigger"),
                }
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl Scheduler for RedisScheduler {
    async fn start_scheduler(&self, broker: Arc<dyn Broker>) -> JobResult<()> {
        if self.inner.broker.set(broker).is_err() {
            return Ok(());
        }
        let events = self.inner.load_event_triggers().await?;

        let mut senders = Vec::with_capacity(self.inner.dispatchers);
        for _ in 0..self.inner.dispatchers {
            let (tx, rx) = mpsc::channel(DISPATCH_BUFFER);
            senders.push(tx);
            self.inner.tracker.spawn(Arc::clone(&self.inner).dispatch(rx));
        }
        self.inner
            .tracker
            .spawn(Arc::clone(&self.inner).read_firehose(senders));

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = inner.stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(err) = inner.poll(Utc::now()).await {
                    warn!(error = %err, "Scheduler poll failed");
                }
            }
        });

        info!(
            event_triggers = events,
            dispatchers = self.inner.dispatchers,
            "Redis scheduler started"
        );
        Ok(())
    }

    async fn shutdown_scheduler(&self, deadline: Duration) -> JobResult<()> {
        self.inner.stop.cancel();
        self.inner.tracker.close();
        if tokio::time::timeout(deadline, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!("Redis scheduler did not stop before the deadline");
            return Err(JobError::ShutdownTimeout);
        }
        info!("Redis scheduler shut down");
        Ok(())
    }

    async fn poll_scheduler(&self, now: DateTime<Utc>) -> JobResult<()> {
        self.inner.poll(now).await
    }

    async fn add_trigger(&self, mut trigger: Trigger) -> JobResult<()> {
        self.inner.triggers.create(trigger.infos_mut()).await?;
        self.inner.schedule(&trigger, Utc::now()).await
    }

    async fn get_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<Trigger> {
        self.inner.lookup(prefix, trigger_id).await
    }

    async fn delete_trigger(&self, prefix: &Prefix, trigger_id: &str) -> JobResult<()> {
        self.inner.delete(prefix, trigger_id).await
    }

    async fn get_all_triggers(&self, prefix: &Prefix) -> JobResult<Vec<Trigger>> {
        let mut triggers = Vec::new();
        for infos in self.inner.triggers.all(prefix).await? {
            match Trigger::new(infos) {
                Ok(trigger) => triggers.push(trigger),
                Err(err) => warn!(prefix = %prefix, error = %err, "Skipping invalid trigger"),
            }
        }
        Ok(triggers)
    }

    async fn clean_redis(&self) -> JobResult<()> {
        let mut keys = vec![TRIGGERS_KEY.to_string(), SCHEDULING_KEY.to_string()];
        for prefix in self.inner.triggers.prefixes().await? {
            keys.push(events_key(&prefix));
        }
        let mut conn = self.inner.client.conn_mut();
        let _: () = conn.del(&keys).await?;
        info!(keys = keys.len(), "Redis scheduling data cleaned");
        Ok(())
    }

    async fn rebuild_redis(&self) -> JobResult<()> {
        self.clean_redis().await?;
        let now = Utc::now();
        let mut count = 0usize;
        for prefix in self.inner.triggers.prefixes().await? {
            for infos in self.inner.triggers.all(&prefix).await? {
                let id = infos.id.clone();
                match Trigger::new(infos) {
                    Ok(trigger) if trigger.is_timed() => {
                        self.inner.schedule(&trigger, now).await?;
                        count += 1;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(prefix = %prefix, trigger_id = %id, error = %err, "Skipping invalid trigger"),
                }
            }
        }
        info!(triggers = count, "Redis scheduling data rebuilt");
        Ok(())
    }
}
