//! In-memory pub/sub for single-node deployments.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use jobhub_core::events::{Doc, Event, Verb};
use jobhub_core::traits::{RealtimeHub, Subscriber};
use jobhub_core::Prefix;

/// In-memory realtime hub.
///
/// All events go through one broadcast channel; each subscriber filters
/// locally on tenant and doctype.
#[derive(Debug)]
pub struct MemoryHub {
    tx: broadcast::Sender<Arc<Event>>,
}

impl MemoryHub {
    /// Create a hub whose channel buffers `buffer_size` events per subscriber.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    fn make_subscriber(&self, prefix: Option<String>) -> MemorySubscriber {
        MemorySubscriber {
            rx: Some(self.tx.subscribe()),
            prefix,
            doctypes: HashSet::new(),
        }
    }
}

impl RealtimeHub for MemoryHub {
    fn publish(&self, prefix: &Prefix, verb: Verb, doc: Doc, old_doc: Option<Doc>) {
        let event = Event {
            prefix: prefix.clone(),
            verb,
            doc,
            old_doc,
        };
        // No receiver is not an error.
        let _ = self.tx.send(Arc::new(event));
    }

    fn subscriber(&self, prefix: &Prefix) -> Box<dyn Subscriber> {
        Box::new(self.make_subscriber(Some(prefix.prefix.clone())))
    }

    fn firehose(&self) -> Box<dyn Subscriber> {
        Box::new(self.make_subscriber(None))
    }
}

/// A subscription on a [`MemoryHub`].
///
/// A tenant subscriber only delivers the doctypes it subscribed to. The
/// firehose delivers everything unless narrowed by [`Subscriber::subscribe`].
#[derive(Debug)]
pub struct MemorySubscriber {
    rx: Option<broadcast::Receiver<Arc<Event>>>,
    prefix: Option<String>,
    doctypes: HashSet<String>,
}

impl MemorySubscriber {
    fn wants(&self, event: &Event) -> bool {
        match &self.prefix {
            Some(prefix) => {
                event.prefix.prefix == *prefix && self.doctypes.contains(&event.doc.doctype)
            }
            None => self.doctypes.is_empty() || self.doctypes.contains(&event.doc.doctype),
        }
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    fn subscribe(&mut self, doctype: &str) {
        self.doctypes.insert(doctype.to_string());
    }

    fn unsubscribe(&mut self, doctype: &str) {
        self.doctypes.remove(doctype);
    }

    async fn recv(&mut self) -> Option<Event> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => {
                    if self.wants(&event) {
                        return Some(Event::clone(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Realtime subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    fn close(&mut self) {
        self.rx = None;
        self.doctypes.clear();
    }
}
