//! Realtime hub trait.

use async_trait::async_trait;

use crate::events::{Doc, Event, Verb};
use crate::types::prefixer::Prefix;

/// Publish/subscribe bus for document changes.
pub trait RealtimeHub: Send + Sync + std::fmt::Debug + 'static {
    /// Announce a change to every matching subscriber.
    fn publish(&self, prefix: &Prefix, verb: Verb, doc: Doc, old_doc: Option<Doc>);

    /// Subscriber scoped to one tenant. It receives nothing until it
    /// subscribes to at least one doctype.
    fn subscriber(&self, prefix: &Prefix) -> Box<dyn Subscriber>;

    /// Subscriber receiving the events of every tenant and every doctype.
    fn firehose(&self) -> Box<dyn Subscriber>;
}

/// Receiving side of a subscription.
#[async_trait]
pub trait Subscriber: Send + 'static {
    /// Start receiving events of a doctype.
    fn subscribe(&mut self, doctype: &str);

    /// Stop receiving events of a doctype.
    fn unsubscribe(&mut self, doctype: &str);

    /// Next matching event, or `None` once the subscriber or the hub is closed.
    async fn recv(&mut self) -> Option<Event>;

    /// Close the subscription. Pending and future `recv` calls return `None`.
    fn close(&mut self);
}
