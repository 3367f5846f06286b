//! Typed event buses connecting the session's actors.
//!
//! Each logical data stream (labeled arrays, raw slices, label inventories,
//! edit results) gets its own bus instance. Publishing fans the value out to
//! every subscriber's inbox; a subscriber that joins late is replayed the
//! last published value so it never starts from nothing.

/// Stable identity of an actor in the session registry.
///
/// Routing is a match on this enum, never a string lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActorId {
    View,
    Selection,
    Dispatcher,
    Track,
    Volume,
    Gateway,
    History,
}

impl ActorId {
    /// Name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            ActorId::View => "view",
            ActorId::Selection => "selection",
            ActorId::Dispatcher => "dispatcher",
            ActorId::Track => "track",
            ActorId::Volume => "volume",
            ActorId::Gateway => "gateway",
            ActorId::History => "history",
        }
    }
}

/// One-to-many publish/subscribe channel carrying values of one type.
///
/// The bus itself does no delivery; `publish` returns the (subscriber, value)
/// pairs for the session queue so all message dispatch stays in one place.
#[derive(Debug)]
pub struct EventBus<T: Clone> {
    name: &'static str,
    subscribers: Vec<ActorId>,
    last: Option<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Vec::new(),
            last: None,
        }
    }

    /// Add a subscriber.
    ///
    /// Returns the last published value so the late subscriber can catch up;
    /// the session enqueues it like any other delivery.
    pub fn subscribe(&mut self, actor: ActorId) -> Option<T> {
        if self.subscribers.contains(&actor) {
            log::warn!("{} bus: {} already subscribed", self.name, actor.name());
            return None;
        }
        self.subscribers.push(actor);
        log::debug!("{} bus: subscribed {}", self.name, actor.name());
        self.last.clone()
    }

    /// Publish a value, returning one delivery per subscriber in
    /// subscription order.
    pub fn publish(&mut self, value: T) -> Vec<(ActorId, T)> {
        let deliveries = self
            .subscribers
            .iter()
            .map(|&actor| (actor, value.clone()))
            .collect();
        self.last = Some(value);
        deliveries
    }

    /// The most recently published value, if any.
    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
