//! Subscription registry used to route inbound MESSAGE frames.
//!
//! Resolution order for an inbound frame:
//! 1. the `subscription` header, matched exactly against subscription ids
//!    (the most recently registered entry wins);
//! 2. the `destination` header, matched against the first *enabled*
//!    subscription registered for that destination.

use std::fmt;
use std::sync::Arc;

use crate::types::Headers;

/// Per-subscription message callback, invoked with the body and headers.
pub type MessageHandler = Arc<dyn Fn(&[u8], &Headers) + Send + Sync>;

/// One or more destinations for SUBSCRIBE / UNSUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    One(String),
    Many(Vec<String>),
}

impl Destination {
    /// The destinations in expansion order.
    pub fn as_slice(&self) -> &[String] {
        match self {
            Destination::One(d) => std::slice::from_ref(d),
            Destination::Many(ds) => ds,
        }
    }
}

impl From<&str> for Destination {
    fn from(d: &str) -> Self {
        Destination::One(d.to_string())
    }
}

impl From<String> for Destination {
    fn from(d: String) -> Self {
        Destination::One(d)
    }
}

impl From<Vec<String>> for Destination {
    fn from(ds: Vec<String>) -> Self {
        Destination::Many(ds)
    }
}

impl From<Vec<&str>> for Destination {
    fn from(ds: Vec<&str>) -> Self {
        Destination::Many(ds.into_iter().map(str::to_owned).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Destination {
    fn from(ds: [&str; N]) -> Self {
        Destination::Many(ds.iter().map(|d| d.to_string()).collect())
    }
}

/// An active (or disabled) subscription.
#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    pub enabled: bool,
    pub handler: Option<MessageHandler>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("enabled", &self.enabled)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new enabled subscription.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        destination: impl Into<String>,
        handler: Option<MessageHandler>,
    ) {
        self.entries.push(Subscription {
            id: id.into(),
            destination: destination.into(),
            enabled: true,
            handler,
        });
    }

    /// Disable the subscriptions registered under `id`. Returns how many
    /// entries changed.
    pub fn disable_id(&mut self, id: &str) -> usize {
        self.disable_where(|s| s.id == id)
    }

    /// Disable every subscription on `destination`.
    pub fn disable_destination(&mut self, destination: &str) -> usize {
        self.disable_where(|s| s.destination == destination)
    }

    fn disable_where(&mut self, matches: impl Fn(&Subscription) -> bool) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|s| s.enabled) {
            if matches(entry) {
                entry.enabled = false;
                changed += 1;
            }
        }
        changed
    }

    /// Forget the subscriptions registered under `ids`.
    pub fn remove_ids(&mut self, ids: &[&str]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|s| !ids.contains(&s.id.as_str()));
        before - self.entries.len()
    }

    /// Find the subscription an inbound MESSAGE belongs to.
    pub fn lookup(&self, headers: &Headers) -> Option<&Subscription> {
        if let Some(id) = headers.get("subscription") {
            if let Some(entry) = self.entries.iter().rev().find(|s| s.id == id) {
                return Some(entry);
            }
        }
        let destination = headers.get("destination")?;
        self.entries
            .iter()
            .find(|s| s.enabled && s.destination == destination)
    }

    /// First enabled subscription for a destination.
    pub fn enabled_for(&self, destination: &str) -> Option<&Subscription> {
        self.entries
            .iter()
            .find(|s| s.enabled && s.destination == destination)
    }

    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.entries.iter().rev().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
