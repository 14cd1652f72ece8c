//! Event source and reconcile contract.
//!
//! A [`Subscription`] binds one watched resource kind to the code that
//! reconciles it. The dispatch loop only sees this trait.

use crate::error::ControllerError;
use futures::stream::BoxStream;
use std::fmt;

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
            Self::Error => "Error",
        };
        f.write_str(kind)
    }
}

/// A single change notification from an event source.
#[derive(Debug)]
pub enum Event<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Watch-level error or an undecodable payload; never reconciled
    Error(ControllerError),
}

impl<K> Event<K> {
    /// Returns the event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added(_) => EventKind::Added,
            Self::Modified(_) => EventKind::Modified,
            Self::Deleted(_) => EventKind::Deleted,
            Self::Error(_) => EventKind::Error,
        }
    }

    /// Splits the event into its object and kind, or returns the error it carries.
    pub fn into_parts(self) -> Result<(K, EventKind), ControllerError> {
        match self {
            Self::Added(object) => Ok((object, EventKind::Added)),
            Self::Modified(object) => Ok((object, EventKind::Modified)),
            Self::Deleted(object) => Ok((object, EventKind::Deleted)),
            Self::Error(error) => Err(error),
        }
    }
}

/// A lazy sequence of events, ending only on cancellation.
pub type EventStream<K> = BoxStream<'static, Event<K>>;

/// One watched resource kind plus its reconciler.
#[async_trait::async_trait]
pub trait Subscription: Send + Sync + 'static {
    /// The watched object type.
    type Object: Send + 'static;

    /// Human readable name used in logs, e.g. `ConfigMap/default`.
    fn name(&self) -> &str;

    /// Opens the watch. Fails fast if the backing store refuses it.
    async fn subscribe(&self) -> Result<EventStream<Self::Object>, ControllerError>;

    /// Reacts to one event. Failures are logged, never returned.
    async fn reconcile(&self, object: Self::Object, kind: EventKind);
}
