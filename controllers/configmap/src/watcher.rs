//! Kubernetes resource watchers.
//!
//! [`WatchSource`] opens a namespaced watch and turns it into an
//! [`EventStream`]. The first watch is opened eagerly so that authorization
//! or connectivity problems fail the subscription instead of a worker.
//!
//! Afterwards the stream is supervised: when the API server closes the watch
//! (it does so routinely after its timeout) or the connection drops, the
//! watch is reopened from the last resourceVersion seen. Reopen attempts
//! are spaced with a Fibonacci backoff.
//!
//! A `410 Gone` means the history between the last version and now is lost,
//! so the stream relists instead. Every object in the list is replayed as
//! `Added`, and every object yielded earlier that is missing from the list is
//! reported as `Deleted` with its last seen state. The watch then resumes at
//! the list's resourceVersion.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::reconciler::ConfigMapReconciler;
use crate::subscription::{Event, EventKind, EventStream, Subscription};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ListParams, ObjectList, WatchEvent, WatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resource version that starts a watch with the current state replayed.
const INITIAL_VERSION: &str = "0";

type RawWatch<K> = BoxStream<'static, kube::Result<WatchEvent<K>>>;

/// Opens supervised watches for one resource kind in one namespace.
#[derive(Clone)]
pub struct WatchSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    api: Api<K>,
    name: String,
    cancel: CancellationToken,
    backoff: FibonacciBackoff,
}

impl<K> WatchSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Creates a source watching through `api`. `name` is used in logs.
    /// Reopening stops once `cancel` fires.
    pub fn new(api: Api<K>, name: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            api,
            name: name.into(),
            cancel,
            backoff: FibonacciBackoff::default(),
        }
    }

    /// Use `backoff` between reopen attempts.
    #[cfg(test)]
    #[must_use]
    pub fn with_backoff(mut self, backoff: FibonacciBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens the watch and returns the supervised event stream.
    pub async fn open(&self) -> Result<EventStream<K>, ControllerError> {
        info!("Starting {} watcher", self.name);

        let params = WatchParams::default();
        let raw = self
            .api
            .watch(&params, INITIAL_VERSION)
            .await
            .map_err(|error| ControllerError::Subscribe {
                source_name: self.name.clone(),
                error,
            })?
            .boxed();

        let state = WatchState {
            api: self.api.clone(),
            name: self.name.clone(),
            cancel: self.cancel.clone(),
            backoff: self.backoff.clone(),
            resource_version: INITIAL_VERSION.to_string(),
            raw: Some(raw),
            known: HashMap::new(),
            pending: VecDeque::new(),
            relist: false,
        };
        Ok(stream::unfold(state, WatchState::next_event).boxed())
    }
}

/// Unfold state of a supervised watch.
struct WatchState<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    api: Api<K>,
    name: String,
    cancel: CancellationToken,
    backoff: FibonacciBackoff,
    resource_version: String,
    raw: Option<RawWatch<K>>,
    /// Last seen state of every live object yielded so far, by identity
    known: HashMap<String, K>,
    /// Events produced by a relist, yielded before the watch is read again
    pending: VecDeque<Event<K>>,
    relist: bool,
}

impl<K> WatchState<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn next_event(mut self) -> Option<(Event<K>, Self)> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            if let Some(event) = self.pending.pop_front() {
                return Some((event, self));
            }

            if self.raw.is_none() {
                if !self.reopen().await {
                    return None;
                }
                continue;
            }
            let Some(raw) = self.raw.as_mut() else {
                continue;
            };

            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                next = raw.next() => next,
            };

            match next {
                Some(Ok(WatchEvent::Added(object))) => {
                    self.track(&object);
                    self.known.insert(identity(&object), object.clone());
                    return Some((Event::Added(object), self));
                }
                Some(Ok(WatchEvent::Modified(object))) => {
                    self.track(&object);
                    self.known.insert(identity(&object), object.clone());
                    return Some((Event::Modified(object), self));
                }
                Some(Ok(WatchEvent::Deleted(object))) => {
                    self.track(&object);
                    self.known.remove(&identity(&object));
                    return Some((Event::Deleted(object), self));
                }
                Some(Ok(WatchEvent::Bookmark(bookmark))) => {
                    self.resource_version = bookmark.metadata.resource_version;
                }
                Some(Ok(WatchEvent::Error(status))) => {
                    if status.code == 410 {
                        info!(
                            "{} watch expired at resourceVersion {}, relisting",
                            self.name, self.resource_version
                        );
                        self.relist = true;
                        self.raw = None;
                    }
                    let error = ControllerError::Watch(format!(
                        "{} watch error {}: {}",
                        self.name, status.code, status.message
                    ));
                    return Some((Event::Error(error), self));
                }
                Some(Err(kube::Error::SerdeError(e))) => {
                    let error = ControllerError::MalformedObject(format!(
                        "undecodable {} event: {}",
                        self.name, e
                    ));
                    return Some((Event::Error(error), self));
                }
                Some(Err(e)) => {
                    debug!("{} watch failed, reopening", self.name);
                    if matches!(e, kube::Error::Api(ref response) if response.code == 410) {
                        self.relist = true;
                    }
                    self.raw = None;
                    let error = ControllerError::Watch(format!("{} watch failed: {}", self.name, e));
                    return Some((Event::Error(error), self));
                }
                None => {
                    debug!("{} watch closed by the API server", self.name);
                    self.raw = None;
                }
            }
        }
    }

    /// Waits out the backoff, relists if the last version expired, and tries
    /// to reopen the watch. Returns `false` once cancelled.
    async fn reopen(&mut self) -> bool {
        let delay = self.backoff.next_backoff();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return false,
            () = tokio::time::sleep(delay) => {}
        }

        if self.relist {
            let params = ListParams::default();
            let listed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                listed = self.api.list(&params) => listed,
            };
            match listed {
                Ok(list) => self.resync(list),
                Err(e) => {
                    warn!("Failed to relist {}, retrying: {}", self.name, e);
                    return true;
                }
            }
        }

        let params = WatchParams::default();
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return false,
            opened = self.api.watch(&params, &self.resource_version) => opened,
        };
        match opened {
            Ok(raw) => {
                info!(
                    "Reopened {} watch at resourceVersion {}",
                    self.name, self.resource_version
                );
                self.raw = Some(raw.boxed());
                self.backoff.reset();
            }
            Err(e) => {
                warn!("Failed to reopen {} watch, retrying: {}", self.name, e);
            }
        }
        true
    }

    /// Replaces the known objects with `list` and queues the events that
    /// bring the consumer up to date with it.
    fn resync(&mut self, list: ObjectList<K>) {
        let listed: HashSet<String> = list.items.iter().map(identity).collect();
        let vanished: Vec<String> = self
            .known
            .keys()
            .filter(|id| !listed.contains(*id))
            .cloned()
            .collect();

        for id in vanished {
            if let Some(object) = self.known.remove(&id) {
                info!("{} {} was deleted while the watch was down", self.name, id);
                self.pending.push_back(Event::Deleted(object));
            }
        }
        for object in list.items {
            self.known.insert(identity(&object), object.clone());
            self.pending.push_back(Event::Added(object));
        }

        self.resource_version = list
            .metadata
            .resource_version
            .unwrap_or_else(|| INITIAL_VERSION.to_string());
        self.relist = false;
        debug!(
            "Relisted {}: {} object(s) at resourceVersion {}",
            self.name,
            self.known.len(),
            self.resource_version
        );
    }

    fn track(&mut self, object: &K) {
        if let Some(version) = object.resource_version() {
            self.resource_version = version;
        }
    }
}

fn identity<K: Resource>(object: &K) -> String {
    format!("{}/{}", object.namespace().unwrap_or_default(), object.name_any())
}

/// Watches ConfigMaps in one namespace and reconciles them.
pub struct ConfigMapSubscription {
    source: WatchSource<ConfigMap>,
    reconciler: Arc<ConfigMapReconciler>,
}

impl ConfigMapSubscription {
    /// Creates a subscription feeding `reconciler` from `source`.
    pub fn new(source: WatchSource<ConfigMap>, reconciler: Arc<ConfigMapReconciler>) -> Self {
        Self { source, reconciler }
    }
}

#[async_trait::async_trait]
impl Subscription for ConfigMapSubscription {
    type Object = ConfigMap;

    fn name(&self) -> &str {
        self.source.name()
    }

    async fn subscribe(&self) -> Result<EventStream<ConfigMap>, ControllerError> {
        self.source.open().await
    }

    async fn reconcile(&self, object: ConfigMap, kind: EventKind) {
        self.reconciler.reconcile(object, kind);
    }
}
