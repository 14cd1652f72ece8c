//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test data and in-memory
//! stand-ins for the Kubernetes API and the watch.

use crate::error::{ControllerError, StoreError};
use crate::metrics::ControllerMetrics;
use crate::reconciler::{ObjectKey, KEY_ANNOTATION, SOURCE_ANNOTATION};
use crate::refresh::RefreshContext;
use crate::store::ConfigMapStore;
use crate::subscription::{Event, EventKind, EventStream, Subscription};
use futures::stream::{self, StreamExt};
use http::{Request, Response};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::client::Body;
use kube::Client;
use source_client::SourceFetcher;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tower_test::mock;

/// Refresh interval used by tests that wait for ticks.
pub const TEST_INTERVAL: Duration = Duration::from_millis(50);

/// Helper to create a test ConfigMap with the given annotations
pub fn create_test_config_map(name: &str, namespace: &str, annotations: &[(&str, &str)]) -> ConfigMap {
    let annotations: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create a ConfigMap carrying both marker annotations
pub fn create_managed_config_map(name: &str, namespace: &str, source: &str, key: &str) -> ConfigMap {
    create_test_config_map(
        name,
        namespace,
        &[(SOURCE_ANNOTATION, source), (KEY_ANNOTATION, key)],
    )
}

pub fn object_key(name: &str, namespace: &str) -> ObjectKey {
    ObjectKey {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Builds a refresh context over the given collaborators with fresh metrics
pub fn create_test_context(
    store: Arc<MockConfigMapStore>,
    fetcher: Arc<dyn SourceFetcher>,
    interval: Duration,
) -> RefreshContext {
    RefreshContext {
        store,
        fetcher,
        metrics: ControllerMetrics::new().unwrap(),
        interval,
    }
}

/// Returns a non-conflict store error
pub fn api_error() -> StoreError {
    let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    StoreError::Api(kube::Error::SerdeError(decode))
}

/// One newline-delimited watch event line for a ConfigMap in `ns1`
pub fn watch_event_line(kind: &str, name: &str, version: &str) -> String {
    format!(
        r#"{{"type":"{kind}","object":{{"apiVersion":"v1","kind":"ConfigMap","metadata":{{"name":"{name}","namespace":"ns1","resourceVersion":"{version}"}}}}}}"#
    )
}

/// Answers API requests with `bodies` in order, recording each request URI.
/// Requests past the script are left pending.
pub fn scripted_api(bodies: Vec<String>) -> (Client, Arc<Mutex<Vec<String>>>) {
    let (service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
    let uris = Arc::new(Mutex::new(Vec::new()));
    let recorded = uris.clone();

    tokio::spawn(async move {
        let mut bodies = bodies.into_iter();
        let mut idle = Vec::new();
        while let Some((request, send)) = handle.next_request().await {
            recorded.lock().unwrap().push(request.uri().to_string());
            match bodies.next() {
                Some(body) => {
                    send.send_response(Response::builder().body(Body::from(body.into_bytes())).unwrap());
                }
                None => idle.push(send),
            }
        }
    });

    (Client::new(service, "ns1"), uris)
}

/// Waits until at least `count` requests were recorded, or `timeout` passes
pub async fn wait_for_requests(uris: &Mutex<Vec<String>>, count: usize, timeout: Duration) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let seen = uris.lock().unwrap().clone();
        if seen.len() >= count || tokio::time::Instant::now() >= deadline {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// In-memory ConfigMap store that records every replace
#[derive(Default)]
pub struct MockConfigMapStore {
    updates: Mutex<Vec<ConfigMap>>,
    failures: Mutex<VecDeque<StoreError>>,
}

impl MockConfigMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next replace fails with `error` instead of storing
    pub fn fail_next(&self, error: StoreError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Objects stored so far, in call order
    pub fn updates(&self) -> Vec<ConfigMap> {
        self.updates.lock().unwrap().clone()
    }

    /// Waits until at least `count` objects were stored, or `timeout` passes
    pub async fn wait_for_updates(&self, count: usize, timeout: Duration) -> Vec<ConfigMap> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let updates = self.updates();
            if updates.len() >= count || tokio::time::Instant::now() >= deadline {
                return updates;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait::async_trait]
impl ConfigMapStore for MockConfigMapStore {
    async fn replace(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut stored = config_map.clone();
        let version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        stored.metadata.resource_version = Some((version + 1).to_string());

        self.updates.lock().unwrap().push(config_map.clone());
        Ok(stored)
    }
}

/// Subscription fed from a channel that records what it reconciles
pub struct TestSubscription {
    name: String,
    events: Mutex<Option<mpsc::UnboundedReceiver<Event<ConfigMap>>>>,
    fail_subscribe: bool,
    panic_on: Option<String>,
    reconciled: Mutex<Vec<(String, EventKind)>>,
}

impl TestSubscription {
    /// Returns the subscription and the sender feeding its stream
    pub fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedSender<Event<ConfigMap>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Self {
            name: name.to_string(),
            events: Mutex::new(Some(receiver)),
            fail_subscribe: false,
            panic_on: None,
            reconciled: Mutex::new(Vec::new()),
        };
        (Arc::new(subscription), sender)
    }

    /// A subscription whose subscribe call is refused
    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            events: Mutex::new(None),
            fail_subscribe: true,
            panic_on: None,
            reconciled: Mutex::new(Vec::new()),
        })
    }

    /// A subscription that panics when reconciling the object named `name`
    pub fn panicking_on(name: &str, object: &str) -> (Arc<Self>, mpsc::UnboundedSender<Event<ConfigMap>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Self {
            name: name.to_string(),
            events: Mutex::new(Some(receiver)),
            fail_subscribe: false,
            panic_on: Some(object.to_string()),
            reconciled: Mutex::new(Vec::new()),
        };
        (Arc::new(subscription), sender)
    }

    /// Names and kinds reconciled so far, in order
    pub fn reconciled(&self) -> Vec<(String, EventKind)> {
        self.reconciled.lock().unwrap().clone()
    }

    /// Waits until at least `count` events were reconciled, or `timeout` passes
    pub async fn wait_for_reconciled(&self, count: usize, timeout: Duration) -> Vec<(String, EventKind)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let reconciled = self.reconciled();
            if reconciled.len() >= count || tokio::time::Instant::now() >= deadline {
                return reconciled;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait::async_trait]
impl Subscription for TestSubscription {
    type Object = ConfigMap;

    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> Result<EventStream<ConfigMap>, ControllerError> {
        if self.fail_subscribe {
            return Err(ControllerError::Watch(format!("{} refused", self.name)));
        }
        let receiver = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ControllerError::Watch(format!("{} already subscribed", self.name)))?;

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        })
        .boxed())
    }

    async fn reconcile(&self, object: ConfigMap, kind: EventKind) {
        let name = object.metadata.name.unwrap_or_default();
        if self.panic_on.as_deref() == Some(name.as_str()) {
            panic!("reconcile of {name} failed");
        }
        self.reconciled.lock().unwrap().push((name, kind));
    }
}
