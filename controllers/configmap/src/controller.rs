//! Main controller implementation.
//!
//! [`run_loop`] is the dispatch loop: it opens every subscription, then runs
//! one worker per subscription that forwards events to the subscription's
//! reconciler until shutdown. [`Controller`] wires the ConfigMap subscription
//! to the Kubernetes API and the source fetcher.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;
use crate::reconciler::ConfigMapReconciler;
use crate::refresh::RefreshContext;
use crate::store::KubeConfigMapStore;
use crate::subscription::{EventStream, Subscription};
use crate::watcher::{ConfigMapSubscription, WatchSource};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use source_client::SourceClient;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Opens every subscription and dispatches their events until `cancel` fires.
///
/// All subscriptions are opened before any event is dispatched; the first
/// one that fails aborts the loop. Error events are logged and dropped.
/// Returns once every worker has exited.
pub async fn run_loop<S>(
    cancel: CancellationToken,
    subscriptions: Vec<Arc<S>>,
) -> Result<(), ControllerError>
where
    S: Subscription,
{
    let mut streams = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        let stream = subscription.subscribe().await.map_err(|e| {
            error!("Failed to subscribe to {}: {}", subscription.name(), e);
            e
        })?;
        info!("Subscribed to {}", subscription.name());
        streams.push((subscription, stream));
    }

    let mut workers = JoinSet::new();
    for (subscription, stream) in streams {
        workers.spawn(dispatch(subscription, stream, cancel.child_token()));
    }

    let mut panicked = Vec::new();
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!("Dispatch worker panicked: {}", e);
            panicked.push(e.to_string());
        }
    }

    if panicked.is_empty() {
        info!("Dispatch loop stopped");
        Ok(())
    } else {
        Err(ControllerError::Watch(format!(
            "dispatch worker panicked: {}",
            panicked.join("; ")
        )))
    }
}

/// Forwards events of one subscription to its reconciler, one at a time.
async fn dispatch<S>(subscription: Arc<S>, mut stream: EventStream<S::Object>, cancel: CancellationToken)
where
    S: Subscription,
{
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = stream.next() => event,
        };
        let Some(event) = event else {
            debug!("Event stream of {} ended", subscription.name());
            break;
        };
        debug!("{} event from {}", event.kind(), subscription.name());

        match event.into_parts() {
            Ok((object, kind)) => subscription.reconcile(object, kind).await,
            Err(e) => warn!("Dropping error event from {}: {}", subscription.name(), e),
        }
    }
    debug!("Dispatch worker for {} stopped", subscription.name());
}

/// ConfigMap refresh controller.
pub struct Controller {
    cancel: CancellationToken,
    reconciler: Arc<ConfigMapReconciler>,
    subscription: Arc<ConfigMapSubscription>,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Nothing talks to the API server until [`Controller::run`].
    pub fn new(
        client: Client,
        config: &ControllerConfig,
        metrics: &ControllerMetrics,
        cancel: CancellationToken,
    ) -> Result<Self, ControllerError> {
        info!("Initializing ConfigMap controller for namespace {}", config.namespace);

        let fetcher = SourceClient::new()
            .map_err(|e| ControllerError::InvalidConfig(format!("HTTP client: {e}")))?
            .with_metrics(metrics.fetch.clone());
        let context = RefreshContext {
            store: Arc::new(KubeConfigMapStore::new(client.clone())),
            fetcher: Arc::new(fetcher),
            metrics: metrics.clone(),
            interval: config.refresh_interval,
        };
        let reconciler = Arc::new(ConfigMapReconciler::new(
            context,
            cancel.clone(),
            config.namespace.clone(),
        ));

        let api: Api<ConfigMap> = Api::namespaced(client, &config.namespace);
        let source = WatchSource::new(api, format!("ConfigMap/{}", config.namespace), cancel.clone());
        let subscription = Arc::new(ConfigMapSubscription::new(source, reconciler.clone()));

        Ok(Self::from_parts(cancel, reconciler, subscription))
    }

    /// Assembles a controller from an already wired reconciler and subscription.
    pub(crate) fn from_parts(
        cancel: CancellationToken,
        reconciler: Arc<ConfigMapReconciler>,
        subscription: Arc<ConfigMapSubscription>,
    ) -> Self {
        Self {
            cancel,
            reconciler,
            subscription,
        }
    }

    /// Runs the controller until shutdown, then waits for every refresh task.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("ConfigMap controller running");

        let result = run_loop(self.cancel.clone(), vec![self.subscription]).await;
        // Refresh tasks never outlive the dispatch loop
        self.cancel.cancel();
        self.reconciler.drain().await;
        result
    }
}
