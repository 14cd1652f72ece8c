//! Periodic refresh of one ConfigMap.
//!
//! A [`RefreshTask`] owns its local copy of the ConfigMap. On every tick it
//! fetches the source, writes the payload under the target key and replaces
//! the object in the store. A successful replace hands back the stored object,
//! whose resourceVersion is used for the next attempt. Failures are logged,
//! counted and retried on the next natural tick.

use crate::error::StoreError;
use crate::metrics::{ControllerMetrics, RefreshOutcome};
use crate::reconciler::{ObjectKey, RefreshTarget};
use crate::store::ConfigMapStore;
use k8s_openapi::api::core::v1::ConfigMap;
use source_client::SourceFetcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared collaborators of every refresh task.
#[derive(Clone)]
pub struct RefreshContext {
    pub store: Arc<dyn ConfigMapStore>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub metrics: ControllerMetrics,
    pub interval: Duration,
}

/// Background job keeping `data[target.key]` of one ConfigMap in sync with its source.
pub struct RefreshTask {
    key: ObjectKey,
    target: RefreshTarget,
    context: RefreshContext,
    cancel: CancellationToken,
    snapshots: watch::Receiver<ConfigMap>,
}

impl RefreshTask {
    /// Creates a task. `snapshots` carries the newest copy seen by the watch;
    /// its current value is the starting local copy.
    pub fn new(
        key: ObjectKey,
        target: RefreshTarget,
        context: RefreshContext,
        cancel: CancellationToken,
        snapshots: watch::Receiver<ConfigMap>,
    ) -> Self {
        Self {
            key,
            target,
            context,
            cancel,
            snapshots,
        }
    }

    /// Runs until the task's cancellation token fires.
    pub async fn run(mut self) {
        info!(
            "Refreshing ConfigMap {} key {:?} from {} every {:?}",
            self.key, self.target.key, self.target.source, self.context.interval
        );

        let mut local = self.snapshots.borrow_and_update().clone();
        let period = self.context.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // A newer copy from the watch wins over the one we hold
            if self.snapshots.has_changed().unwrap_or(false) {
                local = self.snapshots.borrow_and_update().clone();
            }

            match self.refresh_once(&local).await {
                Some(updated) => local = updated,
                None if self.cancel.is_cancelled() => break,
                None => {}
            }
        }

        debug!("Refresh task for ConfigMap {} stopped", self.key);
    }

    /// Performs one fetch-and-update cycle. Returns the stored object on success.
    async fn refresh_once(&self, local: &ConfigMap) -> Option<ConfigMap> {
        info!("Updating ConfigMap {}", self.key);

        let fetched = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            fetched = self.context.fetcher.fetch(&self.target.source) => fetched,
        };
        let payload = match fetched {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "Failed to fetch {} for ConfigMap {} ({}): {}",
                    self.target.source,
                    self.key,
                    e.kind().as_str(),
                    e
                );
                self.record(RefreshOutcome::FetchError);
                return None;
            }
        };

        let mut updated = local.clone();
        updated
            .data
            .get_or_insert_with(Default::default)
            .insert(self.target.key.clone(), String::from_utf8_lossy(&payload).into_owned());

        if self.cancel.is_cancelled() {
            return None;
        }

        match self.context.store.replace(&updated).await {
            Ok(stored) => {
                self.record(RefreshOutcome::Updated);
                Some(stored)
            }
            Err(StoreError::Conflict(e)) => {
                warn!("Stale resourceVersion for ConfigMap {}, retrying next tick: {}", self.key, e);
                self.record(RefreshOutcome::Conflict);
                None
            }
            Err(e) => {
                error!("Error updating ConfigMap {}: {}", self.key, e);
                self.record(RefreshOutcome::UpdateError);
                None
            }
        }
    }

    fn record(&self, outcome: RefreshOutcome) {
        self.context
            .metrics
            .record_refresh(&self.key.name, &self.key.namespace, outcome);
    }
}
