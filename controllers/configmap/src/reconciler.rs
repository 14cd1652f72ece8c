//! Reconciliation logic for annotated ConfigMaps.
//!
//! A ConfigMap is managed when it carries both marker annotations:
//! - `configmap-operator-src`: URL or file path to fetch data from
//! - `configmap-operator-key`: key under `data` that receives the payload
//!
//! Every managed ConfigMap has exactly one [`RefreshTask`] in the registry.
//! Each registry entry owns a child of the process-wide cancellation token,
//! so a task stops either when its ConfigMap stops being managed or when the
//! process shuts down.
//!
//! Decision table:
//!
//! | Event              | Annotations | Registry state      | Action                         |
//! |--------------------|-------------|---------------------|--------------------------------|
//! | Added / Modified   | both        | unmanaged           | start task, gauge +1           |
//! | Added / Modified   | both        | managed, same       | hand snapshot to running task  |
//! | Added / Modified   | both        | managed, different  | restart task with new target   |
//! | Added / Modified   | missing     | managed             | stop task, gauge -1            |
//! | Deleted            | any         | managed             | stop task, gauge -1            |
//! | Added / Modified   | missing     | unmanaged           | ignored                        |
//! | Deleted            | any         | unmanaged           | ignored                        |

use crate::error::ControllerError;
use crate::refresh::{RefreshContext, RefreshTask};
use crate::subscription::EventKind;
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Annotation naming the source identifier (URL or file path).
pub const SOURCE_ANNOTATION: &str = "configmap-operator-src";
/// Annotation naming the data key to populate.
pub const KEY_ANNOTATION: &str = "configmap-operator-key";

/// Identity of a watched resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Reads the identity of `config_map`, falling back to `default_namespace`
    /// when the object carries none.
    pub fn from_config_map(
        config_map: &ConfigMap,
        default_namespace: &str,
    ) -> Result<Self, ControllerError> {
        let name = config_map
            .metadata
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ControllerError::MalformedObject("ConfigMap missing name".to_string()))?;
        let namespace = config_map
            .metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default_namespace);

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Where a managed ConfigMap gets its data from and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    /// Source identifier
    pub source: String,
    /// Data key
    pub key: String,
}

impl RefreshTarget {
    /// Returns the target when both marker annotations are present.
    pub fn from_annotations(config_map: &ConfigMap) -> Option<Self> {
        let annotations = config_map.metadata.annotations.as_ref()?;
        let source = annotations.get(SOURCE_ANNOTATION)?;
        let key = annotations.get(KEY_ANNOTATION)?;

        Some(Self {
            source: source.clone(),
            key: key.clone(),
        })
    }
}

/// Registry entry for one managed ConfigMap.
struct ManagedTask {
    target: RefreshTarget,
    cancel: CancellationToken,
    snapshots: watch::Sender<ConfigMap>,
    handle: JoinHandle<()>,
}

/// Reconciles ConfigMap events into refresh task lifecycles.
pub struct ConfigMapReconciler {
    context: RefreshContext,
    shutdown: CancellationToken,
    default_namespace: String,
    tasks: Mutex<HashMap<ObjectKey, ManagedTask>>,
}

impl ConfigMapReconciler {
    /// Creates a new reconciler instance.
    ///
    /// Tasks are cancelled when `shutdown` fires.
    pub fn new(context: RefreshContext, shutdown: CancellationToken, default_namespace: String) -> Self {
        Self {
            context,
            shutdown,
            default_namespace,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Reconciles one ConfigMap event. Errors are logged, never returned.
    pub fn reconcile(&self, config_map: ConfigMap, kind: EventKind) {
        let key = match ObjectKey::from_config_map(&config_map, &self.default_namespace) {
            Ok(key) => key,
            Err(e) => {
                error!("Skipping {} event: {}", kind, e);
                return;
            }
        };
        info!("ConfigMap event {} for {}", kind, key);

        match (kind, RefreshTarget::from_annotations(&config_map)) {
            (EventKind::Added | EventKind::Modified, Some(target)) => {
                self.manage(key, target, config_map);
            }
            (EventKind::Added | EventKind::Modified, None) => {
                self.release(&key, "marker annotations missing");
            }
            (EventKind::Deleted, _) => {
                self.release(&key, "ConfigMap deleted");
            }
            (EventKind::Error, _) => {
                warn!("Error event for {} reached the reconciler, ignoring", key);
            }
        }
    }

    fn manage(&self, key: ObjectKey, target: RefreshTarget, config_map: ConfigMap) {
        if self.shutdown.is_cancelled() {
            debug!("Shutting down, not managing ConfigMap {}", key);
            return;
        }

        let mut tasks = self.lock_tasks();
        if let Some(existing) = tasks.get(&key) {
            if existing.target == target {
                existing.snapshots.send_replace(config_map);
                debug!("ConfigMap {} already managed", key);
                return;
            }

            info!(
                "Retargeting ConfigMap {}: {:?} -> {:?}",
                key, existing.target, target
            );
            existing.cancel.cancel();
            let task = self.spawn_task(key.clone(), target, config_map);
            tasks.insert(key, task);
            return;
        }

        let task = self.spawn_task(key.clone(), target, config_map);
        tasks.insert(key.clone(), task);
        drop(tasks);

        self.context
            .metrics
            .managed
            .with_label_values(&[key.name.as_str(), key.namespace.as_str()])
            .inc();
    }

    fn release(&self, key: &ObjectKey, reason: &str) {
        let Some(task) = self.lock_tasks().remove(key) else {
            debug!("ConfigMap {} is not managed ({})", key, reason);
            return;
        };

        info!("Stopping refresh of ConfigMap {}: {}", key, reason);
        task.cancel.cancel();
        self.context
            .metrics
            .managed
            .with_label_values(&[key.name.as_str(), key.namespace.as_str()])
            .dec();
    }

    fn spawn_task(&self, key: ObjectKey, target: RefreshTarget, config_map: ConfigMap) -> ManagedTask {
        let cancel = self.shutdown.child_token();
        let (snapshots, receiver) = watch::channel(config_map);
        let task = RefreshTask::new(
            key,
            target.clone(),
            self.context.clone(),
            cancel.clone(),
            receiver,
        );

        ManagedTask {
            target,
            cancel,
            snapshots,
            handle: tokio::spawn(task.run()),
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<ObjectKey, ManagedTask>> {
        // Entries are never left half-written, so a poisoned map is still usable
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if `key` has a running refresh task.
    #[cfg(test)]
    pub fn is_managed(&self, key: &ObjectKey) -> bool {
        self.lock_tasks().contains_key(key)
    }

    /// Number of managed ConfigMaps.
    #[cfg(test)]
    pub fn managed_count(&self) -> usize {
        self.lock_tasks().len()
    }

    /// The target a managed ConfigMap is refreshed with.
    #[cfg(test)]
    pub fn target_of(&self, key: &ObjectKey) -> Option<RefreshTarget> {
        self.lock_tasks().get(key).map(|task| task.target.clone())
    }

    /// Stops every task and waits for all of them to exit.
    pub async fn drain(&self) {
        let tasks: Vec<(ObjectKey, ManagedTask)> = self.lock_tasks().drain().collect();
        if tasks.is_empty() {
            return;
        }

        info!("Stopping {} refresh task(s)", tasks.len());
        for (key, task) in tasks {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!("Refresh task for ConfigMap {} failed: {}", key, e);
            }
            self.context
                .metrics
                .managed
                .with_label_values(&[key.name.as_str(), key.namespace.as_str()])
                .dec();
        }
    }
}
