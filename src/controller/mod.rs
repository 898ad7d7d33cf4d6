mod watcher;

pub use watcher::run_watcher;

use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::labels::WorkloadAnnotator;

/// Runtime configuration of the event gate
///
/// Installed as an immutable snapshot; handlers read it once when they start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateConfig {
    pub enabled: bool,
}

/// What the gate did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Annotation is switched off
    Disabled,
    /// Update event without a version change
    Unchanged,
    /// Event kind the gate does not act on
    Ignored,
    /// Annotate ran; carries the number of annotations computed
    Annotated(usize),
    /// Annotate failed; carries the error's reason code
    Failed(&'static str),
}

/// Entry point for Deployment add/update/delete notifications
///
/// Disabled until the first [`EventGate::configure`] call. Toggling installs
/// a new snapshot and never waits for handlers that are talking to registries.
/// Annotation errors are logged here and not passed on: the workload stays
/// unannotated until the next qualifying update.
pub struct EventGate {
    annotator: Arc<dyn WorkloadAnnotator>,
    config: watch::Sender<GateConfig>,
    shutdown: CancellationToken,
}

impl EventGate {
    pub fn new(annotator: Arc<dyn WorkloadAnnotator>) -> Self {
        let (config, _) = watch::channel(GateConfig::default());
        Self {
            annotator,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Install a new configuration snapshot
    pub fn configure(&self, config: GateConfig) {
        let previous = self.config.send_replace(config);
        if previous != config {
            info!(enabled = config.enabled, "Docker label extraction reconfigured");
        }
    }

    /// Current configuration snapshot
    pub fn config(&self) -> GateConfig {
        *self.config.borrow()
    }

    /// Cancel in-flight annotation attempts
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn on_add(&self, deployment: &Deployment) -> GateOutcome {
        if !self.config().enabled {
            return GateOutcome::Disabled;
        }
        self.dispatch(deployment).await
    }

    pub async fn on_update(&self, old: &Deployment, new: &Deployment) -> GateOutcome {
        if !self.config().enabled {
            return GateOutcome::Disabled;
        }

        if old.metadata.resource_version == new.metadata.resource_version {
            debug!(
                namespace = new.metadata.namespace.as_deref().unwrap_or_default(),
                name = new.metadata.name.as_deref().unwrap_or_default(),
                "Resource version unchanged, skipping"
            );
            return GateOutcome::Unchanged;
        }

        self.dispatch(new).await
    }

    pub async fn on_delete(&self, _deployment: &Deployment) -> GateOutcome {
        GateOutcome::Ignored
    }

    async fn dispatch(&self, deployment: &Deployment) -> GateOutcome {
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        let cancel = self.shutdown.child_token();

        match self.annotator.annotate(deployment, &cancel).await {
            Ok(annotations) => GateOutcome::Annotated(annotations.len()),
            Err(e) => {
                error!(
                    namespace = %namespace,
                    name = %name,
                    reason = e.reason_code(),
                    "Failed to annotate deployment: {}",
                    e
                );
                GateOutcome::Failed(e.reason_code())
            }
        }
    }
}
