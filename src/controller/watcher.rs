use anyhow::{anyhow, Result};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventGate, GateOutcome};

/// Deployment change as seen by the event gate
#[derive(Debug, Clone)]
pub(crate) enum DeploymentEvent {
    Added(Deployment),
    Updated { old: Deployment, new: Deployment },
    Deleted(Deployment),
}

/// Turns raw watch events into add/update/delete notifications
///
/// Keeps the last version seen of each Deployment so updates carry both the
/// old and the new object. A relist (Init .. InitDone) re-announces every
/// object as an update; objects missing from the relist are reported deleted.
#[derive(Default)]
pub(crate) struct EventTranslator {
    last_seen: HashMap<String, Deployment>,
    relisted: Option<HashSet<String>>,
}

fn object_key(deployment: &Deployment) -> String {
    format!(
        "{}/{}",
        deployment.metadata.namespace.as_deref().unwrap_or("default"),
        deployment.metadata.name.as_deref().unwrap_or_default()
    )
}

impl EventTranslator {
    pub(crate) fn translate(&mut self, event: Event<Deployment>) -> Vec<DeploymentEvent> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(deployment) => {
                let key = object_key(&deployment);
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(key);
                }
                vec![self.observe(deployment)]
            }
            Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let gone: Vec<String> = self
                    .last_seen
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.last_seen.remove(&key))
                    .map(DeploymentEvent::Deleted)
                    .collect()
            }
            Event::Apply(deployment) => vec![self.observe(deployment)],
            Event::Delete(deployment) => {
                self.last_seen.remove(&object_key(&deployment));
                vec![DeploymentEvent::Deleted(deployment)]
            }
        }
    }

    fn observe(&mut self, deployment: Deployment) -> DeploymentEvent {
        match self.last_seen.insert(object_key(&deployment), deployment.clone()) {
            Some(old) => DeploymentEvent::Updated {
                old,
                new: deployment,
            },
            None => DeploymentEvent::Added(deployment),
        }
    }
}

async fn deliver(gate: &EventGate, event: DeploymentEvent) -> GateOutcome {
    match event {
        DeploymentEvent::Added(deployment) => gate.on_add(&deployment).await,
        DeploymentEvent::Updated { old, new } => gate.on_update(&old, &new).await,
        DeploymentEvent::Deleted(deployment) => gate.on_delete(&deployment).await,
    }
}

/// Watch Deployments and feed every change through the event gate
///
/// Watches all namespaces unless `namespace` is given. Watch errors are
/// retried with backoff; the loop ends when `shutdown` is cancelled.
pub async fn run_watcher(
    client: Client,
    gate: Arc<EventGate>,
    namespace: Option<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    let api: Api<Deployment> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!(
        namespace = namespace.as_deref().unwrap_or("*"),
        "Watching deployments"
    );

    let stream = watcher(api, watcher::Config::default()).default_backoff();
    let mut stream = std::pin::pin!(stream);
    let mut translator = EventTranslator::default();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Deployment watcher stopping");
                gate.shutdown();
                return Ok(());
            }
            next = stream.next() => {
                match next {
                    Some(Ok(event)) => {
                        for change in translator.translate(event) {
                            let outcome = deliver(&gate, change).await;
                            debug!(?outcome, "Handled deployment event");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Deployment watch failed, will retry");
                    }
                    None => return Err(anyhow!("deployment watch stream ended")),
                }
            }
        }
    }
}
