use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use super::models::AnnotationUpdate;

/// Outcome of a successful annotation write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The object was updated
    Written,
    /// The stored annotations already matched, nothing was sent
    Unchanged,
}

/// Owner of the read-modify-write cycle on workload metadata
///
/// Implementations read the current object, apply the update to its
/// annotations and write it back guarded by the object's version. On a
/// version conflict they re-read and reapply, a bounded number of times.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn update_annotations(
        &self,
        namespace: &str,
        name: &str,
        update: &AnnotationUpdate,
    ) -> Result<WriteOutcome>;
}

/// Deployment store backed by the Kubernetes API
pub struct KubeDeploymentStore {
    kube_client: Client,
    max_conflict_retries: u32,
}

impl KubeDeploymentStore {
    pub fn new(kube_client: Client, max_conflict_retries: u32) -> Self {
        Self {
            kube_client,
            max_conflict_retries,
        }
    }
}

#[async_trait]
impl WorkloadStore for KubeDeploymentStore {
    async fn update_annotations(
        &self,
        namespace: &str,
        name: &str,
        update: &AnnotationUpdate,
    ) -> Result<WriteOutcome> {
        let deploy_api: Api<Deployment> = Api::namespaced(self.kube_client.clone(), namespace);

        for attempt in 1..=self.max_conflict_retries {
            let mut deployment = deploy_api.get(name).await?;

            let desired = update.apply(deployment.metadata.annotations.as_ref());
            let current = deployment.metadata.annotations.clone().unwrap_or_default();
            if current == desired {
                debug!(
                    namespace = %namespace,
                    name = %name,
                    "Annotations already up to date"
                );
                return Ok(WriteOutcome::Unchanged);
            }

            // The read resourceVersion stays on the object, so a concurrent
            // change makes the replace fail with 409 instead of overwriting it.
            deployment.metadata.annotations = Some(desired);
            deployment.metadata.managed_fields = None;

            match deploy_api
                .replace(name, &PostParams::default(), &deployment)
                .await
            {
                Ok(_) => {
                    info!(
                        namespace = %namespace,
                        name = %name,
                        attempt,
                        "Updated deployment annotations"
                    );
                    return Ok(WriteOutcome::Written);
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    warn!(
                        namespace = %namespace,
                        name = %name,
                        attempt,
                        "Deployment changed while updating annotations, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(anyhow!(
            "gave up after {} conflicting updates",
            self.max_conflict_retries
        ))
    }
}
