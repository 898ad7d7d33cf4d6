use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::resolver::LabelResolver;
use crate::error::AnnotateError;
use crate::workload::{
    AnnotationMode, AnnotationSet, AnnotationUpdate, WorkloadRef, WorkloadStore, WriteOutcome,
};

/// Something that can run the full Annotate operation for a Deployment
#[async_trait]
pub trait WorkloadAnnotator: Send + Sync {
    /// Resolve labels for every container and write them as annotations
    ///
    /// Returns the computed annotation set. Nothing is written unless every
    /// container was resolved.
    async fn annotate(
        &self,
        deployment: &Deployment,
        cancel: &CancellationToken,
    ) -> Result<AnnotationSet, AnnotateError>;
}

/// How computed labels are turned into annotations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationPolicy {
    pub mode: AnnotationMode,
    /// Prepended to every label key (e.g., "docker.com/"); raw keys when `None`
    pub prefix: Option<String>,
}

/// Aggregates image labels across a Deployment's containers and patches them in
pub struct Annotator {
    resolver: LabelResolver,
    workloads: Arc<dyn WorkloadStore>,
    policy: AnnotationPolicy,
}

impl Annotator {
    pub fn new(
        resolver: LabelResolver,
        workloads: Arc<dyn WorkloadStore>,
        policy: AnnotationPolicy,
    ) -> Self {
        Self {
            resolver,
            workloads,
            policy,
        }
    }

    pub fn resolver(&self) -> &LabelResolver {
        &self.resolver
    }

    /// Union per-container label sets; later containers win on key collisions
    async fn collect_annotations(
        &self,
        workload: &WorkloadRef,
        cancel: &CancellationToken,
    ) -> Result<AnnotationSet, AnnotateError> {
        let mut annotations = AnnotationSet::new();

        for container in &workload.containers {
            let labels = self
                .resolver
                .resolve(
                    &workload.namespace,
                    &container.image,
                    &workload.image_pull_secrets,
                    cancel,
                )
                .await?;

            debug!(
                namespace = %workload.namespace,
                name = %workload.name,
                container = %container.name,
                labels = labels.len(),
                "Collected container labels"
            );

            let prefix = self.policy.prefix.as_deref().unwrap_or("");
            annotations.extend(
                labels
                    .into_iter()
                    .map(|(key, value)| (format!("{}{}", prefix, key), value)),
            );
        }

        Ok(annotations)
    }
}

#[async_trait]
impl WorkloadAnnotator for Annotator {
    async fn annotate(
        &self,
        deployment: &Deployment,
        cancel: &CancellationToken,
    ) -> Result<AnnotationSet, AnnotateError> {
        let workload = WorkloadRef::from_deployment(deployment)?;
        let annotations = self.collect_annotations(&workload, cancel).await?;

        let update = AnnotationUpdate {
            annotations,
            mode: self.policy.mode,
        };

        let outcome = self
            .workloads
            .update_annotations(&workload.namespace, &workload.name, &update)
            .await
            .map_err(|e| AnnotateError::WorkloadUpdateFailed {
                namespace: workload.namespace.clone(),
                name: workload.name.clone(),
                reason: format!("{:#}", e),
            })?;

        info!(
            namespace = %workload.namespace,
            name = %workload.name,
            resource_version = workload.resource_version.as_deref().unwrap_or_default(),
            annotations = update.annotations.len(),
            changed = outcome == WriteOutcome::Written,
            "Annotated deployment"
        );

        Ok(update.annotations)
    }
}
