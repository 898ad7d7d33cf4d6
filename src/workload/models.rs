use k8s_openapi::api::apps::v1::Deployment;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::AnnotateError;

/// Annotations written onto a workload
pub type AnnotationSet = BTreeMap<String, String>;

/// How computed annotations are combined with the ones already on the object
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationMode {
    /// The computed set becomes the entire annotation map
    #[default]
    Replace,
    /// The computed set is upserted into the existing annotations
    Merge,
}

/// One container of a workload's pod template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
}

/// The parts of a Deployment the annotation pipeline reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
    pub resource_version: Option<String>,
    /// Containers in pod template order
    pub containers: Vec<ContainerImage>,
    /// Image pull secret names in declaration order
    pub image_pull_secrets: Vec<String>,
}

impl WorkloadRef {
    pub fn from_deployment(deployment: &Deployment) -> Result<Self, AnnotateError> {
        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| AnnotateError::InvalidWorkload("deployment has no name".to_string()))?;
        let namespace = deployment
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let pod_spec = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref());

        let containers = pod_spec
            .map(|pod| {
                pod.containers
                    .iter()
                    .map(|container| ContainerImage {
                        name: container.name.clone(),
                        image: container.image.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let image_pull_secrets = pod_spec
            .and_then(|pod| pod.image_pull_secrets.as_ref())
            .map(|secrets| secrets.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default();

        Ok(Self {
            namespace,
            name,
            resource_version: deployment.metadata.resource_version.clone(),
            containers,
            image_pull_secrets,
        })
    }
}

/// Pure mutation applied to a workload's annotations on every write attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationUpdate {
    pub annotations: AnnotationSet,
    pub mode: AnnotationMode,
}

impl AnnotationUpdate {
    /// Compute the annotation map to write, given the one currently stored
    pub fn apply(&self, current: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
        match self.mode {
            AnnotationMode::Replace => self.annotations.clone(),
            AnnotationMode::Merge => {
                let mut merged = current.cloned().unwrap_or_default();
                merged.extend(
                    self.annotations
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                merged
            }
        }
    }
}
