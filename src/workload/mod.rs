mod models;
mod store;

pub use models::{AnnotationMode, AnnotationSet, AnnotationUpdate, ContainerImage, WorkloadRef};
pub use store::{KubeDeploymentStore, WorkloadStore, WriteOutcome};

#[cfg(test)]
pub(crate) use models::tests::create_test_deployment;
