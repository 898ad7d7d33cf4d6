mod annotator;
pub(crate) mod resolver;

pub use annotator::{AnnotationPolicy, Annotator, WorkloadAnnotator};
pub use resolver::{LabelResolver, DOCKER_HUB_REGISTRY_URL};
