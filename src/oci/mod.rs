mod client;
mod error;
mod models;

pub use client::{registry_endpoint, ImageLabelFetcher, OciClient, RegistryEndpoint};
pub use error::OciError;
pub use models::{ImageInspect, ImageLabelSet, ImageReference};
