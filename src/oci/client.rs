use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::{secrets::RegistryAuth, Client};
use tracing::debug;

use super::error::OciError;
use super::models::{ImageInspect, ImageLabelSet, ImageReference};
use crate::registry::CredentialEntry;

/// Fetches the labels embedded in an image from one registry with one credential
#[async_trait]
pub trait ImageLabelFetcher: Send + Sync {
    /// Run a single manifest -> config blob -> labels round trip
    ///
    /// An empty label set is a successful result. Implementations must not
    /// retry internally.
    async fn fetch_labels(
        &self,
        credential: &CredentialEntry,
        image: &ImageReference,
    ) -> Result<ImageLabelSet, OciError>;
}

/// Registry host and transport derived from a credential's registry URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    /// Host with optional port (e.g., "registry.example.com:5000")
    pub host: String,
    /// Plain HTTP instead of HTTPS
    pub insecure: bool,
}

/// Split a registry URL such as "https://index.docker.io/v1/" into host and transport
pub fn registry_endpoint(registry_url: &str) -> RegistryEndpoint {
    let trimmed = registry_url.trim();
    let (insecure, rest) = match trimmed.strip_prefix("http://") {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix("https://").unwrap_or(trimmed)),
    };

    let host = rest.split('/').next().unwrap_or(rest).to_string();

    RegistryEndpoint { host, insecure }
}

/// Registry client built on the OCI distribution API
///
/// Every call uses a fresh `oci_distribution::Client`, so bearer tokens
/// obtained with one credential are never reused for another.
#[derive(Debug, Default, Clone)]
pub struct OciClient;

impl OciClient {
    pub fn new() -> Self {
        Self
    }

    fn client_for(endpoint: &RegistryEndpoint) -> Client {
        let protocol = if endpoint.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };

        Client::new(ClientConfig {
            protocol,
            ..Default::default()
        })
    }

    fn auth_for(credential: &CredentialEntry) -> RegistryAuth {
        if credential.is_anonymous() {
            RegistryAuth::Anonymous
        } else {
            RegistryAuth::Basic(credential.username.clone(), credential.password.clone())
        }
    }
}

#[async_trait]
impl ImageLabelFetcher for OciClient {
    async fn fetch_labels(
        &self,
        credential: &CredentialEntry,
        image: &ImageReference,
    ) -> Result<ImageLabelSet, OciError> {
        let endpoint = registry_endpoint(&credential.registry_url);
        let reference = image.on_registry(&endpoint.host);
        let client = Self::client_for(&endpoint);
        let auth = Self::auth_for(credential);

        let (manifest, manifest_digest) = client
            .pull_image_manifest(&reference, &auth)
            .await
            .map_err(|e| OciError::ManifestFetchFailed {
                registry: endpoint.host.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            registry = %endpoint.host,
            image = %reference.whole(),
            manifest = %manifest_digest,
            config = %manifest.config.digest,
            "Fetched image manifest"
        );

        let mut blob: Vec<u8> = Vec::new();
        client
            .pull_blob(&reference, &manifest.config, &mut blob)
            .await
            .map_err(|e| OciError::ConfigBlobFetchFailed {
                registry: endpoint.host.clone(),
                digest: manifest.config.digest.clone(),
                reason: e.to_string(),
            })?;

        let inspect: ImageInspect =
            serde_json::from_slice(&blob).map_err(|e| OciError::ConfigDecodeFailed {
                registry: endpoint.host.clone(),
                reason: e.to_string(),
            })?;

        Ok(inspect.into_labels())
    }
}
