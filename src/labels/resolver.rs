use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AnnotateError, AttemptFailure};
use crate::oci::{ImageLabelFetcher, ImageLabelSet, ImageReference, OciError};
use crate::registry::{decode_bundle, CredentialEntry, CredentialStore};

/// Public registry tried anonymously when no credential works
pub const DOCKER_HUB_REGISTRY_URL: &str = "https://registry-1.docker.io/";

/// Resolves the labels of one image by trying every available credential
///
/// Credentials come from the workload's image pull secrets, in declaration
/// order, and within a secret in registry URL order. The first successful
/// registry session wins. If none succeeds, one anonymous attempt against the
/// fallback registry is made.
///
/// Only misconfiguration aborts early: an unparsable image, a missing secret
/// or a malformed bundle. Registry failures are collected and reported
/// together if nothing succeeds.
pub struct LabelResolver {
    credentials: Arc<dyn CredentialStore>,
    fetcher: Arc<dyn ImageLabelFetcher>,
    fallback_registry_url: String,
    attempt_timeout: Duration,
}

impl LabelResolver {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        fetcher: Arc<dyn ImageLabelFetcher>,
        fallback_registry_url: impl Into<String>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            fetcher,
            fallback_registry_url: fallback_registry_url.into(),
            attempt_timeout,
        }
    }

    pub async fn resolve(
        &self,
        namespace: &str,
        image: &str,
        secret_names: &[String],
        cancel: &CancellationToken,
    ) -> Result<ImageLabelSet, AnnotateError> {
        info!(namespace = %namespace, image = %image, secrets = ?secret_names, "Resolving image labels");

        let reference =
            ImageReference::parse(image).map_err(|e| AnnotateError::InvalidImageReference {
                image: image.to_string(),
                reason: match e {
                    OciError::InvalidReference(reason) => reason,
                    other => other.to_string(),
                },
            })?;

        let mut attempts = Vec::new();

        for secret_name in secret_names {
            let payload = self
                .credentials
                .get_bundle(namespace, secret_name)
                .await
                .map_err(|e| AnnotateError::SecretFetchFailed {
                    namespace: namespace.to_string(),
                    name: secret_name.clone(),
                    reason: format!("{:#}", e),
                })?
                .ok_or_else(|| AnnotateError::SecretNotFound {
                    namespace: namespace.to_string(),
                    name: secret_name.clone(),
                })?;

            if payload.is_empty() {
                return Err(AnnotateError::MalformedCredentialBundle {
                    namespace: namespace.to_string(),
                    name: secret_name.clone(),
                    reason: "secret has no data".to_string(),
                });
            }

            let entries = decode_bundle(&payload, namespace, secret_name)?;

            for credential in entries.values() {
                match self.attempt(credential, &reference, cancel).await? {
                    Ok(labels) => {
                        info!(
                            image = %reference,
                            secret = %secret_name,
                            registry = %credential.registry_url,
                            labels = labels.len(),
                            "Resolved image labels"
                        );
                        return Ok(labels);
                    }
                    Err(error) => attempts.push(AttemptFailure {
                        registry: credential.registry_url.clone(),
                        anonymous: credential.is_anonymous(),
                        error,
                    }),
                }
            }
        }

        let fallback = CredentialEntry::anonymous(self.fallback_registry_url.clone());
        match self.attempt(&fallback, &reference, cancel).await? {
            Ok(labels) => {
                info!(
                    image = %reference,
                    registry = %fallback.registry_url,
                    labels = labels.len(),
                    "Resolved image labels anonymously"
                );
                Ok(labels)
            }
            Err(error) => {
                attempts.push(AttemptFailure {
                    registry: fallback.registry_url,
                    anonymous: true,
                    error,
                });
                Err(AnnotateError::ImageLabelsUnresolved {
                    image: image.to_string(),
                    attempts,
                })
            }
        }
    }

    /// One bounded registry session
    ///
    /// The outer result carries cancellation (fatal), the inner one the
    /// per-attempt outcome (soft).
    async fn attempt(
        &self,
        credential: &CredentialEntry,
        reference: &ImageReference,
        cancel: &CancellationToken,
    ) -> Result<Result<ImageLabelSet, OciError>, AnnotateError> {
        debug!(
            image = %reference,
            registry = %credential.registry_url,
            anonymous = credential.is_anonymous(),
            "Trying registry"
        );

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(AnnotateError::Cancelled),
            outcome = tokio::time::timeout(
                self.attempt_timeout,
                self.fetcher.fetch_labels(credential, reference),
            ) => outcome,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(OciError::Timeout {
                registry: credential.registry_url.clone(),
                after: self.attempt_timeout,
            }),
        };

        if let Err(e) = &result {
            warn!(
                image = %reference,
                registry = %credential.registry_url,
                reason = e.reason_code(),
                "Registry attempt failed: {}",
                e
            );
        }

        Ok(result)
    }
}
