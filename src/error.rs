use std::fmt;
use thiserror::Error;

use crate::oci::OciError;

/// One failed registry attempt recorded while resolving an image
#[derive(Debug)]
pub struct AttemptFailure {
    /// Registry URL the attempt was made against
    pub registry: String,
    /// Whether the attempt was made without credentials
    pub anonymous: bool,
    pub error: OciError,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.anonymous { "anonymous" } else { "credential" };
        write!(
            f,
            "[{}] {} ({}): {}",
            self.error.reason_code(),
            self.registry,
            mode,
            self.error
        )
    }
}

fn render_trail(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return "no registry attempts were made".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that abort a whole Annotate call
///
/// Registry reachability problems are not in here: those are recorded as
/// [`AttemptFailure`]s and only surface once every credential and the
/// anonymous fallback have failed.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("Invalid image reference {image:?}: {reason}")]
    InvalidImageReference { image: String, reason: String },

    #[error("Couldn't get secret {namespace}/{name}: not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("Couldn't get secret {namespace}/{name}: {reason}")]
    SecretFetchFailed {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("Couldn't decode credential bundle in secret {namespace}/{name}: {reason}")]
    MalformedCredentialBundle {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("Couldn't resolve labels for image {image}: {}", render_trail(.attempts))]
    ImageLabelsUnresolved {
        image: String,
        attempts: Vec<AttemptFailure>,
    },

    #[error("Invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("Couldn't update annotations of {namespace}/{name}: {reason}")]
    WorkloadUpdateFailed {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("Annotation was cancelled")]
    Cancelled,
}

impl AnnotateError {
    /// Stable reason code for log filtering
    pub fn reason_code(&self) -> &'static str {
        match self {
            AnnotateError::InvalidImageReference { .. } => "invalid_image_reference",
            AnnotateError::SecretNotFound { .. } => "secret_not_found",
            AnnotateError::SecretFetchFailed { .. } => "secret_fetch_failed",
            AnnotateError::MalformedCredentialBundle { .. } => "malformed_credential_bundle",
            AnnotateError::ImageLabelsUnresolved { .. } => "image_labels_unresolved",
            AnnotateError::InvalidWorkload(_) => "invalid_workload",
            AnnotateError::WorkloadUpdateFailed { .. } => "workload_update_failed",
            AnnotateError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_error_lists_every_attempt() {
        let err = AnnotateError::ImageLabelsUnresolved {
            image: "docker.io/library/nginx:latest".to_string(),
            attempts: vec![
                AttemptFailure {
                    registry: "https://a.example.com".to_string(),
                    anonymous: false,
                    error: OciError::ManifestFetchFailed {
                        registry: "a.example.com".to_string(),
                        reason: "401".to_string(),
                    },
                },
                AttemptFailure {
                    registry: "https://registry-1.docker.io/".to_string(),
                    anonymous: true,
                    error: OciError::ConfigDecodeFailed {
                        registry: "registry-1.docker.io".to_string(),
                        reason: "eof".to_string(),
                    },
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("[manifest_fetch_failed] https://a.example.com (credential)"));
        assert!(message.contains("[config_decode_failed] https://registry-1.docker.io/ (anonymous)"));
        assert_eq!(err.reason_code(), "image_labels_unresolved");
    }
}
