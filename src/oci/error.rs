use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to an image registry
///
/// Everything except `InvalidReference` is a per-attempt failure: the caller
/// moves on to the next credential instead of giving up.
#[derive(Debug, Error)]
pub enum OciError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Couldn't get the manifest from {registry}: {reason}")]
    ManifestFetchFailed { registry: String, reason: String },

    #[error("Couldn't get the config blob {digest} from {registry}: {reason}")]
    ConfigBlobFetchFailed {
        registry: String,
        digest: String,
        reason: String,
    },

    #[error("Couldn't decode the config blob from {registry}: {reason}")]
    ConfigDecodeFailed { registry: String, reason: String },

    #[error("Registry {registry} did not answer within {after:?}")]
    Timeout { registry: String, after: Duration },
}

impl OciError {
    /// Stable reason code for log filtering
    pub fn reason_code(&self) -> &'static str {
        match self {
            OciError::InvalidReference(_) => "invalid_reference",
            OciError::ManifestFetchFailed { .. } => "manifest_fetch_failed",
            OciError::ConfigBlobFetchFailed { .. } => "config_blob_fetch_failed",
            OciError::ConfigDecodeFailed { .. } => "config_decode_failed",
            OciError::Timeout { .. } => "timeout",
        }
    }
}
