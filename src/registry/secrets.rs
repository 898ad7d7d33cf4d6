use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use tracing::debug;

/// Data keys tried, in order, before falling back to the first entry
const PREFERRED_BUNDLE_KEYS: [&str; 2] = [".dockerconfigjson", ".dockercfg"];

/// Source of credential bundles, keyed by namespace and secret name
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the raw bundle stored in a secret
    ///
    /// Returns `Ok(None)` if the secret does not exist, and `Ok(Some(vec![]))`
    /// for a secret without data.
    async fn get_bundle(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Pick the entry of a secret that holds the credential bundle
///
/// Secret data is a `BTreeMap`, so the fallback to the first entry is
/// deterministic.
pub fn select_bundle_payload(secret: &Secret) -> Option<&[u8]> {
    let data = secret.data.as_ref()?;

    PREFERRED_BUNDLE_KEYS
        .iter()
        .find_map(|key| data.get(*key))
        .or_else(|| data.values().next())
        .map(|bytes| bytes.0.as_slice())
}

/// Credential store backed by Kubernetes secrets
pub struct KubeSecretStore {
    kube_client: Client,
}

impl KubeSecretStore {
    pub fn new(kube_client: Client) -> Self {
        Self { kube_client }
    }
}

#[async_trait]
impl CredentialStore for KubeSecretStore {
    async fn get_bundle(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let secret_api: Api<Secret> = Api::namespaced(self.kube_client.clone(), namespace);

        match secret_api.get(name).await {
            Ok(secret) => {
                let payload = select_bundle_payload(&secret)
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default();
                debug!(
                    namespace = %namespace,
                    secret = %name,
                    bytes = payload.len(),
                    "Read credential bundle"
                );
                Ok(Some(payload))
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
