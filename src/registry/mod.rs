pub mod credentials;
pub mod secrets;

pub use credentials::{decode_bundle, CredentialEntry, CredentialMap};
pub use secrets::{select_bundle_payload, CredentialStore, KubeSecretStore};
