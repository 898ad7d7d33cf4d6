use oci_distribution::Reference;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use super::error::OciError;

/// Labels embedded in an image configuration, keyed by label name
pub type ImageLabelSet = BTreeMap<String, String>;

/// Parsed OCI image reference
///
/// The repository is always taken from the same parse that produced the tag
/// and digest, so registries with prefixes of any length (`docker.io`,
/// `registry.example.com:5000`, ...) are handled uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry the image string names (e.g., "docker.io")
    pub registry: String,
    /// Repository path without the registry (e.g., "library/nginx")
    pub repository: String,
    /// Tag as written; "latest" when the image string has neither tag nor digest
    pub tag: Option<String>,
    /// Content digest if the image string is pinned (e.g., "sha256:...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a raw image string of the form `repo[:tag][@digest]`
    pub fn parse(image: &str) -> Result<Self, OciError> {
        let trimmed = image.trim();
        if trimmed.is_empty() {
            return Err(OciError::InvalidReference(
                "image reference is empty".to_string(),
            ));
        }

        let reference = Reference::try_from(trimmed)
            .map_err(|e| OciError::InvalidReference(e.to_string()))?;

        Ok(Self {
            registry: reference.registry().to_string(),
            repository: reference.repository().to_string(),
            tag: match (reference.tag(), reference.digest()) {
                (Some(tag), _) => Some(tag.to_string()),
                (None, Some(_)) => None,
                (None, None) => Some("latest".to_string()),
            },
            digest: reference.digest().map(str::to_string),
        })
    }

    /// Build a reference to the same repository on another registry host
    ///
    /// Pinned images are addressed by digest, everything else by tag.
    pub fn on_registry(&self, registry_host: &str) -> Reference {
        match &self.digest {
            Some(digest) => Reference::with_digest(
                registry_host.to_string(),
                self.repository.clone(),
                digest.clone(),
            ),
            None => Reference::with_tag(
                registry_host.to_string(),
                self.repository.clone(),
                self.tag.clone().unwrap_or_else(|| "latest".to_string()),
            ),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Image inspection structure decoded from a config blob
///
/// OCI config blobs use `config`, `docker inspect` output uses `Config`;
/// both spellings are accepted.
#[derive(Debug, Default, Deserialize)]
pub struct ImageInspect {
    #[serde(default, alias = "Config")]
    pub config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(default, rename = "Labels", alias = "labels")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl ImageInspect {
    /// Consume the structure and return its labels (empty when absent or null)
    pub fn into_labels(self) -> ImageLabelSet {
        self.config
            .and_then(|config| config.labels)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_hub_short_name() {
        let image = ImageReference::parse("nginx").unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.repository, "library/nginx");
        assert_eq!(image.tag.as_deref(), Some("latest"));
        assert!(image.digest.is_none());
    }

    #[test]
    fn test_parse_user_repository_with_tag() {
        let image = ImageReference::parse("shudipta/book_server:v1").unwrap();
        assert_eq!(image.registry, "docker.io");
        assert_eq!(image.repository, "shudipta/book_server");
        assert_eq!(image.tag.as_deref(), Some("v1"));
        assert_eq!(image.to_string(), "docker.io/shudipta/book_server:v1");
    }

    #[test]
    fn test_parse_custom_registry_with_port() {
        let image = ImageReference::parse("registry.example.com:5000/team/app:1.2.3").unwrap();
        assert_eq!(image.registry, "registry.example.com:5000");
        assert_eq!(image.repository, "team/app");
        assert_eq!(image.tag.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_parse_pinned_digest() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let image = ImageReference::parse(&format!("quay.io/org/tool@{}", digest)).unwrap();
        assert_eq!(image.registry, "quay.io");
        assert_eq!(image.repository, "org/tool");
        assert_eq!(image.digest.as_deref(), Some(digest.as_str()));
        assert_eq!(image.tag, None);
        assert_eq!(image.to_string(), format!("quay.io/org/tool@{}", digest));

        let reference = image.on_registry("mirror.local");
        assert_eq!(reference.registry(), "mirror.local");
        assert_eq!(reference.digest(), Some(digest.as_str()));
    }

    #[test]
    fn test_display_keeps_written_tag_next_to_digest() {
        let digest = format!("sha256:{}", "b".repeat(64));
        let image = ImageReference::parse(&format!("quay.io/org/tool:v2@{}", digest)).unwrap();
        assert_eq!(image.tag.as_deref(), Some("v2"));
        assert_eq!(image.to_string(), format!("quay.io/org/tool:v2@{}", digest));
    }

    #[test]
    fn test_parse_rejects_invalid_strings() {
        assert!(matches!(
            ImageReference::parse(""),
            Err(OciError::InvalidReference(_))
        ));
        assert!(matches!(
            ImageReference::parse("Not A Valid/Image"),
            Err(OciError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_on_registry_keeps_repository_and_tag() {
        let image = ImageReference::parse("docker.io/shudipta/labels").unwrap();
        let reference = image.on_registry("registry-1.docker.io");
        assert_eq!(reference.registry(), "registry-1.docker.io");
        assert_eq!(reference.repository(), "shudipta/labels");
        assert_eq!(reference.tag(), Some("latest"));
    }

    #[test]
    fn test_image_inspect_accepts_both_spellings() {
        let oci: ImageInspect =
            serde_json::from_str(r#"{"config": {"Labels": {"git-commit": "abc123"}}}"#).unwrap();
        assert_eq!(oci.into_labels().get("git-commit").unwrap(), "abc123");

        let docker: ImageInspect =
            serde_json::from_str(r#"{"Config": {"Labels": {"a": "1"}}}"#).unwrap();
        assert_eq!(docker.into_labels().get("a").unwrap(), "1");
    }

    #[test]
    fn test_image_inspect_without_labels_is_empty() {
        let null_labels: ImageInspect =
            serde_json::from_str(r#"{"config": {"Labels": null}}"#).unwrap();
        assert!(null_labels.into_labels().is_empty());

        let no_config: ImageInspect = serde_json::from_str(r#"{"architecture": "amd64"}"#).unwrap();
        assert!(no_config.into_labels().is_empty());
    }
}
