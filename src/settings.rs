use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::controller::GateConfig;
use crate::labels::{AnnotationPolicy, DOCKER_HUB_REGISTRY_URL};
use crate::workload::AnnotationMode;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Whether Deployment events trigger label extraction
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub annotations: AnnotationSettings,
    #[serde(default)]
    pub workload: WorkloadSettings,
    #[serde(default)]
    pub watch: WatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            registry: RegistrySettings::default(),
            annotations: AnnotationSettings::default(),
            workload: WorkloadSettings::default(),
            watch: WatchSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Registry tried anonymously after every pull secret has failed
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,

    /// Upper bound for a single (registry, credential) attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            fallback_url: default_fallback_url(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSettings {
    /// "replace" overwrites all annotations, "merge" upserts label keys
    #[serde(default)]
    pub mode: AnnotationMode,

    /// Prefix for annotation keys, e.g. "docker.com/"
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkloadSettings {
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct WatchSettings {
    /// Restrict the watch to one namespace; all namespaces when unset
    #[serde(default)]
    pub namespace: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_fallback_url() -> String {
    DOCKER_HUB_REGISTRY_URL.to_string()
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

fn default_max_conflict_retries() -> u32 {
    5
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = match regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
            Ok(re) => re,
            Err(_) => return s.to_string(),
        };

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_value.unwrap_or("").to_string(),
            }
        })
        .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns true if a file was loaded
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> bool {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return true;
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        false
    }

    /// Load settings from `LABELER_CONFIG_DIR` (default "config") for
    /// `LABELER_CONFIG_RUN_MODE` (default "development")
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("LABELER_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("LABELER_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        Self::load(&config_dir, &run_mode, Self::environment())
    }

    /// `LABELER__REGISTRY__FALLBACK_URL=...` overrides `registry.fallback_url`
    fn environment() -> Environment {
        Environment::with_prefix("LABELER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn load(config_dir: &str, run_mode: &str, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Files are layered default -> run mode -> local; none is required
        // since every setting has a default.
        Self::try_add_config_file(&mut builder, config_dir, "default");
        Self::try_add_config_file(&mut builder, config_dir, run_mode);
        Self::try_add_config_file(&mut builder, config_dir, "local");

        let config = builder.add_source(environment).build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        let mut unused_fields = Vec::new();
        let mut settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.normalize();
        settings.validate()?;
        Ok(settings)
    }

    /// Empty strings (e.g. from `${VAR:-}`) mean "unset"
    fn normalize(&mut self) {
        if self.annotations.prefix.as_deref() == Some("") {
            self.annotations.prefix = None;
        }
        if self.watch.namespace.as_deref() == Some("") {
            self.watch.namespace = None;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fallback = &self.registry.fallback_url;
        if !(fallback.starts_with("https://") || fallback.starts_with("http://")) {
            return Err(ConfigError::Message(format!(
                "registry.fallback_url must be an http(s) URL. Got: '{}'",
                fallback
            )));
        }

        if self.registry.attempt_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "registry.attempt_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.workload.max_conflict_retries == 0 {
            return Err(ConfigError::Message(
                "workload.max_conflict_retries must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.registry.attempt_timeout_secs)
    }

    pub fn annotation_policy(&self) -> AnnotationPolicy {
        AnnotationPolicy {
            mode: self.annotations.mode,
            prefix: self.annotations.prefix.clone(),
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_environment() -> Environment {
        Settings::environment().source(Some(config::Map::new()))
    }

    fn environment(vars: &[(&str, &str)]) -> Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::environment().source(Some(vars))
    }

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("LABELER_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${LABELER_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("LABELER_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("LABELER_MISSING_VAR");
        let result = Settings::substitute_env_vars_in_string("${LABELER_MISSING_VAR:-docker.com/}");
        assert_eq!(result, "docker.com/");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        let result = Settings::substitute_env_vars_in_string("plain_value");
        assert_eq!(result, "plain_value");
    }

    #[test]
    fn test_defaults_without_config_files() {
        let temp_dir = TempDir::new().unwrap();
        let settings =
            Settings::load(temp_dir.path().to_str().unwrap(), "production", no_environment())
                .unwrap();

        assert_eq!(settings, Settings::default());
        assert!(settings.enabled);
        assert_eq!(settings.registry.fallback_url, DOCKER_HUB_REGISTRY_URL);
        assert_eq!(settings.attempt_timeout(), Duration::from_secs(30));
        assert_eq!(settings.annotation_policy(), AnnotationPolicy::default());
    }

    #[test]
    fn test_layering_and_unknown_fields() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.yaml"),
            r#"
enabled: false
registry:
  attempt_timeout_secs: 10
  unknown_field: "should trigger warning"
annotations:
  mode: merge
unknown_top_level: "also unknown"
"#,
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("production.toml"),
            r#"
enabled = true

[annotations]
prefix = "docker.com/"
"#,
        )
        .unwrap();

        let settings =
            Settings::load(temp_dir.path().to_str().unwrap(), "production", no_environment())
                .unwrap();

        assert!(settings.enabled);
        assert_eq!(settings.registry.attempt_timeout_secs, 10);
        assert_eq!(settings.annotations.mode, AnnotationMode::Merge);
        assert_eq!(settings.annotations.prefix.as_deref(), Some("docker.com/"));
    }

    #[test]
    fn test_environment_overrides_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            r#"
[watch]
namespace = "kube-system"
"#,
        )
        .unwrap();

        let settings = Settings::load(
            temp_dir.path().to_str().unwrap(),
            "development",
            environment(&[
                ("LABELER__WATCH__NAMESPACE", "apps"),
                ("LABELER__WORKLOAD__MAX_CONFLICT_RETRIES", "9"),
                ("LABELER__ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.watch.namespace.as_deref(), Some("apps"));
        assert_eq!(settings.workload.max_conflict_retries, 9);
        assert!(!settings.gate_config().enabled);
    }

    #[test]
    fn test_empty_prefix_is_unset() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            r#"
[annotations]
prefix = "${LABELER_UNSET_PREFIX:-}"
"#,
        )
        .unwrap();

        let settings =
            Settings::load(temp_dir.path().to_str().unwrap(), "development", no_environment())
                .unwrap();
        assert_eq!(settings.annotations.prefix, None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[registry]\nfallback_url = \"registry-1.docker.io\"\n",
            "[registry]\nattempt_timeout_secs = 0\n",
            "[workload]\nmax_conflict_retries = 0\n",
            "[annotations]\nmode = \"append\"\n",
        ];

        for case in cases {
            let temp_dir = TempDir::new().unwrap();
            fs::write(temp_dir.path().join("default.toml"), case).unwrap();
            let result =
                Settings::load(temp_dir.path().to_str().unwrap(), "development", no_environment());
            assert!(result.is_err(), "expected error for {:?}", case);
        }
    }
}
