use std::path::Path;

use config::{Environment, File, FileFormat, Map};
use eyre::{Context, Result};

use crate::config::models::Config;

/// Keys whose environment values are comma separated lists.
const LIST_KEYS: [&str; 3] = ["allowed_origins", "brokers", "identity_api_versions"];

/// Load configuration from the process environment, optionally layered on top
/// of a file (YAML, JSON, TOML or INI picked by extension).
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    load_config_with_env(config_path, None)
}

/// Load configuration using an explicit environment map instead of the
/// process environment (`None` falls back to the real environment).
pub fn load_config_with_env(
    config_path: Option<&str>,
    env: Option<Map<String, String>>,
) -> Result<Config> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_path {
        builder = builder.add_source(File::new(path, file_format(path)));
    }

    let mut environment = Environment::default()
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }
    if env.is_some() {
        environment = environment.source(env);
    }

    let settings = builder
        .add_source(environment)
        .build()
        .context("Failed to build configuration")?;

    let config: Config = settings
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(config)
}

fn file_format(path: &str) -> FileFormat {
    match Path::new(path).extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = load_config_with_env(None, env(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:23200");
        assert_eq!(config.version, "v1");
        assert!(!config.enable_private_endpoints);
    }

    #[test]
    fn test_environment_overrides() {
        let config = load_config_with_env(
            None,
            env(&[
                ("BIND_ADDR", "127.0.0.1:9999"),
                ("ENVIRONMENT_HOST", "https://beta.ons.gov.uk"),
                ("ENABLE_PRIVATE_ENDPOINTS", "true"),
                ("ALLOWED_ORIGINS", "http://a.example,http://b.example"),
                ("IDENTITY_API_VERSIONS", "v1,v2"),
                ("KAFKA_MAX_BYTES", "1024"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.environment_host, "https://beta.ons.gov.uk");
        assert!(config.enable_private_endpoints);
        assert_eq!(
            config.allowed_origins,
            vec!["http://a.example", "http://b.example"]
        );
        assert_eq!(config.identity_api_versions, vec!["v1", "v2"]);
        assert_eq!(config.kafka_max_bytes, 1024);
    }

    #[test]
    fn test_file_then_environment_layering() {
        let yaml_content = r#"
bind_addr: "127.0.0.1:3000"
version: "v2"
audit_topic: "file-audit"
"#;
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config_with_env(
            Some(temp_file.path().to_str().unwrap()),
            env(&[("AUDIT_TOPIC", "env-audit")]),
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.version, "v2");
        assert_eq!(config.audit_topic, "env-audit");
    }

    #[test]
    fn test_load_json_file() {
        let json_content = r#"{ "enable_articles_api": true, "articles_api_url": "http://articles:1" }"#;
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config =
            load_config_with_env(Some(temp_file.path().to_str().unwrap()), env(&[])).unwrap();
        assert!(config.enable_articles_api);
        assert_eq!(config.articles_api_url, "http://articles:1");
    }
}
