use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Optional per-project settings in `.graphmem/config.toml`.
///
/// ```toml
/// [neo4j]
/// container_name = "team-memory"
/// bolt_port = 17687
/// http_port = 17474
/// startup_timeout = "90s"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub neo4j: Neo4jSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Neo4jSection {
    pub uri: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    /// Accepted only so it can be rejected with a clear message.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub bolt_port: Option<u16>,
    pub http_port: Option<u16>,
    pub database: Option<String>,
    pub container_name: Option<String>,
    pub image: Option<String>,
    pub compose_file: Option<String>,
    pub schema_dir: Option<String>,
    pub heap_size: Option<String>,
    pub page_cache: Option<String>,
    pub startup_timeout: Option<DurationValue>,
    pub health_check_interval: Option<DurationValue>,
    pub http_timeout: Option<DurationValue>,
}

/// A duration written either as whole seconds or as a suffixed string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub fn as_text(&self) -> String {
        match self {
            DurationValue::Seconds(s) => s.to_string(),
            DurationValue::Text(t) => t.clone(),
        }
    }
}

impl FileConfig {
    /// Load `path`, or the default (empty) config if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: FileConfig = toml::from_str(&content).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if config.neo4j.password.is_some() {
            return Err(ConfigError::File {
                path: path.to_path_buf(),
                message: "passwords must not be stored in config.toml; export NEO4J_PASSWORD instead"
                    .to_owned(),
            });
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let to_file_error = |message: String| ConfigError::File {
            path: path.to_path_buf(),
            message,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| to_file_error(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| to_file_error(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| to_file_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".graphmem").join("config.toml");

        let mut config = FileConfig::default();
        config.neo4j.container_name = Some("team-memory".to_owned());
        config.neo4j.bolt_port = Some(17687);
        config.neo4j.startup_timeout = Some(DurationValue::Text("90s".to_owned()));
        config.save(&path).unwrap();

        let loaded = FileConfig::load(&path).unwrap();
        assert_eq!(loaded.neo4j.container_name.as_deref(), Some("team-memory"));
        assert_eq!(loaded.neo4j.bolt_port, Some(17687));
        assert_eq!(
            loaded.neo4j.startup_timeout,
            Some(DurationValue::Text("90s".to_owned()))
        );
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert!(config.neo4j.user.is_none());
    }

    #[test]
    fn integer_durations_accepted() {
        let config: FileConfig = toml::from_str("[neo4j]\nstartup_timeout = 45\n").unwrap();
        assert_eq!(
            config.neo4j.startup_timeout.map(|d| d.as_text()).as_deref(),
            Some("45")
        );
    }

    #[test]
    fn password_in_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[neo4j]\npassword = \"hunter2\"\n").unwrap();
        let err = FileConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("NEO4J_PASSWORD"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[neo4j]\nbolt_prot = 1\n").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::File { .. })
        ));
    }
}
