//! CLI configuration.
//!
//! Precedence, highest first: command-line flags, `METAL_*` environment
//! variables, the config file, built-in defaults.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Resolved CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub api_token: String,
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_owned()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: String::new(),
        }
    }
}

impl CliConfig {
    /// Load configuration, layering file, environment, and flags.
    pub fn load(
        config_path: Option<&Path>,
        api_base_url: Option<String>,
        api_token: Option<String>,
    ) -> Result<Self, figment::Error> {
        let file = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        let mut config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("METAL_"))
            .extract()?;

        if let Some(url) = api_base_url {
            config.api_base_url = url;
        }
        if let Some(token) = api_token {
            config.api_token = token;
        }
        Ok(config)
    }
}

fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".config")
        .join("metal")
        .join("config.toml")
}

/// Per-project settings, read from `metal.toml` in the source directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub env_id: Option<String>,
}

impl ProjectConfig {
    /// Load the project file from a source directory, if present.
    pub fn load(dir: &Path) -> Result<Self, figment::Error> {
        let path = dir.join("metal.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        Figment::from(Toml::file(path)).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_everything() {
        let config = CliConfig::load(
            Some(Path::new("/nonexistent/config.toml")),
            Some("https://api.example.dev".to_owned()),
            Some("tok123".to_owned()),
        )
        .expect("load");
        assert_eq!(config.api_base_url, "https://api.example.dev");
        assert_eq!(config.api_token, "tok123");
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config =
            CliConfig::load(Some(Path::new("/nonexistent/config.toml")), None, None)
                .expect("load");
        assert_eq!(config.api_base_url, "http://localhost:8080");
    }

    #[test]
    fn project_file_is_optional() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = ProjectConfig::load(dir.path()).expect("load");
        assert!(project.app_id.is_none());

        std::fs::write(
            dir.path().join("metal.toml"),
            "app_id = \"app_x\"\nenv_id = \"env_y\"\n",
        )
        .expect("write");
        let project = ProjectConfig::load(dir.path()).expect("load");
        assert_eq!(project.app_id.as_deref(), Some("app_x"));
        assert_eq!(project.env_id.as_deref(), Some("env_y"));
    }
}
