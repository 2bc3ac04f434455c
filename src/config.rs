use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Optional settings file looked up in the current directory.
pub const CONFIG_FILE: &str = ".evergreen-tools.toml";

pub const APP_ID_VAR: &str = "GITHUB_APP_ID";
pub const PRIVATE_KEY_VAR: &str = "GITHUB_SECRET_KEY";
pub const API_URL_VAR: &str = "GITHUB_API_URL";
pub const INSTALL_ID_PREFIX: &str = "GITHUB_APP_INSTALL_ID_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing GitHub App auth information: {0} is not set")]
    MissingCredential(&'static str),

    #[error("Missing install id for {owner} ({var} is not set)")]
    MissingInstallationId { owner: String, var: String },

    #[error("Invalid install id in {var}: {value:?}")]
    InvalidInstallationId { var: String, value: String },
}

/// Settings read from the optional TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub github: GitHubSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitHubSettings {
    /// REST API base URL, without trailing slash.
    pub api_url: String,
    /// Value of the `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Value of the `x-github-api-version` header.
    pub api_version: String,
    /// Host that checkout remotes must point at.
    pub host: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            user_agent: "evergreen-tools".to_string(),
            api_version: "2022-11-28".to_string(),
            host: "github.com".to_string(),
        }
    }
}

/// PEM-encoded RSA key of the GitHub App. Never printed.
#[derive(Clone)]
pub struct PrivateKey(String);

impl PrivateKey {
    /// Keys stored in CI secrets often carry literal `\n` escapes instead of
    /// line breaks; those are turned back into newlines here.
    pub fn from_env_value(raw: &str) -> Self {
        Self(raw.replace("\\n", "\n"))
    }

    pub fn pem(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub private_key: PrivateKey,
}

/// Everything the tools need from the environment, validated up front and
/// passed explicitly from then on.
#[derive(Debug, Clone)]
pub struct Config {
    pub github: GitHubSettings,
    pub credentials: AppCredentials,
    installation_ids: HashMap<String, String>,
}

impl Config {
    /// Load `.evergreen-tools.toml` (if present) and the process environment.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(CONFIG_FILE);
        let file = if path.exists() {
            FileConfig::load_from(path)?
        } else {
            FileConfig::default()
        };
        Self::from_vars(file, std::env::vars())
    }

    /// Build a config from file settings and an explicit set of variables.
    pub fn from_vars<I>(file: FileConfig, vars: I) -> Result<Config, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();

        let app_id = vars
            .get(APP_ID_VAR)
            .ok_or(ConfigError::MissingCredential(APP_ID_VAR))?
            .trim()
            .to_string();
        let private_key = vars
            .get(PRIVATE_KEY_VAR)
            .map(|raw| PrivateKey::from_env_value(raw))
            .ok_or(ConfigError::MissingCredential(PRIVATE_KEY_VAR))?;

        let mut github = file.github;
        if let Some(api_url) = vars.get(API_URL_VAR) {
            github.api_url = api_url.clone();
        }
        github.api_url = github.api_url.trim_end_matches('/').to_string();

        let installation_ids = vars
            .into_iter()
            .filter(|(name, _)| name.starts_with(INSTALL_ID_PREFIX))
            .collect();

        Ok(Config {
            github,
            credentials: AppCredentials {
                app_id,
                private_key,
            },
            installation_ids,
        })
    }

    /// Installation id registered for `owner`, read from
    /// `GITHUB_APP_INSTALL_ID_<OWNER>`. The plain upper-cased owner name is
    /// accepted too, so `GITHUB_APP_INSTALL_ID_MONGODB-LABS` still resolves.
    pub fn installation_id(&self, owner: &str) -> Result<u64, ConfigError> {
        let var = installation_var(owner);
        let literal = format!("{INSTALL_ID_PREFIX}{}", owner.to_uppercase());
        let (var, value) = [var.clone(), literal]
            .into_iter()
            .find_map(|name| {
                let value = self.installation_ids.get(&name)?;
                Some((name, value))
            })
            .ok_or_else(|| ConfigError::MissingInstallationId {
                owner: owner.to_string(),
                var,
            })?;
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidInstallationId {
                var,
                value: value.clone(),
            })
    }
}

impl FileConfig {
    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

/// Name of the installation-id variable for an owner. Characters that cannot
/// appear in a variable name (the `-` in `mongodb-labs`) become `_`.
pub fn installation_var(owner: &str) -> String {
    let suffix: String = owner
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{INSTALL_ID_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_settings() {
        let config = FileConfig::default();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.api_version, "2022-11-28");
        assert_eq!(config.github.host, "github.com");
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[github]
api_url = "https://ghe.example.com/api/v3"
host = "ghe.example.com"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.github.api_url, "https://ghe.example.com/api/v3");
        assert_eq!(config.github.host, "ghe.example.com");
        // Unset keys keep their defaults.
        assert_eq!(config.github.user_agent, "evergreen-tools");
    }

    #[test]
    fn test_private_key_newlines_are_normalised() {
        let config = Config::from_vars(
            FileConfig::default(),
            vars(&[
                ("GITHUB_APP_ID", "1234"),
                ("GITHUB_SECRET_KEY", "-----BEGIN-----\\nabc\\n-----END-----"),
            ]),
        )
        .unwrap();
        assert_eq!(
            config.credentials.private_key.pem(),
            b"-----BEGIN-----\nabc\n-----END-----"
        );
        assert!(!format!("{config:?}").contains("abc"));
    }

    #[test]
    fn test_missing_private_key() {
        let err = Config::from_vars(FileConfig::default(), vars(&[("GITHUB_APP_ID", "1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("GITHUB_SECRET_KEY")));
    }

    #[test]
    fn test_empty_app_id_counts_as_missing() {
        let err = Config::from_vars(
            FileConfig::default(),
            vars(&[("GITHUB_APP_ID", ""), ("GITHUB_SECRET_KEY", "key")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("GITHUB_APP_ID")));
    }

    #[test]
    fn test_installation_id_per_owner() {
        let config = Config::from_vars(
            FileConfig::default(),
            vars(&[
                ("GITHUB_APP_ID", "1"),
                ("GITHUB_SECRET_KEY", "key"),
                ("GITHUB_APP_INSTALL_ID_MONGODB", "42"),
                ("GITHUB_APP_INSTALL_ID_MONGODB_LABS", "43"),
                ("GITHUB_APP_INSTALL_ID_BROKEN", "nope"),
            ]),
        )
        .unwrap();
        assert_eq!(config.installation_id("mongodb").unwrap(), 42);
        assert_eq!(config.installation_id("mongodb-labs").unwrap(), 43);
        assert!(matches!(
            config.installation_id("someone-else"),
            Err(ConfigError::MissingInstallationId { .. })
        ));
        assert!(matches!(
            config.installation_id("broken"),
            Err(ConfigError::InvalidInstallationId { .. })
        ));
    }

    #[test]
    fn test_installation_id_falls_back_to_plain_uppercase() {
        let config = Config::from_vars(
            FileConfig::default(),
            vars(&[
                ("GITHUB_APP_ID", "1"),
                ("GITHUB_SECRET_KEY", "key"),
                ("GITHUB_APP_INSTALL_ID_MONGODB-LABS", "44"),
            ]),
        )
        .unwrap();
        assert_eq!(config.installation_id("mongodb-labs").unwrap(), 44);

        let err = config.installation_id("other-org").unwrap_err();
        assert!(err.to_string().contains("GITHUB_APP_INSTALL_ID_OTHER_ORG"));
    }

    #[test]
    fn test_installation_id_prefers_sanitised_name() {
        let config = Config::from_vars(
            FileConfig::default(),
            vars(&[
                ("GITHUB_APP_ID", "1"),
                ("GITHUB_SECRET_KEY", "key"),
                ("GITHUB_APP_INSTALL_ID_MONGODB_LABS", "43"),
                ("GITHUB_APP_INSTALL_ID_MONGODB-LABS", "44"),
            ]),
        )
        .unwrap();
        assert_eq!(config.installation_id("mongodb-labs").unwrap(), 43);
    }

    #[test]
    fn test_api_url_env_override() {
        let config = Config::from_vars(
            FileConfig::default(),
            vars(&[
                ("GITHUB_APP_ID", "1"),
                ("GITHUB_SECRET_KEY", "key"),
                ("GITHUB_API_URL", "http://127.0.0.1:9000/"),
            ]),
        )
        .unwrap();
        assert_eq!(config.github.api_url, "http://127.0.0.1:9000");
    }
}
