use failure::{Error, ResultExt};
use sec::Secret;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The dashboard's configuration, normally loaded from a TOML file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub github: GitHubConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());

        let src = fs::read_to_string(path)
            .with_context(|_| format!("Unable to read {}", path.display()))?;

        Config::from_toml(&src)
    }

    pub fn from_toml(src: &str) -> Result<Config, Error> {
        let cfg = toml::from_str(src).context("Invalid config")?;
        Ok(cfg)
    }

    /// An example config with every field filled in.
    pub fn example() -> Config {
        Config {
            github: GitHubConfig {
                token: Secret::new(String::from("your-api-token")),
                ..Default::default()
            },
            dashboard: DashboardConfig {
                profiles: Some(PathBuf::from("~/.repo-dashboard/profiles.toml")),
                ..Default::default()
            },
        }
    }

    pub fn as_toml(&self) -> Result<String, Error> {
        let src = toml::to_string_pretty(self).context("Unable to serialize the config")?;
        Ok(src)
    }

    /// The API token used to authenticate with GitHub.
    pub fn credential(&self) -> &str {
        self.github.token.reveal_str()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct GitHubConfig {
    /// Base URL of the GitHub REST API.
    pub host: String,
    pub user_agent: String,
    pub token: Secret<String>,
    /// What to do with a repository record that is missing fields.
    pub on_malformed: MalformedPolicy,
    /// Request timeout in seconds. `0` disables the timeout.
    pub timeout_secs: u64,
}

impl GitHubConfig {
    pub const DEFAULT_HOST: &'static str = "https://api.github.com";
    pub const DEFAULT_AGENT: &'static str = "repo-dashboard";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> GitHubConfig {
        GitHubConfig {
            host: GitHubConfig::DEFAULT_HOST.to_string(),
            user_agent: GitHubConfig::DEFAULT_AGENT.to_string(),
            token: Secret::new(String::new()),
            on_malformed: MalformedPolicy::default(),
            timeout_secs: GitHubConfig::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// How to handle a response element which doesn't have the expected shape
/// (e.g. a repository with no owner).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedPolicy {
    /// Log a warning and leave the element out of the list.
    Skip,
    /// Fail the entire fetch.
    Fail,
}

impl Default for MalformedPolicy {
    fn default() -> MalformedPolicy {
        MalformedPolicy::Skip
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DashboardConfig {
    /// How long to wait before the activity panel is shown.
    pub activity_delay_ms: u64,
    /// The TOML document holding user profiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<PathBuf>,
}

impl DashboardConfig {
    pub const DEFAULT_ACTIVITY_DELAY_MS: u64 = 5000;

    pub fn activity_delay(&self) -> Duration {
        Duration::from_millis(self.activity_delay_ms)
    }
}

impl Default for DashboardConfig {
    fn default() -> DashboardConfig {
        DashboardConfig {
            activity_delay_ms: DashboardConfig::DEFAULT_ACTIVITY_DELAY_MS,
            profiles: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn example_config_is_valid() {
        let example = Config::example();
        let src = example.as_toml().unwrap();

        let got = Config::from_toml(&src).unwrap();

        assert_eq!(got.github.host, GitHubConfig::DEFAULT_HOST);
        assert_eq!(got.credential(), "your-api-token");
        assert_eq!(got.dashboard, example.dashboard);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let src = r#"
            [github]
            token = "abc123"
        "#;

        let got = Config::from_toml(src).unwrap();

        assert_eq!(got.credential(), "abc123");
        assert_eq!(got.github.user_agent, GitHubConfig::DEFAULT_AGENT);
        assert_eq!(got.github.on_malformed, MalformedPolicy::Skip);
        assert_eq!(got.github.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(got.dashboard.activity_delay(), Duration::from_secs(5));
        assert!(got.dashboard.profiles.is_none());
    }

    #[test]
    fn read_the_malformed_policy_and_delay() {
        let src = r#"
            [github]
            on-malformed = "fail"
            timeout-secs = 0

            [dashboard]
            activity-delay-ms = 250
        "#;

        let got = Config::from_toml(src).unwrap();

        assert_eq!(got.github.on_malformed, MalformedPolicy::Fail);
        assert_eq!(got.github.timeout(), None);
        assert_eq!(got.dashboard.activity_delay(), Duration::from_millis(250));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let src = r#"
            [github]
            api-key = "oops"
        "#;

        assert!(Config::from_toml(src).is_err());
    }

    #[test]
    fn load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[github]\nhost = \"http://localhost:1234\"").unwrap();

        let got = Config::from_file(file.path()).unwrap();

        assert_eq!(got.github.host, "http://localhost:1234");
    }
}
