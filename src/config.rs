use std::{fs, io::ErrorKind, path::Path};

use anyhow::{bail, Context};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::units::{ReportInterval, TimeUnit};

/// Cache file used when none is specified
pub const DEFAULT_CONFIG_FILENAME: &str = ".task_mailer.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Address used to log in to the SMTP server and to send from
    pub email: String,

    /// Name of the task used in the subject and body of every mail
    pub task_name: String,

    /// Comma separated list of addresses to notify
    pub recipients: String,

    pub report_timeout_unit: TimeUnit,

    /// Minimum time between report mails, in `report_timeout_unit`
    pub report_timeout: u32,

    pub port: u16,

    pub smtp_server: String,
}

impl Config {
    pub fn recipient_list(&self) -> Vec<&str> {
        self.recipients
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn report_interval(&self) -> ReportInterval {
        ReportInterval::new(self.report_timeout, self.report_timeout_unit)
    }
}

/// Settings as they are stored between runs, any of them may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_timeout_unit: Option<TimeUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_server: Option<String>,
}

impl ConfigCache {
    /// Loads the cache, a missing file is treated as an empty cache
    pub fn load_from(config_path: &Path) -> anyhow::Result<ConfigCache> {
        debug!("Loading config cache from: {config_path:?}");
        let file_contents = match fs::read_to_string(config_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config cache found at {config_path:?}, starting empty");
                return Ok(Default::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read contents of {config_path:?}"))
            }
        };
        let result = serde_json::from_str(&file_contents)
            .with_context(|| format!("Failed to parse contents of {config_path:?}"))?;
        Ok(result)
    }

    pub fn store_to(&self, config_path: &Path) -> anyhow::Result<()> {
        debug!("Storing config cache to: {config_path:?}");
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .context("Failed to serialize config cache")?;
        fs::write(config_path, buf)
            .with_context(|| format!("Failed to write config cache to {config_path:?}"))?;
        Ok(())
    }
}

impl From<&Config> for ConfigCache {
    fn from(value: &Config) -> Self {
        Self {
            email: Some(value.email.clone()),
            task_name: Some(value.task_name.clone()),
            recipients: Some(value.recipients.clone()),
            report_timeout_unit: Some(value.report_timeout_unit),
            report_timeout: Some(value.report_timeout),
            port: Some(value.port),
            smtp_server: Some(value.smtp_server.clone()),
        }
    }
}

impl TryFrom<ConfigCache> for Config {
    type Error = anyhow::Error;

    fn try_from(value: ConfigCache) -> Result<Self, Self::Error> {
        fn require<T>(field: Option<T>, name: &str) -> anyhow::Result<T> {
            match field {
                Some(val) => Ok(val),
                None => bail!("Cached config is missing {name:?}. Run interactively to set it"),
            }
        }

        let email = require(value.email, "email")?;
        let task_name = require(value.task_name, "task_name")?;
        let recipients = value.recipients.unwrap_or_else(|| email.clone());
        let report_timeout_unit = value.report_timeout_unit.unwrap_or_default();
        let report_timeout = value
            .report_timeout
            .unwrap_or_else(|| report_timeout_unit.default_amount());
        let port = value.port.unwrap_or(crate::setup::DEFAULT_PORT);
        let smtp_server = require(value.smtp_server, "smtp_server")?;
        if report_timeout == 0 {
            bail!("Cached report_timeout must be positive");
        }
        Ok(Self {
            email,
            task_name,
            recipients,
            report_timeout_unit,
            report_timeout,
            port,
            smtp_server,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_config() -> Config {
        Config {
            email: "me@example.com".to_string(),
            task_name: "training".to_string(),
            recipients: "me@example.com, you@example.org".to_string(),
            report_timeout_unit: TimeUnit::Minutes,
            report_timeout: 30,
            port: 465,
            smtp_server: "smtp.example.com".to_string(),
        }
    }

    #[test]
    fn missing_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let actual = ConfigCache::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(actual, ConfigCache::default());
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILENAME);
        let expected = ConfigCache::from(&sample_config());

        expected.store_to(&path).unwrap();
        let actual = ConfigCache::load_from(&path).unwrap();

        assert_eq!(actual, expected);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"email\": \"me@example.com\""), "{text}");
        assert!(text.contains("\"report_timeout_unit\": \"m\""), "{text}");
        assert!(!text.contains("password"));
    }

    #[test]
    fn partial_cache_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{"email": "me@example.com", "port": 587}"#).unwrap();

        let actual = ConfigCache::load_from(&path).unwrap();

        assert_eq!(actual.email.as_deref(), Some("me@example.com"));
        assert_eq!(actual.port, Some(587));
        assert_eq!(actual.smtp_server, None);
    }

    #[test]
    fn corrupt_cache_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ConfigCache::load_from(&path).unwrap_err();

        assert!(format!("{err}").contains("broken.json"), "{err}");
    }

    #[test]
    fn config_from_partial_cache_fills_defaults() {
        let cache = ConfigCache {
            email: Some("me@example.com".into()),
            task_name: Some("job".into()),
            smtp_server: Some("smtp.example.com".into()),
            ..Default::default()
        };

        let actual = Config::try_from(cache).unwrap();

        assert_eq!(actual.recipients, "me@example.com");
        assert_eq!(actual.report_timeout_unit, TimeUnit::Hours);
        assert_eq!(actual.report_timeout, 24);
        assert_eq!(actual.port, 465);
    }

    #[test]
    fn config_from_cache_requires_server() {
        let cache = ConfigCache {
            email: Some("me@example.com".into()),
            task_name: Some("job".into()),
            ..Default::default()
        };

        let err = Config::try_from(cache).unwrap_err();

        assert!(format!("{err}").contains("smtp_server"), "{err}");
    }

    #[test]
    fn cached_zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.json");
        fs::write(
            &path,
            r#"{
                "email": "me@example.com",
                "task_name": "job",
                "smtp_server": "smtp.example.com",
                "report_timeout": 0
            }"#,
        )
        .unwrap();
        let cache = ConfigCache::load_from(&path).unwrap();
        assert_eq!(cache.report_timeout, Some(0));

        let err = Config::try_from(cache).unwrap_err();

        assert!(format!("{err}").contains("report_timeout"), "{err}");
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        let config = sample_config();
        assert_eq!(
            config.recipient_list(),
            vec!["me@example.com", "you@example.org"]
        );
    }
}
