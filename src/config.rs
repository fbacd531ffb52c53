//! Configuration types.
//!
//! Everything is read once at startup into an immutable [`AppConfig`] and
//! handed to each component at construction.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Suffixes excluded when `EXCLUDE_DOMAINS` is unset.
pub const DEFAULT_EXCLUDE_DOMAINS: &str = "@reyoungh.com,@reyoung.com";

/// Priority-region CC list used when `PRIORITY_CC_LIST` is unset.
pub const DEFAULT_PRIORITY_CC_LIST: &str = "reyoung@reyoung.com,liu.yongjun@reyoungh.com";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_CLASSIFIER_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_CLASSIFIER_MODEL: &str = "deepseek-chat";
const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 30;

/// Mailbox (retrieve side) settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    /// Folder swept for unseen messages.
    pub folder: String,
    /// Destination for discarded messages.
    pub trash_folder: String,
}

/// Send-server settings. `user` doubles as the From address.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
}

/// Classification-service settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub classifier: ClassifierConfig,
    pub poll_interval: Duration,
    /// CC list for standard auto-replies.
    pub cc_list: Vec<String>,
    /// CC list for priority-region auto-replies.
    pub priority_cc_list: Vec<String>,
    /// Exact excluded sender addresses, lowercased.
    pub exclude_addresses: Vec<String>,
    /// Excluded sender suffixes, lowercased.
    pub exclude_domains: Vec<String>,
    /// Directory for the rotating log file.
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let imap = ImapConfig {
            host: required(&lookup, "IMAP_HOST")?,
            port: parsed(&lookup, "IMAP_PORT", 993)?,
            user: required(&lookup, "IMAP_USER")?,
            password: SecretString::from(lookup("IMAP_PASSWORD").unwrap_or_default()),
            folder: non_empty(&lookup, "IMAP_FOLDER").unwrap_or_else(|| "INBOX".to_string()),
            trash_folder: non_empty(&lookup, "TRASH_FOLDER").unwrap_or_else(|| "Trash".to_string()),
        };

        let smtp = SmtpConfig {
            host: required(&lookup, "SMTP_HOST")?,
            port: parsed(&lookup, "SMTP_PORT", 465)?,
            user: required(&lookup, "SMTP_USER")?,
            password: SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default()),
        };

        let classifier = ClassifierConfig {
            api_key: SecretString::from(required(&lookup, "DEEPSEEK_API_KEY")?),
            base_url: non_empty(&lookup, "DEEPSEEK_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_BASE_URL.to_string()),
            model: non_empty(&lookup, "DEEPSEEK_MODEL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.to_string()),
            timeout: Duration::from_secs(parsed(
                &lookup,
                "CLASSIFIER_TIMEOUT_SECS",
                DEFAULT_CLASSIFIER_TIMEOUT_SECS,
            )?),
        };

        let poll_secs: u64 = parsed(&lookup, "POLLING_INTERVAL", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLLING_INTERVAL".into(),
                message: "must be at least 1 second".into(),
            });
        }

        Ok(Self {
            imap,
            smtp,
            classifier,
            poll_interval: Duration::from_secs(poll_secs),
            cc_list: split_list(&lookup("CC_LIST").unwrap_or_default()),
            priority_cc_list: split_list(
                &lookup("PRIORITY_CC_LIST").unwrap_or_else(|| DEFAULT_PRIORITY_CC_LIST.to_string()),
            ),
            exclude_addresses: lowercase(split_list(&lookup("EXCLUDE_ADDRESSES").unwrap_or_default())),
            exclude_domains: lowercase(split_list(
                &lookup("EXCLUDE_DOMAINS").unwrap_or_else(|| DEFAULT_EXCLUDE_DOMAINS.to_string()),
            )),
            log_dir: non_empty(&lookup, "MAIL_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
        })
    }
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn lowercase(items: Vec<String>) -> Vec<String> {
    items.into_iter().map(|s| s.to_lowercase()).collect()
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
