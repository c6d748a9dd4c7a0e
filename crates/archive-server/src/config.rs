use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

use archive_sync::SyncConfig;
use archive_sync::config::{DEFAULT_RECENT_DAYS, DEFAULT_SYNC_INTERVAL, DEFAULT_WORK_JITTER};
use archive_sync::http::DEFAULT_API_URL;
use archive_types::Credential;

#[derive(Debug)]
pub struct Config {
    pub credentials: Vec<Credential>,
    pub db_path: PathBuf,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let credentials = parse_tokens(&lookup("ARCHIVE_TOKENS").unwrap_or_default());
        if credentials.is_empty() {
            bail!("ARCHIVE_TOKENS must list at least one bot-token:oauth-token pair");
        }

        let db_path = lookup("ARCHIVE_DB_PATH")
            .unwrap_or_else(|| "slack-archive.db".into())
            .into();

        // Non-positive values fall back to the defaults
        let interval = positive(&lookup, "ARCHIVE_SYNC_INTERVAL_MINUTES")
            .map(|m| Duration::from_secs(m as u64 * 60))
            .unwrap_or(DEFAULT_SYNC_INTERVAL);
        let recent_days = positive(&lookup, "ARCHIVE_SYNC_RECENT_DAYS").unwrap_or(DEFAULT_RECENT_DAYS);
        let work_jitter = lookup("ARCHIVE_WORK_JITTER_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WORK_JITTER);
        let api_url = lookup("ARCHIVE_SLACK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());

        Ok(Self {
            credentials,
            db_path,
            sync: SyncConfig {
                interval,
                recent_days,
                work_jitter,
                api_url,
            },
        })
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<i64> {
    lookup(key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
}

/// `bot:oauth,bot2:oauth2`. A lone token is used for both.
fn parse_tokens(raw: &str) -> Vec<Credential> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once(':') {
            Some((bot, oauth)) => Credential::new(bot.trim(), oauth.trim()),
            None => Credential::new(pair, pair),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("ARCHIVE_TOKENS", "xoxb-1:xoxp-1")]).unwrap();
        assert_eq!(config.credentials, vec![Credential::new("xoxb-1", "xoxp-1")]);
        assert_eq!(config.db_path, PathBuf::from("slack-archive.db"));
        assert_eq!(config.sync.interval, Duration::from_secs(3600));
        assert_eq!(config.sync.recent_days, 30);
        assert_eq!(config.sync.work_jitter, Duration::from_secs(2));
        assert_eq!(config.sync.api_url, "https://slack.com/api");
    }

    #[test]
    fn test_token_pairs_keep_order() {
        let config = load(&[("ARCHIVE_TOKENS", " xoxb-1:xoxp-1 , xoxb-2 ,")]).unwrap();
        assert_eq!(
            config.credentials,
            vec![
                Credential::new("xoxb-1", "xoxp-1"),
                Credential::new("xoxb-2", "xoxb-2"),
            ]
        );
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = load(&[
            ("ARCHIVE_TOKENS", "t"),
            ("ARCHIVE_SYNC_INTERVAL_MINUTES", "0"),
            ("ARCHIVE_SYNC_RECENT_DAYS", "soon"),
            ("ARCHIVE_WORK_JITTER_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.sync.interval, Duration::from_secs(3600));
        assert_eq!(config.sync.recent_days, 30);
        assert_eq!(config.sync.work_jitter, Duration::from_millis(250));
    }

    #[test]
    fn test_tokens_required() {
        assert!(load(&[]).is_err());
        assert!(load(&[("ARCHIVE_TOKENS", " , ")]).is_err());
    }
}
