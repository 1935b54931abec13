use std::{env, fs, path::Path, time::Duration};

use crate::{
    backoff::{RetryBackoff, RetryPolicy},
    errors::Error,
    poller::ListenOptions,
    Result,
};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Upper bound for `POLL_SINK_CAPACITY`; tokio rejects bounded channels far
/// below `usize::MAX`.
pub const MAX_SINK_CAPACITY: usize = 1 << 20;

/// Typed configuration for the poller process.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials / endpoint
    pub telegram_bot_token: String,
    pub telegram_api_url: String,

    // Long polling
    pub poll_timeout: Duration,
    pub http_timeout_grace: Duration,

    // Failure handling
    pub conflict_cooldown: Duration,
    pub retry_backoff: RetryBackoff,

    // Consumers
    /// 0 means unbounded sinks.
    pub sink_capacity: usize,
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_of = |key: &str| lookup(key).map(|s| s.trim().to_string());
        let u64_of = |key: &str| -> Result<Option<u64>> {
            match str_of(key).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => s
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| Error::Config(format!("{key}: invalid number {s:?}: {e}"))),
            }
        };

        let telegram_bot_token = str_of("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let telegram_api_url = str_of("TELEGRAM_API_URL")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let poll_timeout = Duration::from_secs(u64_of("POLL_TIMEOUT_SECS")?.unwrap_or(30));
        let http_timeout_grace =
            Duration::from_secs(u64_of("HTTP_TIMEOUT_GRACE_SECS")?.unwrap_or(10));
        if poll_timeout.checked_add(http_timeout_grace).is_none() {
            return Err(Error::Config(
                "POLL_TIMEOUT_SECS + HTTP_TIMEOUT_GRACE_SECS is out of range".to_string(),
            ));
        }
        let conflict_cooldown =
            Duration::from_millis(u64_of("POLL_CONFLICT_COOLDOWN_MS")?.unwrap_or(5_000));

        let retry_backoff = match str_of("POLL_RETRY_BACKOFF")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "" | "exponential" => {
                let initial =
                    Duration::from_millis(u64_of("POLL_RETRY_INITIAL_MS")?.unwrap_or(1_000));
                let max = Duration::from_millis(u64_of("POLL_RETRY_MAX_MS")?.unwrap_or(60_000));
                if initial > max {
                    return Err(Error::Config(
                        "POLL_RETRY_INITIAL_MS must not exceed POLL_RETRY_MAX_MS".to_string(),
                    ));
                }
                RetryBackoff::Exponential { initial, max }
            }
            "none" | "immediate" => RetryBackoff::Immediate,
            other => {
                return Err(Error::Config(format!(
                    "POLL_RETRY_BACKOFF must be `exponential` or `none`, got {other:?}"
                )))
            }
        };

        let sink_capacity = u64_of("POLL_SINK_CAPACITY")?
            .map_or(Some(64), |v| usize::try_from(v).ok())
            .filter(|&v| v <= MAX_SINK_CAPACITY)
            .ok_or_else(|| {
                Error::Config(format!(
                    "POLL_SINK_CAPACITY must be at most {MAX_SINK_CAPACITY}"
                ))
            })?;

        Ok(Self {
            telegram_bot_token,
            telegram_api_url,
            poll_timeout,
            http_timeout_grace,
            conflict_cooldown,
            retry_backoff,
            sink_capacity,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            conflict_cooldown: self.conflict_cooldown,
            backoff: self.retry_backoff,
        }
    }

    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            timeout: self.poll_timeout,
            ..ListenOptions::default()
        }
    }

    /// HTTP request timeout: the long poll plus headroom for the round-trip.
    pub fn http_timeout(&self) -> Duration {
        self.poll_timeout.saturating_add(self.http_timeout_grace)
    }
}

/// Export `.env` entries that are not already set in the environment.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(key).is_none() {
            env::set_var(key, val);
        }
    }
}

/// `KEY=value` pairs in file order; comments, blank and malformed lines skipped.
/// An optional `export ` prefix is accepted.
fn parse_dotenv(contents: &str) -> Vec<(&str, &str)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (k, v) = line.split_once('=')?;
            let key = k.trim();
            (!key.is_empty()).then(|| (key, unquote(v.trim())))
        })
        .collect()
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}
