use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::poller::PollPolicy;

pub const ENV_BASE_URL: &str = "API_BASE_URL";
pub const ENV_AUTH_KEY: &str = "API_AUTH_KEY";
pub const ENV_LEGACY_AUTH_KEY: &str = "FINCHAT_AUTH_KEY";

const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 120;

/// Credentials files checked in order; the first one that exists is used.
pub fn default_credentials_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("../credentials.txt"),
        PathBuf::from("./credentials.txt"),
        PathBuf::from("credentials.txt"),
    ]
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub auth_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("auth_key", &self.auth_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where each credential layer comes from. Lookups are injected so the
/// precedence rules can be exercised without touching the process env.
pub struct CredentialSources<'a> {
    pub base_url: Option<String>,
    pub auth_key: Option<String>,
    pub env: &'a dyn Fn(&str) -> Option<String>,
    pub files: Vec<PathBuf>,
    /// Accept a missing auth key (gateways running without auth).
    pub allow_anonymous: bool,
}

pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl<'a> CredentialSources<'a> {
    pub fn from_process(base_url: Option<String>, auth_key: Option<String>) -> Self {
        Self {
            base_url,
            auth_key,
            env: &process_env,
            files: default_credentials_paths(),
            allow_anonymous: false,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_credentials_file(paths: &[PathBuf]) -> Option<(PathBuf, HashMap<String, String>)> {
    let path = paths.iter().find(|path| path.is_file())?;
    let entries = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to open credentials file"
            );
            return None;
        }
    };
    let mut values = HashMap::new();
    for entry in entries {
        match entry {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "skipping unparsable credentials line"
                );
            }
        }
    }
    Some((path.clone(), values))
}

/// Resolves the base URL and auth key.
///
/// Each field is taken from the first layer that provides it: explicit
/// argument, then environment, then the credentials file.
pub fn resolve_credentials(sources: CredentialSources<'_>) -> ClientResult<Credentials> {
    let env = sources.env;
    let mut base_url = non_empty(sources.base_url)
        .or_else(|| non_empty(env(ENV_BASE_URL)));
    let mut auth_key = non_empty(sources.auth_key)
        .or_else(|| non_empty(env(ENV_AUTH_KEY)))
        .or_else(|| non_empty(env(ENV_LEGACY_AUTH_KEY)));

    if base_url.is_none() || auth_key.is_none() {
        if let Some((path, values)) = read_credentials_file(&sources.files) {
            tracing::debug!(path = %path.display(), "reading credentials file");
            if base_url.is_none() {
                base_url = non_empty(values.get(ENV_BASE_URL).cloned());
            }
            if auth_key.is_none() {
                auth_key = non_empty(values.get(ENV_AUTH_KEY).cloned());
            }
        }
    }

    let base_url = base_url.ok_or(ClientError::CredentialsMissing {
        missing: ENV_BASE_URL,
    })?;
    if auth_key.is_none() && !sources.allow_anonymous {
        return Err(ClientError::CredentialsMissing {
            missing: ENV_AUTH_KEY,
        });
    }

    Ok(Credentials {
        base_url: normalize_base_url(&base_url)?,
        auth_key,
    })
}

pub fn normalize_base_url(raw: &str) -> ClientResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed)
        .map_err(|err| ClientError::validation(format!("invalid base URL '{trimmed}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ClientError::validation(format!(
            "base URL must be http(s), got '{trimmed}'"
        )));
    }
    Ok(trimmed.to_string())
}

/// Client tuning, built once at program start and passed explicitly.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub http_timeout: Duration,
    pub poll: PollPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
            poll: PollPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = non_empty(env(key))?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let timeout = env_parse::<u64>(env, "FORECAST_HTTP_TIMEOUT_SECS");
        if let Some(secs) = timeout.filter(|v| *v != 0) {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>(env, "FORECAST_POLL_INTERVAL_SECS") {
            config.poll.interval = Duration::from_secs(secs);
        }
        let backoff = env_parse::<f64>(env, "FORECAST_POLL_BACKOFF");
        if let Some(factor) = backoff.filter(|v| *v >= 1.0) {
            config.poll.backoff = factor;
        }
        if let Some(secs) = env_parse::<u64>(env, "FORECAST_POLL_MAX_INTERVAL_SECS") {
            config.poll.max_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>(env, "FORECAST_POLL_DEADLINE_SECS") {
            config.poll.deadline = if secs == 0 {
                None
            } else {
                Some(Duration::from_secs(secs))
            };
        }
        config
    }
}

/// Loads `.env` into the process environment when present.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}
