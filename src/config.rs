//! Process configuration from `OVERHAVE_*` environment variables.
//!
//! Everything is read once at startup into [`AppConfig`] and passed down
//! explicitly. [`AppConfig::from_lookup`] takes the variable source as a
//! closure so tests never touch the real environment.
//!
//! | Variable                              | Default                   |
//! |---------------------------------------|---------------------------|
//! | `OVERHAVE_SPOOL_DIR`                  | `./overhave-data/spool`   |
//! | `OVERHAVE_STATE_DIR`                  | `./overhave-data/state`   |
//! | `OVERHAVE_CONSUMER_NAME`              | `worker-<pid>`            |
//! | `OVERHAVE_STREAMS`                    | `test,emulation,publication` |
//! | `OVERHAVE_CLAIM_LEASE_SECS`           | 600                       |
//! | `OVERHAVE_DONE_RETENTION_SECS`        | 86400                     |
//! | `OVERHAVE_PUBLICATION_BACKEND`        | unset (no publishing)     |
//! | `OVERHAVE_STASH_URL` / `_PROJECT_KEY` / `_REPOSITORY_SLUG` | required for stash |
//! | `OVERHAVE_GITLAB_URL` / `_PROJECT_ID` | required for gitlab       |
//! | `OVERHAVE_HTTP_TIMEOUT_SECS`          | 10                        |
//! | `OVERHAVE_TOKENIZER_URL` / `_REMOTE_KEY_NAME` / `_REMOTE_KEY` | unset |
//! | `OVERHAVE_AUTH_TOKEN`                 | unset                     |
//! | `OVERHAVE_TOKEN_TTL_SECS`             | 3600                      |
//! | `OVERHAVE_INITIATOR`                  | `overhave`                |
//! | `OVERHAVE_STATUS_POLL_INTERVAL_SECS`  | 300                       |
//! | `OVERHAVE_FEATURES_DIR`               | unset (no synchronization)|
//! | `OVERHAVE_LANGUAGE`                   | `en`                      |
//! | `OVERHAVE_SYNC_ON_STARTUP`            | `false`                   |
//! | `OVERHAVE_SYNC_CREATE_MISSING`        | `true`                    |
//! | `OVERHAVE_TEST_COMMAND`               | unset                     |
//! | `OVERHAVE_EMULATION_COMMAND`          | unset                     |
//! | `OVERHAVE_COMMAND_TIMEOUT_SECS`       | unset (no limit)          |
//! | `OVERHAVE_HTTP_ADDR`                  | unset (no server)         |
//!
//! Runner tuning variables are listed on [`RunnerConfig`].

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::auth::{TokenValue, TokenizerSettings};
use crate::publication::{GitlabSettings, StashSettings};
use crate::queue::StreamKind;
use crate::sync::Language;
use crate::types::BackendKind;
use crate::worker::{CommandSpec, RunnerConfig};

const DEFAULT_SPOOL_DIR: &str = "./overhave-data/spool";
const DEFAULT_STATE_DIR: &str = "./overhave-data/state";
const DEFAULT_CLAIM_LEASE_SECS: u64 = 600;
const DEFAULT_DONE_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
const DEFAULT_STATUS_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_INITIATOR: &str = "overhave";
const DEFAULT_REMOTE_KEY_NAME: &str = "remote_key";

/// Errors that can occur while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var} ({value:?}): {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Reads single variables from a lookup function, parsing and validating them.
pub(crate) struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    pub(crate) fn new(lookup: F) -> Self {
        Vars { lookup }
    }

    /// The variable's value; empty values count as unset.
    pub(crate) fn string(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn required(&self, var: &'static str) -> Result<String> {
        self.string(var).ok_or(ConfigError::Missing(var))
    }

    pub(crate) fn parse<T>(&self, var: &'static str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(var) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    pub(crate) fn parse_or<T>(&self, var: &'static str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse(var)?.unwrap_or(default))
    }

    pub(crate) fn secs_or(&self, var: &'static str, default: u64) -> Result<Duration> {
        self.parse_or(var, default).map(Duration::from_secs)
    }

    pub(crate) fn millis_or(&self, var: &'static str, default: u64) -> Result<Duration> {
        self.parse_or(var, default).map(Duration::from_millis)
    }

    /// Accepts `true/false`, `1/0`, `yes/no`.
    pub(crate) fn flag_or(&self, var: &'static str, default: bool) -> Result<bool> {
        match self.string(var) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var,
                    value,
                    reason: "expected true or false".into(),
                }),
            },
        }
    }
}

/// Review backend selection with its connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Stash(StashSettings),
    Gitlab(GitlabSettings),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Stash(_) => BackendKind::Stash,
            BackendConfig::Gitlab(_) => BackendKind::Gitlab,
        }
    }
}

/// Where publication tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSourceConfig {
    Static(TokenValue),
    Tokenizer(TokenizerSettings),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spool_dir: PathBuf,
    pub state_dir: PathBuf,
    pub consumer_name: String,
    pub streams: Vec<StreamKind>,
    pub claim_lease: Duration,
    /// How long acknowledged tasks stay on the spool before cleanup.
    pub done_retention: Duration,
    pub runner: RunnerConfig,

    pub backend: Option<BackendConfig>,
    pub token_source: Option<TokenSourceConfig>,
    pub token_ttl: Duration,
    pub initiator: String,
    pub status_poll_interval: Duration,

    pub features_dir: Option<PathBuf>,
    pub language: Language,
    pub sync_on_startup: bool,
    pub sync_create_missing: bool,

    pub test_command: Option<CommandSpec>,
    pub emulation_command: Option<CommandSpec>,
    pub command_timeout: Option<Duration>,

    pub http_addr: Option<SocketAddr>,
}

fn parse_streams(var: &'static str, value: &str) -> Result<Vec<StreamKind>> {
    let mut streams = Vec::new();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = name.parse::<StreamKind>().map_err(|e| ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        if !streams.contains(&kind) {
            streams.push(kind);
        }
    }
    if streams.is_empty() {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "no streams listed".into(),
        });
    }
    Ok(streams)
}

fn parse_command(var: &'static str, vars: &Vars<impl Fn(&str) -> Option<String>>) -> Option<CommandSpec> {
    vars.string(var).and_then(|line| CommandSpec::parse(&line))
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars::new(lookup);

        let streams = match vars.string("OVERHAVE_STREAMS") {
            Some(value) => parse_streams("OVERHAVE_STREAMS", &value)?,
            None => vec![StreamKind::Test, StreamKind::Emulation, StreamKind::Publication],
        };
        let http_timeout = vars.secs_or("OVERHAVE_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        let claim_lease = vars.secs_or("OVERHAVE_CLAIM_LEASE_SECS", DEFAULT_CLAIM_LEASE_SECS)?;

        Ok(AppConfig {
            spool_dir: vars
                .string("OVERHAVE_SPOOL_DIR")
                .unwrap_or_else(|| DEFAULT_SPOOL_DIR.into())
                .into(),
            state_dir: vars
                .string("OVERHAVE_STATE_DIR")
                .unwrap_or_else(|| DEFAULT_STATE_DIR.into())
                .into(),
            consumer_name: vars
                .string("OVERHAVE_CONSUMER_NAME")
                .unwrap_or_else(|| format!("worker-{}", std::process::id())),
            streams,
            claim_lease,
            done_retention: vars.secs_or(
                "OVERHAVE_DONE_RETENTION_SECS",
                DEFAULT_DONE_RETENTION_SECS,
            )?,
            runner: RunnerConfig::from_vars(&vars)?.with_claim_lease(claim_lease),

            backend: Self::backend(&vars, http_timeout)?,
            token_source: Self::token_source(&vars, http_timeout)?,
            token_ttl: vars.secs_or("OVERHAVE_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?,
            initiator: vars
                .string("OVERHAVE_INITIATOR")
                .unwrap_or_else(|| DEFAULT_INITIATOR.into()),
            status_poll_interval: vars.secs_or(
                "OVERHAVE_STATUS_POLL_INTERVAL_SECS",
                DEFAULT_STATUS_POLL_INTERVAL_SECS,
            )?,

            features_dir: vars.string("OVERHAVE_FEATURES_DIR").map(PathBuf::from),
            language: vars.parse_or("OVERHAVE_LANGUAGE", Language::En)?,
            sync_on_startup: vars.flag_or("OVERHAVE_SYNC_ON_STARTUP", false)?,
            sync_create_missing: vars.flag_or("OVERHAVE_SYNC_CREATE_MISSING", true)?,

            test_command: parse_command("OVERHAVE_TEST_COMMAND", &vars),
            emulation_command: parse_command("OVERHAVE_EMULATION_COMMAND", &vars),
            command_timeout: vars
                .parse::<u64>("OVERHAVE_COMMAND_TIMEOUT_SECS")?
                .map(Duration::from_secs),

            http_addr: vars.parse("OVERHAVE_HTTP_ADDR")?,
        })
    }

    fn backend(
        vars: &Vars<impl Fn(&str) -> Option<String>>,
        timeout: Duration,
    ) -> Result<Option<BackendConfig>> {
        let Some(kind) = vars.parse::<BackendKind>("OVERHAVE_PUBLICATION_BACKEND")? else {
            return Ok(None);
        };
        let backend = match kind {
            BackendKind::Stash => BackendConfig::Stash(StashSettings {
                base_url: vars.required("OVERHAVE_STASH_URL")?,
                project_key: vars.required("OVERHAVE_STASH_PROJECT_KEY")?,
                repository_slug: vars.required("OVERHAVE_STASH_REPOSITORY_SLUG")?,
                timeout,
            }),
            BackendKind::Gitlab => BackendConfig::Gitlab(GitlabSettings {
                base_url: vars.required("OVERHAVE_GITLAB_URL")?,
                project_id: vars.required("OVERHAVE_GITLAB_PROJECT_ID")?,
                timeout,
            }),
        };
        Ok(Some(backend))
    }

    /// The tokenizer wins over a static token when both are configured.
    fn token_source(
        vars: &Vars<impl Fn(&str) -> Option<String>>,
        timeout: Duration,
    ) -> Result<Option<TokenSourceConfig>> {
        if let Some(url) = vars.string("OVERHAVE_TOKENIZER_URL") {
            return Ok(Some(TokenSourceConfig::Tokenizer(TokenizerSettings {
                url,
                remote_key_name: vars
                    .string("OVERHAVE_TOKENIZER_REMOTE_KEY_NAME")
                    .unwrap_or_else(|| DEFAULT_REMOTE_KEY_NAME.into()),
                remote_key: vars.required("OVERHAVE_TOKENIZER_REMOTE_KEY")?,
                timeout,
            })));
        }
        Ok(vars
            .string("OVERHAVE_AUTH_TOKEN")
            .map(|token| TokenSourceConfig::Static(TokenValue::new(token))))
    }

    pub fn runs(&self, stream: StreamKind) -> bool {
        self.streams.contains(&stream)
    }
}
