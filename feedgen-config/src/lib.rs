//! Loader for the feed generator's configuration: optional YAML file,
//! `FEEDGEN__`-prefixed environment overrides, `${VAR}` expansion, then the
//! fixed deployment variables (`BLUESKY_USERNAME`, `BLUESKY_PASSWORD`, `PORT`,
//! `HOST`) on top.
//!
//! Every field has a default, so an empty configuration is valid; only the
//! credentials are mandatory and they are checked by [`FeedgenConfig::credentials`].
//!
//! ```yaml
//! server:
//!   port: 3000
//! feed:
//!   hostname: feeds.example.org
//! assembler:
//!   max_items: 50
//!   pinned_uri: at://did:plc:me/app.bsky.feed.post/3kabc
//! sources:
//!   search_terms: ["PrEP", "#gayhealth"]
//! relevance:
//!   policy: curated
//! ```
use config::{Config, Environment, File, FileFormat};
use feedgen_common::redact_presence;
use feedgen_feed::{AssemblerConfig, RelevanceConfig, SourcesConfig, ThrottleConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

pub const ENV_PREFIX: &str = "FEEDGEN";
pub const USERNAME_ENV: &str = "BLUESKY_USERNAME";
pub const PASSWORD_ENV: &str = "BLUESKY_PASSWORD";
pub const PORT_ENV: &str = "PORT";
pub const HOST_ENV: &str = "HOST";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<&'static str>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedgenConfig {
    pub server: ServerConfig,
    pub bluesky: BlueskyConfig,
    pub feed: FeedDescriptor,
    pub relevance: RelevanceConfig,
    pub sources: SourcesConfig,
    pub assembler: AssemblerConfig,
    pub throttle: ThrottleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Account the generator reads the network as. Normally supplied through
/// `BLUESKY_USERNAME` / `BLUESKY_PASSWORD` rather than a file.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueskyConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for BlueskyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueskyConfig")
            .field("username", &self.username)
            .field("password", &redact_presence(self.password.as_deref()))
            .finish()
    }
}

/// Validated account credentials.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
}

/// How the feed is published: the `did:web` host and the generator record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedDescriptor {
    pub hostname: String,
    pub rkey: String,
    pub display_name: String,
    pub description: String,
}

impl Default for FeedDescriptor {
    fn default() -> Self {
        Self {
            hostname: "gay-mens-health-feed-bsky-818b50b09c03.herokuapp.com".into(),
            rkey: "gay-mens-health".into(),
            display_name: "Gay Men's Health".into(),
            description: "A feed focused on gay men's health topics, including physical health, \
                          mental wellness, sexual health, and preventive care."
                .into(),
        }
    }
}

impl FeedDescriptor {
    pub fn did(&self) -> String {
        format!("did:web:{}", self.hostname)
    }

    pub fn service_endpoint(&self) -> String {
        format!("https://{}", self.hostname)
    }

    pub fn feed_uri(&self) -> String {
        format!("at://{}/app.bsky.feed.generator/{}", self.did(), self.rkey)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the rolling file sink; `FEEDGEN_LOG_DIR` when unset.
    pub dir: Option<PathBuf>,
    /// `text` or `json`; `FEEDGEN_LOG_FORMAT` when unset.
    pub format: Option<String>,
    /// Filter used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            format: None,
            filter: "info".into(),
        }
    }
}

impl FeedgenConfig {
    /// Overlay the fixed deployment variables. Blank values count as unset.
    pub fn apply_fixed_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(username) = read(USERNAME_ENV) {
            self.bluesky.username = Some(username);
        }
        if let Some(password) = read(PASSWORD_ENV) {
            self.bluesky.password = Some(password);
        }
        if let Some(host) = read(HOST_ENV) {
            self.server.host = host;
        }
        if let Some(port) = read(PORT_ENV) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{PORT_ENV}={port:?} is not a port")))?;
        }
        Ok(())
    }

    /// Both credentials, or every missing variable by name.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let present = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_string);
        let identifier = present(&self.bluesky.username);
        let password = present(&self.bluesky.password);

        match (identifier, password) {
            (Some(identifier), Some(password)) => Ok(Credentials {
                identifier,
                password,
            }),
            (identifier, password) => {
                let mut missing = Vec::new();
                if identifier.is_none() {
                    missing.push(USERNAME_ENV);
                }
                if password.is_none() {
                    missing.push(PASSWORD_ENV);
                }
                Err(ConfigError::MissingEnv(missing))
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.hostname must not be empty".into()));
        }
        if self.feed.rkey.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.rkey must not be empty".into()));
        }
        if self.assembler.max_items == 0 {
            return Err(ConfigError::Invalid("assembler.max_items must be at least 1".into()));
        }
        Ok(())
    }

    /// Startup summary safe to log: secrets are reduced to `(set)` / `(not set)`.
    pub fn redacted_summary(&self) -> Value {
        json!({
            "server": { "host": self.server.host, "port": self.server.port },
            "environment": {
                USERNAME_ENV: redact_presence(self.bluesky.username.as_deref()),
                PASSWORD_ENV: redact_presence(self.bluesky.password.as_deref()),
            },
            "feed": { "did": self.feed.did(), "uri": self.feed.feed_uri() },
            "relevance_policy": self.relevance.policy,
            "sources": {
                "timeline": self.sources.timeline,
                "authors": self.sources.authors.len(),
                "search_terms": self.sources.search_terms.len(),
            },
            "max_items": self.assembler.max_items,
            "pinned": self.assembler.pinned_uri.is_some(),
            "cache": self.assembler.cache.then_some(self.assembler.cache_capacity),
            "failure_policy": self.assembler.failure_policy,
        })
    }
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder over the `config` crate wiring. Files and inline snippets are
/// merged in the order added; `FEEDGEN__` environment overrides always win
/// over them, and the fixed deployment variables win over everything.
pub struct FeedgenConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    env_prefix: Option<&'static str>,
    fixed_env: bool,
}

impl Default for FeedgenConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedgenConfigLoader {
    /// ```
    /// use feedgen_config::FeedgenConfigLoader;
    ///
    /// let config = FeedgenConfigLoader::new()
    ///     .without_env()
    ///     .with_yaml_str("server:\n  port: 8080\nassembler:\n  max_items: 20")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.server.port, 8080);
    /// assert_eq!(config.server.host, "0.0.0.0");
    /// assert_eq!(config.assembler.max_items, 20);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
            env_prefix: Some(ENV_PREFIX),
            fixed_env: true,
        }
    }

    /// Skip every environment source. Used by tests and doc examples.
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self.fixed_env = false;
        self
    }

    /// Attach a YAML/TOML/JSON file; the `config` crate infers format by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Like [`Self::with_file`] but a missing file is skipped.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, FileFormat::Yaml));
        self
    }

    /// Merge the sources, expand `${VAR}` placeholders and deserialize.
    pub fn load(self) -> Result<FeedgenConfig, ConfigError> {
        let mut builder = self.builder;
        if let Some(prefix) = self.env_prefix {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("sources.search_terms")
                    .with_list_parse_key("sources.authors")
                    .with_list_parse_key("relevance.topics")
                    .with_list_parse_key("relevance.health_terms")
                    .with_list_parse_key("relevance.identity_terms")
                    .with_list_parse_key("relevance.phrases"),
            );
        }
        let cfg = builder.build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let mut typed: FeedgenConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.fixed_env {
            typed.apply_fixed_env(|key| std::env::var(key).ok())?;
        }
        typed.validate()?;
        Ok(typed)
    }
}
