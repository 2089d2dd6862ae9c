use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SLACK_API_BASE_URL: &str = "https://slack.com/api";
pub const DEFAULT_EVENTS_PATH: &str = "/slack/events";
pub const DEFAULT_REPLY_TEXT: &str = "Hello! :wave: How can I help you today?";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub server: ServerConfig,
    pub events: EventsConfig,
    pub reply: ReplyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub signing_secret: Option<SecretString>,
    /// Skips the `auth.test` lookup when set.
    pub bot_user_id: Option<String>,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub verify_token_on_startup: bool,
    pub ignore_bot_messages: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub events_path: String,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EventsConfig {
    pub retention_secs: u64,
    pub max_tracked: usize,
    pub dispatch_workers: usize,
    pub signature_tolerance_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReplyConfig {
    pub text: String,
    pub in_thread: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub slack_bot_user_id: Option<String>,
    pub slack_api_base_url: Option<String>,
    pub verify_token_on_startup: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                bot_token: String::new().into(),
                signing_secret: None,
                bot_user_id: None,
                api_base_url: DEFAULT_SLACK_API_BASE_URL.to_string(),
                request_timeout_secs: 10,
                verify_token_on_startup: true,
                ignore_bot_messages: true,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                events_path: DEFAULT_EVENTS_PATH.to_string(),
                graceful_shutdown_secs: 15,
            },
            events: EventsConfig {
                retention_secs: 3600,
                max_tracked: 1000,
                dispatch_workers: 4,
                signature_tolerance_secs: 300,
            },
            reply: ReplyConfig { text: DEFAULT_REPLY_TEXT.to_string(), in_thread: true },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("greeter.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(value) = slack.bot_token {
                self.slack.bot_token = secret_value(value);
            }
            if let Some(value) = slack.signing_secret {
                self.slack.signing_secret = Some(secret_value(value));
            }
            if let Some(bot_user_id) = slack.bot_user_id {
                self.slack.bot_user_id = Some(bot_user_id);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(request_timeout_secs) = slack.request_timeout_secs {
                self.slack.request_timeout_secs = request_timeout_secs;
            }
            if let Some(verify) = slack.verify_token_on_startup {
                self.slack.verify_token_on_startup = verify;
            }
            if let Some(ignore) = slack.ignore_bot_messages {
                self.slack.ignore_bot_messages = ignore;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(events_path) = server.events_path {
                self.server.events_path = events_path;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(events) = patch.events {
            if let Some(retention_secs) = events.retention_secs {
                self.events.retention_secs = retention_secs;
            }
            if let Some(max_tracked) = events.max_tracked {
                self.events.max_tracked = max_tracked;
            }
            if let Some(dispatch_workers) = events.dispatch_workers {
                self.events.dispatch_workers = dispatch_workers;
            }
            if let Some(tolerance) = events.signature_tolerance_secs {
                self.events.signature_tolerance_secs = tolerance;
            }
        }

        if let Some(reply) = patch.reply {
            if let Some(text) = reply.text {
                self.reply.text = text;
            }
            if let Some(in_thread) = reply.in_thread {
                self.reply.in_thread = in_thread;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let bot_token = read_env("GREETER_SLACK_BOT_TOKEN").or_else(|| read_env("SLACK_BOT_TOKEN"));
        if let Some(value) = bot_token {
            self.slack.bot_token = secret_value(value);
        }
        let signing_secret =
            read_env("GREETER_SLACK_SIGNING_SECRET").or_else(|| read_env("SLACK_SIGNING_SECRET"));
        if let Some(value) = signing_secret {
            self.slack.signing_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("GREETER_SLACK_BOT_USER_ID") {
            self.slack.bot_user_id = Some(value);
        }
        if let Some(value) = read_env("GREETER_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("GREETER_SLACK_REQUEST_TIMEOUT_SECS") {
            self.slack.request_timeout_secs =
                parse_u64("GREETER_SLACK_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GREETER_SLACK_VERIFY_TOKEN_ON_STARTUP") {
            self.slack.verify_token_on_startup =
                parse_bool("GREETER_SLACK_VERIFY_TOKEN_ON_STARTUP", &value)?;
        }
        if let Some(value) = read_env("GREETER_SLACK_IGNORE_BOT_MESSAGES") {
            self.slack.ignore_bot_messages =
                parse_bool("GREETER_SLACK_IGNORE_BOT_MESSAGES", &value)?;
        }

        if let Some(value) = read_env("GREETER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("GREETER_SERVER_PORT") {
            self.server.port = parse_u16("GREETER_SERVER_PORT", &value)?;
        } else if let Some(value) = read_env("PORT") {
            self.server.port = parse_u16("PORT", &value)?;
        }
        if let Some(value) = read_env("GREETER_SERVER_EVENTS_PATH") {
            self.server.events_path = value;
        }
        if let Some(value) = read_env("GREETER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("GREETER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("GREETER_EVENTS_RETENTION_SECS") {
            self.events.retention_secs = parse_u64("GREETER_EVENTS_RETENTION_SECS", &value)?;
        }
        if let Some(value) = read_env("GREETER_EVENTS_MAX_TRACKED") {
            self.events.max_tracked = parse_usize("GREETER_EVENTS_MAX_TRACKED", &value)?;
        }
        if let Some(value) = read_env("GREETER_EVENTS_DISPATCH_WORKERS") {
            self.events.dispatch_workers = parse_usize("GREETER_EVENTS_DISPATCH_WORKERS", &value)?;
        }
        if let Some(value) = read_env("GREETER_EVENTS_SIGNATURE_TOLERANCE_SECS") {
            self.events.signature_tolerance_secs =
                parse_u64("GREETER_EVENTS_SIGNATURE_TOLERANCE_SECS", &value)?;
        }

        if let Some(value) = read_env("GREETER_REPLY_TEXT") {
            self.reply.text = value;
        }
        if let Some(value) = read_env("GREETER_REPLY_IN_THREAD") {
            self.reply.in_thread = parse_bool("GREETER_REPLY_IN_THREAD", &value)?;
        }

        let log_level = read_env("GREETER_LOGGING_LEVEL").or_else(|| read_env("GREETER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("GREETER_LOGGING_FORMAT").or_else(|| read_env("GREETER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = Some(secret_value(signing_secret));
        }
        if let Some(bot_user_id) = overrides.slack_bot_user_id {
            self.slack.bot_user_id = Some(bot_user_id);
        }
        if let Some(api_base_url) = overrides.slack_api_base_url {
            self.slack.api_base_url = api_base_url;
        }
        if let Some(verify) = overrides.verify_token_on_startup {
            self.slack.verify_token_on_startup = verify;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_server(&self.server)?;
        validate_events(&self.events)?;
        validate_reply(&self.reply)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("greeter.toml"), PathBuf::from("config/greeter.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app-level token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if let Some(secret) = &slack.signing_secret {
        if secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "slack.signing_secret must not be blank when set".to_string(),
            ));
        }
    }

    let base_url = slack.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if slack.request_timeout_secs == 0 || slack.request_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "slack.request_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if !server.events_path.starts_with('/') {
        return Err(ConfigError::Validation(
            "server.events_path must start with `/`".to_string(),
        ));
    }

    // Route syntax characters would turn the events path into a capture or wildcard.
    if server.events_path.contains(['{', '}', '*']) {
        return Err(ConfigError::Validation(
            "server.events_path must be a literal path without `{`, `}` or `*`".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_events(events: &EventsConfig) -> Result<(), ConfigError> {
    if events.retention_secs == 0 {
        return Err(ConfigError::Validation(
            "events.retention_secs must be greater than zero".to_string(),
        ));
    }

    if events.max_tracked == 0 {
        return Err(ConfigError::Validation(
            "events.max_tracked must be greater than zero".to_string(),
        ));
    }

    if events.dispatch_workers == 0 || events.dispatch_workers > 64 {
        return Err(ConfigError::Validation(
            "events.dispatch_workers must be in range 1..=64".to_string(),
        ));
    }

    if events.signature_tolerance_secs == 0 {
        return Err(ConfigError::Validation(
            "events.signature_tolerance_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_reply(reply: &ReplyConfig) -> Result<(), ConfigError> {
    if reply.text.trim().is_empty() {
        return Err(ConfigError::Validation("reply.text must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    server: Option<ServerPatch>,
    events: Option<EventsPatch>,
    reply: Option<ReplyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    bot_user_id: Option<String>,
    api_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    verify_token_on_startup: Option<bool>,
    ignore_bot_messages: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    events_path: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsPatch {
    retention_secs: Option<u64>,
    max_tracked: Option<usize>,
    dispatch_workers: Option<usize>,
    signature_tolerance_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyPatch {
    text: Option<String>,
    in_thread: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
