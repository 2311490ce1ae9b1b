//! Relay configuration
//!
//! Later sources win: built-in defaults, then the TOML file, then
//! `PERSONA_RELAY_*` variables, then CLI flags such as `--roster`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Avatar used when a persona has none of its own
pub const DEFAULT_AVATAR_URL: &str = "https://cdn.discordapp.com/embed/avatars/0.png";

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bot identity
    pub bot: BotSettings,

    /// Gateway connection settings
    pub gateway: GatewaySettings,

    /// Delivery endpoint pool and REST API settings
    pub delivery: DeliverySettings,

    /// Message dispatch behavior
    pub dispatch: DispatchSettings,

    /// Persona roster location
    pub roster: RosterSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Bot identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Bot token (prefer PERSONA_RELAY_TOKEN over storing it on disk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Name reported in logs and the gateway identify payload
    pub application_name: String,
}

/// Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Must be ws:// or wss://
    pub url: String,

    pub intents: u64,

    /// First backoff step, doubled per failed attempt
    pub reconnect_interval_ms: u64,
    pub max_reconnect_delay_ms: u64,

    /// Zero retries forever
    pub max_reconnect_attempts: u32,

    /// Handshake plus Hello
    pub connect_timeout_ms: u64,
}

/// Delivery endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// REST API base URL
    pub api_base: String,

    /// Name given to endpoints this relay creates
    pub endpoint_name: String,

    /// Additional endpoint names treated as our own when reusing or cleaning up
    pub recognized_names: Vec<String>,

    /// Endpoint count at which unrecognized endpoints are also removed during cleanup
    pub hard_cap: usize,

    /// Maximum unrecognized endpoints removed in one cleanup pass
    pub foreign_cleanup_batch: usize,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Avatar used when a persona has none
    pub default_avatar: String,
}

/// Dispatch behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Seconds before a failure notice deletes itself
    pub notice_ttl_secs: u64,

    /// Distinct personas a multi-line message needs before it is split
    pub min_distinct_personas: usize,
}

/// Persona roster settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterSettings {
    /// Roster file path (unset = start with an empty store)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,

    /// Rolling log file; console only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Below 10 the file rotates hourly instead of daily
    pub max_file_size_mb: u64,
    pub max_files: u32,

    /// JSON lines instead of compact text, on console and file alike
    pub json_format: bool,
}

// ─────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            token: None,
            application_name: "persona-relay".to_string(),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
            intents: DEFAULT_INTENTS,
            reconnect_interval_ms: 1000,
            max_reconnect_delay_ms: 60000,
            max_reconnect_attempts: 0, // Infinite
            connect_timeout_ms: 30000,
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api/v10".to_string(),
            endpoint_name: "Persona Relay".to_string(),
            recognized_names: vec![],
            hard_cap: 15,
            foreign_cleanup_batch: 5,
            request_timeout_ms: 10000,
            default_avatar: DEFAULT_AVATAR_URL.to_string(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            notice_ttl_secs: 10,
            min_distinct_personas: 2,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl DeliverySettings {
    /// Every endpoint name the pool treats as its own
    pub fn all_recognized_names(&self) -> Vec<String> {
        let mut names = vec![self.endpoint_name.clone()];
        for name in &self.recognized_names {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

impl RelayConfig {
    /// File, then environment, then path expansion, then validation.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = Self::from_toml_str(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();

        config.expand_paths();

        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document without applying overrides or validation
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            source: Some(e),
        })
    }

    /// An explicit path must exist; otherwise the first file found wins.
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("persona-relay.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("persona-relay").join("relay.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".persona-relay").join("relay.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/persona-relay/relay.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Using configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file in search paths");
        Ok(None)
    }

    fn apply_env_overrides(&mut self) {
        // Bot settings
        if let Ok(val) = std::env::var("PERSONA_RELAY_TOKEN") {
            self.bot.token = Some(val);
        }

        // Gateway settings
        if let Ok(val) = std::env::var("PERSONA_RELAY_GATEWAY_URL") {
            self.gateway.url = val;
        }
        if let Ok(val) = std::env::var("PERSONA_RELAY_INTENTS") {
            if let Ok(n) = val.parse() {
                self.gateway.intents = n;
            }
        }
        if let Ok(val) = std::env::var("PERSONA_RELAY_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.gateway.max_reconnect_attempts = n;
            }
        }

        // Delivery settings
        if let Ok(val) = std::env::var("PERSONA_RELAY_API_BASE") {
            self.delivery.api_base = val;
        }
        if let Ok(val) = std::env::var("PERSONA_RELAY_ENDPOINT_NAME") {
            self.delivery.endpoint_name = val;
        }
        if let Ok(val) = std::env::var("PERSONA_RELAY_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.delivery.request_timeout_ms = n;
            }
        }

        // Dispatch settings
        if let Ok(val) = std::env::var("PERSONA_RELAY_NOTICE_TTL_SECS") {
            if let Ok(n) = val.parse() {
                self.dispatch.notice_ttl_secs = n;
            }
        }

        // Roster settings
        if let Ok(val) = std::env::var("PERSONA_RELAY_ROSTER") {
            self.roster.path = Some(val);
        }

        // Logging settings
        if let Ok(val) = std::env::var("PERSONA_RELAY_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("PERSONA_RELAY_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("PERSONA_RELAY_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref path) = self.roster.path {
            self.roster.path = Some(expand_path(path));
        }
    }

    /// Every failure names the offending key.
    pub fn validate(&self) -> Result<()> {
        let url = &self.gateway.url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "gateway.url",
                "Gateway URL must start with ws:// or wss://",
            ));
        }

        let api = &self.delivery.api_base;
        if !api.starts_with("http://") && !api.starts_with("https://") {
            return Err(Error::config_field_invalid(
                "delivery.api_base",
                "API base must start with http:// or https://",
            ));
        }

        let name_len = self.delivery.endpoint_name.chars().count();
        if name_len == 0 || name_len > 80 {
            return Err(Error::config_field_invalid(
                "delivery.endpoint_name",
                "Endpoint name must be between 1 and 80 characters",
            ));
        }

        if self.delivery.hard_cap == 0 {
            return Err(Error::config_field_invalid(
                "delivery.hard_cap",
                "hard_cap must be at least 1",
            ));
        }

        if self.dispatch.min_distinct_personas < 2 {
            return Err(Error::config_field_invalid(
                "dispatch.min_distinct_personas",
                "min_distinct_personas must be at least 2",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Copy of the config that is safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.bot.token.is_some() {
            copy.bot.token = Some("<redacted>".to_string());
        }
        copy
    }
}

/// `~` and `$VAR`, leaving the text alone when a variable is unset
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Write the commented default config, refusing to replace one unless `force`.
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".persona-relay")
                .join("relay.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

fn generate_default_config() -> String {
    r#"# Persona Relay Configuration

[bot]
# Bot token. Prefer the PERSONA_RELAY_TOKEN environment variable.
# token = "..."

application_name = "persona-relay"

[gateway]
url = "wss://gateway.discord.gg/?v=10&encoding=json"

# GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
intents = 33281

# Reconnect backoff, doubling from the first value up to the second
reconnect_interval_ms = 1000
max_reconnect_delay_ms = 60000

# Give up after this many failed reconnects; 0 keeps trying
max_reconnect_attempts = 0

# Time allowed for the handshake and the Hello frame
connect_timeout_ms = 30000

[delivery]
# REST API base URL
api_base = "https://discord.com/api/v10"

# Name given to webhooks this relay creates
endpoint_name = "Persona Relay"

# Other webhook names to reuse and clean up as our own
recognized_names = []

# Webhook count at which foreign webhooks are also removed during cleanup
hard_cap = 15

# Maximum foreign webhooks removed per cleanup
foreign_cleanup_batch = 5

# Per-request timeout in milliseconds
request_timeout_ms = 10000

# Avatar for personas without one
default_avatar = "https://cdn.discordapp.com/embed/avatars/0.png"

[dispatch]
# Seconds before a failure notice deletes itself
notice_ttl_secs = 10

# Distinct personas needed before a multi-line message is split
min_distinct_personas = 2

[roster]
# Persona roster loaded at startup
# path = "~/.persona-relay/roster.toml"

[logging]
# trace, debug, info, warn or error; RUST_LOG overrides per module
level = "info"

# Also log to a rolling file
# file = "~/.persona-relay/logs/relay.log"

# Under 10 rotates hourly, otherwise daily
max_file_size_mb = 100
max_files = 5

# One JSON object per line
json_format = false
"#
    .to_string()
}
