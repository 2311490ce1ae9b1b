//! Relay errors
//!
//! `Error` is what operations return; `TransportError` is the narrower kind
//! a delivery transport reports, so the endpoint pool can branch on it
//! without string matching. Every error maps to an `E<nnn>` code and a CLI
//! exit code in steps of ten per family.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::ids::ChannelId;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric codes, grouped by family in hundreds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionLost = 303,
    GatewayProtocol = 310,
    AuthenticationFailed = 311,

    // Persona store errors (4xx)
    PersonaNotFound = 400,
    PersonaDuplicate = 401,
    PersonaInvalid = 402,
    OverrideInvalid = 403,
    RosterInvalid = 404,

    // Delivery errors (5xx)
    DeliveryNotFound = 500,
    EndpointQuotaExceeded = 501,
    PermissionDenied = 502,
    DeliveryTransient = 503,
    DeliveryTimeout = 504,

    // Dispatch errors (6xx)
    InvariantViolation = 600,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            code @ 100..=999 => i32::from(code / 100) * 10,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Transport Errors
// ─────────────────────────────────────────────────────────────────

/// Failure reported by a delivery transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint, message, or channel no longer exists
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The channel already holds the maximum number of endpoints
    #[error("endpoint quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// The bot lacks permission for the operation
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Network failure, rate limit, or unexpected server response
    #[error("transient transport failure: {message}")]
    Transient { message: String },

    /// The operation did not finish within its time budget
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl TransportError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        TransportError::NotFound { resource: resource.into() }
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        TransportError::QuotaExceeded { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        TransportError::Forbidden { message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        TransportError::Transient { message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, TransportError::QuotaExceeded { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, TransportError::Forbidden { .. })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// `field` is the dotted config key, shown on its own line in the terminal
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Connection to {url} timed out after {timeout_secs}s")]
    ConnectionTimeout { url: String, timeout_secs: u64 },

    #[error("Lost connection to gateway: {message}")]
    ConnectionLost { message: String },

    /// Unexpected or malformed gateway payload
    #[error("Gateway protocol error: {0}")]
    Gateway(String),

    /// Gateway rejected the bot token
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ─────────────────────────────────────────────────────────────
    // Persona Store Errors
    // ─────────────────────────────────────────────────────────────

    /// No persona with this name is visible to the operator
    #[error("Persona not found: {name}")]
    PersonaNotFound { name: String },

    /// Display names are unique per owner and guild
    #[error("A persona named '{name}' already exists")]
    DuplicatePersona { name: String },

    /// Persona fields failed validation
    #[error("Invalid persona '{name}': {reason}")]
    InvalidPersona { name: String, reason: String },

    /// Trigger override rejected
    #[error("Invalid trigger override: {reason}")]
    InvalidOverride { reason: String },

    /// Roster file entry rejected
    #[error("Invalid roster entry {entry}: {reason}")]
    RosterInvalid { entry: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────

    /// Delivery transport failure
    #[error("Delivery failed: {0}")]
    Transport(#[from] TransportError),

    /// Cleanup and the single retry could not free an endpoint slot
    #[error("No delivery endpoint could be created in channel {channel}: the channel is at its endpoint limit")]
    EndpointQuotaExhausted { channel: ChannelId },

    // ─────────────────────────────────────────────────────────────
    // Dispatch Errors
    // ─────────────────────────────────────────────────────────────

    /// Data integrity or programming bug detected at runtime
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::WebSocket(_) => ErrorCode::ConnectionFailed,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::Gateway(_) => ErrorCode::GatewayProtocol,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,

            Error::PersonaNotFound { .. } => ErrorCode::PersonaNotFound,
            Error::DuplicatePersona { .. } => ErrorCode::PersonaDuplicate,
            Error::InvalidPersona { .. } => ErrorCode::PersonaInvalid,
            Error::InvalidOverride { .. } => ErrorCode::OverrideInvalid,
            Error::RosterInvalid { .. } => ErrorCode::RosterInvalid,

            Error::Transport(t) => match t {
                TransportError::NotFound { .. } => ErrorCode::DeliveryNotFound,
                TransportError::QuotaExceeded { .. } => ErrorCode::EndpointQuotaExceeded,
                TransportError::Forbidden { .. } => ErrorCode::PermissionDenied,
                TransportError::Transient { .. } => ErrorCode::DeliveryTransient,
                TransportError::Timeout { .. } => ErrorCode::DeliveryTimeout,
            },
            Error::EndpointQuotaExhausted { .. } => ErrorCode::EndpointQuotaExceeded,

            Error::InvariantViolation(_) => ErrorCode::InvariantViolation,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Network and timeout failures that may clear up on their own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::ConnectionLost { .. }
                | Error::WebSocket(_)
                | Error::Io(_)
                | Error::Transport(TransportError::Transient { .. })
                | Error::Transport(TransportError::Timeout { .. })
        )
    }

    /// Fatal errors stop the gateway loop instead of reconnecting
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::AuthenticationFailed { .. }
                | Error::RosterInvalid { .. }
                | Error::Internal(_)
        )
    }

    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'persona-relay config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'persona-relay config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),

            Error::ConnectionFailed { .. } => Some(
                "Check your network connection and verify the gateway URL is correct."
            ),
            Error::ConnectionTimeout { .. } => Some(
                "The gateway may be unreachable. Check your firewall settings."
            ),
            Error::ConnectionLost { .. } => Some(
                "Connection was interrupted. The relay will automatically attempt to reconnect."
            ),
            Error::AuthenticationFailed { .. } => Some(
                "Verify the bot token in [bot] token or PERSONA_RELAY_TOKEN."
            ),

            Error::PersonaNotFound { .. } => Some(
                "Check the persona name. Names are matched without regard to case."
            ),
            Error::DuplicatePersona { .. } => Some(
                "Pick a different display name or edit the existing persona."
            ),
            Error::RosterInvalid { .. } => Some(
                "Fix the roster entry and run 'persona-relay roster check <path>'."
            ),

            Error::Transport(TransportError::Forbidden { .. }) => Some(
                "Grant the bot the Manage Webhooks and Manage Messages permissions in this channel."
            ),
            Error::EndpointQuotaExhausted { .. } => Some(
                "Delete unused webhooks in the channel settings to free a slot."
            ),

            _ => None,
        }
    }

    /// Red code line, optional field line, then a yellow hint
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code(), self);

        if let Error::ConfigValidation { field: Some(field), .. } = self {
            output.push_str(&format!("  Field: {}\n", field));
        }

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn persona_not_found(name: impl Into<String>) -> Self {
        Error::PersonaNotFound { name: name.into() }
    }

    pub fn invalid_persona(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPersona {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_override(reason: impl Into<String>) -> Self {
        Error::InvalidOverride { reason: reason.into() }
    }

    pub fn roster_invalid(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::RosterInvalid {
            entry: entry.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Error::InvariantViolation(message.into())
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
