//! Logging setup on tracing + tracing-subscriber
//!
//! - Compact console output, or JSON with span close timings so each
//!   `dispatch` span reports how long a message took
//! - Optional rolling log file through a non-blocking writer
//! - `RUST_LOG` still wins for per-module levels
//! - Chatty HTTP and WebSocket crates are held at warn

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Dependencies that are capped at warn regardless of the configured level
const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "rustls", "tokio_tungstenite", "tungstenite"];

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer flushing until dropped. Hold it for the life of
/// the process.
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Output shape shared by the console and file layers
#[derive(Debug, Clone, Copy)]
struct LayerStyle {
    json: bool,
    ansi: bool,
    source_locations: bool,
}

/// Initialize logging for `run`.
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);
    let filter = relay_filter(level)?;

    let console = fmt_layer(
        LayerStyle {
            json: settings.json_format,
            ansi: !settings.json_format,
            source_locations: settings.json_format,
        },
        std::io::stdout,
    );

    let (file, guard) = match settings.file.as_deref() {
        Some(path) => {
            let (writer, guard) = file_sink(Path::new(path), settings.max_file_size_mb, settings.max_files)?;
            let style = LayerStyle {
                json: settings.json_format,
                ansi: false,
                source_locations: true,
            };
            (Some(fmt_layer(style, writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))?;

    tracing::info!(
        level = %level,
        file = ?settings.file,
        json = settings.json_format,
        "Logging initialized"
    );

    Ok(LogGuards { _file_guard: guard })
}

/// Stderr-only logging for short-lived subcommands.
pub fn init_simple(level: Level) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))
}

// ─────────────────────────────────────────────────────────────────
// Levels and Filters
// ─────────────────────────────────────────────────────────────────

/// `-q` beats `-v`, and `-v` beats the configured level.
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => level_from_name(&settings.level).unwrap_or(Level::INFO),
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

fn level_from_name(name: &str) -> Option<Level> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn directive(text: &str) -> Result<Directive> {
    text.parse()
        .map_err(|e| Error::Internal(format!("Invalid log directive '{}': {}", text, e)))
}

fn relay_filter(level: Level) -> Result<EnvFilter> {
    let level_name = level.to_string().to_lowercase();

    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&level_name))
        .add_directive(directive(&format!("persona_relay={}", level_name))?);

    for target in NOISY_TARGETS {
        filter = filter.add_directive(directive(&format!("{}=warn", target))?);
    }

    Ok(filter)
}

// ─────────────────────────────────────────────────────────────────
// Layers and Sinks
// ─────────────────────────────────────────────────────────────────

fn fmt_layer<S, W>(style: LayerStyle, writer: W) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(style.ansi)
        .with_thread_ids(style.source_locations)
        .with_file(style.source_locations)
        .with_line_number(style.source_locations);

    if style.json {
        Box::new(base.json().with_span_events(FmtSpan::CLOSE))
    } else {
        Box::new(base.compact())
    }
}

/// tracing-appender rotates on time only; small size limits rotate hourly.
fn rotation_for(max_size_mb: u64) -> Rotation {
    if max_size_mb > 0 && max_size_mb < 10 {
        Rotation::HOURLY
    } else {
        Rotation::DAILY
    }
}

/// Directory, file prefix and suffix for a configured log path.
///
/// `logs/relay.log` rotates as `logs/relay.<date>.log`.
fn split_log_path(path: &Path) -> (PathBuf, String, String) {
    let directory = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("relay")
        .to_string();
    let suffix = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("log")
        .to_string();
    (directory, prefix, suffix)
}

fn file_sink(path: &Path, max_size_mb: u64, max_files: u32) -> Result<(NonBlocking, WorkerGuard)> {
    let (directory, prefix, suffix) = split_log_path(path);

    fs::create_dir_all(&directory).map_err(|e| Error::IoWrite {
        path: directory.clone(),
        source: e,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(rotation_for(max_size_mb))
        .filename_prefix(prefix)
        .filename_suffix(suffix)
        .max_log_files(max_files.max(1) as usize)
        .build(&directory)
        .map_err(|e| Error::Internal(format!("Failed to create log file appender: {}", e)))?;

    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_level_from_name() {
        assert_eq!(level_from_name("trace"), Some(Level::TRACE));
        assert_eq!(level_from_name("DEBUG"), Some(Level::DEBUG));
        assert_eq!(level_from_name("warning"), Some(Level::WARN));
        assert_eq!(level_from_name("loud"), None);
    }

    #[test]
    fn test_effective_level() {
        let settings = LoggingSettings {
            level: "warn".to_string(),
            ..Default::default()
        };
        assert_eq!(effective_level(&settings, 0, false), Level::WARN);
        assert_eq!(effective_level(&settings, 1, false), Level::DEBUG);
        assert_eq!(effective_level(&settings, 3, false), Level::TRACE);
        assert_eq!(effective_level(&settings, 2, true), Level::ERROR);
    }

    #[test]
    fn test_unknown_configured_level_falls_back_to_info() {
        let settings = LoggingSettings {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert_eq!(effective_level(&settings, 0, false), Level::INFO);
    }

    #[test]
    fn test_relay_filter_builds() {
        assert!(relay_filter(Level::DEBUG).is_ok());
    }

    #[test]
    fn test_rotation_for_size() {
        assert_eq!(rotation_for(5), Rotation::HOURLY);
        assert_eq!(rotation_for(0), Rotation::DAILY);
        assert_eq!(rotation_for(100), Rotation::DAILY);
    }

    #[test]
    fn test_split_log_path() {
        let (dir, prefix, suffix) = split_log_path(Path::new("/var/log/relay/bot.txt"));
        assert_eq!(dir, PathBuf::from("/var/log/relay"));
        assert_eq!(prefix, "bot");
        assert_eq!(suffix, "txt");

        let (dir, prefix, suffix) = split_log_path(Path::new("relay"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(prefix, "relay");
        assert_eq!(suffix, "log");
    }

    #[test]
    fn test_file_sink_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs").join("relay.log");

        let result = file_sink(&log_path, 100, 5);

        assert!(result.is_ok());
        assert!(temp_dir.path().join("logs").exists());
    }
}
