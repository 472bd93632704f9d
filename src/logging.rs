//! Tracing setup for the binary.
//!
//! Console output goes to stderr and follows `RUST_LOG`. With a log
//! directory a daily `sshpilot.<date>.log` is written too, keeping the last
//! [`MAX_LOG_FILES`] days. The file always records `security` events at
//! `info` unless `RUST_LOG` names that target itself.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const LOG_FILE_PREFIX: &str = "sshpilot";
pub const MAX_LOG_FILES: usize = 7;

const LOG_FILE_SUFFIX: &str = "log";
const DEFAULT_DIRECTIVES: &str = "info";
const SECURITY_DIRECTIVE: &str = "security=info";

/// Flushes the file writer when dropped; hold it for the whole run
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    log_dir: Option<PathBuf>,
    directives: Option<String>,
}

impl LogConfig {
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self {
            log_dir,
            directives: None,
        }
    }

    /// Filter used when `RUST_LOG` is unset
    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    fn base_directives(&self) -> String {
        std::env::var(EnvFilter::DEFAULT_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.directives.clone())
            .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
    }

    /// Install the global subscriber. Fails if one is already set.
    pub fn init(self) -> Result<LogGuard, TryInitError> {
        let base = self.base_directives();
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(parse_filter(&base));

        let Some(dir) = self.log_dir else {
            tracing_subscriber::registry().with(console).try_init()?;
            return Ok(LogGuard { _file: None });
        };

        let appender = match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix(LOG_FILE_SUFFIX)
            .max_log_files(MAX_LOG_FILES)
            .build(&dir)
        {
            Ok(appender) => appender,
            Err(e) => {
                tracing_subscriber::registry().with(console).try_init()?;
                tracing::warn!("File logging disabled for {}: {}", dir.display(), e);
                return Ok(LogGuard { _file: None });
            }
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let file = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_filter(parse_filter(&with_security(&base)));

        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .try_init()?;

        Ok(LogGuard { _file: Some(guard) })
    }
}

/// Install stderr logging, plus a rotated file under `log_dir` when given
pub fn init_logging(log_dir: Option<PathBuf>) -> Result<LogGuard, TryInitError> {
    LogConfig::new(log_dir).init()
}

fn parse_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("Ignoring invalid log filter '{}': {}", directives, e);
        EnvFilter::new(DEFAULT_DIRECTIVES)
    })
}

/// `directives` with the security target enabled, unless it already
/// configures that target
fn with_security(directives: &str) -> String {
    let names_security = directives
        .split(',')
        .any(|d| d.trim().split(['=', '[']).next() == Some("security"));
    match (names_security, directives.trim().is_empty()) {
        (true, _) => directives.to_string(),
        (false, true) => SECURITY_DIRECTIVE.to_string(),
        (false, false) => format!("{},{}", directives, SECURITY_DIRECTIVE),
    }
}
