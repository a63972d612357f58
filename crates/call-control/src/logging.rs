//! `tracing-subscriber` setup for applications embedding the call-control runtime

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{CallControlError, Result};

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Baseline level; `RUST_LOG` directives refine it
    pub level: Level,
    /// One JSON object per line on stdout
    pub json: bool,
    /// Include source file and line
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }
}

/// Install a global subscriber for `config`.
///
/// Fails with [`CallControlError::Config`] when a global subscriber is
/// already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().with_writer(std::io::stdout).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| CallControlError::config(format!("Failed to install subscriber: {}", e)))?;

    tracing::debug!("Call control logging at {} (json: {})", config.level, config.json);
    Ok(())
}

/// Parse a level name such as `debug` or `WARN`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| CallControlError::config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parses_levels() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("chatty"), Err(CallControlError::Config { .. })));
    }

    #[test]
    #[serial]
    fn second_install_is_a_config_error() {
        let config = LoggingConfig::new(Level::DEBUG).with_file_info();
        // Another test binary thread may already own the global subscriber.
        let _ = init_logging(&config);
        assert!(matches!(init_logging(&config), Err(CallControlError::Config { .. })));
    }
}
