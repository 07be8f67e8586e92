//! Logging configuration for the `amdp` binary.
//!
//! Level precedence, highest first: `-q` / `-v` flags, `AMDP_LOG`, `RUST_LOG`,
//! then `info`. `RUST_LOG` is handed to the filter verbatim, so per-target
//! directives such as `solve.sweep=debug` keep working when nothing overrides them.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Level override read by [`LogConfig::from_env`].
pub const ENV_LOG_LEVEL: &str = "AMDP_LOG";
/// Format override read by [`LogConfig::from_env`].
pub const ENV_LOG_FORMAT: &str = "AMDP_LOG_FORMAT";
const ENV_RUST_LOG: &str = "RUST_LOG";

/// Log output format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per event.
    #[value(alias = "json")]
    Jsonl,
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    /// Learning and solving progress.
    #[default]
    Info,
    #[value(alias = "warning")]
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Level requested by the verbosity flags, if any.
    ///
    /// `-q` keeps errors only and beats any number of `-v`; `-v` shows debug
    /// events such as per-episode summaries, `-vv` everything.
    pub fn from_flags(verbose: u8, quiet: bool) -> Option<Self> {
        if quiet {
            return Some(LogLevel::Error);
        }
        match verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

/// Where the effective level came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelSource {
    Default,
    /// `AMDP_LOG`.
    Env,
    /// Raw `RUST_LOG` directives.
    Directives(String),
    /// `-v` / `-q`.
    Cli,
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    pub source: LevelSource,
    /// Timestamps in human output.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            source: LevelSource::Default,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment and the CLI flags.
    pub fn from_env(verbose: u8, quiet: bool, format: Option<LogFormat>) -> Self {
        Self::resolve(verbose, quiet, format, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit variable lookup.
    ///
    /// Unparseable `AMDP_LOG` / `AMDP_LOG_FORMAT` values are ignored.
    pub fn resolve<F>(verbose: u8, quiet: bool, format: Option<LogFormat>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LogConfig::default();

        if let Some(level) = LogLevel::from_flags(verbose, quiet) {
            config.level = level;
            config.source = LevelSource::Cli;
        } else if let Some(level) = lookup(ENV_LOG_LEVEL)
            .and_then(|val| LogLevel::from_str(val.trim(), true).ok())
        {
            config.level = level;
            config.source = LevelSource::Env;
        } else if let Some(directives) = lookup(ENV_RUST_LOG).filter(|d| !d.trim().is_empty()) {
            config.source = LevelSource::Directives(directives);
        }

        config.format = format
            .or_else(|| {
                lookup(ENV_LOG_FORMAT).and_then(|val| LogFormat::from_str(val.trim(), true).ok())
            })
            .unwrap_or_default();
        config
    }

    /// The event filter for this configuration.
    ///
    /// Malformed `RUST_LOG` directives fall back to the resolved level.
    pub fn env_filter(&self) -> EnvFilter {
        match &self.source {
            LevelSource::Directives(directives) => EnvFilter::try_new(directives)
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str())),
            _ => EnvFilter::new(self.level.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_flags_or_env() {
        let config = LogConfig::resolve(0, false, None, lookup(&[]));
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(LogLevel::from_flags(3, true), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_flags(1, false), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_flags(4, false), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_flags(0, false), None);
    }

    #[test]
    fn cli_flags_override_rust_log() {
        let env = lookup(&[("RUST_LOG", "trace"), ("AMDP_LOG", "debug")]);
        let config = LogConfig::resolve(0, true, None, env);
        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.source, LevelSource::Cli);
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::ERROR));
    }

    #[test]
    fn amdp_log_beats_rust_log() {
        let env = lookup(&[("RUST_LOG", "trace"), ("AMDP_LOG", "Warning")]);
        let config = LogConfig::resolve(0, false, None, env);
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.source, LevelSource::Env);
    }

    #[test]
    fn rust_log_directives_pass_through() {
        let env = lookup(&[("RUST_LOG", "warn,solve.sweep=debug")]);
        let config = LogConfig::resolve(0, false, None, env);
        assert_eq!(
            config.source,
            LevelSource::Directives("warn,solve.sweep=debug".to_string())
        );
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn format_from_flag_then_env() {
        let env = lookup(&[("AMDP_LOG_FORMAT", "json")]);
        assert_eq!(
            LogConfig::resolve(0, false, None, env).format,
            LogFormat::Jsonl
        );
        let env = lookup(&[("AMDP_LOG_FORMAT", "json")]);
        assert_eq!(
            LogConfig::resolve(0, false, Some(LogFormat::Human), env).format,
            LogFormat::Human
        );
        let env = lookup(&[("AMDP_LOG_FORMAT", "xml")]);
        assert_eq!(
            LogConfig::resolve(0, false, None, env).format,
            LogFormat::Human
        );
    }
}
