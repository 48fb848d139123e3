//! `tracing` subscriber setup for programs built on datasocket.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Environment variable that overrides the default filter with
/// `EnvFilter` directives, e.g. `datasocket_peer=trace,warn`.
pub const LOG_ENV: &str = "DATASOCKET_LOG";

const CRATES: [&str; 5] = [
    "datasocket",
    "datasocket_frame",
    "datasocket_payload",
    "datasocket_peer",
    "datasocket_transport",
];

/// Filter directives used when `DATASOCKET_LOG` is unset: the datasocket
/// crates log at `level`, everything else at `warn` (or `error`).
pub fn default_directives(level: LogLevel) -> String {
    let others = match level {
        LogLevel::Error => "error",
        _ => "warn",
    };
    let mut directives = String::from(others);
    for krate in CRATES {
        directives.push_str(&format!(",{krate}={}", level.as_str()));
    }
    directives
}

fn filter(level: LogLevel) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(&directives).unwrap_or_else(|err| {
                eprintln!("ignoring invalid {LOG_ENV}: {err}");
                EnvFilter::new(default_directives(level))
            })
        }
        _ => EnvFilter::new(default_directives(level)),
    }
}

/// Install a global stderr subscriber. A second call is a no-op.
///
/// Socket status events are logged at `INFO` when the socket is verbose and
/// at `DEBUG` otherwise, so `LogLevel::Info` shows exactly the verbose ones.
/// `DATASOCKET_LOG` replaces the level-based filter when set.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(level))
        .with_ansi(false)
        .with_target(level >= LogLevel::Debug);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LogLevel::Error.as_filter(), LevelFilter::ERROR);
        assert_eq!(LogLevel::Trace.as_filter(), LevelFilter::TRACE);
        assert!(LogLevel::Info.as_filter() < LogLevel::Debug.as_filter());
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!(LogLevel::from_str("warn", true), Ok(LogLevel::Warn));
        assert_eq!(LogFormat::from_str("JSON", true), Ok(LogFormat::Json));
        assert!(LogLevel::from_str("loud", true).is_err());
    }

    #[test]
    fn default_filter_targets_datasocket_crates() {
        let directives = default_directives(LogLevel::Debug);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("datasocket_peer=debug"));
        assert!(directives.contains("datasocket_transport=debug"));
        assert!(directives.split(',').any(|d| d == "datasocket=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn error_level_quiets_other_crates() {
        let directives = default_directives(LogLevel::Error);
        assert!(directives.starts_with("error,"));
        assert!(!directives.contains("warn"));
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(LogFormat::Text, LogLevel::Error);
        init_logging(LogFormat::Json, LogLevel::Debug);
    }
}
