mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "devcollab_store" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Whether to persist warn+ logs to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: dirs_fallback().join("database/logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// Build a config from textual levels; unknown levels fall back to INFO
    /// and unknown module levels are skipped.
    pub fn from_levels<'a>(
        log_level: &str,
        module_levels: impl IntoIterator<Item = (&'a String, &'a String)>,
        log_to_sqlite: bool,
        log_db_path: PathBuf,
    ) -> Self {
        Self {
            log_level: Level::from_str(log_level).unwrap_or(Level::INFO),
            module_levels: module_levels
                .into_iter()
                .filter_map(|(module, level)| {
                    Level::from_str(level).ok().map(|l| (module.clone(), l))
                })
                .collect(),
            log_to_sqlite,
            log_db_path,
        }
    }

    fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Keeps the log sink reachable for queries after start-up.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// Access the log sink for querying persisted logs.
    pub fn logs(&self) -> Option<Arc<SqliteLogSink>> {
        self.log_sink.clone()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    // JSON formatting layer for stdout
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let (sqlite_layer, sqlite_sink) = if config.log_to_sqlite {
        match SqliteLogSink::new(&config.log_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteLogLayer::new(sink.clone())), Some(sink))
            }
            Err(e) => {
                eprintln!("devcollab-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    if tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .try_init()
        .is_err()
    {
        eprintln!("devcollab-telemetry: a global subscriber is already installed");
    }

    TelemetryGuard {
        log_sink: sqlite_sink,
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".devcollab")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn filter_directives_include_modules() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("devcollab_store".into(), Level::DEBUG)],
            ..Default::default()
        };
        assert_eq!(config.filter_directives(), "warn,devcollab_store=debug");
    }

    #[test]
    fn from_levels_parses_and_skips_unknown() {
        let mut modules = BTreeMap::new();
        modules.insert("devcollab_server".to_string(), "trace".to_string());
        modules.insert("noisy".to_string(), "loud".to_string());
        let config = TelemetryConfig::from_levels("debug", &modules, false, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.module_levels, vec![("devcollab_server".to_string(), Level::TRACE)]);
        assert!(!config.log_to_sqlite);
    }

    #[test]
    fn unknown_default_level_falls_back_to_info() {
        let config = TelemetryConfig::from_levels("chatty", &BTreeMap::<String, String>::new(), false, PathBuf::new());
        assert_eq!(config.log_level, Level::INFO);
    }
}
