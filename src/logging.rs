//! Log setup.
//!
//! Logs go to stderr with a compact timestamp so they never mix with command
//! output. Levels come from the `[logging]` config section:
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! monitor = "debug"   # same as tidydesk::monitor=debug
//! ```
//!
//! `RUST_LOG` takes precedence over both the config and `-v` flags.

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Initialize logging. Only the first call in a process takes effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize logging with the default `warn` level.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Raises the default level by the number of `-v` flags: one for `info`, two or
/// more for `debug`. Never lowers a level set in the config.
pub fn apply_verbosity(config: &LoggingConfig, verbose: u8) -> LoggingConfig {
    let requested = match verbose {
        0 => return config.clone(),
        1 => "info",
        _ => "debug",
    };

    let mut raised = config.clone();
    if level_rank(requested) > level_rank(&config.default) {
        raised.default = requested.to_string();
    }
    raised
}

fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.default.clone();
    for (module, level) in &config.modules {
        let target = if module.contains("::") {
            module.clone()
        } else {
            format!("tidydesk::{module}")
        };
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

fn level_rank(level: &str) -> u8 {
    match level.to_ascii_lowercase().as_str() {
        "off" => 0,
        "error" => 1,
        "warn" => 2,
        "info" => 3,
        "debug" => 4,
        "trace" => 5,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_module_names_are_qualified() {
        let config = LoggingConfig {
            default: "warn".to_string(),
            modules: HashMap::from([("monitor".to_string(), "debug".to_string())]),
        };
        assert_eq!(filter_directives(&config), "warn,tidydesk::monitor=debug");
    }

    #[test]
    fn test_verbosity_raises_default_level() {
        let config = LoggingConfig::default();
        assert_eq!(apply_verbosity(&config, 0).default, "warn");
        assert_eq!(apply_verbosity(&config, 1).default, "info");
        assert_eq!(apply_verbosity(&config, 3).default, "debug");

        let trace = LoggingConfig {
            default: "trace".to_string(),
            ..Default::default()
        };
        assert_eq!(apply_verbosity(&trace, 1).default, "trace");
    }
}
