use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{self, ConfigBuilder};

/// HTTP stack modules silenced below Trace; they log every connection.
const FILTERED_MODULES: &[&str] = &["hyper", "reqwest", "h2", "rustls", "tower", "axum", "mio"];

pub struct Logger {}

impl Logger {
    /// Initializes the global terminal logger at the configured level.
    ///
    /// Platform client and webhook logs always pass through; the HTTP stack
    /// underneath is only shown at Trace.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        simplelog::TermLogger::init(
            config.log_level_filter,
            Self::build_log_config(Self::ignored_modules(config.log_level_filter)),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        )
    }

    fn ignored_modules(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            FILTERED_MODULES
        }
    }

    fn build_log_config(ignored: &[&'static str]) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in ignored {
            builder.add_filter_ignore_str(module);
        }
        builder.build()
    }
}
