use clap::Args;
use serde::Deserialize;

/// Logging configuration that can be set via CLI or env vars
#[derive(Debug, Clone, Default, Args, Deserialize)]
pub struct LoggingConfig {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    #[serde(skip)]
    pub verbose: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", env = "VOXGATE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log filter directives
    #[arg(long = "log-filter", env = "VOXGATE_LOG_FILTER")]
    pub log_filter: Option<String>,
}

impl LoggingConfig {
    /// CLI flags win over the level from the configuration file.
    pub fn get_effective_level<'a>(&'a self, configured: Option<&'a str>) -> &'a str {
        match (self.verbose, self.log_level.as_deref()) {
            (v, _) if v >= 2 => "trace",
            (1, _) => "debug",
            (0, Some(level)) => level,
            _ => configured.unwrap_or("info"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_levels() {
        let mut logging = LoggingConfig {
            verbose: 0,
            log_level: Some("warn".into()),
            log_filter: None,
        };
        assert_eq!(logging.get_effective_level(Some("error")), "warn");
        logging.verbose = 1;
        assert_eq!(logging.get_effective_level(None), "debug");
        logging.verbose = 3;
        assert_eq!(logging.get_effective_level(None), "trace");
    }

    #[test]
    fn configured_level_is_the_fallback() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.get_effective_level(Some("debug")), "debug");
        assert_eq!(logging.get_effective_level(None), "info");
    }
}
