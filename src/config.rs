//! Controller settings taken from the command line and environment

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

/// Output format of the log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Options of the `controller` subcommand
#[derive(Args, Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when empty
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Field manager used for server-side apply and status patches
    #[arg(long, env = "FIELD_MANAGER", default_value = crate::FIELD_MANAGER)]
    pub field_manager: String,

    /// Simbank test catalog uploaded to the API server
    #[arg(
        long,
        env = "SIMBANK_TESTCATALOG_FILE",
        default_value = "/usr/local/bin/galasa-resources/simplatform-testcatalog.json"
    )]
    pub testcatalog_fixture: PathBuf,

    /// Timeout for each test catalog request
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Install or update the GalasaEcosystem CRD at startup
    #[arg(
        long,
        env = "INSTALL_CRDS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub install_crds: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ControllerConfig {
    /// Namespace to watch, `None` for cluster-wide
    pub fn watch_namespace(&self) -> Option<&str> {
        Some(self.namespace.trim()).filter(|ns| !ns.is_empty())
    }

    /// Per-request HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            field_manager: crate::FIELD_MANAGER.to_string(),
            testcatalog_fixture: PathBuf::from(
                "/usr/local/bin/galasa-resources/simplatform-testcatalog.json",
            ),
            http_timeout_secs: 30,
            install_crds: true,
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ControllerConfig,
    }

    fn parse(args: &[&str]) -> ControllerConfig {
        let argv = std::iter::once("operator").chain(args.iter().copied());
        TestCli::parse_from(argv).config
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--namespace",
            "galasa",
            "--http-timeout-secs",
            "5",
            "--install-crds",
            "false",
            "--log-format",
            "json",
        ]);
        assert_eq!(config.watch_namespace(), Some("galasa"));
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert!(!config.install_crds);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_blank_namespace_watches_everything() {
        let config = ControllerConfig {
            namespace: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.watch_namespace(), None);
    }
}
