//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rxflow_core::workflow::DEFAULT_STALE_REQUEST_MINUTES;

/// When new diagnostic requests reach the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessingMode {
    /// Dispatch to the model as soon as the request is stored.
    Immediate,
    /// Leave requests pending until the maintenance sweep picks them up.
    Deferred,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "rxflow-server")]
#[command(about = "Clinical pharmacy diagnostic workflow API")]
pub struct Config {
    /// SQLite database file, created if missing
    #[arg(long, env = "RXFLOW_DATABASE", default_value = "rxflow.db")]
    pub database: PathBuf,

    /// Address to listen on
    #[arg(long, env = "RXFLOW_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Seconds between maintenance sweeps
    #[arg(
        long,
        env = "RXFLOW_SWEEP_INTERVAL_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_secs: u64,

    /// Minutes a request may stay pending before the sweep dispatches it
    #[arg(
        long,
        env = "RXFLOW_STALE_REQUEST_MINUTES",
        default_value_t = DEFAULT_STALE_REQUEST_MINUTES,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    pub stale_request_minutes: i64,

    #[arg(long, env = "RXFLOW_PROCESSING", value_enum, default_value_t = ProcessingMode::Immediate)]
    pub processing: ProcessingMode,
}

impl Config {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_request_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["rxflow-server"]).unwrap();
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.stale_after(), chrono::Duration::minutes(DEFAULT_STALE_REQUEST_MINUTES));
        assert_eq!(config.processing, ProcessingMode::Immediate);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "rxflow-server",
            "--database",
            "/tmp/clinic.db",
            "--bind",
            "0.0.0.0:9000",
            "--processing",
            "deferred",
        ])
        .unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/clinic.db"));
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.processing, ProcessingMode::Deferred);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(Config::try_parse_from(["rxflow-server", "--sweep-interval-secs", "0"]).is_err());
    }
}
