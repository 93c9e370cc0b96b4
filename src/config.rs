//! Command-line parsing and the immutable runtime configuration derived
//! from it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

use crate::error::FatalError;

const DEFAULT_PORT: u16 = 53;
const UPSTREAM_PORT: u16 = 53;
const DEFAULT_MAX_TRX: usize = 512;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// `utdns` relays DNS queries received over UDP to a single upstream
/// resolver over TCP, and relays the TCP response back over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind the UDP listener to IPv4 only (default: dual-stack IPv6 wildcard).
    #[arg(short = '4')]
    ipv4_only: bool,

    /// Daemonize: fork, detach from the controlling terminal, and log to syslog.
    #[arg(short = 'b')]
    daemonize: bool,

    /// Raise the log level to DEBUG.
    #[arg(short = 'd')]
    debug: bool,

    /// UDP listener port.
    #[arg(short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    /// IPv4 address of the upstream recursive resolver.
    upstream_ip: String,
}

/// Whether the UDP listener binds the IPv4-only wildcard or a dual-stack
/// IPv6 wildcard that also accepts IPv4-mapped traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    DualStack,
}

/// Immutable, validated runtime configuration. Built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub family: Family,
    pub listen_port: u16,
    pub upstream: SocketAddr,
    pub daemonize: bool,
    pub log_level: tracing::Level,
    pub max_trx: usize,
    pub timeout_secs: u64,
}

impl Config {
    /// Parses `std::env::args()` and validates into a [`Config`].
    pub fn from_args() -> Result<Self, FatalError> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Result<Self, FatalError> {
        let upstream_ip: Ipv4Addr = cli.upstream_ip.parse().map_err(|_| {
            FatalError::ConfigInvalid(format!(
                "'{}' is not a valid IPv4 address",
                cli.upstream_ip
            ))
        })?;

        Ok(Config {
            family: if cli.ipv4_only {
                Family::V4
            } else {
                Family::DualStack
            },
            listen_port: cli.port,
            upstream: SocketAddr::new(IpAddr::V4(upstream_ip), UPSTREAM_PORT),
            daemonize: cli.daemonize,
            log_level: if cli.debug {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            },
            max_trx: DEFAULT_MAX_TRX,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }

    pub fn for_test(upstream: SocketAddr, max_trx: usize, timeout_secs: u64) -> Self {
        Config {
            family: Family::V4,
            listen_port: 0,
            upstream,
            daemonize: false,
            log_level: tracing::Level::DEBUG,
            max_trx,
            timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once(&"utdns").chain(args))
    }

    #[test]
    fn rejects_non_ipv4_upstream() {
        let err = Config::from_cli(cli(&["not-an-ip"])).unwrap_err();
        assert!(matches!(err, FatalError::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_ipv6_upstream() {
        let err = Config::from_cli(cli(&["::1"])).unwrap_err();
        assert!(matches!(err, FatalError::ConfigInvalid(_)));
    }

    #[test]
    fn defaults_to_dual_stack_and_port_53() {
        let cfg = Config::from_cli(cli(&["203.0.113.1"])).unwrap();
        assert_eq!(cfg.family, Family::DualStack);
        assert_eq!(cfg.listen_port, 53);
        assert_eq!(cfg.upstream, SocketAddr::from(([203, 0, 113, 1], 53)));
    }

    #[test]
    fn flags_select_v4_only_debug_and_custom_port() {
        let cfg = Config::from_cli(cli(&["-4", "-d", "-p", "5353", "203.0.113.1"])).unwrap();
        assert_eq!(cfg.family, Family::V4);
        assert_eq!(cfg.log_level, tracing::Level::DEBUG);
        assert_eq!(cfg.listen_port, 5353);
    }

    #[test]
    fn daemonize_flag_is_captured() {
        let cfg = Config::from_cli(cli(&["-b", "203.0.113.1"])).unwrap();
        assert!(cfg.daemonize);
    }
}
