//! Configuration for the sync engine.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::level_filters::LevelFilter;

use crate::address::normalize_address;
use crate::error::{ParseError, SyncError, SyncResult, WalletSyncError};
use crate::logging::{LogFileConfig, LoggingConfig};
use crate::progress::target_time_per_block;

/// Chain the wallet syncs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
    Regtest,
}

impl Network {
    /// Label used by the progress estimator and the CLI.
    pub fn label(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Simnet => "simnet",
            Network::Regtest => "regtest",
        }
    }

    /// Default P2P port for peers given without one.
    pub fn default_port(self) -> &'static str {
        match self {
            Network::Mainnet => "9108",
            Network::Testnet => "19108",
            Network::Simnet => "18555",
            Network::Regtest => "18655",
        }
    }

    /// Target seconds between blocks.
    pub fn target_time_per_block(self) -> i64 {
        target_time_per_block(self.label())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Network {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "simnet" => Ok(Network::Simnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ParseError::InvalidNetwork(other.to_string())),
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Network to sync.
    pub network: Network,

    /// Peers to connect to, with or without a port.
    pub peers: Vec<String>,

    /// Deadline for a whole sync session. None means no deadline.
    pub sync_timeout: Option<Duration>,

    /// Deadline for one rescan. None means no deadline.
    pub rescan_timeout: Option<Duration>,

    /// Log level. None falls back to `RUST_LOG`, then INFO.
    pub log_level: Option<LevelFilter>,

    /// Whether to log to stderr.
    pub log_to_console: bool,

    /// Directory for `run.log` and its archives. None disables file logging.
    pub log_dir: Option<PathBuf>,

    /// Maximum number of archived log files to keep.
    pub max_log_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            peers: vec![],
            sync_timeout: None,
            rescan_timeout: None,
            log_level: None,
            log_to_console: true,
            log_dir: None,
            max_log_files: 20,
        }
    }
}

impl Config {
    /// Create a new configuration for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Create a configuration for mainnet.
    pub fn mainnet() -> Self {
        Self::new(Network::Mainnet)
    }

    /// Create a configuration for testnet.
    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Add a peer address.
    pub fn add_peer(&mut self, addr: impl Into<String>) -> &mut Self {
        self.peers.push(addr.into());
        self
    }

    /// Set the sync deadline.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Set the rescan deadline.
    pub fn with_rescan_timeout(mut self, timeout: Duration) -> Self {
        self.rescan_timeout = Some(timeout);
        self
    }

    /// Set the log level.
    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Log to files under `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Disable console logging.
    pub fn without_console_logging(mut self) -> Self {
        self.log_to_console = false;
        self
    }

    /// Peers with the network's default port applied.
    ///
    /// A malformed peer fails setup with [`SyncError::InvalidAddress`].
    pub fn normalized_peers(&self) -> SyncResult<Vec<String>> {
        self.peers
            .iter()
            .map(|peer| {
                normalize_address(peer, self.network.default_port())
                    .map_err(|e| SyncError::InvalidAddress(e.to_string()))
            })
            .collect()
    }

    /// Logging settings derived from this configuration.
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level,
            console: self.log_to_console,
            file: self.log_dir.as_ref().map(|dir| LogFileConfig {
                log_dir: dir.clone(),
                max_files: self.max_log_files,
            }),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), WalletSyncError> {
        if matches!(self.sync_timeout, Some(t) if t.is_zero()) {
            return Err(WalletSyncError::Config("sync_timeout must be non-zero".to_string()));
        }
        if matches!(self.rescan_timeout, Some(t) if t.is_zero()) {
            return Err(WalletSyncError::Config("rescan_timeout must be non-zero".to_string()));
        }
        if self.log_dir.is_some() && self.max_log_files == 0 {
            return Err(WalletSyncError::Config("max_log_files must be at least 1".to_string()));
        }
        self.normalized_peers()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_labels_round_trip() {
        for network in [Network::Mainnet, Network::Testnet, Network::Simnet, Network::Regtest] {
            assert_eq!(network.label().parse::<Network>().unwrap(), network);
        }
        assert_eq!("testnet3".parse::<Network>().unwrap(), Network::Testnet);
        assert!(matches!("dashnet".parse::<Network>(), Err(ParseError::InvalidNetwork(_))));
    }

    #[test]
    fn test_block_interval_by_network() {
        assert_eq!(Network::Mainnet.target_time_per_block(), 300);
        assert_eq!(Network::Testnet.target_time_per_block(), 120);
        assert_eq!(Network::Simnet.target_time_per_block(), 120);
    }

    #[test]
    fn test_normalized_peers() {
        let mut config = Config::mainnet();
        config.add_peer("10.0.0.1").add_peer("node.example.org:1234");
        assert_eq!(
            config.normalized_peers().unwrap(),
            vec!["10.0.0.1:9108".to_string(), "node.example.org:1234".to_string()]
        );

        let mut config = Config::testnet();
        config.add_peer("10.0.0.1");
        assert_eq!(config.normalized_peers().unwrap(), vec!["10.0.0.1:19108".to_string()]);
    }

    #[test]
    fn test_invalid_peer_is_invalid_address() {
        let mut config = Config::mainnet();
        config.add_peer("host:abc:def");

        let err = config.normalized_peers().unwrap_err();
        assert_eq!(err.code().as_i32(), 3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_timeouts() {
        assert!(Config::mainnet().validate().is_ok());
        assert!(Config::mainnet().with_sync_timeout(Duration::ZERO).validate().is_err());
        assert!(Config::mainnet().with_rescan_timeout(Duration::from_secs(5)).validate().is_ok());
    }

    #[test]
    fn test_logging_config() {
        let config = Config::mainnet()
            .with_log_level(LevelFilter::DEBUG)
            .with_log_dir("/tmp/wallet-sync-logs")
            .without_console_logging();
        let logging = config.logging();
        assert_eq!(logging.level, Some(LevelFilter::DEBUG));
        assert!(!logging.console);
        assert_eq!(logging.file.map(|f| f.max_files), Some(20));
    }
}
