//! Node configuration.

use crate::PeerAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("shuffle interval must be non-zero")]
    ZeroShuffleInterval,
    #[error("sample size must be at least 1")]
    ZeroSampleSize,
    #[error("gossip fanout must be at least 1")]
    ZeroFanout,
}

/// Configuration for a mesh node.
///
/// A node with no `contact` starts alone and waits to be discovered; every
/// other node names one existing peer and learns the rest through shuffles.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Bootstrap contact to connect to at startup (None = first node)
    pub contact: Option<PeerAddr>,
    /// How often to initiate a shuffle round (default: 2s)
    pub shuffle_interval: Duration,
    /// Maximum number of peers carried in a shuffle sample (default: 3)
    pub sample_size: usize,
    /// Number of peers each gossip message is relayed to (default: 2)
    pub gossip_fanout: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            contact: None,
            shuffle_interval: Duration::from_secs(2),
            sample_size: 3,
            gossip_fanout: 2,
        }
    }
}

impl MeshConfig {
    /// Check the configuration for values that cannot run.
    ///
    /// Called once at startup; a bad configuration is fatal, there is no
    /// partial-startup mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shuffle_interval.is_zero() {
            return Err(ConfigError::ZeroShuffleInterval);
        }
        if self.sample_size == 0 {
            return Err(ConfigError::ZeroSampleSize);
        }
        if self.gossip_fanout == 0 {
            return Err(ConfigError::ZeroFanout);
        }
        Ok(())
    }
}
