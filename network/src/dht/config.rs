use std::time::Duration;

use kadnode_util::serde_helpers;
use serde::{Deserialize, Serialize};

use crate::proto::{MAX_REPLY_CONTACTS, STORE_HEADER_LEN};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    /// DHT K parameter: bucket capacity and lookup result width.
    ///
    /// Default: 20.
    pub max_k: usize,

    /// Number of peers queried in parallel during a lookup round.
    ///
    /// Default: 3.
    pub alpha: usize,

    /// UDP port shared by all peers of the network.
    ///
    /// Default: 5001.
    pub port: u16,

    /// How long to wait for a reply to an RPC.
    ///
    /// Default: 500ms.
    #[serde(with = "serde_helpers::humantime")]
    pub request_timeout: Duration,

    /// Time to live of a stored value without refresh.
    ///
    /// Default: 30 seconds.
    #[serde(with = "serde_helpers::humantime")]
    pub stored_value_ttl: Duration,

    /// Interval between TTL decrements of stored values.
    ///
    /// Default: 1 second.
    #[serde(with = "serde_helpers::humantime")]
    pub expiry_sweep_period: Duration,

    /// Interval between refresh broadcasts to remembered holders.
    /// Must be shorter than `stored_value_ttl`.
    ///
    /// Default: 5 seconds.
    #[serde(with = "serde_helpers::humantime")]
    pub refresh_period: Duration,

    /// Largest datagram sent or accepted.
    ///
    /// Default: 65507 bytes.
    pub max_datagram_size: usize,

    /// Maximum number of concurrently running fire-and-forget RPCs
    /// and eviction pings.
    ///
    /// Default: 64.
    pub max_background_tasks: usize,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            max_k: 20,
            alpha: 3,
            port: 5001,
            request_timeout: Duration::from_millis(500),
            stored_value_ttl: Duration::from_secs(30),
            expiry_sweep_period: Duration::from_secs(1),
            refresh_period: Duration::from_secs(5),
            max_datagram_size: 65507,
            max_background_tasks: 64,
        }
    }
}

impl DhtConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_k == 0 || self.max_k > MAX_REPLY_CONTACTS {
            return Err(ConfigError::InvalidK(self.max_k));
        }
        if self.alpha == 0 {
            return Err(ConfigError::ZeroAlpha);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if self.expiry_sweep_period.is_zero() {
            return Err(ConfigError::ZeroSweepPeriod);
        }
        if self.refresh_period.is_zero() || self.refresh_period >= self.stored_value_ttl {
            return Err(ConfigError::RefreshTooSlow {
                refresh_period: self.refresh_period,
                ttl: self.stored_value_ttl,
            });
        }
        if self.max_datagram_size <= STORE_HEADER_LEN {
            return Err(ConfigError::DatagramTooSmall(self.max_datagram_size));
        }
        if self.max_background_tasks == 0 {
            return Err(ConfigError::ZeroBackgroundTasks);
        }
        Ok(())
    }

    /// Largest value that fits into a single STORE datagram.
    pub fn max_value_len(&self) -> usize {
        self.max_datagram_size.saturating_sub(STORE_HEADER_LEN)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_k must be in 1..=255, got {0}")]
    InvalidK(usize),
    #[error("alpha must be positive")]
    ZeroAlpha,
    #[error("request timeout must be positive")]
    ZeroRequestTimeout,
    #[error("expiry sweep period must be positive")]
    ZeroSweepPeriod,
    #[error("refresh period {refresh_period:?} must be positive and shorter than ttl {ttl:?}")]
    RefreshTooSlow {
        refresh_period: Duration,
        ttl: Duration,
    },
    #[error("max datagram size {0} leaves no room for a value")]
    DatagramTooSmall(usize),
    #[error("max background tasks must be positive")]
    ZeroBackgroundTasks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        DhtConfig::default().validate().unwrap();
        assert_eq!(DhtConfig::default().max_value_len(), 65507 - 41);
    }

    #[test]
    fn refresh_must_be_shorter_than_ttl() {
        let config = DhtConfig {
            refresh_period: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RefreshTooSlow { .. })
        ));
    }

    #[test]
    fn k_must_fit_into_reply() {
        for max_k in [0, 256, 1000] {
            let config = DhtConfig {
                max_k,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::InvalidK(_))));
        }

        let config = DhtConfig {
            max_k: 255,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_json() {
        let config: DhtConfig = serde_json::from_str(
            r#"{ "max_k": 8, "request_timeout": "200ms", "stored_value_ttl": "1m" }"#,
        )
        .unwrap();

        assert_eq!(config.max_k, 8);
        assert_eq!(config.alpha, 3);
        assert_eq!(config.request_timeout, Duration::from_millis(200));
        assert_eq!(config.stored_value_ttl, Duration::from_secs(60));
        config.validate().unwrap();

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["refresh_period"], "5s");
    }
}
