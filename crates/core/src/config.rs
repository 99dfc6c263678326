//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConfigError, Transport, Venue};

/// Price cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are treated as absent
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 60 }
    }
}

/// Reconnect backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

/// Push connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub heartbeat_interval_ms: u64,
    /// Upper bound on a single heartbeat send
    pub heartbeat_timeout_ms: u64,
    /// Session is considered dead after this long without any inbound frame
    pub idle_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 5_000,
            idle_timeout_ms: 60_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Polling fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
    /// Markets fetched per venue per tick
    pub max_batch_size: usize,
    /// Spread used to widen single-price venues into a bid/ask pair
    pub synthetic_spread: f64,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_batch_size: 20,
            synthetic_spread: 0.01,
        }
    }
}

/// Request coalescer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// Idle locks older than this are swept
    pub stale_window_secs: u64,
}

impl CoalescerConfig {
    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.stale_window_secs)
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            stale_window_secs: 60,
        }
    }
}

/// Downstream stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub keepalive_secs: u64,
    /// Per-stream event buffer
    pub buffer: usize,
}

impl StreamConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 15,
            buffer: 256,
        }
    }
}

/// Per-venue endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub venue: Venue,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub rest_url: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl VenueConfig {
    /// Built-in public endpoints
    pub fn default_for(venue: Venue) -> Self {
        let (ws_url, rest_url) = match venue {
            Venue::Polymarket => (
                Some("wss://ws-subscriptions-clob.polymarket.com/ws/market"),
                Some("https://clob.polymarket.com"),
            ),
            Venue::Kalshi => (
                Some("wss://api.elections.kalshi.com/trade-api/ws/v2"),
                Some("https://api.elections.kalshi.com/trade-api/v2"),
            ),
            Venue::Limitless => (None, Some("https://api.limitless.exchange")),
            Venue::Myriad => (None, Some("https://api.myriad.markets")),
        };

        Self {
            venue,
            enabled: true,
            ws_url: ws_url.map(str::to_string),
            rest_url: rest_url.map(str::to_string),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        match self.venue.transport() {
            Transport::Push if self.ws_url.is_none() => Err(ConfigError::Invalid(format!(
                "{} is a push venue but has no ws_url",
                self.venue
            ))),
            Transport::Poll if self.rest_url.is_none() => Err(ConfigError::Invalid(format!(
                "{} is a poll venue but has no rest_url",
                self.venue
            ))),
            _ => Ok(()),
        }
    }
}

/// Complete feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub venues: Vec<VenueConfig>,
    pub cache: CacheConfig,
    pub connection: ConnectionConfig,
    pub poller: PollerConfig,
    pub coalescer: CoalescerConfig,
    pub stream: StreamConfig,
}

impl FeedSettings {
    pub fn venue(&self, venue: Venue) -> Option<&VenueConfig> {
        self.venues.iter().find(|v| v.venue == venue && v.enabled)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for venue in &self.venues {
            venue.validate()?;
        }
        if self.poller.max_batch_size == 0 {
            return Err(ConfigError::Invalid("poller.max_batch_size must be > 0".into()));
        }
        if self.connection.reconnect.base_delay_ms > self.connection.reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            venues: Venue::ALL.iter().map(|v| VenueConfig::default_for(*v)).collect(),
            cache: CacheConfig::default(),
            connection: ConnectionConfig::default(),
            poller: PollerConfig::default(),
            coalescer: CoalescerConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = FeedSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cache.ttl(), Duration::from_secs(60));
        assert_eq!(settings.connection.reconnect.max_delay(), Duration::from_secs(60));
        assert!(settings.venue(Venue::Kalshi).is_some());
    }

    #[test]
    fn test_push_venue_requires_ws_url() {
        let mut venue = VenueConfig::default_for(Venue::Polymarket);
        venue.ws_url = None;
        assert!(venue.validate().is_err());

        venue.enabled = false;
        assert!(venue.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: FeedSettings =
            serde_json::from_str(r#"{"cache": {"ttl_secs": 5}, "venues": [{"venue": "kalshi", "ws_url": "wss://x"}]}"#)
                .unwrap();
        assert_eq!(settings.cache.ttl_secs, 5);
        assert_eq!(settings.poller.max_batch_size, 20);
        assert_eq!(settings.venues.len(), 1);
        assert!(settings.venues[0].enabled);
    }
}
