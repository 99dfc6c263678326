//! Layered service settings: built-in defaults, then an optional
//! `oddsfeed.toml`, then `ODDSFEED__*` environment variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use oddsfeed_core::FeedSettings;

use crate::server::GrpcServerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "oddsfeed";
const ENV_PREFIX: &str = "ODDSFEED";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub grpc: GrpcServerConfig,
    pub log: LogConfig,
    pub feed: FeedSettings,
}

impl ServerSettings {
    /// Load from `oddsfeed.toml` (if present) and the environment
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Some(DEFAULT_CONFIG_FILE))
    }

    /// `file` is a path without extension; a missing file is not an error
    pub fn load_from(file: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.feed.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddsfeed_core::Venue;

    #[test]
    fn test_defaults_without_file() {
        let settings = ServerSettings::load_from(Some("does-not-exist")).unwrap();
        assert_eq!(settings.grpc.port, 50051);
        assert_eq!(settings.log.level, "info");
        assert_eq!(settings.feed.cache.ttl_secs, 60);
        assert!(settings.feed.venue(Venue::Polymarket).is_some());
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("ODDSFEED__FEED__POLLER__MAX_BATCH_SIZE", "7");
        std::env::set_var("ODDSFEED__LOG__JSON", "true");

        let settings = ServerSettings::load_from(None).unwrap();
        assert_eq!(settings.feed.poller.max_batch_size, 7);
        assert!(settings.log.json);

        std::env::remove_var("ODDSFEED__FEED__POLLER__MAX_BATCH_SIZE");
        std::env::remove_var("ODDSFEED__LOG__JSON");
    }
}
