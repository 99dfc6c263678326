//! Transport setup for the PriceFeed service

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::transport::Server;
use tracing::info;

use oddsfeed_core::FeedSettings;
use oddsfeed_price_feed::FeedHub;

use crate::proto::price_feed_server::PriceFeedServer;
use crate::service::PriceFeedService;

/// Listener and HTTP/2 keepalive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcServerConfig {
    pub host: String,
    pub port: u16,
    pub concurrency_limit: usize,
    pub keep_alive_interval_secs: u64,
    pub keep_alive_timeout_secs: u64,
}

impl GrpcServerConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
            concurrency_limit: 256,
            keep_alive_interval_secs: 60,
            keep_alive_timeout_secs: 20,
        }
    }
}

pub struct GrpcServer {
    config: GrpcServerConfig,
    service: PriceFeedService,
}

impl GrpcServer {
    pub fn new(config: GrpcServerConfig, hub: Arc<FeedHub>) -> Self {
        Self {
            config,
            service: PriceFeedService::new(hub),
        }
    }

    pub fn with_service(config: GrpcServerConfig, service: PriceFeedService) -> Self {
        Self { config, service }
    }

    pub fn service(&self) -> &PriceFeedService {
        &self.service
    }

    fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.address().parse()?)
    }

    fn builder(&self) -> Server {
        Server::builder()
            .concurrency_limit_per_connection(self.config.concurrency_limit)
            .tcp_keepalive(Some(self.config.keep_alive_interval()))
            .http2_keepalive_interval(Some(self.config.keep_alive_interval()))
            .http2_keepalive_timeout(Some(self.config.keep_alive_timeout()))
    }

    /// Serve until the process is killed
    pub async fn start(&self) -> anyhow::Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `signal` resolves, then drain in-flight calls
    pub async fn serve_until<F>(&self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.socket_addr()?;
        info!(%addr, "PriceFeed service listening");

        self.builder()
            .add_service(PriceFeedServer::new(self.service.clone()))
            .serve_with_shutdown(addr, async {
                signal.await;
                info!("Stopping PriceFeed service");
            })
            .await?;

        Ok(())
    }

    /// `host:port` the server binds
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// Builds a [`GrpcServer`], creating a hub from feed settings unless one is given
pub struct GrpcServerBuilder {
    config: GrpcServerConfig,
    feed: FeedSettings,
    hub: Option<Arc<FeedHub>>,
}

impl GrpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: GrpcServerConfig::default(),
            feed: FeedSettings::default(),
            hub: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit;
        self
    }

    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval_secs = interval.as_secs();
        self
    }

    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.config.keep_alive_timeout_secs = timeout.as_secs();
        self
    }

    /// Feed settings used when no hub is supplied
    pub fn feed_settings(mut self, feed: FeedSettings) -> Self {
        self.feed = feed;
        self
    }

    pub fn hub(mut self, hub: Arc<FeedHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn build(self) -> anyhow::Result<GrpcServer> {
        let hub = match self.hub {
            Some(hub) => hub,
            None => Arc::new(FeedHub::new(self.feed)?),
        };
        Ok(GrpcServer::new(self.config, hub))
    }
}

impl Default for GrpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GrpcServerConfig::default();
        assert_eq!(config.port, 50051);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.keep_alive_timeout(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_builder() {
        let server = GrpcServerBuilder::new()
            .host("0.0.0.0")
            .port(9000)
            .feed_settings(FeedSettings {
                venues: vec![],
                ..FeedSettings::default()
            })
            .build()
            .unwrap();

        assert_eq!(server.address(), "0.0.0.0:9000");
        assert!(server.service().hub().status().venues.is_empty());
    }
}
