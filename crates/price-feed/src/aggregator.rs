//! Feed hub - wires the cache, push connections, poller and coalescer

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use oddsfeed_core::{FeedSettings, FetchError, FetchResult, PriceSnapshot, Transport, Venue};

use crate::adapters::protocol_for;
use crate::coalescer::RequestCoalescer;
use crate::feeds::{ConnectionManager, Connector, WsConnector};
use crate::poller::{HttpQuoteSource, PollSource, PricePoller};
use crate::state::{PriceCache, PriceCacheStats};
use crate::stream::{open_configured_stream, PriceStream};

const STATS_INTERVAL: Duration = Duration::from_secs(60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide price ingestion services
pub struct FeedHub {
    settings: FeedSettings,
    cache: Arc<PriceCache>,
    coalescer: RequestCoalescer,
    connections: BTreeMap<Venue, ConnectionManager>,
    poller: PricePoller,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    started_at: Instant,
}

impl FeedHub {
    /// Build with websocket transports and HTTP poll sources
    pub fn new(settings: FeedSettings) -> anyhow::Result<Self> {
        Self::with_connector(settings, Arc::new(WsConnector))
    }

    /// Build with a custom push transport
    pub fn with_connector(settings: FeedSettings, connector: Arc<dyn Connector>) -> anyhow::Result<Self> {
        settings.validate()?;

        let cache = Arc::new(PriceCache::from_config(&settings.cache));
        let coalescer = RequestCoalescer::from_config(&settings.coalescer);
        let poller = PricePoller::new(settings.poller.clone(), Arc::clone(&cache));

        let mut connections = BTreeMap::new();
        for venue_config in settings.venues.iter().filter(|v| v.enabled) {
            let venue = venue_config.venue;

            if let (Some(ws_url), Some(protocol)) = (&venue_config.ws_url, protocol_for(venue)) {
                let manager = ConnectionManager::new(
                    ws_url.clone(),
                    settings.connection.clone(),
                    protocol,
                    Arc::clone(&connector),
                    Arc::clone(&cache),
                );
                connections.insert(venue, manager);
            }

            // Push venues keep a REST source for cold fetches
            if let Some(rest_url) = &venue_config.rest_url {
                let source = HttpQuoteSource::new(rest_url.clone(), HTTP_TIMEOUT)?;
                poller.register_source(venue, Arc::new(source));
            }

            info!(venue = %venue, transport = ?venue.transport(), "Venue configured");
        }

        Ok(Self {
            settings,
            cache,
            coalescer,
            connections,
            poller,
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    /// Get shared cache reference
    pub fn cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.cache)
    }

    pub fn coalescer(&self) -> &RequestCoalescer {
        &self.coalescer
    }

    pub fn poller(&self) -> &PricePoller {
        &self.poller
    }

    pub fn connection(&self, venue: Venue) -> Option<&ConnectionManager> {
        self.connections.get(&venue)
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Replace or add the poll source for a venue
    pub fn register_poll_source(&self, venue: Venue, source: Arc<dyn PollSource>) {
        self.poller.register_source(venue, source);
    }

    /// Start all push connections, the poll loop and the stats task
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(push = self.connections.len(), "Starting feed hub");

        for manager in self.connections.values() {
            manager.connect();
        }
        self.poller.start();

        let cache = Arc::clone(&self.cache);
        let stats_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;
                let stats = cache.stats();
                info!(
                    prices = stats.price_count,
                    books = stats.book_count,
                    listeners = stats.listener_count,
                    updates = stats.update_count,
                    listener_failures = stats.listener_failures,
                    "Price cache"
                );
            }
        });
        self.handles.lock().push(stats_handle);
    }

    /// Stop everything; push connections cannot be restarted afterwards
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping feed hub");

        for manager in self.connections.values() {
            manager.disconnect();
        }
        self.poller.stop();

        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start receiving prices for `tokens` of one market
    pub fn track(&self, venue: Venue, market_id: &str, tokens: &[String]) -> FetchResult<()> {
        match venue.transport() {
            Transport::Push => {
                let manager = self.connections.get(&venue).ok_or(FetchError::NoSource(venue))?;
                for token in tokens {
                    manager.protocol().register_token(token, market_id);
                }
                manager.subscribe(tokens);
            }
            Transport::Poll => {
                if self.poller.source(venue).is_none() {
                    return Err(FetchError::NoSource(venue));
                }
                self.poller.subscribe(venue, market_id, tokens);
            }
        }
        debug!(venue = %venue, market_id, tokens = tokens.len(), "Tracking market");
        Ok(())
    }

    /// Stop receiving prices; cached values age out on their own
    pub fn untrack(&self, venue: Venue, market_id: &str, tokens: &[String]) {
        match venue.transport() {
            Transport::Push => {
                if let Some(manager) = self.connections.get(&venue) {
                    manager.unsubscribe(tokens);
                    for token in tokens {
                        manager.protocol().registry().remove(token);
                    }
                }
            }
            Transport::Poll => {
                self.poller.unsubscribe(venue, market_id);
            }
        }
    }

    /// Cached price, or one coalesced origin fetch on a miss
    pub async fn fetch_price(&self, venue: Venue, market_id: &str, token_id: &str) -> FetchResult<PriceSnapshot> {
        if let Some(price) = self.cache.get_price(venue, token_id) {
            return Ok(price);
        }

        let key = format!("{venue}:{market_id}:{token_id}");
        self.coalescer
            .coalesce(
                &key,
                || self.fetch_from_origin(venue, market_id, token_id),
                || self.cache.get_price(venue, token_id),
            )
            .await
    }

    async fn fetch_from_origin(&self, venue: Venue, market_id: &str, token_id: &str) -> FetchResult<PriceSnapshot> {
        let source = self.poller.source(venue).ok_or(FetchError::NoSource(venue))?;
        let tokens = [token_id.to_string()];

        let quotes = source.fetch_market(market_id, &tokens).await.map_err(|e| {
            warn!(venue = %venue, market_id, token_id, error = %e, "Origin fetch failed");
            e
        })?;
        self.poller.ingest(venue, market_id, quotes);

        self.cache
            .get_price(venue, token_id)
            .ok_or_else(|| FetchError::NotFound(format!("{venue}:{token_id}")))
    }

    /// Open a downstream stream with the configured keepalive
    pub fn open_stream(&self, venue: Venue, tokens: Vec<String>) -> PriceStream {
        open_configured_stream(self.cache(), venue, tokens, &self.settings.stream)
    }

    /// Per-venue and cache status
    pub fn status(&self) -> HubStatus {
        let poll_counts = self.poller.subscription_counts();

        let venues = self
            .settings
            .venues
            .iter()
            .filter(|v| v.enabled)
            .map(|config| {
                let venue = config.venue;
                let poll_subscriptions = poll_counts.get(&venue).copied().unwrap_or(0);
                match self.connections.get(&venue) {
                    Some(manager) => VenueStatus {
                        venue,
                        transport: Transport::Push,
                        connected: manager.is_connected(),
                        active: manager.is_active(),
                        tracked_tokens: manager.subscribed_tokens().len(),
                        poll_subscriptions,
                    },
                    None => VenueStatus {
                        venue,
                        transport: Transport::Poll,
                        connected: self.poller.is_running() && self.poller.source(venue).is_some(),
                        active: self.poller.is_running(),
                        tracked_tokens: 0,
                        poll_subscriptions,
                    },
                }
            })
            .collect();

        HubStatus {
            running: self.is_running(),
            venues,
            cache: self.cache.stats(),
            coalescer_keys: self.coalescer.len(),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Drop for FeedHub {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Status of one venue
#[derive(Debug, Clone)]
pub struct VenueStatus {
    pub venue: Venue,
    pub transport: Transport,
    pub connected: bool,
    pub active: bool,
    pub tracked_tokens: usize,
    pub poll_subscriptions: usize,
}

/// Hub statistics
#[derive(Debug, Clone)]
pub struct HubStatus {
    pub running: bool,
    pub venues: Vec<VenueStatus>,
    pub cache: PriceCacheStats,
    pub coalescer_keys: usize,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::testing::MockConnector;
    use crate::poller::PolledQuote;
    use oddsfeed_core::VenueConfig;
    use rust_decimal::Decimal;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PollSource for CountingSource {
        async fn fetch_market(&self, _market_id: &str, token_ids: &[String]) -> FetchResult<Vec<PolledQuote>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(token_ids
                .iter()
                .filter(|t| t.as_str() != "missing")
                .map(|t| PolledQuote::two_sided(t.clone(), Some(Decimal::new(30, 2)), Some(Decimal::new(32, 2))))
                .collect())
        }
    }

    fn hub() -> FeedHub {
        let (connector, _sessions) = MockConnector::new(0);
        FeedHub::with_connector(FeedSettings::default(), connector).unwrap()
    }

    #[tokio::test]
    async fn test_hub_creation() {
        let hub = hub();
        assert!(!hub.is_running());

        let status = hub.status();
        assert_eq!(status.venues.len(), 4);
        assert!(status.venues.iter().all(|v| !v.connected));
        assert!(hub.connection(Venue::Polymarket).is_some());
        assert!(hub.connection(Venue::Myriad).is_none());
    }

    #[tokio::test]
    async fn test_track_routes_by_transport() {
        let hub = hub();
        let tokens = vec!["tok-yes".to_string(), "tok-no".to_string()];

        hub.track(Venue::Polymarket, "0xmarket", &tokens).unwrap();
        let manager = hub.connection(Venue::Polymarket).unwrap();
        assert_eq!(manager.subscribed_tokens().len(), 2);
        assert_eq!(manager.protocol().market_for("tok-yes").as_deref(), Some("0xmarket"));

        hub.track(Venue::Myriad, "42", &tokens).unwrap();
        assert_eq!(hub.poller().subscription_counts().get(&Venue::Myriad), Some(&1));

        hub.untrack(Venue::Polymarket, "0xmarket", &tokens[..1]);
        assert_eq!(manager.subscribed_tokens(), vec!["tok-no".to_string()]);
        assert!(manager.protocol().market_for("tok-yes").is_none());
    }

    #[tokio::test]
    async fn test_track_unconfigured_venue_fails() {
        let settings = FeedSettings {
            venues: vec![VenueConfig::default_for(Venue::Kalshi)],
            ..FeedSettings::default()
        };
        let (connector, _sessions) = MockConnector::new(0);
        let hub = FeedHub::with_connector(settings, connector).unwrap();

        let result = hub.track(Venue::Polymarket, "m", &["t".to_string()]);
        assert!(matches!(result, Err(FetchError::NoSource(Venue::Polymarket))));
    }

    #[tokio::test]
    async fn test_fetch_price_coalesces_misses() {
        let hub = hub();
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        hub.register_poll_source(Venue::Limitless, source.clone());

        let results = futures::future::join_all(
            (0..20).map(|_| hub.fetch_price(Venue::Limitless, "m1", "tok")),
        )
        .await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        for result in results {
            let price = result.unwrap();
            assert_eq!(price.best_bid, Some(Decimal::new(30, 2)));
            assert_eq!(price.market_id.as_deref(), Some("m1"));
        }

        // Served from cache afterwards
        hub.fetch_price(Venue::Limitless, "m1", "tok").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_price_not_found() {
        let hub = hub();
        hub.register_poll_source(
            Venue::Limitless,
            Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
            }),
        );

        let result = hub.fetch_price(Venue::Limitless, "m1", "missing").await;
        assert!(matches!(result, Err(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let hub = hub();
        hub.start();
        hub.start();
        assert!(hub.is_running());
        assert!(hub.poller().is_running());

        hub.stop();
        assert!(!hub.is_running());
        assert!(!hub.poller().is_running());
        assert!(!hub.connection(Venue::Kalshi).unwrap().is_active());
    }
}
