//! Polling fallback for venues without a push feed
//!
//! A single loop wakes on a fixed interval and re-fetches every subscribed
//! market, at most `max_batch_size` markets per venue per tick. Results land
//! in the same [`PriceCache`] the push path writes, so readers cannot tell
//! the two apart.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use oddsfeed_core::{parse_decimal, FetchError, FetchResult, PollerConfig, PriceUpdate, Venue};

use crate::state::PriceCache;

/// One token's quote as reported by a poll source
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolledQuote {
    pub token_id: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    /// Set by venues that only publish one price per outcome
    pub price: Option<Decimal>,
}

impl PolledQuote {
    pub fn two_sided(token_id: impl Into<String>, bid: Option<Decimal>, ask: Option<Decimal>) -> Self {
        Self {
            token_id: token_id.into(),
            best_bid: bid,
            best_ask: ask,
            price: None,
        }
    }

    pub fn single(token_id: impl Into<String>, price: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            price: Some(price),
            ..Default::default()
        }
    }

    /// Bid/ask to publish. Single prices are widened by `spread`; the ask is
    /// capped at 1 and a bid that would fall to 0 or below is left out.
    pub fn quote(&self, spread: Decimal) -> Option<(Option<Decimal>, Option<Decimal>)> {
        if self.best_bid.is_some() || self.best_ask.is_some() {
            return Some((self.best_bid, self.best_ask));
        }

        let price = self.price?;
        let half = spread / Decimal::TWO;
        let bid = (price - half).normalize();
        let ask = (price + half).min(Decimal::ONE).normalize();
        Some(((bid > Decimal::ZERO).then_some(bid), Some(ask)))
    }
}

/// Request/response price source for one venue
#[async_trait::async_trait]
pub trait PollSource: Send + Sync {
    async fn fetch_market(&self, market_id: &str, token_ids: &[String]) -> FetchResult<Vec<PolledQuote>>;
}

/// Generic JSON-over-HTTP poll source
///
/// GETs `{base_url}/markets/{market_id}` and reads either a `tokens` (or
/// `outcomes`) array of `{token_id, best_bid, best_ask, price}` objects or a
/// `prices` object mapping token id to price.
pub struct HttpQuoteSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuoteSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl PollSource for HttpQuoteSource {
    async fn fetch_market(&self, market_id: &str, token_ids: &[String]) -> FetchResult<Vec<PolledQuote>> {
        let url = format!("{}/markets/{}", self.base_url, market_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(market_id.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        Ok(parse_market_quotes(&body, token_ids))
    }
}

/// Extract quotes for `token_ids` (all tokens if empty) from a market payload
pub fn parse_market_quotes(body: &Value, token_ids: &[String]) -> Vec<PolledQuote> {
    let wanted = |token: &str| token_ids.is_empty() || token_ids.iter().any(|t| t == token);
    let mut quotes = Vec::new();

    let listed = body
        .get("tokens")
        .or_else(|| body.get("outcomes"))
        .and_then(|v| v.as_array());
    if let Some(entries) = listed {
        for entry in entries {
            let Some(token_id) = entry
                .get("token_id")
                .or_else(|| entry.get("id"))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            if !wanted(token_id) {
                continue;
            }
            quotes.push(PolledQuote {
                token_id: token_id.to_string(),
                best_bid: entry.get("best_bid").and_then(parse_decimal),
                best_ask: entry.get("best_ask").and_then(parse_decimal),
                price: entry.get("price").and_then(parse_decimal),
            });
        }
    }

    if let Some(prices) = body.get("prices").and_then(|v| v.as_object()) {
        for (token_id, price) in prices {
            if !wanted(token_id) || quotes.iter().any(|q| &q.token_id == token_id) {
                continue;
            }
            if let Some(price) = parse_decimal(price) {
                quotes.push(PolledQuote::single(token_id.clone(), price));
            }
        }
    }

    quotes
}

/// Outcome of one poll tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub markets_fetched: usize,
    pub markets_failed: usize,
    pub prices_written: usize,
}

struct PollerInner {
    config: PollerConfig,
    spread: Decimal,
    cache: Arc<PriceCache>,
    sources: RwLock<HashMap<Venue, Arc<dyn PollSource>>>,
    /// venue -> market_id -> token_ids
    subscriptions: RwLock<BTreeMap<Venue, BTreeMap<String, Vec<String>>>>,
    cursors: Mutex<HashMap<Venue, usize>>,
}

pub struct PricePoller {
    inner: Arc<PollerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PricePoller {
    pub fn new(config: PollerConfig, cache: Arc<PriceCache>) -> Self {
        let spread = Decimal::try_from(config.synthetic_spread)
            .map(|s| s.round_dp(8).normalize())
            .unwrap_or_else(|_| Decimal::new(1, 2));

        let inner = PollerInner {
            config,
            spread,
            cache,
            sources: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(BTreeMap::new()),
            cursors: Mutex::new(HashMap::new()),
        };

        Self {
            inner: Arc::new(inner),
            task: Mutex::new(None),
        }
    }

    pub fn register_source(&self, venue: Venue, source: Arc<dyn PollSource>) {
        self.inner.sources.write().insert(venue, source);
        debug!(venue = %venue, "Poll source registered");
    }

    pub fn source(&self, venue: Venue) -> Option<Arc<dyn PollSource>> {
        self.inner.sources.read().get(&venue).cloned()
    }

    /// Add a market to the poll set; tokens merge with any already tracked
    pub fn subscribe(&self, venue: Venue, market_id: &str, token_ids: &[String]) {
        let mut subs = self.inner.subscriptions.write();
        let tokens = subs
            .entry(venue)
            .or_default()
            .entry(market_id.to_string())
            .or_default();
        for token in token_ids {
            if !tokens.contains(token) {
                tokens.push(token.clone());
            }
        }
        debug!(venue = %venue, market_id, tokens = tokens.len(), "Polling market");
    }

    /// Remove a market from the poll set; returns false if it was not polled
    pub fn unsubscribe(&self, venue: Venue, market_id: &str) -> bool {
        let mut subs = self.inner.subscriptions.write();
        let Some(markets) = subs.get_mut(&venue) else {
            return false;
        };
        let removed = markets.remove(market_id).is_some();
        if markets.is_empty() {
            subs.remove(&venue);
        }
        removed
    }

    /// Polled markets per venue
    pub fn subscription_counts(&self) -> BTreeMap<Venue, usize> {
        self.inner
            .subscriptions
            .read()
            .iter()
            .map(|(venue, markets)| (*venue, markets.len()))
            .collect()
    }

    /// Start the poll loop; no-op if already running
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let every = inner.config.interval();
        info!(interval_ms = every.as_millis() as u64, "Starting price poller");

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.poll_once().await;
            }
        }));
    }

    /// Stop the poll loop; no-op if not running
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("Price poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run one tick immediately
    pub async fn poll_once(&self) -> PollReport {
        self.inner.poll_once().await
    }

    /// Write quotes fetched outside the loop; returns how many reached the cache
    pub fn ingest(&self, venue: Venue, market_id: &str, quotes: Vec<PolledQuote>) -> usize {
        self.inner.write_quotes(venue, market_id, quotes)
    }
}

impl Drop for PricePoller {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

type Batch = (Venue, Arc<dyn PollSource>, Vec<(String, Vec<String>)>);

impl PollerInner {
    /// Pick this tick's markets per venue, rotating through oversized sets
    fn next_batches(&self) -> Vec<Batch> {
        let subs = self.subscriptions.read();
        let sources = self.sources.read();
        let mut cursors = self.cursors.lock();
        let cap = self.config.max_batch_size.max(1);

        let mut batches = Vec::new();
        for (venue, markets) in subs.iter() {
            let Some(source) = sources.get(venue) else {
                debug!(venue = %venue, markets = markets.len(), "No poll source registered");
                continue;
            };

            let all: Vec<(&String, &Vec<String>)> = markets.iter().collect();
            let selected: Vec<(String, Vec<String>)> = if all.len() <= cap {
                all.iter().map(|(m, t)| ((*m).clone(), (*t).clone())).collect()
            } else {
                let cursor = cursors.entry(*venue).or_insert(0);
                let start = *cursor % all.len();
                *cursor = (start + cap) % all.len();
                (0..cap)
                    .map(|i| all[(start + i) % all.len()])
                    .map(|(m, t)| (m.clone(), t.clone()))
                    .collect()
            };

            batches.push((*venue, Arc::clone(source), selected));
        }
        batches
    }

    async fn poll_once(&self) -> PollReport {
        let mut fetches = Vec::new();
        for (venue, source, markets) in self.next_batches() {
            for (market_id, token_ids) in markets {
                let source = Arc::clone(&source);
                fetches.push(async move {
                    let result = source.fetch_market(&market_id, &token_ids).await;
                    (venue, market_id, result)
                });
            }
        }

        let mut report = PollReport::default();
        for (venue, market_id, result) in join_all(fetches).await {
            match result {
                Ok(quotes) => {
                    report.markets_fetched += 1;
                    report.prices_written += self.write_quotes(venue, &market_id, quotes);
                }
                Err(e) => {
                    report.markets_failed += 1;
                    warn!(venue = %venue, market_id = %market_id, error = %e, "Poll fetch failed");
                }
            }
        }

        if report.markets_failed > 0 || report.markets_fetched > 0 {
            debug!(
                fetched = report.markets_fetched,
                failed = report.markets_failed,
                written = report.prices_written,
                "Poll tick complete"
            );
        }
        report
    }

    fn write_quotes(&self, venue: Venue, market_id: &str, quotes: Vec<PolledQuote>) -> usize {
        let mut written = 0;
        for quote in quotes {
            let Some((bid, ask)) = quote.quote(self.spread) else {
                debug!(venue = %venue, token_id = %quote.token_id, "Poll quote without prices");
                continue;
            };
            let update = PriceUpdate::new(venue, quote.token_id)
                .with_market(market_id)
                .with_quote(bid, ask);
            self.cache.update_price(update);
            written += 1;
        }
        written
    }
}
