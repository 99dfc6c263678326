//! Time-bounded price state with subscriber notification
//!
//! Uses DashMap so each read-modify-write only locks the shard holding its
//! key. Listeners are invoked after the shard lock is released.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use oddsfeed_core::{
    CacheConfig, OrderBookSnapshot, OrderBookUpdate, PriceKey, PriceSnapshot, PriceUpdate, Venue,
};

use crate::listener::PriceListener;

/// Handle returned by [`PriceCache::subscribe`]
pub type SubscriptionId = u64;

/// A canonical write produced by a venue adapter or poller
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    /// Merge-update of the price view
    Price(PriceUpdate),
    /// Full replacement of the book; also publishes its top of book
    Book(OrderBookUpdate),
}

impl CacheWrite {
    pub fn key(&self) -> PriceKey {
        match self {
            CacheWrite::Price(p) => p.key(),
            CacheWrite::Book(b) => b.key(),
        }
    }
}

/// Timestamped price entry
#[derive(Debug, Clone)]
struct PriceEntry {
    snapshot: PriceSnapshot,
    stored_at: Instant,
}

/// Timestamped book entry
#[derive(Debug, Clone)]
struct BookEntry {
    book: OrderBookSnapshot,
    stored_at: Instant,
}

type ListenerList = Vec<(SubscriptionId, Arc<dyn PriceListener>)>;

/// Process-wide price and orderbook store
pub struct PriceCache {
    ttl: Duration,

    /// Latest merged price per (venue, token)
    prices: DashMap<PriceKey, PriceEntry>,

    /// Latest full book per (venue, token)
    books: DashMap<PriceKey, BookEntry>,

    listeners: DashMap<PriceKey, ListenerList>,

    next_subscription: AtomicU64,

    /// Stats
    update_count: AtomicU64,
    listener_failures: AtomicU64,
    last_update: RwLock<Option<Instant>>,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            prices: DashMap::new(),
            books: DashMap::new(),
            listeners: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            update_count: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            last_update: RwLock::new(None),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, stored_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(stored_at) < self.ttl
    }

    /// Merge a partial update into the stored price and notify listeners.
    ///
    /// An expired record is replaced rather than merged so that fields from
    /// a previous session never resurface.
    pub fn update_price(&self, update: PriceUpdate) -> PriceSnapshot {
        let key = update.key();
        let now = Instant::now();

        let snapshot = match self.prices.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let fresh = self.is_fresh(occupied.get().stored_at, now);
                let entry = occupied.get_mut();
                if fresh {
                    entry.snapshot.merge(&update);
                } else {
                    entry.snapshot = update.into_snapshot();
                }
                entry.stored_at = now;
                entry.snapshot.clone()
            }
            Entry::Vacant(vacant) => {
                let snapshot = update.into_snapshot();
                vacant.insert(PriceEntry {
                    snapshot: snapshot.clone(),
                    stored_at: now,
                });
                snapshot
            }
        };

        self.record_update(now);
        self.notify(&key, &snapshot);
        snapshot
    }

    /// Replace the stored book; sides are sorted before the write lands
    pub fn update_orderbook(&self, update: OrderBookUpdate) -> OrderBookSnapshot {
        let key = update.key();
        let now = Instant::now();
        let book = update.into_snapshot();

        self.books.insert(
            key,
            BookEntry {
                book: book.clone(),
                stored_at: now,
            },
        );

        self.record_update(now);
        book
    }

    /// Apply an adapter/poller write.
    ///
    /// Book writes also publish the new best bid/ask as a price merge-update.
    pub fn apply_write(&self, write: CacheWrite) {
        match write {
            CacheWrite::Price(update) => {
                self.update_price(update);
            }
            CacheWrite::Book(update) => {
                let book = self.update_orderbook(update);
                let top = book.top_of_book();
                if !top.is_empty() {
                    self.update_price(top);
                }
            }
        }
    }

    /// Get a price if it is younger than the TTL
    pub fn get_price(&self, venue: Venue, token_id: &str) -> Option<PriceSnapshot> {
        let key = PriceKey::new(venue, token_id);
        let now = Instant::now();
        self.prices
            .get(&key)
            .filter(|e| self.is_fresh(e.stored_at, now))
            .map(|e| e.snapshot.clone())
    }

    /// Get a book if it is younger than the TTL
    pub fn get_orderbook(&self, venue: Venue, token_id: &str) -> Option<OrderBookSnapshot> {
        let key = PriceKey::new(venue, token_id);
        let now = Instant::now();
        self.books
            .get(&key)
            .filter(|e| self.is_fresh(e.stored_at, now))
            .map(|e| e.book.clone())
    }

    /// Point-in-time list of unexpired prices, optionally for one venue
    pub fn get_all_prices(&self, venue: Option<Venue>) -> Vec<PriceSnapshot> {
        let now = Instant::now();
        let mut prices: Vec<PriceSnapshot> = self
            .prices
            .iter()
            .filter(|e| venue.map_or(true, |v| e.key().venue == v))
            .filter(|e| self.is_fresh(e.value().stored_at, now))
            .map(|e| e.value().snapshot.clone())
            .collect();
        prices.sort_by(|a, b| a.key().cmp(&b.key()));
        prices
    }

    /// Register a listener for one key
    pub fn subscribe(
        &self,
        venue: Venue,
        token_id: &str,
        listener: Arc<dyn PriceListener>,
    ) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entry(PriceKey::new(venue, token_id))
            .or_default()
            .push((id, listener));
        debug!(venue = %venue, token_id, subscription = id, "Listener subscribed");
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, venue: Venue, token_id: &str, id: SubscriptionId) -> bool {
        let key = PriceKey::new(venue, token_id);
        let removed = match self.listeners.get_mut(&key) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|(sub, _)| *sub != id);
                before != list.len()
            }
            None => false,
        };
        self.listeners.remove_if(&key, |_, list| list.is_empty());
        if removed {
            debug!(venue = %venue, token_id, subscription = id, "Listener unsubscribed");
        }
        removed
    }

    pub fn listener_count(&self, venue: Venue, token_id: &str) -> usize {
        self.listeners
            .get(&PriceKey::new(venue, token_id))
            .map_or(0, |l| l.len())
    }

    fn notify(&self, key: &PriceKey, snapshot: &PriceSnapshot) {
        // Clone the list so no shard lock is held while callbacks run
        let listeners: ListenerList = match self.listeners.get(key) {
            Some(list) => list.clone(),
            None => return,
        };

        for (id, listener) in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_price(snapshot)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.listener_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, subscription = id, error = %e, "Price listener failed");
                }
                Err(_) => {
                    self.listener_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, subscription = id, "Price listener panicked");
                }
            }
        }
    }

    fn record_update(&self, now: Instant) {
        self.update_count.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Some(now);
    }

    /// Stats
    pub fn stats(&self) -> PriceCacheStats {
        PriceCacheStats {
            price_count: self.prices.len(),
            book_count: self.books.len(),
            listener_count: self.listeners.iter().map(|l| l.len()).sum(),
            update_count: self.update_count.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            last_update_age: self.last_update.read().map(|t| t.elapsed()),
        }
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Statistics about the cache; counts include expired entries
#[derive(Debug, Clone)]
pub struct PriceCacheStats {
    pub price_count: usize,
    pub book_count: usize,
    pub listener_count: usize,
    pub update_count: u64,
    pub listener_failures: u64,
    pub last_update_age: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddsfeed_core::{BookLevel, ListenerError};
    use rust_decimal::Decimal;
    use std::sync::atomic::AtomicUsize;

    fn d(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    fn quote(token: &str, bid: Option<Decimal>, ask: Option<Decimal>) -> PriceUpdate {
        PriceUpdate::new(Venue::Polymarket, token).with_quote(bid, ask)
    }

    fn counting_listener(hits: &Arc<AtomicUsize>) -> Arc<dyn PriceListener> {
        let hits = Arc::clone(hits);
        Arc::new(move |_: &PriceSnapshot| -> Result<(), ListenerError> {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_merge_update() {
        let cache = PriceCache::default();
        cache.update_price(quote("tok", Some(d(1, 0)), Some(d(2, 0))));
        cache.update_price(
            quote("tok", None, Some(d(3, 0))).with_trade(Some(d(5, 0)), None, None),
        );

        let price = cache.get_price(Venue::Polymarket, "tok").unwrap();
        assert_eq!(price.best_bid, Some(d(1, 0)));
        assert_eq!(price.best_ask, Some(d(3, 0)));
        assert_eq!(price.last_trade_price, Some(d(5, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_hides_without_evicting() {
        let cache = PriceCache::new(Duration::from_secs(60));
        cache.update_price(quote("tok", Some(d(40, 2)), None));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get_price(Venue::Polymarket, "tok").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get_price(Venue::Polymarket, "tok").is_none());
        assert!(cache.get_all_prices(None).is_empty());
        assert_eq!(cache.stats().price_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_record_is_replaced_not_merged() {
        let cache = PriceCache::new(Duration::from_secs(60));
        cache.update_price(quote("tok", Some(d(40, 2)), Some(d(45, 2))));

        tokio::time::advance(Duration::from_secs(120)).await;
        cache.update_price(quote("tok", None, Some(d(50, 2))));

        let price = cache.get_price(Venue::Polymarket, "tok").unwrap();
        assert_eq!(price.best_bid, None);
        assert_eq!(price.best_ask, Some(d(50, 2)));
    }

    #[test]
    fn test_orderbook_sorted_on_write() {
        let cache = PriceCache::default();
        let mut update = OrderBookUpdate::new(Venue::Polymarket, "tok");
        update.bids = vec![
            BookLevel::new(d(30, 2), d(1, 0)),
            BookLevel::new(d(45, 2), d(1, 0)),
            BookLevel::new(d(40, 2), d(1, 0)),
        ];
        update.asks = vec![
            BookLevel::new(d(70, 2), d(1, 0)),
            BookLevel::new(d(55, 2), d(1, 0)),
            BookLevel::new(d(60, 2), d(1, 0)),
        ];
        cache.update_orderbook(update);

        let book = cache.get_orderbook(Venue::Polymarket, "tok").unwrap();
        let bids: Vec<_> = book.bids.iter().map(|l| l.price).collect();
        let asks: Vec<_> = book.asks.iter().map(|l| l.price).collect();
        assert_eq!(bids, vec![d(45, 2), d(40, 2), d(30, 2)]);
        assert_eq!(asks, vec![d(55, 2), d(60, 2), d(70, 2)]);
    }

    #[test]
    fn test_book_write_publishes_top_of_book() {
        let cache = PriceCache::default();
        cache.update_price(
            quote("tok", None, None).with_trade(Some(d(41, 2)), Some(d(10, 0)), None),
        );

        let mut update = OrderBookUpdate::new(Venue::Polymarket, "tok");
        update.bids = vec![BookLevel::new(d(40, 2), d(5, 0))];
        update.asks = vec![BookLevel::new(d(42, 2), d(5, 0))];
        cache.apply_write(CacheWrite::Book(update));

        let price = cache.get_price(Venue::Polymarket, "tok").unwrap();
        assert_eq!(price.best_bid, Some(d(40, 2)));
        assert_eq!(price.best_ask, Some(d(42, 2)));
        assert_eq!(price.last_trade_price, Some(d(41, 2)));
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let cache = PriceCache::default();
        let hits = Arc::new(AtomicUsize::new(0));

        cache.subscribe(
            Venue::Polymarket,
            "tok",
            Arc::new(|_: &PriceSnapshot| -> Result<(), ListenerError> {
                Err(ListenerError::Failed("boom".into()))
            }),
        );
        cache.subscribe(
            Venue::Polymarket,
            "tok",
            Arc::new(|_: &PriceSnapshot| -> Result<(), ListenerError> { panic!("listener bug") }),
        );
        cache.subscribe(Venue::Polymarket, "tok", counting_listener(&hits));

        cache.update_price(quote("tok", Some(d(40, 2)), None));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().listener_failures, 2);
    }

    #[test]
    fn test_notification_scoped_to_key_and_unsubscribe() {
        let cache = PriceCache::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = cache.subscribe(Venue::Polymarket, "a", counting_listener(&hits));

        cache.update_price(quote("b", Some(d(1, 1)), None));
        cache.update_price(PriceUpdate::new(Venue::Kalshi, "a").with_quote(Some(d(1, 1)), None));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        cache.update_price(quote("a", Some(d(1, 1)), None));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(cache.unsubscribe(Venue::Polymarket, "a", id));
        assert!(!cache.unsubscribe(Venue::Polymarket, "a", id));
        assert_eq!(cache.listener_count(Venue::Polymarket, "a"), 0);

        cache.update_price(quote("a", Some(d(2, 1)), None));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_all_prices_filters_by_venue() {
        let cache = PriceCache::default();
        cache.update_price(quote("a", Some(d(1, 1)), None));
        cache.update_price(PriceUpdate::new(Venue::Kalshi, "K").with_quote(Some(d(2, 1)), None));

        assert_eq!(cache.get_all_prices(None).len(), 2);
        let kalshi = cache.get_all_prices(Some(Venue::Kalshi));
        assert_eq!(kalshi.len(), 1);
        assert_eq!(kalshi[0].token_id, "K");
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let cache = Arc::new(PriceCache::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..100 {
                        let update = if i % 2 == 0 {
                            quote("tok", Some(d(j, 2)), None)
                        } else {
                            quote("tok", None, Some(d(j, 2)))
                        };
                        cache.update_price(update);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.stats().update_count, 400);
        assert_eq!(cache.stats().price_count, 1);
    }
}
