//! Prediction-market price ingestion
//!
//! Features:
//! - Reconnecting websocket feeds for push venues
//! - Polling fallback for request/response venues
//! - TTL-bounded price and orderbook cache with listeners
//! - Single-flight origin fetches on cache misses
//! - Downstream stream sessions with keepalives

pub mod adapters;
pub mod aggregator;
pub mod backoff;
pub mod coalescer;
pub mod feeds;
pub mod listener;
pub mod poller;
pub mod state;
pub mod stream;

pub use adapters::{protocol_for, KalshiProtocol, PolymarketProtocol, TokenRegistry, VenueProtocol};
pub use aggregator::{FeedHub, HubStatus, VenueStatus};
pub use backoff::Backoff;
pub use coalescer::RequestCoalescer;
pub use feeds::{ConnectionManager, ConnectionState, ConnectionStats, Connector, WsConnector};
pub use listener::{ChannelListener, DeferredListener, PriceListener};
pub use poller::{HttpQuoteSource, PollReport, PollSource, PolledQuote, PricePoller};
pub use state::{CacheWrite, PriceCache, PriceCacheStats, SubscriptionId};
pub use stream::{open_price_stream, PriceStream, StreamEvent};
