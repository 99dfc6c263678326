//! Downstream price stream sessions
//!
//! Each session registers one cache listener per requested token and turns
//! notifications into [`StreamEvent`]s. Closing the consumer side tears the
//! session down and removes every listener it registered; the venue-level
//! subscriptions are left alone.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use oddsfeed_core::{PriceSnapshot, StreamConfig, Venue};

use crate::listener::ChannelListener;
use crate::state::{PriceCache, SubscriptionId};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Cached value present when the stream opened
    Snapshot(PriceSnapshot),
    /// Merged snapshot after a cache write
    Price(PriceSnapshot),
    /// No update within the keepalive interval
    Keepalive,
}

/// Consumer side of a stream session
pub struct PriceStream {
    events: ReceiverStream<StreamEvent>,
}

impl PriceStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.next().await
    }
}

impl Stream for PriceStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Listener registrations owned by one session, removed on drop
struct Registrations {
    cache: Arc<PriceCache>,
    venue: Venue,
    ids: Vec<(String, SubscriptionId)>,
}

impl Drop for Registrations {
    fn drop(&mut self) {
        for (token_id, id) in self.ids.drain(..) {
            self.cache.unsubscribe(self.venue, &token_id, id);
        }
        debug!(venue = %self.venue, "Price stream listeners removed");
    }
}

/// Open a session over `tokens`
pub fn open_price_stream(
    cache: Arc<PriceCache>,
    venue: Venue,
    tokens: Vec<String>,
    keepalive: Duration,
    buffer: usize,
) -> PriceStream {
    let buffer = buffer.max(1);
    let (updates_tx, mut updates) = mpsc::channel(buffer);
    let (events, rx) = mpsc::channel(buffer);

    let mut registrations = Registrations {
        cache: Arc::clone(&cache),
        venue,
        ids: Vec::with_capacity(tokens.len()),
    };
    for token_id in &tokens {
        let listener = Arc::new(ChannelListener::new(updates_tx.clone()));
        let id = cache.subscribe(venue, token_id, listener);
        registrations.ids.push((token_id.clone(), id));
    }
    drop(updates_tx);

    debug!(venue = %venue, tokens = tokens.len(), "Price stream opened");

    tokio::spawn(async move {
        let _registrations = registrations;

        for token_id in &tokens {
            if let Some(snapshot) = cache.get_price(venue, token_id) {
                if events.send(StreamEvent::Snapshot(snapshot)).await.is_err() {
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                _ = events.closed() => break,
                next = timeout(keepalive, updates.recv()) => {
                    let event = match next {
                        Ok(Some(snapshot)) => StreamEvent::Price(snapshot),
                        Ok(None) => break,
                        Err(_) => {
                            trace!(venue = %venue, "Stream keepalive");
                            StreamEvent::Keepalive
                        }
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    PriceStream {
        events: ReceiverStream::new(rx),
    }
}

/// [`open_price_stream`] with configured keepalive and buffer
pub fn open_configured_stream(
    cache: Arc<PriceCache>,
    venue: Venue,
    tokens: Vec<String>,
    config: &StreamConfig,
) -> PriceStream {
    open_price_stream(cache, venue, tokens, config.keepalive(), config.buffer)
}
