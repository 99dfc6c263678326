//! Orderbook snapshot types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PriceKey, PriceUpdate, Venue};

/// One aggregated price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    pub fn is_valid(&self) -> bool {
        self.price > Decimal::ZERO && self.size > Decimal::ZERO
    }
}

/// Full-depth book for one outcome token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub venue: Venue,
    pub market_id: Option<String>,
    pub token_id: String,
    /// Sorted descending by price
    pub bids: Vec<BookLevel>,
    /// Sorted ascending by price
    pub asks: Vec<BookLevel>,
    pub updated_at: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.venue, self.token_id.clone())
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Price merge-update carrying the top of this book.
    ///
    /// An empty side yields `None`, which leaves the prior price untouched.
    pub fn top_of_book(&self) -> PriceUpdate {
        let mut update = PriceUpdate::new(self.venue, self.token_id.clone()).with_quote(
            self.best_bid().map(|l| l.price),
            self.best_ask().map(|l| l.price),
        );
        update.market_id = self.market_id.clone();
        update.timestamp = Some(self.updated_at);
        update
    }
}

/// Replacement payload for a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    pub venue: Venue,
    pub market_id: Option<String>,
    pub token_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderBookUpdate {
    pub fn new(venue: Venue, token_id: impl Into<String>) -> Self {
        Self {
            venue,
            market_id: None,
            token_id: token_id.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: None,
        }
    }

    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.venue, self.token_id.clone())
    }

    /// Drop invalid levels and sort both sides into book order
    pub fn into_snapshot(self) -> OrderBookSnapshot {
        let mut bids: Vec<BookLevel> = self.bids.into_iter().filter(BookLevel::is_valid).collect();
        let mut asks: Vec<BookLevel> = self.asks.into_iter().filter(BookLevel::is_valid).collect();
        sort_levels(&mut bids, &mut asks);

        OrderBookSnapshot {
            venue: self.venue,
            market_id: self.market_id,
            token_id: self.token_id,
            bids,
            asks,
            updated_at: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Bids descending, asks ascending
pub fn sort_levels(bids: &mut [BookLevel], asks: &mut [BookLevel]) {
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.sort_by(|a, b| a.price.cmp(&b.price));
}
