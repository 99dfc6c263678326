//! Wire messages for the `oddsfeed.PriceFeed` service
//!
//! Declared directly with prost derives; `proto/oddsfeed.proto` documents the
//! same schema for clients. Decimals travel as strings and absent values as
//! empty strings.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamPricesRequest {
    #[prost(string, tag = "1")]
    pub venue: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub token_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Optional; when set the tokens are also tracked upstream
    #[prost(string, tag = "3")]
    pub market_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Price {
    #[prost(string, tag = "1")]
    pub venue: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub market_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub token_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub best_bid: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub best_ask: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub last_trade_price: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub last_trade_size: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub last_trade_side: ::prost::alloc::string::String,
    #[prost(int64, tag = "9")]
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventKind {
    Unspecified = 0,
    Snapshot = 1,
    Price = 2,
    Keepalive = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PriceEvent {
    #[prost(enumeration = "EventKind", tag = "1")]
    pub kind: i32,
    /// Unset for keepalives
    #[prost(message, optional, tag = "2")]
    pub price: ::core::option::Option<Price>,
    #[prost(int64, tag = "3")]
    pub sent_at_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPricesRequest {
    /// Empty for every venue
    #[prost(string, tag = "1")]
    pub venue: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPricesResponse {
    #[prost(message, repeated, tag = "1")]
    pub prices: ::prost::alloc::vec::Vec<Price>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPriceRequest {
    #[prost(string, tag = "1")]
    pub venue: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub market_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub token_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPriceResponse {
    #[prost(message, optional, tag = "1")]
    pub price: ::core::option::Option<Price>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStatusRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VenueStatus {
    #[prost(string, tag = "1")]
    pub venue: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub transport: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub connected: bool,
    #[prost(bool, tag = "4")]
    pub active: bool,
    #[prost(uint32, tag = "5")]
    pub tracked_tokens: u32,
    #[prost(uint32, tag = "6")]
    pub poll_subscriptions: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStatusResponse {
    #[prost(message, repeated, tag = "1")]
    pub venues: ::prost::alloc::vec::Vec<VenueStatus>,
    #[prost(uint64, tag = "2")]
    pub price_count: u64,
    #[prost(uint64, tag = "3")]
    pub book_count: u64,
    #[prost(uint64, tag = "4")]
    pub listener_count: u64,
    #[prost(uint64, tag = "5")]
    pub update_count: u64,
    #[prost(uint64, tag = "6")]
    pub listener_failures: u64,
    #[prost(uint64, tag = "7")]
    pub coalescer_keys: u64,
    #[prost(uint64, tag = "8")]
    pub uptime_secs: u64,
}

include!(concat!(env!("OUT_DIR"), "/oddsfeed.PriceFeed.rs"));
