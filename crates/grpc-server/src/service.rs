//! gRPC service implementation

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use oddsfeed_core::FetchError;
use oddsfeed_price_feed::FeedHub;

use crate::conversions::{parse_venue, parse_venue_filter};
use crate::proto::price_feed_server::PriceFeed;
use crate::proto::*;

/// gRPC service implementation
#[derive(Clone)]
pub struct PriceFeedService {
    hub: Arc<FeedHub>,
}

impl PriceFeedService {
    pub fn new(hub: Arc<FeedHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<FeedHub> {
        &self.hub
    }
}

fn fetch_status(error: FetchError) -> Status {
    match error {
        FetchError::NotFound(_) | FetchError::NoSource(_) => Status::not_found(error.to_string()),
        other => Status::unavailable(other.to_string()),
    }
}

#[tonic::async_trait]
impl PriceFeed for PriceFeedService {
    type StreamPricesStream = Pin<Box<dyn Stream<Item = Result<PriceEvent, Status>> + Send>>;

    async fn stream_prices(
        &self,
        request: Request<StreamPricesRequest>,
    ) -> Result<Response<Self::StreamPricesStream>, Status> {
        let req = request.into_inner();
        let venue = parse_venue(&req.venue)?;
        if req.token_ids.is_empty() {
            return Err(Status::invalid_argument("token_ids must not be empty"));
        }

        if !req.market_id.is_empty() {
            self.hub
                .track(venue, &req.market_id, &req.token_ids)
                .map_err(fetch_status)?;
        }

        info!(
            target: "audit",
            event = "STREAM_OPEN",
            venue = %venue,
            tokens = req.token_ids.len(),
            "Price stream opened"
        );

        // Dropping the response stream (client gone) ends the session and
        // removes its listeners
        let events = self
            .hub
            .open_stream(venue, req.token_ids)
            .map(|event| Ok(PriceEvent::from(event)));

        Ok(Response::new(Box::pin(events)))
    }

    async fn get_prices(
        &self,
        request: Request<GetPricesRequest>,
    ) -> Result<Response<GetPricesResponse>, Status> {
        let filter = parse_venue_filter(&request.into_inner().venue)?;

        let prices: Vec<Price> = self
            .hub
            .cache()
            .get_all_prices(filter)
            .iter()
            .map(Price::from)
            .collect();
        debug!(count = prices.len(), "GetPrices");

        Ok(Response::new(GetPricesResponse { prices }))
    }

    async fn get_price(
        &self,
        request: Request<GetPriceRequest>,
    ) -> Result<Response<GetPriceResponse>, Status> {
        let req = request.into_inner();
        let venue = parse_venue(&req.venue)?;
        if req.token_id.is_empty() {
            return Err(Status::invalid_argument("token_id is required"));
        }

        match self.hub.fetch_price(venue, &req.market_id, &req.token_id).await {
            Ok(snapshot) => Ok(Response::new(GetPriceResponse {
                price: Some(Price::from(&snapshot)),
            })),
            Err(e) => {
                warn!(venue = %venue, token_id = %req.token_id, error = %e, "Price unavailable");
                Err(fetch_status(e))
            }
        }
    }

    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        let status = self.hub.status();

        Ok(Response::new(GetStatusResponse {
            venues: status.venues.iter().map(VenueStatus::from).collect(),
            price_count: status.cache.price_count as u64,
            book_count: status.cache.book_count as u64,
            listener_count: status.cache.listener_count as u64,
            update_count: status.cache.update_count,
            listener_failures: status.cache.listener_failures,
            coalescer_keys: status.coalescer_keys as u64,
            uptime_secs: status.uptime.as_secs(),
        }))
    }
}
