//! Venue frame in, downstream stream event out

use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use oddsfeed_core::{FeedError, FeedResult, FeedSettings, Venue, VenueConfig};
use oddsfeed_price_feed::feeds::{FrameSink, FrameStream};
use oddsfeed_price_feed::{Connector, FeedHub, StreamEvent};

struct Session {
    outbound: fmpsc::UnboundedReceiver<Message>,
    inbound: fmpsc::UnboundedSender<FeedResult<Message>>,
}

struct LoopbackConnector {
    sessions: mpsc::UnboundedSender<Session>,
}

#[async_trait::async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, _url: &str) -> FeedResult<(FrameSink, FrameStream)> {
        let (out_tx, out_rx) = fmpsc::unbounded();
        let (in_tx, in_rx) = fmpsc::unbounded();
        self.sessions
            .send(Session {
                outbound: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| FeedError::ConnectionFailed("test harness gone".into()))?;

        let sink = out_tx.sink_map_err(|e| FeedError::SendFailed(e.to_string()));
        Ok((Box::pin(sink), Box::pin(in_rx)))
    }
}

fn kalshi_only() -> FeedSettings {
    FeedSettings {
        venues: vec![VenueConfig::default_for(Venue::Kalshi)],
        ..FeedSettings::default()
    }
}

async fn next_text(session: &mut Session) -> String {
    loop {
        match session.outbound.next().await {
            Some(Message::Text(text)) => return text,
            Some(_) => continue,
            None => panic!("session closed"),
        }
    }
}

#[tokio::test]
async fn test_kalshi_ticker_reaches_stream() {
    let (tx, mut sessions) = mpsc::unbounded_channel();
    let hub = FeedHub::with_connector(kalshi_only(), Arc::new(LoopbackConnector { sessions: tx })).unwrap();

    hub.track(Venue::Kalshi, "T1", &["T1".to_string()]).unwrap();
    hub.start();

    let mut session = tokio::time::timeout(Duration::from_secs(5), sessions.recv())
        .await
        .unwrap()
        .unwrap();
    let subscribe: serde_json::Value = serde_json::from_str(&next_text(&mut session).await).unwrap();
    assert_eq!(subscribe["cmd"], "subscribe");
    assert_eq!(subscribe["params"]["market_tickers"], serde_json::json!(["T1"]));

    let mut stream = hub.open_stream(Venue::Kalshi, vec!["T1".to_string()]);

    session
        .inbound
        .send(Ok(Message::Text(
            r#"{"type":"ticker","sid":1,"msg":{"market_ticker":"T1","yes_bid":40,"yes_ask":42}}"#.into(),
        )))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    let StreamEvent::Price(price) = event else {
        panic!("expected a price event, got {event:?}");
    };
    assert_eq!(price.token_id, "T1");
    assert_eq!(price.best_bid.unwrap().to_string(), "0.40");
    assert_eq!(price.best_ask.unwrap().to_string(), "0.42");

    // One ticker frame, one price event
    match tokio::time::timeout(Duration::from_millis(200), stream.recv()).await {
        Err(_) | Ok(Some(StreamEvent::Keepalive)) => {}
        Ok(other) => panic!("expected no further price events, got {other:?}"),
    }

    // A later consumer gets the cached value as its opening snapshot
    let mut late = hub.open_stream(Venue::Kalshi, vec!["T1".to_string()]);
    let Some(StreamEvent::Snapshot(snapshot)) = late.recv().await else {
        panic!("expected opening snapshot");
    };
    assert_eq!(snapshot.best_bid, price.best_bid);

    let status = hub.status();
    assert_eq!(status.venues.len(), 1);
    assert!(status.venues[0].connected);
    assert_eq!(status.venues[0].tracked_tokens, 1);

    hub.stop();
}
