//! gRPC front end for the oddsfeed price service
//!
//! Exposes streaming, snapshot, point-lookup and status reads over the
//! shared feed hub.

pub mod conversions;
pub mod proto;
pub mod server;
pub mod service;
pub mod settings;

pub use server::{GrpcServer, GrpcServerBuilder, GrpcServerConfig};
pub use service::PriceFeedService;
pub use settings::{LogConfig, ServerSettings};
