//! Generates the `oddsfeed.PriceFeed` server from the message types declared
//! in `src/proto.rs`, so no protoc is needed at build time.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::MethodBuilder {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{input}"))
        .output_type(format!("crate::proto::{output}"))
        .codec_path(CODEC)
}

fn main() {
    let service = Service::builder()
        .name("PriceFeed")
        .package("oddsfeed")
        .method(
            method("stream_prices", "StreamPrices", "StreamPricesRequest", "PriceEvent")
                .server_streaming()
                .build(),
        )
        .method(method("get_prices", "GetPrices", "GetPricesRequest", "GetPricesResponse").build())
        .method(method("get_price", "GetPrice", "GetPriceRequest", "GetPriceResponse").build())
        .method(method("get_status", "GetStatus", "GetStatusRequest", "GetStatusResponse").build())
        .build();

    Builder::new().build_client(false).compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
