//! Generates the `metricsapi.MetricsApi` client and server stubs.
//!
//! Message types are derived by hand in `src/lib.rs`, so no `.proto`
//! compilation (and no `protoc`) is involved.

fn main() {
    let update_all_metrics = tonic_build::manual::Method::builder()
        .name("update_all_metrics")
        .route_name("UpdateAllMetrics")
        .input_type("crate::proto::MetricsList")
        .output_type("crate::proto::UpdateResponse")
        .codec_path("tonic::codec::ProstCodec")
        .build();

    let get_ping = tonic_build::manual::Method::builder()
        .name("get_ping")
        .route_name("GetPing")
        .input_type("crate::proto::Empty")
        .output_type("crate::proto::Pong")
        .codec_path("tonic::codec::ProstCodec")
        .build();

    let service = tonic_build::manual::Service::builder()
        .name("MetricsApi")
        .package("metricsapi")
        .method(update_all_metrics)
        .method(get_ping)
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
