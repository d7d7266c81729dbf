//! Protobuf messages and client for the `exchange.Exchange` service,
//! generated from `proto/exchange.proto` by the build script.

tonic::include_proto!("exchange");
