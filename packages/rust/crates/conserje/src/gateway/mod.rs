//! HTTP ingress: webhook endpoint plus health and info routes.

mod http;

pub use http::{
    build_gateway, GatewayApp, GatewayHealthResponse, ServiceInfoResponse, DEFAULT_WEBHOOK_PATH,
};
