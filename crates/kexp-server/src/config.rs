//! Server defaults and routes.

/// Listener and routing configuration.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 5173;
    pub const HEALTH_ROUTE: &'static str = "/health";
    pub const STREAM_ROUTE: &'static str = "/api/stream/v1/";
    pub const STREAM_ROUTE_BARE: &'static str = "/api/stream/v1";
    pub const REQUEST_ID_HEADER: &'static str = "x-request-id";
    /// Printed on stdout once bound; parent processes parse the port from it.
    pub const PORT_ANNOUNCE_PREFIX: &'static str = "STREAM_PORT=";
}
