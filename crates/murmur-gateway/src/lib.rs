pub mod auth;
pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod presence;
pub mod registry;
pub mod rooms;

pub use delivery::DeliveryEngine;
pub use dispatcher::Dispatcher;
pub use error::GatewayError;

/// Everything a connection needs, built once at startup.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: DeliveryEngine,
    pub jwt_secret: String,
    /// Page size for history replay and `getPreviousMessages`
    pub history_page: u32,
}
