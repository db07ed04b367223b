//! Gateway platform adapter: websocket session for events, REST for actions.

pub mod adapter;
pub mod gateway;
pub mod model;
pub mod rest;

pub use adapter::DiscordAdapter;
pub use gateway::{GatewayConnection, GatewayError};
pub use model::GatewayEvent;
pub use rest::{RestClient, RestError};
