pub mod client;
pub mod error;
pub mod event_bridge;
pub mod health;
pub mod protocol;
pub mod routes;
pub mod seed;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod workspace;

pub use server::{start, ServerConfig, ServerHandle};
