// Public API for integration tests and potential library usage

pub mod api;
pub mod config;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;
pub mod ws;
