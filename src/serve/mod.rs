//! Native static file server for the page and its WASM bundle

pub mod config;
pub mod http;
pub mod server;

pub use config::{load, Args, ConfigError, ServeConfig};
pub use server::Server;
