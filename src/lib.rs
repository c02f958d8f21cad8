pub mod api;
pub mod config;
pub mod logging;
pub mod server;
pub mod service;
pub mod store;
