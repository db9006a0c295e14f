pub mod cache_server;
pub mod config;
pub mod context;
pub mod logging;
pub mod pacing;
pub mod shutdown;
