//! A small service embedding the admin client: it registers itself with the configured
//! registry once listening and deregisters on shutdown.
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod server;
