//! Client side of the admin registry: describes this running instance and keeps it
//! registered with one or more registry servers for as long as the process lives.
pub mod application;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registrator;
pub mod scheduler;
