//! HTTP surface for album sort jobs.

pub mod config;
pub mod events;
pub mod server;
