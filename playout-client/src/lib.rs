//! # playout-client
//!
//! Async client for AMCP playout servers.
//!
//! This crate provides:
//! - A connection lifecycle manager with automatic reconnect and keepalive
//! - A FIFO dispatcher correlating responses with submitted commands
//! - A high-level API for the common playout commands
//! - A registry of named devices, including shadow devices

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod manager;

pub use client::Client;
pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionState, Endpoint, ResponseHandle,
};
pub use dispatcher::{CommandId, Completion};
pub use error::ClientError;
pub use manager::{Device, DeviceManager};
