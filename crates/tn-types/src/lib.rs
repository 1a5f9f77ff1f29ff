//! Shared type definitions for toonels
//!
//! This crate holds the lightweight descriptors shared by the configuration
//! loader, the forwarding engine and the SSH client layer: endpoint
//! addresses, jump nodes, tunnels and runtime settings.

pub mod config;
pub mod net;
pub mod settings;
pub mod ssh;

pub use net::{EndpointAddress, Host, InvalidAddressError};
