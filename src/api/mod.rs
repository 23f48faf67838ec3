//! API Module
//!
//! HTTP/JSON provisioning API served by the provisioner component.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
