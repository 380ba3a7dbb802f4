//! Adapters - Concrete implementations of the ports.

pub mod aws;
pub mod local;
pub mod redis;
