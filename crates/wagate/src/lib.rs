//! Wagate - a gateway that holds one authenticated messaging-network session
//! and exposes it as a small HTTP send API.

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod handlers;
pub mod resolver;
pub mod response;
pub mod server;
pub mod session;
pub mod staging;
