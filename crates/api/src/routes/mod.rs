//! HTTP and WebSocket handlers

pub mod alarms;
pub mod analysis;
pub mod health;
pub mod ws;
