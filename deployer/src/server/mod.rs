//! Webhook HTTP server

pub mod errors;
pub mod extract;
pub mod handlers;
pub mod serve;
pub mod state;
