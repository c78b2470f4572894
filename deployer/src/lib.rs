//! Deployer Library
//!
//! Core modules of the webhook-driven compose deployer.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod logs;
pub mod models;
pub mod secrets;
pub mod server;
pub mod storage;
pub mod utils;
