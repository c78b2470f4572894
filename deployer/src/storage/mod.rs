//! Persistent configuration sources

pub mod settings;
