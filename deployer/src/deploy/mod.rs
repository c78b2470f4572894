//! Deploy pipeline

pub mod compose;
pub mod executor;
pub mod fsm;
pub mod locks;
pub mod orchestrator;
pub mod sanitize;
pub mod stack;
