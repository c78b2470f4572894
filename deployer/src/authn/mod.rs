//! Request authentication and admission

pub mod rate_limit;
pub mod signature;
