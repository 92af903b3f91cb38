//! Rasid: a reactive chat agent that spots `*delimited*` name tokens in a
//! bound conversation, resolves them through a layered cache, and replies
//! with human-typist timing.

pub mod agent;
pub mod arabic;
pub mod behavior;
pub mod classify;
pub mod config;
pub mod extract;
pub mod gate;
pub mod resolve;
pub mod session;
pub mod transport;
