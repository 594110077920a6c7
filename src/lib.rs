//! Earthquake early-warning tracking: exposure estimates for a reference
//! position, stage classification, alert gating, and live or replayed
//! per-event tracking sessions.

pub mod calculator;
pub mod clients;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod policy;
pub mod routes;
pub mod services;
pub mod tracker;
pub mod utils;
