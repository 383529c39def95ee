//! Gatekeeper Backend Library
//!
//! Token issuance, refresh-token rotation and fixed-window request admission
//! for an axum service. The binary in `main.rs` wires these together; tests
//! build the same router through [`api::Services`].

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod middleware;
pub mod store;
