//! Boundary Sentinel: boundary-violation and RSD trigger detection for
//! incoming messages.

pub mod api;
pub mod auth;
pub mod config;
pub mod detection;
pub mod error;
pub mod llm;
pub mod profile;
pub mod store;
