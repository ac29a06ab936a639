//! Tag-gated visibility and fingerprinted rendering for blog content.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
