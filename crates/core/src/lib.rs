//! Core domain types for the generation relay.
//!
//! This crate has zero internal deps so the render-server client, the
//! callback notifier and the job pipeline can all share the same job,
//! execution-state and artifact definitions.

pub mod artifact;
pub mod config;
pub mod error;
pub mod execution;
pub mod job;
