//! Core domain types
//!
//! These types describe pipelines and tasks in their outward-facing shape.
//! The server builds them from repository records and both the HTTP API and
//! the observer stream serialize them as-is, so field names are part of the
//! wire contract.

pub mod pipeline;
pub mod status;
pub mod task;
pub mod user;

/// Pipeline identifier assigned by the repository
pub type PipelineId = i64;

/// Task identifier assigned by the repository
pub type TaskId = i64;

/// User identifier
pub type UserId = i64;
