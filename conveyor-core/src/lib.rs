//! Conveyor Core
//!
//! Core types for the Conveyor pipeline tracker.
//!
//! This crate contains:
//! - Domain types: Pipelines, tasks, statuses and users as observers see them
//! - DTOs: Request bodies accepted by the server
//! - Messages: The delta messages fanned out to connected observers

pub mod domain;
pub mod dto;
pub mod message;
