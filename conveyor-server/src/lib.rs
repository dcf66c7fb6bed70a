//! Conveyor Server
//!
//! Tracks pipelines of chained tasks and streams every change to connected
//! observers over WebSocket.
//!
//! - `repository`: storage behind a transactional trait (Postgres, in-memory)
//! - `service`: chain maintenance, change notification, pipeline and task logic
//! - `hub`: the fan-out actor observers subscribe to
//! - `api`: HTTP routes and the observer endpoint

pub mod api;
pub mod config;
pub mod db;
pub mod hub;
pub mod repository;
pub mod service;
