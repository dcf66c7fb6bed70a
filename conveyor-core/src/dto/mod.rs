//! Request bodies accepted by the HTTP surface

pub mod pipeline;
pub mod task;
