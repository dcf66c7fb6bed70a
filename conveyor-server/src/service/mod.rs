//! Service Module
//!
//! Business logic layer for the server.
//! Services orchestrate between the repository and the hub.

pub mod chain;
pub mod error;
pub mod notifier;
pub mod pipeline;
pub mod task;

pub use chain::{ChainMaintainer, PipelineLocks};
pub use error::ServiceError;
pub use notifier::ChangeNotifier;
pub use pipeline::PipelineService;
pub use task::{SweepReport, TaskService};
