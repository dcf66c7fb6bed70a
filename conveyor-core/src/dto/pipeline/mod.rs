//! Pipeline request DTOs

use serde::{Deserialize, Serialize};

/// Request body for `POST /api/pipeline/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    #[serde(default)]
    pub description: String,
}
