//! User domain types

use serde::{Deserialize, Serialize};

use super::UserId;

/// A user tasks can be assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
}
