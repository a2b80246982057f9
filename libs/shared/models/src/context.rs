use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Explicit caller context for staff-facing operations.
///
/// Resolved by the routing layer and passed into every core call; the core
/// scopes all reads and writes to `clinic_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffContext {
    pub clinic_id: Uuid,
    pub actor_id: Option<Uuid>,
}

impl StaffContext {
    pub fn new(clinic_id: Uuid) -> Self {
        Self { clinic_id, actor_id: None }
    }

    pub fn with_actor(clinic_id: Uuid, actor_id: Uuid) -> Self {
        Self { clinic_id, actor_id: Some(actor_id) }
    }
}
