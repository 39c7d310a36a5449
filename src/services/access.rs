use crate::errors::ToolError;
use crate::models::{ListingScope, Server};
use uuid::Uuid;

/// Record access is per user; listing is per organization and user.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipPolicy;

impl OwnershipPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn authorize_record(&self, server: &Server, requester: Uuid) -> Result<(), ToolError> {
        if server.user_id == requester {
            return Ok(());
        }
        Err(ToolError::permission_denied(format!(
            "user {} does not own server {}",
            requester, server.id
        )))
    }

    pub fn listing_scope(&self, organization_id: Uuid, requester: Uuid) -> ListingScope {
        ListingScope {
            organization_id,
            user_id: requester,
        }
    }
}
