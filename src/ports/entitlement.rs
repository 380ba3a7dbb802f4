use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RepoError;

/// Entitlement collaborator owned by the course/purchase subsystem.
#[async_trait]
pub trait EntitlementPort: Send + Sync {
    /// Administrator role, a completed purchase, or an active version-access
    /// grant.
    async fn has_access(&self, user_id: &Uuid, course_id: &Uuid) -> Result<bool, RepoError>;

    /// Free chapters are viewable without any entitlement.
    async fn is_chapter_free(&self, chapter_id: &Uuid) -> Result<bool, RepoError>;
}
