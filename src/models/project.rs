use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{Role, Visibility};
use crate::errors::AppError;
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Loggable for Project {
    fn entity_type() -> &'static str { "project" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProject {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub visibility: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbProject> for Project {
    type Error = AppError;

    fn try_from(value: DbProject) -> Result<Self, Self::Error> {
        Ok(Project {
            id: value.id,
            owner_id: value.owner_id,
            name: value.name,
            description: value.description,
            visibility: Visibility::from_str(&value.visibility)?,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Launch Planning")]
    pub name: String,
    #[schema(example = "Prepare milestones for the product launch.")]
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    #[schema(example = "Launch Planning")]
    pub name: Option<String>,
    #[schema(example = "Updated description")]
    pub description: Option<String>,
}

// =============================================================================
// DIRECT PERMISSION GRANTS
// =============================================================================

/// A direct per-user grant on a project. At most one exists per
/// (project, user); re-granting updates the role in place.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionGrant {
    pub project_id: Uuid,
    pub user_id: Uuid,
    /// Denormalized for display; refreshed from the user directory on re-grant
    pub email: String,
    pub role: Role,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

impl Loggable for PermissionGrant {
    fn entity_type() -> &'static str { "project_permission" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPermissionGrant {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

impl TryFrom<DbPermissionGrant> for PermissionGrant {
    type Error = AppError;

    fn try_from(value: DbPermissionGrant) -> Result<Self, Self::Error> {
        Ok(PermissionGrant {
            project_id: value.project_id,
            user_id: value.user_id,
            email: value.email,
            role: Role::from_str(&value.role)?,
            granted_at: value.granted_at,
            granted_by: value.granted_by,
        })
    }
}

// =============================================================================
// GROUP PERMISSION GRANTS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupPermissionGrant {
    pub project_id: Uuid,
    pub group_id: Uuid,
    pub role: Role,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

impl Loggable for GroupPermissionGrant {
    fn entity_type() -> &'static str { "project_group_permission" }
    fn subject_id(&self) -> Uuid { self.group_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbGroupPermissionGrant {
    pub project_id: Uuid,
    pub group_id: Uuid,
    pub role: String,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

impl TryFrom<DbGroupPermissionGrant> for GroupPermissionGrant {
    type Error = AppError;

    fn try_from(value: DbGroupPermissionGrant) -> Result<Self, Self::Error> {
        Ok(GroupPermissionGrant {
            project_id: value.project_id,
            group_id: value.group_id,
            role: Role::from_str(&value.role)?,
            granted_at: value.granted_at,
            granted_by: value.granted_by,
        })
    }
}

// =============================================================================
// SHARING REQUESTS / RESPONSES
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantPermissionRequest {
    #[schema(example = "grace@example.com")]
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePermissionRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantGroupPermissionRequest {
    pub group_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeVisibilityRequest {
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ProjectMember {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectCollaborator {
    pub user_id: Uuid,
    /// Missing when the granted user has since been deleted
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProjectCollaborator {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub role: String,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

impl TryFrom<DbProjectCollaborator> for ProjectCollaborator {
    type Error = AppError;

    fn try_from(value: DbProjectCollaborator) -> Result<Self, Self::Error> {
        Ok(ProjectCollaborator {
            user_id: value.user_id,
            name: value.name,
            email: value.email,
            role: Role::from_str(&value.role)?,
            granted_at: value.granted_at,
            granted_by: value.granted_by,
        })
    }
}

/// The requester's effective role: the maximum across ownership, direct
/// grant and group grants. Absent when only public visibility applies.
#[derive(Debug, Serialize, ToSchema)]
pub struct MyRoleResponse {
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectUsersResponse {
    pub owner: ProjectMember,
    pub collaborators: Vec<ProjectCollaborator>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectGroupGrant {
    pub group_id: Uuid,
    pub name: String,
    pub member_count: i64,
    pub role: Role,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProjectGroupGrant {
    pub group_id: Uuid,
    pub name: String,
    pub member_count: i64,
    pub role: String,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

impl TryFrom<DbProjectGroupGrant> for ProjectGroupGrant {
    type Error = AppError;

    fn try_from(value: DbProjectGroupGrant) -> Result<Self, Self::Error> {
        Ok(ProjectGroupGrant {
            group_id: value.group_id,
            name: value.name,
            member_count: value.member_count,
            role: Role::from_str(&value.role)?,
            granted_at: value.granted_at,
            granted_by: value.granted_by,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectGroupsResponse {
    pub groups: Vec<ProjectGroupGrant>,
}
