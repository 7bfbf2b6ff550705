use std::str::FromStr;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::group::DbGroup;
use crate::models::project::{
    DbGroupPermissionGrant, DbPermissionGrant, DbProject, DbProjectCollaborator,
    DbProjectGroupGrant, ProjectMember,
};
use crate::models::user::DbUser;
use crate::utils::utc_now;

use super::{Role, Visibility};

/// Permission resolution engine for shared projects.
///
/// Decision order mirrors the privilege paths:
/// 1. ownership -> allow everything
/// 2. public visibility -> allow view
/// 3. direct grant -> allow per role
/// 4. group grant (owned or member-of) -> allow per role
/// 5. deny
///
/// Group membership that cannot be resolved denies access: every query
/// propagates resolution errors instead of assuming "no groups".
pub struct PermissionEngine<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PermissionEngine<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // DECISION QUERIES
    // =========================================================================

    pub fn is_owner(project: &DbProject, user_id: Uuid) -> bool {
        project.owner_id == user_id
    }

    /// Whether the user may view the project at all. Any grant implies at
    /// least viewer access; public visibility opens view to everyone.
    pub async fn can_access(&self, project: &DbProject, user_id: Uuid) -> AppResult<bool> {
        if Self::is_owner(project, user_id) {
            return Ok(true);
        }
        if Visibility::from_str(&project.visibility)? == Visibility::Public {
            return Ok(true);
        }
        if self.direct_role(project.id, user_id).await?.is_some() {
            return Ok(true);
        }

        let via_groups = !self.group_roles(project.id, user_id).await?.is_empty();
        if !via_groups {
            tracing::debug!(
                user_id = %user_id,
                project_id = %project.id,
                "view access denied"
            );
        }
        Ok(via_groups)
    }

    /// Whether the user may mutate the project. Visibility never grants
    /// edit; only ownership or an editor-or-better grant path does.
    pub async fn can_edit(&self, project: &DbProject, user_id: Uuid) -> AppResult<bool> {
        if Self::is_owner(project, user_id) {
            return Ok(true);
        }
        if let Some(role) = self.direct_role(project.id, user_id).await? {
            if role.can_edit() {
                return Ok(true);
            }
        }

        let via_groups = self
            .group_roles(project.id, user_id)
            .await?
            .into_iter()
            .any(|role| role.can_edit());
        if !via_groups {
            tracing::debug!(
                user_id = %user_id,
                project_id = %project.id,
                "edit access denied"
            );
        }
        Ok(via_groups)
    }

    /// The maximum role the user holds across ownership, direct grant and
    /// group grants, or `None` when no path applies.
    pub async fn effective_role(&self, project: &DbProject, user_id: Uuid) -> AppResult<Option<Role>> {
        if Self::is_owner(project, user_id) {
            return Ok(Some(Role::Owner));
        }

        let direct = self.direct_role(project.id, user_id).await?;
        let group_max = self.group_roles(project.id, user_id).await?.into_iter().max();

        Ok(direct.into_iter().chain(group_max).max())
    }

    pub async fn require_access(&self, project_id: Uuid, user_id: Uuid) -> AppResult<DbProject> {
        let project = self.fetch_project(project_id).await?;
        if self.can_access(&project, user_id).await? {
            Ok(project)
        } else {
            Err(AppError::forbidden("you do not have access to this project"))
        }
    }

    pub async fn require_edit(&self, project_id: Uuid, user_id: Uuid) -> AppResult<DbProject> {
        let project = self.fetch_project(project_id).await?;
        if self.can_edit(&project, user_id).await? {
            Ok(project)
        } else {
            Err(AppError::forbidden("you do not have edit access to this project"))
        }
    }

    pub async fn require_owner(&self, project_id: Uuid, user_id: Uuid) -> AppResult<DbProject> {
        let project = self.fetch_project(project_id).await?;
        if Self::is_owner(&project, user_id) {
            Ok(project)
        } else {
            Err(AppError::forbidden("only the project owner can do this"))
        }
    }

    // =========================================================================
    // MUTATIONS (owner-gated)
    // =========================================================================

    /// Grant a role to the user behind `email`. Re-granting updates the
    /// role in place, preserving the original granted_at/granted_by and
    /// refreshing the denormalized email.
    pub async fn grant_user(
        &self,
        project_id: Uuid,
        caller: Uuid,
        email: &str,
        role: Role,
    ) -> AppResult<(DbProject, DbPermissionGrant)> {
        let project = self.require_owner(project_id, caller).await?;

        let target = sqlx::query_as::<_, DbUser>(
            "SELECT id, name, email, password_hash, provider, provider_id, created_at, updated_at, deleted_at FROM users WHERE email = ? AND deleted_at IS NULL",
        )
        .bind(email.trim())
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| AppError::bad_request("no user found with that email"))?;

        if target.id == project.owner_id {
            return Err(AppError::bad_request("cannot grant permissions to the project owner"));
        }

        sqlx::query(
            r#"
            INSERT INTO project_permissions (project_id, user_id, email, role, granted_at, granted_by)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id, user_id) DO UPDATE SET role = excluded.role, email = excluded.email
            "#,
        )
        .bind(project.id)
        .bind(target.id)
        .bind(&target.email)
        .bind(role.as_str())
        .bind(utc_now())
        .bind(caller)
        .execute(self.pool)
        .await?;

        let grant = self.fetch_user_grant(project.id, target.id).await?;
        Ok((project, grant))
    }

    /// Change the role of an existing direct grant, preserving its metadata.
    pub async fn update_user_role(
        &self,
        project_id: Uuid,
        caller: Uuid,
        target_user: Uuid,
        role: Role,
    ) -> AppResult<(DbProject, DbPermissionGrant)> {
        let project = self.require_owner(project_id, caller).await?;

        let affected = sqlx::query(
            "UPDATE project_permissions SET role = ? WHERE project_id = ? AND user_id = ?",
        )
        .bind(role.as_str())
        .bind(project.id)
        .bind(target_user)
        .execute(self.pool)
        .await?;

        if affected.rows_affected() == 0 {
            return Err(AppError::bad_request("no permission grant exists for that user"));
        }

        let grant = self.fetch_user_grant(project.id, target_user).await?;
        Ok((project, grant))
    }

    pub async fn revoke_user(
        &self,
        project_id: Uuid,
        caller: Uuid,
        target_user: Uuid,
    ) -> AppResult<(DbProject, DbPermissionGrant)> {
        let project = self.require_owner(project_id, caller).await?;

        let grant = sqlx::query_as::<_, DbPermissionGrant>(
            "SELECT project_id, user_id, email, role, granted_at, granted_by FROM project_permissions WHERE project_id = ? AND user_id = ?",
        )
        .bind(project.id)
        .bind(target_user)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| AppError::bad_request("no permission grant exists for that user"))?;

        sqlx::query("DELETE FROM project_permissions WHERE project_id = ? AND user_id = ?")
            .bind(project.id)
            .bind(target_user)
            .execute(self.pool)
            .await?;

        Ok((project, grant))
    }

    pub async fn grant_group(
        &self,
        project_id: Uuid,
        caller: Uuid,
        group_id: Uuid,
        role: Role,
    ) -> AppResult<(DbProject, DbGroupPermissionGrant)> {
        let project = self.require_owner(project_id, caller).await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM groups WHERE id = ?")
            .bind(group_id)
            .fetch_optional(self.pool)
            .await?;
        if exists.is_none() {
            return Err(AppError::not_found("group not found"));
        }

        sqlx::query(
            r#"
            INSERT INTO project_group_permissions (project_id, group_id, role, granted_at, granted_by)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_id, group_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(project.id)
        .bind(group_id)
        .bind(role.as_str())
        .bind(utc_now())
        .bind(caller)
        .execute(self.pool)
        .await?;

        let grant = self.fetch_group_grant(project.id, group_id).await?;
        Ok((project, grant))
    }

    pub async fn update_group_role(
        &self,
        project_id: Uuid,
        caller: Uuid,
        group_id: Uuid,
        role: Role,
    ) -> AppResult<(DbProject, DbGroupPermissionGrant)> {
        let project = self.require_owner(project_id, caller).await?;

        let affected = sqlx::query(
            "UPDATE project_group_permissions SET role = ? WHERE project_id = ? AND group_id = ?",
        )
        .bind(role.as_str())
        .bind(project.id)
        .bind(group_id)
        .execute(self.pool)
        .await?;

        if affected.rows_affected() == 0 {
            return Err(AppError::bad_request("no permission grant exists for that group"));
        }

        let grant = self.fetch_group_grant(project.id, group_id).await?;
        Ok((project, grant))
    }

    pub async fn revoke_group(
        &self,
        project_id: Uuid,
        caller: Uuid,
        group_id: Uuid,
    ) -> AppResult<(DbProject, DbGroupPermissionGrant)> {
        let project = self.require_owner(project_id, caller).await?;

        let grant = sqlx::query_as::<_, DbGroupPermissionGrant>(
            "SELECT project_id, group_id, role, granted_at, granted_by FROM project_group_permissions WHERE project_id = ? AND group_id = ?",
        )
        .bind(project.id)
        .bind(group_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| AppError::bad_request("no permission grant exists for that group"))?;

        sqlx::query("DELETE FROM project_group_permissions WHERE project_id = ? AND group_id = ?")
            .bind(project.id)
            .bind(group_id)
            .execute(self.pool)
            .await?;

        Ok((project, grant))
    }

    pub async fn change_visibility(
        &self,
        project_id: Uuid,
        caller: Uuid,
        visibility: Visibility,
    ) -> AppResult<DbProject> {
        let project = self.require_owner(project_id, caller).await?;

        sqlx::query("UPDATE projects SET visibility = ?, updated_at = ? WHERE id = ?")
            .bind(visibility.as_str())
            .bind(utc_now())
            .bind(project.id)
            .execute(self.pool)
            .await?;

        self.fetch_project(project_id).await
    }

    // =========================================================================
    // SUPPORTING READS
    // =========================================================================

    /// Owner plus the display-augmented direct grants.
    pub async fn project_users(
        &self,
        project: &DbProject,
    ) -> AppResult<(ProjectMember, Vec<DbProjectCollaborator>)> {
        let owner = sqlx::query_as::<_, ProjectMember>(
            "SELECT id, name, email FROM users WHERE id = ?",
        )
        .bind(project.owner_id)
        .fetch_one(self.pool)
        .await?;

        let collaborators = sqlx::query_as::<_, DbProjectCollaborator>(
            r#"
            SELECT pp.user_id, u.name AS name, pp.email, pp.role, pp.granted_at, pp.granted_by
            FROM project_permissions pp
            LEFT JOIN users u ON u.id = pp.user_id AND u.deleted_at IS NULL
            WHERE pp.project_id = ?
            ORDER BY pp.granted_at
            "#,
        )
        .bind(project.id)
        .fetch_all(self.pool)
        .await?;

        Ok((owner, collaborators))
    }

    /// Group grants joined with group metadata.
    pub async fn project_groups(&self, project: &DbProject) -> AppResult<Vec<DbProjectGroupGrant>> {
        let grants = sqlx::query_as::<_, DbProjectGroupGrant>(
            r#"
            SELECT pgp.group_id, g.name AS name,
                   (SELECT COUNT(*) FROM group_members gm WHERE gm.group_id = g.id) AS member_count,
                   pgp.role, pgp.granted_at, pgp.granted_by
            FROM project_group_permissions pgp
            JOIN groups g ON g.id = pgp.group_id
            WHERE pgp.project_id = ?
            ORDER BY pgp.granted_at
            "#,
        )
        .bind(project.id)
        .fetch_all(self.pool)
        .await?;

        Ok(grants)
    }

    /// The union of groups the user owns and groups they belong to; this is
    /// the membership resolution every group-aware decision query relies on.
    pub async fn user_groups(&self, user_id: Uuid) -> AppResult<Vec<DbGroup>> {
        let groups = sqlx::query_as::<_, DbGroup>(
            r#"
            SELECT g.id, g.name, g.description, g.owner_id, g.created_at, g.updated_at
            FROM groups g
            WHERE g.owner_id = ?
            UNION
            SELECT g.id, g.name, g.description, g.owner_id, g.created_at, g.updated_at
            FROM groups g
            JOIN group_members gm ON gm.group_id = g.id
            WHERE gm.user_id = ?
            ORDER BY name
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(groups)
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    pub async fn fetch_project(&self, project_id: Uuid) -> AppResult<DbProject> {
        sqlx::query_as::<_, DbProject>(
            "SELECT id, owner_id, name, description, visibility, created_at, updated_at, deleted_at FROM projects WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(project_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("project not found"))
    }

    async fn direct_role(&self, project_id: Uuid, user_id: Uuid) -> AppResult<Option<Role>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM project_permissions WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        role.map(|raw| Role::from_str(&raw)).transpose()
    }

    /// Roles granted through any group the user owns or belongs to.
    async fn group_roles(&self, project_id: Uuid, user_id: Uuid) -> AppResult<Vec<Role>> {
        let roles: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT pgp.role
            FROM project_group_permissions pgp
            JOIN groups g ON g.id = pgp.group_id
            WHERE pgp.project_id = ?
              AND (g.owner_id = ?
                   OR EXISTS (SELECT 1 FROM group_members gm WHERE gm.group_id = g.id AND gm.user_id = ?))
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        roles.iter().map(|raw| Role::from_str(raw)).collect()
    }

    async fn fetch_user_grant(&self, project_id: Uuid, user_id: Uuid) -> AppResult<DbPermissionGrant> {
        sqlx::query_as::<_, DbPermissionGrant>(
            "SELECT project_id, user_id, email, role, granted_at, granted_by FROM project_permissions WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| AppError::internal("permission grant missing after write"))
    }

    async fn fetch_group_grant(&self, project_id: Uuid, group_id: Uuid) -> AppResult<DbGroupPermissionGrant> {
        sqlx::query_as::<_, DbGroupPermissionGrant>(
            "SELECT project_id, group_id, role, granted_at, granted_by FROM project_group_permissions WHERE project_id = ? AND group_id = ?",
        )
        .bind(project_id)
        .bind(group_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| AppError::internal("group permission grant missing after write"))
    }
}
