//! Authorization module - permission resolution over shared projects
//!
//! Access to a project can come from four places:
//! - ownership (implicit, non-revocable, always the highest role)
//! - a direct per-user grant
//! - a grant to a group the user owns or belongs to
//! - public visibility (view only, never edit)
//!
//! The effective role is the maximum across all applicable paths.

mod engine;

pub use engine::PermissionEngine;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

/// Role granted on a project. The declaration order is the privilege
/// order: `Viewer < Editor < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }

    pub fn can_edit(&self) -> bool {
        *self >= Role::Editor
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "owner" => Ok(Role::Owner),
            _ => Err(AppError::bad_request(format!("unknown role '{value}'"))),
        }
    }
}

/// Project-wide visibility. `Public` opens view access to every
/// authenticated principal; `Private` and `Team` require a grant path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Team,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Team => "team",
            Visibility::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "private" => Ok(Visibility::Private),
            "team" => Ok(Visibility::Team),
            "public" => Ok(Visibility::Public),
            _ => Err(AppError::bad_request(format!("unknown visibility '{value}'"))),
        }
    }
}
