//! Read-only view of the identity-owned `users` table.

use crate::error::AppResult;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
}

impl DirectoryUser {
    /// Display name, falling back to the username
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<DirectoryUser>>;

    async fn find_by_id(&self, user_id: Uuid) -> AppResult<Option<DirectoryUser>>;

    /// Name shown next to pushed messages. Lookup failures never surface.
    async fn display_name(&self, user_id: Uuid) -> String {
        match self.find_by_id(user_id).await {
            Ok(Some(user)) => user.label().to_string(),
            Ok(None) => "Unknown".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "display name lookup failed");
                "Unknown".to_string()
            }
        }
    }
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<DirectoryUser, sqlx::Error> {
    Ok(DirectoryUser {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
    })
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<DirectoryUser>> {
        let row = sqlx::query(
            "SELECT id, username, display_name FROM users WHERE LOWER(username) = LOWER($1)",
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_by_id(&self, user_id: Uuid) -> AppResult<Option<DirectoryUser>> {
        let row = sqlx::query("SELECT id, username, display_name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }
}

#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<DashMap<Uuid, DirectoryUser>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, username: &str, display_name: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.users.insert(
            id,
            DirectoryUser {
                id,
                username: username.to_string(),
                display_name: display_name.map(str::to_string),
            },
        );
        id
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<DirectoryUser>> {
        let wanted = username.trim();
        Ok(self
            .users
            .iter()
            .find(|entry| entry.username.eq_ignore_ascii_case(wanted))
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_id(&self, user_id: Uuid) -> AppResult<Option<DirectoryUser>> {
        Ok(self.users.get(&user_id).map(|entry| entry.value().clone()))
    }
}
