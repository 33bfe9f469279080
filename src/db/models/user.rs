//! GitHub user records.
//!
//! Users are keyed by their GitHub login and created waitlisted; an operator
//! flips `waitlisted` off to allow deploys.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GitHubUser {
    pub id: String,
    pub username: String,
    /// JSON array of verified email addresses
    pub emails: String,
    pub waitlisted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl GitHubUser {
    pub async fn find_by_username(pool: &DbPool, username: &str) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM github_users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(pool: &DbPool, username: &str, emails: &[String]) -> sqlx::Result<Self> {
        let user = Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            emails: serde_json::to_string(emails).unwrap_or_else(|_| "[]".to_string()),
            waitlisted: true,
            created_at: chrono::Utc::now().to_rfc3339(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };

        sqlx::query(
            r#"
            INSERT INTO github_users (id, username, emails, waitlisted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.emails)
        .bind(user.waitlisted)
        .bind(&user.created_at)
        .bind(&user.updated_at)
        .execute(pool)
        .await?;

        Ok(user)
    }

    /// Create the user on first login, refresh the stored emails otherwise.
    pub async fn upsert_from_login(
        pool: &DbPool,
        username: &str,
        emails: &[String],
    ) -> sqlx::Result<Self> {
        if let Some(mut user) = Self::find_by_username(pool, username).await? {
            user.emails = serde_json::to_string(emails).unwrap_or_else(|_| "[]".to_string());
            user.updated_at = chrono::Utc::now().to_rfc3339();
            sqlx::query("UPDATE github_users SET emails = ?, updated_at = ? WHERE id = ?")
                .bind(&user.emails)
                .bind(&user.updated_at)
                .bind(&user.id)
                .execute(pool)
                .await?;
            return Ok(user);
        }
        Self::create(pool, username, emails).await
    }

    pub fn email_list(&self) -> Vec<String> {
        serde_json::from_str(&self.emails).unwrap_or_default()
    }
}
