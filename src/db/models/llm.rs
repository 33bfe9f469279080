//! Deployed LLM records.
//!
//! One row per connected repository. The row's id is the stable identity
//! every deploy of that repository is named by, which is what makes
//! redeploys update in place instead of multiplying deployments.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Llm {
    /// Stable deployment identity, generated once at first successful push.
    pub id: String,
    pub clone_url: String,
    pub phone_number: String,
    pub modal_url: String,
    pub githubuser_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Llm {
    pub async fn find_by_clone_url(pool: &DbPool, clone_url: &str) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM llms WHERE clone_url = ?")
            .bind(clone_url)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_phone_number(
        pool: &DbPool,
        phone_number: &str,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as("SELECT * FROM llms WHERE phone_number = ?")
            .bind(phone_number)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(
        pool: &DbPool,
        id: &str,
        clone_url: &str,
        phone_number: &str,
        modal_url: &str,
        githubuser_id: &str,
    ) -> sqlx::Result<Self> {
        let llm = Self {
            id: id.to_string(),
            clone_url: clone_url.to_string(),
            phone_number: phone_number.to_string(),
            modal_url: modal_url.to_string(),
            githubuser_id: githubuser_id.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };

        sqlx::query(
            r#"
            INSERT INTO llms (id, clone_url, phone_number, modal_url, githubuser_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&llm.id)
        .bind(&llm.clone_url)
        .bind(&llm.phone_number)
        .bind(&llm.modal_url)
        .bind(&llm.githubuser_id)
        .bind(&llm.created_at)
        .bind(&llm.updated_at)
        .execute(pool)
        .await?;

        Ok(llm)
    }

    pub async fn list_for_user(pool: &DbPool, githubuser_id: &str) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM llms WHERE githubuser_id = ? ORDER BY created_at DESC")
            .bind(githubuser_id)
            .fetch_all(pool)
            .await
    }

    pub async fn count(pool: &DbPool) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM llms")
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }

    pub async fn delete(pool: &DbPool, id: &str, githubuser_id: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM llms WHERE id = ? AND githubuser_id = ?")
            .bind(id)
            .bind(githubuser_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, GitHubUser};

    async fn setup() -> (DbPool, GitHubUser) {
        let pool = db::init_memory().await.unwrap();
        let user = GitHubUser::create(&pool, "octocat", &[]).await.unwrap();
        (pool, user)
    }

    #[tokio::test]
    async fn test_create_and_lookups() {
        let (pool, user) = setup().await;

        let llm = Llm::create(
            &pool,
            "llm-id-1",
            "https://github.com/octocat/my-llm.git",
            "+15555550100",
            "https://kookaburracodes--llm-id-1--api.modal.run/",
            &user.id,
        )
        .await
        .unwrap();

        let by_url = Llm::find_by_clone_url(&pool, "https://github.com/octocat/my-llm.git")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_url.id, llm.id);

        let by_phone = Llm::find_by_phone_number(&pool, "+15555550100")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_phone.id, llm.id);

        assert_eq!(Llm::count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clone_url_is_unique() {
        let (pool, user) = setup().await;

        Llm::create(
            &pool,
            "llm-id-1",
            "https://github.com/octocat/my-llm.git",
            "+15555550100",
            "https://kookaburracodes--llm-id-1--api.modal.run/",
            &user.id,
        )
        .await
        .unwrap();

        // Same clone_url, different everything else: UNIQUE constraint
        let duplicate = Llm::create(
            &pool,
            "llm-id-2",
            "https://github.com/octocat/my-llm.git",
            "+15555550101",
            "https://kookaburracodes--llm-id-2--api.modal.run/",
            &user.id,
        )
        .await;
        assert!(matches!(duplicate, Err(sqlx::Error::Database(_))));
        assert_eq!(Llm::count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_and_delete_scoped_to_owner() {
        let (pool, user) = setup().await;
        let other = GitHubUser::create(&pool, "hubot", &[]).await.unwrap();

        let llm = Llm::create(
            &pool,
            "llm-id-1",
            "https://github.com/octocat/my-llm.git",
            "+15555550100",
            "https://kookaburracodes--llm-id-1--api.modal.run/",
            &user.id,
        )
        .await
        .unwrap();

        assert_eq!(Llm::list_for_user(&pool, &user.id).await.unwrap().len(), 1);
        assert!(Llm::list_for_user(&pool, &other.id).await.unwrap().is_empty());

        // Another user cannot delete it
        assert!(!Llm::delete(&pool, &llm.id, &other.id).await.unwrap());
        assert!(Llm::delete(&pool, &llm.id, &user.id).await.unwrap());
        assert_eq!(Llm::count(&pool).await.unwrap(), 0);
    }
}
