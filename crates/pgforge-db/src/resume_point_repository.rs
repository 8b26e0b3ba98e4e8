//! Durable resume-point storage for batched event subscriptions (4.G, §6).

use pgforge_core::error::{Error, Result};
use sqlx::PgPool;

use crate::models::SubscriptionResumePointRow;

#[async_trait::async_trait]
pub trait DurableSubscriptionRepository: Send + Sync {
    /// Fetch the persisted resume point for `(subscriber_id,
    /// aggregate_type)`, creating one from `initial_order` if this is
    /// the first subscribe.
    async fn get_or_create_resume_point(
        &self,
        subscriber_id: &str,
        aggregate_type: &str,
        initial_order: i64,
    ) -> Result<i64>;

    /// Persist the resume point. Called on stop, on explicit reset,
    /// and when the subscription suspends — never mid-batch.
    async fn save_resume_point(
        &self,
        subscriber_id: &str,
        aggregate_type: &str,
        resume_from_and_including: i64,
    ) -> Result<()>;

    async fn find(
        &self,
        subscriber_id: &str,
        aggregate_type: &str,
    ) -> Result<Option<SubscriptionResumePointRow>>;
}

pub struct PostgresDurableSubscriptionRepository {
    pool: PgPool,
}

impl PostgresDurableSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(&self, message: &str, err: sqlx::Error) -> Error {
        let is_io = matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut);
        Error::database_classified(message, is_io, err)
    }
}

#[async_trait::async_trait]
impl DurableSubscriptionRepository for PostgresDurableSubscriptionRepository {
    async fn get_or_create_resume_point(
        &self,
        subscriber_id: &str,
        aggregate_type: &str,
        initial_order: i64,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO durable_subscription_resume_points
                (subscriber_id, aggregate_type, resume_from_and_including_global_order)
            VALUES ($1, $2, $3)
            ON CONFLICT (subscriber_id, aggregate_type) DO UPDATE
                SET subscriber_id = durable_subscription_resume_points.subscriber_id
            RETURNING resume_from_and_including_global_order
            "#,
        )
        .bind(subscriber_id)
        .bind(aggregate_type)
        .bind(initial_order)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.classify("failed to get or create resume point", e))?;

        Ok(row.0)
    }

    async fn save_resume_point(
        &self,
        subscriber_id: &str,
        aggregate_type: &str,
        resume_from_and_including: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO durable_subscription_resume_points
                (subscriber_id, aggregate_type, resume_from_and_including_global_order, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (subscriber_id, aggregate_type) DO UPDATE
                SET resume_from_and_including_global_order = EXCLUDED.resume_from_and_including_global_order,
                    updated_at = NOW()
            "#,
        )
        .bind(subscriber_id)
        .bind(aggregate_type)
        .bind(resume_from_and_including)
        .execute(&self.pool)
        .await
        .map_err(|e| self.classify("failed to save resume point", e))?;

        Ok(())
    }

    async fn find(
        &self,
        subscriber_id: &str,
        aggregate_type: &str,
    ) -> Result<Option<SubscriptionResumePointRow>> {
        sqlx::query_as::<_, SubscriptionResumePointRow>(
            r#"
            SELECT subscriber_id, aggregate_type, resume_from_and_including_global_order, updated_at
            FROM durable_subscription_resume_points
            WHERE subscriber_id = $1 AND aggregate_type = $2
            "#,
        )
        .bind(subscriber_id)
        .bind(aggregate_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.classify("failed to look up resume point", e))
    }
}
