use chrono::Utc;

use super::{StoreClient, StoreError};

impl StoreClient {
    /// Insert a new password hash. Prior rows are kept (per the data model's
    /// append-only auth log) but only the most recent is ever consulted.
    pub async fn set_password_hash(&self, phc_hash: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO server_auth (password_hash, created_at) VALUES ($1, $2)")
            .bind(phc_hash)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Fetch the most recently set password hash, if any has ever been set.
    pub async fn latest_password_hash(&self) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT password_hash FROM server_auth ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(row.map(|(hash,)| hash))
    }
}
