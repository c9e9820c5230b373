use dispatch_common::types::HeartbeatSample;

use super::{StoreClient, StoreError};

impl StoreClient {
    /// Append one compute node's heartbeat row. Pure telemetry: this never
    /// participates in any lease query — a node missing its heartbeat does
    /// not, by itself, reclaim its leases; only the lease timeout on the
    /// work item does that. Keyed by the peer's observable network
    /// address, never a client-asserted identity: nodes are anonymous.
    pub async fn record_heartbeat(&self, sample: &HeartbeatSample) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO node_heartbeats (client_addr, cpu_usage, memory_usage, last_heartbeat)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&sample.client_addr)
        .bind(sample.cpu_usage)
        .bind(sample.memory_usage)
        .bind(sample.last_heartbeat)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    /// Clear every node heartbeat row (an administrative reset mutation).
    pub async fn reset_heartbeats(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM node_heartbeats")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
