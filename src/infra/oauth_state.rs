//! OAuth state registry: single-use CSRF state tokens.

use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use sqlx::SqlitePool;

use crate::infra::Result;

/// How long an issued state stays valid, in seconds.
pub const STATE_EXPIRY_SECS: i64 = 600;

/// Name of the short-lived state cookie set alongside the DB row.
pub const STATE_COOKIE: &str = "osduth_oauth_state";

#[derive(Clone)]
pub struct OauthStateStore {
    pool: SqlitePool,
}

impl OauthStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Generates a fresh state from 32 cryptographically random bytes and
    /// persists it with a 10-minute expiry.
    pub async fn create(&self) -> Result<String> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        sqlx::query("INSERT INTO oauth_states (state, expires_at) VALUES (?, ?)")
            .bind(&state)
            .bind(Utc::now() + Duration::seconds(STATE_EXPIRY_SECS))
            .execute(&self.pool)
            .await?;

        Ok(state)
    }

    /// Consumes the state atomically. The conditional delete makes concurrent
    /// replays of the same state race for a single success.
    pub async fn validate(&self, state: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE state = ? AND expires_at > ?")
            .bind(state)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Called from the maintenance loop.
    pub async fn cleanup(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
