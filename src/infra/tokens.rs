//! Token service: issuance, validation, revocation and listing of opaque
//! bearer tokens.
//!
//! A raw token is `osduth_` + base58(sha256(32 random bytes)). Only the
//! lowercase-hex sha256 of the raw token is stored; lookup is by hash and
//! never by plaintext comparison.

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::auth::ip::canonicalize_ips;
use crate::domain::{Feature, IssuedToken, Token, UserStatus, ValidatedToken};
use crate::infra::{FeatureRegistry, GatewayError, IdentityStore, Result};

/// Prefix carried by every raw token.
pub const TOKEN_PREFIX: &str = "osduth_";

#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
    identity: IdentityStore,
    features: FeatureRegistry,
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: i64,
    user_id: i64,
    token_hash: String,
    label: String,
    admin_created: bool,
    expires_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TokenRow {
    fn into_token(self) -> Token {
        Token {
            id: self.id,
            user_id: self.user_id,
            token_hash: self.token_hash,
            label: self.label,
            admin_created: self.admin_created,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
            features: Vec::new(),
            allowed_ips: Vec::new(),
        }
    }
}

/// Hashes a raw token for storage and lookup.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Generates a raw token and its storage hash.
fn generate_token() -> (String, String) {
    let mut random = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random);

    let body = bs58::encode(Sha256::digest(random)).into_string();
    let raw = format!("{TOKEN_PREFIX}{body}");
    let hash = hash_token(&raw);
    (raw, hash)
}

impl TokenStore {
    pub fn new(pool: SqlitePool, identity: IdentityStore, features: FeatureRegistry) -> Self {
        Self {
            pool,
            identity,
            features,
        }
    }

    /// Issues a token on behalf of a user. Enforces the per-user token ceiling
    /// and rejects admin-only features.
    pub async fn create_user_token(
        &self,
        user_id: i64,
        label: &str,
        feature_slugs: &[String],
        allowed_ips: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken> {
        let label = label.trim();
        if label.is_empty() {
            return Err(GatewayError::LabelRequired);
        }

        let user = self
            .identity
            .user_by_id(user_id)
            .await?
            .ok_or(GatewayError::UserNotFound)?;

        let count = self.identity.user_token_count(user_id).await?;
        if count >= user.max_tokens {
            return Err(GatewayError::TokenQuotaExhausted(user.max_tokens));
        }

        let features = self.resolve_features(feature_slugs).await?;
        for feature in &features {
            if feature.admin_only {
                return Err(GatewayError::FeatureAdminOnly(feature.slug.clone()));
            }
        }

        let allowed_ips = canonicalize_ips(allowed_ips)?;
        self.insert_token(user_id, label, false, expires_at, features, allowed_ips)
            .await
    }

    /// Admin issuance: no quota ceiling, admin-only features allowed.
    pub async fn create_admin_token(
        &self,
        user_id: i64,
        label: &str,
        feature_slugs: &[String],
        allowed_ips: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken> {
        let label = label.trim();
        if label.is_empty() {
            return Err(GatewayError::LabelRequired);
        }

        self.identity
            .user_by_id(user_id)
            .await?
            .ok_or(GatewayError::UserNotFound)?;

        let features = self.resolve_features(feature_slugs).await?;
        let allowed_ips = canonicalize_ips(allowed_ips)?;
        self.insert_token(user_id, label, true, expires_at, features, allowed_ips)
            .await
    }

    async fn resolve_features(&self, slugs: &[String]) -> Result<Vec<Feature>> {
        if slugs.is_empty() {
            return Err(GatewayError::FeatureRequired);
        }
        let features = self.features.by_slugs(slugs).await?;
        if features.is_empty() {
            return Err(GatewayError::FeatureRequired);
        }
        if features.len() != slugs.len() {
            return Err(GatewayError::FeatureUnknown);
        }
        Ok(features)
    }

    /// Token row, scope rows and IP rows land in one transaction.
    async fn insert_token(
        &self,
        user_id: i64,
        label: &str,
        admin_created: bool,
        expires_at: Option<DateTime<Utc>>,
        features: Vec<Feature>,
        allowed_ips: Vec<String>,
    ) -> Result<IssuedToken> {
        let (raw_token, token_hash) = generate_token();
        let created_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO tokens (user_id, token_hash, label, admin_created, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&token_hash)
        .bind(label)
        .bind(admin_created)
        .bind(expires_at)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        let token_id = result.last_insert_rowid();

        for feature in &features {
            sqlx::query("INSERT INTO token_features (token_id, feature_id) VALUES (?, ?)")
                .bind(token_id)
                .bind(feature.id)
                .execute(&mut *tx)
                .await?;
        }
        for ip in &allowed_ips {
            sqlx::query("INSERT INTO token_allowed_ips (token_id, ip_address) VALUES (?, ?)")
                .bind(token_id)
                .bind(ip)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(IssuedToken {
            token: Token {
                id: token_id,
                user_id,
                token_hash,
                label: label.to_string(),
                admin_created,
                expires_at,
                revoked_at: None,
                created_at,
                features,
                allowed_ips,
            },
            raw_token,
        })
    }

    /// Validates a presented raw token and loads everything the gatekeeper
    /// needs to authorize the request.
    pub async fn validate(&self, raw_token: &str) -> Result<ValidatedToken> {
        if !raw_token.starts_with(TOKEN_PREFIX) {
            return Err(GatewayError::TokenFormatInvalid);
        }

        let token_hash = hash_token(raw_token);
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, user_id, token_hash, label, admin_created, expires_at, revoked_at, created_at
             FROM tokens WHERE token_hash = ?",
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(GatewayError::TokenUnknown)?;

        let token = row.into_token();

        if token.revoked_at.is_some() {
            return Err(GatewayError::TokenRevoked);
        }
        if let Some(expires_at) = token.expires_at {
            if expires_at < Utc::now() {
                return Err(GatewayError::TokenExpired);
            }
        }

        let user = self
            .identity
            .user_by_id(token.user_id)
            .await?
            .ok_or(GatewayError::UserNotFound)?;
        if user.status != UserStatus::Active {
            return Err(GatewayError::UserNotActive(user.status));
        }

        let feature_ids = self.token_feature_ids(token.id).await?;
        let allowed_ips = self.token_allowed_ips(token.id).await?;

        Ok(ValidatedToken {
            token,
            user,
            feature_ids,
            allowed_ips,
        })
    }

    async fn token_feature_ids(&self, token_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT feature_id FROM token_features WHERE token_id = ?")
                .bind(token_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn token_allowed_ips(&self, token_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT ip_address FROM token_allowed_ips WHERE token_id = ?")
                .bind(token_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(ip,)| ip).collect())
    }

    /// All tokens of a user, with scopes and pins joined. Hashes and raw
    /// values stay out of the result by construction of `Token`'s serde.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT id, user_id, token_hash, label, admin_created, expires_at, revoked_at, created_at
             FROM tokens WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut tokens = Vec::with_capacity(rows.len());
        for row in rows {
            tokens.push(self.attach_associations(row.into_token()).await?);
        }
        Ok(tokens)
    }

    pub async fn by_id(&self, token_id: i64) -> Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, user_id, token_hash, label, admin_created, expires_at, revoked_at, created_at
             FROM tokens WHERE id = ?",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.attach_associations(row.into_token()).await?)),
            None => Ok(None),
        }
    }

    async fn attach_associations(&self, mut token: Token) -> Result<Token> {
        let feature_ids = self.token_feature_ids(token.id).await?;
        token.features = self.features.by_ids(&feature_ids).await?;
        token.allowed_ips = self.token_allowed_ips(token.id).await?;
        Ok(token)
    }

    /// Revokes a token owned by `user_id`. A revocation that matches no live
    /// row (wrong owner, unknown id, already revoked) reports as such.
    pub async fn revoke(&self, token_id: i64, user_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tokens SET revoked_at = ? WHERE id = ? AND user_id = ? AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(token_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::TokenNotFoundOrRevoked);
        }
        Ok(())
    }

    /// Admin revocation: no owner check.
    pub async fn admin_revoke(&self, token_id: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
                .bind(Utc::now())
                .bind(token_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::TokenNotFoundOrRevoked);
        }
        Ok(())
    }
}
