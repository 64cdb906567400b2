//! Identity store: groups, academic domains, users, OAuth identities.
//!
//! Transactional CRUD over the auth store. Lookups return `Ok(None)` for
//! absent rows; errors are reserved for store failures. Group membership is
//! decided by the login flow, not here.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::{Group, OauthIdentity, OauthProvider, Role, User, UserStatus};
use crate::infra::{GatewayError, Result};

/// Access to identity-related tables, shared by every other component.
#[derive(Clone)]
pub struct IdentityStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: i64,
    name: String,
    default_rpm: i64,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl GroupRow {
    fn into_group(self) -> Group {
        Group {
            id: self.id,
            name: self.name,
            default_rpm: self.default_rpm,
            description: self.description,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    display_name: String,
    role: String,
    status: String,
    group_id: i64,
    max_tokens: i64,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, group: Option<Group>) -> Result<User> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| GatewayError::Internal(format!("unknown role in store: {}", self.role)))?;
        let status = UserStatus::parse(&self.status).ok_or_else(|| {
            GatewayError::Internal(format!("unknown status in store: {}", self.status))
        })?;
        Ok(User {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            role,
            status,
            group_id: self.group_id,
            max_tokens: self.max_tokens,
            created_at: self.created_at,
            group,
        })
    }
}

/// Joined user + group row for lookups that need the quota tier.
#[derive(sqlx::FromRow)]
struct UserWithGroupRow {
    id: i64,
    email: String,
    display_name: String,
    role: String,
    status: String,
    group_id: i64,
    max_tokens: i64,
    created_at: DateTime<Utc>,
    g_id: i64,
    g_name: String,
    g_default_rpm: i64,
    g_description: Option<String>,
    g_created_at: DateTime<Utc>,
}

impl UserWithGroupRow {
    fn into_user(self) -> Result<User> {
        let group = Group {
            id: self.g_id,
            name: self.g_name,
            default_rpm: self.g_default_rpm,
            description: self.g_description,
            created_at: self.g_created_at,
        };
        UserRow {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            role: self.role,
            status: self.status,
            group_id: self.group_id,
            max_tokens: self.max_tokens,
            created_at: self.created_at,
        }
        .into_user(Some(group))
    }
}

#[derive(sqlx::FromRow)]
struct OauthIdentityRow {
    id: i64,
    user_id: i64,
    provider: String,
    provider_id: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    created_at: DateTime<Utc>,
}

impl OauthIdentityRow {
    fn into_identity(self) -> Result<OauthIdentity> {
        let provider = OauthProvider::parse(&self.provider).ok_or_else(|| {
            GatewayError::Internal(format!("unknown provider in store: {}", self.provider))
        })?;
        Ok(OauthIdentity {
            id: self.id,
            user_id: self.user_id,
            provider,
            provider_id: self.provider_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            created_at: self.created_at,
        })
    }
}

const USER_WITH_GROUP_SELECT: &str = r#"
    SELECT u.id, u.email, u.display_name, u.role, u.status, u.group_id, u.max_tokens, u.created_at,
           g.id AS g_id, g.name AS g_name, g.default_rpm AS g_default_rpm,
           g.description AS g_description, g.created_at AS g_created_at
    FROM users u
    JOIN groups g ON u.group_id = g.id
"#;

impl IdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- groups ---

    pub async fn all_groups(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, default_rpm, description, created_at FROM groups ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GroupRow::into_group).collect())
    }

    pub async fn group_by_id(&self, id: i64) -> Result<Option<Group>> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, default_rpm, description, created_at FROM groups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GroupRow::into_group))
    }

    pub async fn group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, default_rpm, description, created_at FROM groups WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GroupRow::into_group))
    }

    pub async fn create_group(
        &self,
        name: &str,
        default_rpm: i64,
        description: Option<&str>,
    ) -> Result<Group> {
        let result = sqlx::query("INSERT INTO groups (name, default_rpm, description) VALUES (?, ?, ?)")
            .bind(name)
            .bind(default_rpm)
            .bind(description)
            .execute(&self.pool)
            .await?;

        self.group_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| GatewayError::Internal("group vanished after insert".to_string()))
    }

    /// Updates are issued per field so callers can patch independently.
    pub async fn update_group(
        &self,
        id: i64,
        name: Option<&str>,
        default_rpm: Option<i64>,
        description: Option<&str>,
    ) -> Result<()> {
        if let Some(name) = name {
            sqlx::query("UPDATE groups SET name = ? WHERE id = ?")
                .bind(name)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(rpm) = default_rpm {
            sqlx::query("UPDATE groups SET default_rpm = ? WHERE id = ?")
                .bind(rpm)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(description) = description {
            sqlx::query("UPDATE groups SET description = ? WHERE id = ?")
                .bind(description)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Fails while any user still references the group (FK RESTRICT).
    pub async fn delete_group(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.message().contains("FOREIGN KEY") => {
                    GatewayError::BadInput("group is still referenced by users".to_string())
                }
                other => GatewayError::Database(other),
            })?;
        Ok(())
    }

    // --- academic domains ---

    pub async fn all_academic_domains(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT domain FROM academic_domains ORDER BY domain")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    pub async fn is_academic_domain(&self, domain: &str) -> Result<bool> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM academic_domains WHERE domain = ?")
                .bind(domain)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }

    pub async fn add_academic_domain(&self, domain: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO academic_domains (domain) VALUES (?)")
            .bind(domain.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_academic_domain(&self, domain: &str) -> Result<()> {
        sqlx::query("DELETE FROM academic_domains WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- users ---

    /// Looks up a user with the group join populated.
    pub async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserWithGroupRow>(
            &format!("{USER_WITH_GROUP_SELECT} WHERE u.id = ?"),
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserWithGroupRow::into_user).transpose()
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, role, status, group_id, max_tokens, created_at
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_user(None)).transpose()
    }

    pub async fn all_users(&self, limit: i64, offset: i64) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserWithGroupRow>(&format!(
            "{USER_WITH_GROUP_SELECT} ORDER BY u.created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserWithGroupRow::into_user).collect()
    }

    /// Group assignment comes from the caller; emails are case-folded here so
    /// the unique index sees one spelling.
    pub async fn create_user(
        &self,
        email: &str,
        display_name: &str,
        group_id: i64,
    ) -> Result<User> {
        let result =
            sqlx::query("INSERT INTO users (email, display_name, group_id) VALUES (?, ?, ?)")
                .bind(email.to_lowercase())
                .bind(display_name)
                .bind(group_id)
                .execute(&self.pool)
                .await?;

        self.user_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| GatewayError::Internal("user vanished after insert".to_string()))
    }

    /// Suspending a user does not touch their sessions; session validation
    /// re-checks status on every request.
    pub async fn update_user(
        &self,
        id: i64,
        role: Option<Role>,
        status: Option<UserStatus>,
        group_id: Option<i64>,
        max_tokens: Option<i64>,
    ) -> Result<()> {
        if let Some(role) = role {
            sqlx::query("UPDATE users SET role = ? WHERE id = ?")
                .bind(role.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(status) = status {
            sqlx::query("UPDATE users SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(group_id) = group_id {
            sqlx::query("UPDATE users SET group_id = ? WHERE id = ?")
                .bind(group_id)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(max_tokens) = max_tokens {
            sqlx::query("UPDATE users SET max_tokens = ? WHERE id = ?")
                .bind(max_tokens)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Number of non-revoked tokens, used against `max_tokens` at issuance.
    pub async fn user_token_count(&self, user_id: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tokens WHERE user_id = ? AND revoked_at IS NULL")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // --- oauth identities ---

    pub async fn oauth_identity(
        &self,
        provider: OauthProvider,
        provider_id: &str,
    ) -> Result<Option<OauthIdentity>> {
        let row = sqlx::query_as::<_, OauthIdentityRow>(
            "SELECT id, user_id, provider, provider_id, access_token, refresh_token, created_at
             FROM oauth_identities WHERE provider = ? AND provider_id = ?",
        )
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OauthIdentityRow::into_identity).transpose()
    }

    pub async fn create_oauth_identity(
        &self,
        user_id: i64,
        provider: OauthProvider,
        provider_id: &str,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<OauthIdentity> {
        let result = sqlx::query(
            "INSERT INTO oauth_identities (user_id, provider, provider_id, access_token, refresh_token)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(provider_id)
        .bind(access_token)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, OauthIdentityRow>(
            "SELECT id, user_id, provider, provider_id, access_token, refresh_token, created_at
             FROM oauth_identities WHERE id = ?",
        )
        .bind(result.last_insert_rowid())
        .fetch_one(&self.pool)
        .await?;
        row.into_identity()
    }

    /// Refreshes the stored upstream tokens on re-login. They are a record
    /// only; nothing in the gateway reads them back out.
    pub async fn update_oauth_identity_tokens(
        &self,
        id: i64,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE oauth_identities SET access_token = ?, refresh_token = ? WHERE id = ?")
            .bind(access_token)
            .bind(refresh_token)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
