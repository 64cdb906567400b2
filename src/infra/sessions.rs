//! Session registry: server-side sessions bound to an httpOnly cookie.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{Session, User};
use crate::infra::{IdentityStore, Result};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "osduth_session";

/// Session lifetime in seconds when `SESSION_DURATION` is not configured.
pub const DEFAULT_SESSION_DURATION_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    identity: IdentityStore,
    duration: Duration,
    secure_cookies: bool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: i64,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> Session {
        Session {
            id: self.id,
            user_id: self.user_id,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}

impl SessionStore {
    pub fn new(
        pool: SqlitePool,
        identity: IdentityStore,
        duration: Duration,
        secure_cookies: bool,
    ) -> Self {
        Self {
            pool,
            identity,
            duration,
            secure_cookies,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn create(&self, user_id: i64) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now + self.duration;

        sqlx::query("INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(user_id)
            .bind(expires_at)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(Session {
            id,
            user_id,
            expires_at,
            created_at: now,
        })
    }

    /// Returns the session iff it has not expired.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, user_id, expires_at, created_at FROM sessions
             WHERE id = ? AND expires_at > ?",
        )
        .bind(session_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SessionRow::into_session))
    }

    /// Joins through to the user, re-checking expiry on the way.
    pub async fn user_for(&self, session_id: &str) -> Result<Option<User>> {
        match self.get(session_id).await? {
            Some(session) => self.identity.user_by_id(session.user_id).await,
            None => Ok(None),
        }
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_all_for_user(&self, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn extend(&self, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE id = ?")
            .bind(Utc::now() + self.duration)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Called from the maintenance loop.
    pub async fn cleanup(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // --- cookie contract ---

    /// `Set-Cookie` value binding the session id.
    pub fn session_cookie(&self, session_id: &str) -> String {
        self.cookie(SESSION_COOKIE, session_id, self.duration.num_seconds())
    }

    /// `Set-Cookie` value that clears the session cookie.
    pub fn clear_session_cookie(&self) -> String {
        self.cookie(SESSION_COOKIE, "", -1)
    }

    /// Builds a cookie honoring the fixed attributes: Lax, httpOnly, path=/,
    /// secure per configuration.
    pub fn cookie(&self, name: &str, value: &str, max_age: i64) -> String {
        let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax");
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Extracts a named cookie from a `Cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then_some(v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::test_pool;

    async fn stores() -> (SessionStore, IdentityStore) {
        let pool = test_pool().await;
        let identity = IdentityStore::new(pool.clone());
        let sessions = SessionStore::new(pool, identity.clone(), Duration::hours(1), false);
        (sessions, identity)
    }

    async fn seed_user(identity: &IdentityStore) -> i64 {
        let group = identity.group_by_name("regular").await.unwrap().unwrap();
        identity
            .create_user("s@example.com", "S", group.id)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn create_get_delete_round_trip() {
        let (sessions, identity) = stores().await;
        let user_id = seed_user(&identity).await;

        let session = sessions.create(user_id).await.unwrap();
        assert_eq!(session.user_id, user_id);
        // v4-style GUID
        assert_eq!(session.id.len(), 36);

        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);

        let user = sessions.user_for(&session.id).await.unwrap().unwrap();
        assert_eq!(user.id, user_id);

        sessions.delete(&session.id).await.unwrap();
        assert!(sessions.get(&session.id).await.unwrap().is_none());
        assert!(sessions.user_for(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_invisible_and_swept() {
        let pool = test_pool().await;
        let identity = IdentityStore::new(pool.clone());
        let sessions = SessionStore::new(
            pool.clone(),
            identity.clone(),
            Duration::seconds(-1),
            false,
        );
        let user_id = seed_user(&identity).await;

        // Created already expired.
        let session = sessions.create(user_id).await.unwrap();
        assert!(sessions.get(&session.id).await.unwrap().is_none());

        let swept = sessions.cleanup().await.unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn extend_pushes_expiry_forward() {
        let (sessions, identity) = stores().await;
        let user_id = seed_user(&identity).await;

        let session = sessions.create(user_id).await.unwrap();
        sessions.extend(&session.id).await.unwrap();

        let reloaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert!(reloaded.expires_at >= session.expires_at);
    }

    #[tokio::test]
    async fn delete_all_for_user_removes_every_session() {
        let (sessions, identity) = stores().await;
        let user_id = seed_user(&identity).await;

        let a = sessions.create(user_id).await.unwrap();
        let b = sessions.create(user_id).await.unwrap();

        sessions.delete_all_for_user(user_id).await.unwrap();
        assert!(sessions.get(&a.id).await.unwrap().is_none());
        assert!(sessions.get(&b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cookie_attributes_follow_the_contract() {
        let (sessions, _) = stores().await;

        let set = sessions.session_cookie("abc");
        assert!(set.starts_with("osduth_session=abc; "));
        assert!(set.contains("Path=/"));
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("SameSite=Lax"));
        assert!(set.contains("Max-Age=3600"));
        assert!(!set.contains("Secure"));

        let clear = sessions.clear_session_cookie();
        assert!(clear.starts_with("osduth_session=; "));
        assert!(clear.contains("Max-Age=-1"));
    }

    #[tokio::test]
    async fn secure_flag_follows_configuration() {
        let pool = test_pool().await;
        let identity = IdentityStore::new(pool.clone());
        let sessions = SessionStore::new(pool, identity, Duration::hours(1), true);
        assert!(sessions.session_cookie("abc").contains("; Secure"));
    }

    #[test]
    fn cookie_header_parsing() {
        let header = "theme=dark; osduth_session=abc-123; other=1";
        assert_eq!(cookie_value(header, "osduth_session"), Some("abc-123"));
        assert_eq!(cookie_value(header, "theme"), Some("dark"));
        assert_eq!(cookie_value(header, "missing"), None);
    }
}
