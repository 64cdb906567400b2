//! Core type definitions for the auth gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UserStatus::Active),
            "suspended" => Some(UserStatus::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported OAuth upstream providers. This set is closed; anything else is
/// rejected before any network traffic happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OauthProvider {
    Google,
    GitHub,
}

impl OauthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OauthProvider::Google => "google",
            OauthProvider::GitHub => "github",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(OauthProvider::Google),
            "github" => Some(OauthProvider::GitHub),
            _ => None,
        }
    }
}

impl fmt::Display for OauthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quota tier. Every user belongs to exactly one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub default_rpm: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub status: UserStatus,
    pub group_id: i64,
    pub max_tokens: i64,
    pub created_at: DateTime<Utc>,

    /// Joined group row; populated by lookups that go through the group join.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
}

/// Link between a user and an upstream OAuth account. Upstream tokens are
/// stored as a record only and never serialized outbound.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthIdentity {
    pub id: i64,
    pub user_id: i64,
    pub provider: OauthProvider,
    pub provider_id: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A server-side session bound to the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A permission scope, possibly hierarchical (`maps` is the parent of
/// `maps.tiles`). Access to an ancestor grants access to its descendants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: i64,
    pub slug: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    pub admin_only: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-group RPM ceiling on a feature. `rpm_limit: None` means uncapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupFeatureQuota {
    pub group_id: i64,
    pub feature_id: i64,
    pub rpm_limit: Option<i64>,
}

/// Per-user RPM override on a feature. `rpm_limit: None` means uncapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuotaOverride {
    pub user_id: i64,
    pub feature_id: i64,
    pub rpm_limit: Option<i64>,
}

/// An opaque bearer token. Only the SHA-256 hash of the raw value is kept;
/// the hash itself never leaves the store layer in serialized form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub label: String,
    pub admin_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<Feature>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_ips: Vec<String>,
}

/// A freshly issued token together with its raw value. The raw value is
/// revealed exactly once, here.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: Token,
    pub raw_token: String,
}

/// Result of validating a raw bearer token.
#[derive(Debug)]
pub struct ValidatedToken {
    pub token: Token,
    pub user: User,
    pub feature_ids: Vec<i64>,
    pub allowed_ips: Vec<String>,
}

/// One recorded API request, kept for the sliding rate-limit window.
#[derive(Debug, Clone, Copy)]
pub struct UsageEntry {
    pub user_id: i64,
    pub feature_id: i64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCreateRequest {
    pub label: String,
    pub features: Vec<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdateRequest {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub group_id: Option<i64>,
    pub max_tokens: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCreateRequest {
    pub name: String,
    pub default_rpm: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdateRequest {
    pub name: Option<String>,
    pub default_rpm: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCreateRequest {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub admin_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureUpdateRequest {
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    pub admin_only: Option<bool>,
}

/// Bulk quota assignment. `rpm_limit: None` (JSON `null`) sets an explicit
/// uncapped quota, which is different from deleting the row (inherit).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSetRequest {
    pub quotas: Vec<QuotaEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaEntry {
    pub feature_id: i64,
    pub rpm_limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::User, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [UserStatus::Active, UserStatus::Suspended] {
            assert_eq!(UserStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UserStatus::parse("banned"), None);
    }

    #[test]
    fn provider_set_is_closed() {
        assert_eq!(OauthProvider::parse("google"), Some(OauthProvider::Google));
        assert_eq!(OauthProvider::parse("github"), Some(OauthProvider::GitHub));
        assert_eq!(OauthProvider::parse("gitlab"), None);
        assert_eq!(OauthProvider::parse("Google"), None);
    }

    #[test]
    fn token_serialization_hides_hash() {
        let token = Token {
            id: 1,
            user_id: 2,
            token_hash: "deadbeef".to_string(),
            label: "ci".to_string(),
            admin_created: false,
            expires_at: None,
            revoked_at: None,
            created_at: Utc::now(),
            features: vec![],
            allowed_ips: vec![],
        };

        let json = serde_json::to_string(&token).unwrap();
        assert!(!json.contains("deadbeef"));
        assert!(!json.contains("tokenHash"));
        assert!(json.contains("\"label\":\"ci\""));
    }

    #[test]
    fn identity_serialization_hides_upstream_tokens() {
        let identity = OauthIdentity {
            id: 1,
            user_id: 2,
            provider: OauthProvider::Google,
            provider_id: "42".to_string(),
            access_token: Some("ya29.secret".to_string()),
            refresh_token: Some("1//refresh".to_string()),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("refresh"));
        assert!(json.contains("\"provider\":\"google\""));
    }

    #[test]
    fn quota_entry_distinguishes_null_from_value() {
        let capped: QuotaEntry = serde_json::from_str(r#"{"featureId":1,"rpmLimit":30}"#).unwrap();
        assert_eq!(capped.rpm_limit, Some(30));

        let uncapped: QuotaEntry =
            serde_json::from_str(r#"{"featureId":1,"rpmLimit":null}"#).unwrap();
        assert_eq!(uncapped.rpm_limit, None);
    }
}
