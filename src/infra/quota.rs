//! Quota engine: effective RPM resolution and quota administration.
//!
//! A quota level can be absent (inherit from the next level), present with
//! NULL (explicitly uncapped) or present with a value. Resolution order:
//! user override, group quota on the feature, group quota on each ancestor,
//! group default, system default.

use sqlx::SqlitePool;

use crate::domain::{GroupFeatureQuota, QuotaEntry, UserQuotaOverride};
use crate::infra::{FeatureRegistry, IdentityStore, Result};

/// RPM applied when no group can be resolved at all.
pub const DEFAULT_SYSTEM_RPM: i64 = 60;

/// Sentinel for "no limit" on the public surface.
pub const UNLIMITED_RPM: i64 = -1;

/// A resolved quota level. Absence of a row is expressed as `Option::None`
/// around this type, keeping "inherit" distinct from "uncapped".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpmQuota {
    Unlimited,
    Limit(i64),
}

impl RpmQuota {
    fn from_row(rpm_limit: Option<i64>) -> Self {
        match rpm_limit {
            None => RpmQuota::Unlimited,
            Some(n) => RpmQuota::Limit(n),
        }
    }

    /// Public sentinel form: -1 for unlimited.
    pub fn as_rpm(self) -> i64 {
        match self {
            RpmQuota::Unlimited => UNLIMITED_RPM,
            RpmQuota::Limit(n) => n,
        }
    }
}

#[derive(Clone)]
pub struct QuotaEngine {
    pool: SqlitePool,
    identity: IdentityStore,
    features: FeatureRegistry,
}

impl QuotaEngine {
    pub fn new(pool: SqlitePool, identity: IdentityStore, features: FeatureRegistry) -> Self {
        Self {
            pool,
            identity,
            features,
        }
    }

    /// Effective RPM for `(user, feature)`; `UNLIMITED_RPM` means uncapped.
    pub async fn effective_rpm(&self, user_id: i64, feature_id: i64) -> Result<i64> {
        if let Some(quota) = self.user_override(user_id, feature_id).await? {
            return Ok(quota.as_rpm());
        }

        let Some(user) = self.identity.user_by_id(user_id).await? else {
            return Ok(DEFAULT_SYSTEM_RPM);
        };

        // Most specific ancestor wins.
        for feature in self.features.ancestors(feature_id).await? {
            if let Some(quota) = self.group_quota(user.group_id, feature.id).await? {
                return Ok(quota.as_rpm());
            }
        }

        match user.group {
            Some(group) => Ok(group.default_rpm),
            None => Ok(DEFAULT_SYSTEM_RPM),
        }
    }

    async fn user_override(&self, user_id: i64, feature_id: i64) -> Result<Option<RpmQuota>> {
        let row: Option<(Option<i64>,)> = sqlx::query_as(
            "SELECT rpm_limit FROM user_quota_overrides WHERE user_id = ? AND feature_id = ?",
        )
        .bind(user_id)
        .bind(feature_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(limit,)| RpmQuota::from_row(limit)))
    }

    async fn group_quota(&self, group_id: i64, feature_id: i64) -> Result<Option<RpmQuota>> {
        let row: Option<(Option<i64>,)> = sqlx::query_as(
            "SELECT rpm_limit FROM group_feature_quotas WHERE group_id = ? AND feature_id = ?",
        )
        .bind(group_id)
        .bind(feature_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(limit,)| RpmQuota::from_row(limit)))
    }

    // --- administration ---

    pub async fn set_user_override(
        &self,
        user_id: i64,
        feature_id: i64,
        rpm_limit: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_quota_overrides (user_id, feature_id, rpm_limit) VALUES (?, ?, ?)
             ON CONFLICT (user_id, feature_id) DO UPDATE SET rpm_limit = excluded.rpm_limit",
        )
        .bind(user_id)
        .bind(feature_id)
        .bind(rpm_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_user_override(&self, user_id: i64, feature_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_quota_overrides WHERE user_id = ? AND feature_id = ?")
            .bind(user_id)
            .bind(feature_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_overrides(&self, user_id: i64) -> Result<Vec<UserQuotaOverride>> {
        let rows: Vec<(i64, i64, Option<i64>)> = sqlx::query_as(
            "SELECT user_id, feature_id, rpm_limit FROM user_quota_overrides WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, feature_id, rpm_limit)| UserQuotaOverride {
                user_id,
                feature_id,
                rpm_limit,
            })
            .collect())
    }

    pub async fn set_group_quota(
        &self,
        group_id: i64,
        feature_id: i64,
        rpm_limit: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_feature_quotas (group_id, feature_id, rpm_limit) VALUES (?, ?, ?)
             ON CONFLICT (group_id, feature_id) DO UPDATE SET rpm_limit = excluded.rpm_limit",
        )
        .bind(group_id)
        .bind(feature_id)
        .bind(rpm_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_group_quota(&self, group_id: i64, feature_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM group_feature_quotas WHERE group_id = ? AND feature_id = ?")
            .bind(group_id)
            .bind(feature_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn group_quotas(&self, group_id: i64) -> Result<Vec<GroupFeatureQuota>> {
        let rows: Vec<(i64, i64, Option<i64>)> = sqlx::query_as(
            "SELECT group_id, feature_id, rpm_limit FROM group_feature_quotas WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(group_id, feature_id, rpm_limit)| GroupFeatureQuota {
                group_id,
                feature_id,
                rpm_limit,
            })
            .collect())
    }

    /// Bulk upsert of group quotas, all-or-nothing.
    pub async fn bulk_set_group_quotas(&self, group_id: i64, quotas: &[QuotaEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in quotas {
            sqlx::query(
                "INSERT INTO group_feature_quotas (group_id, feature_id, rpm_limit) VALUES (?, ?, ?)
                 ON CONFLICT (group_id, feature_id) DO UPDATE SET rpm_limit = excluded.rpm_limit",
            )
            .bind(group_id)
            .bind(entry.feature_id)
            .bind(entry.rpm_limit)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Bulk upsert of user overrides, all-or-nothing.
    pub async fn bulk_set_user_overrides(&self, user_id: i64, quotas: &[QuotaEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in quotas {
            sqlx::query(
                "INSERT INTO user_quota_overrides (user_id, feature_id, rpm_limit) VALUES (?, ?, ?)
                 ON CONFLICT (user_id, feature_id) DO UPDATE SET rpm_limit = excluded.rpm_limit",
            )
            .bind(user_id)
            .bind(entry.feature_id)
            .bind(entry.rpm_limit)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
