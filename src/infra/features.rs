//! Feature registry: the hierarchical permission-scope catalog.
//!
//! Every read issues direct SQL. The catalog is tiny and admin-curated, so
//! there is no cache layer to invalidate.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::Feature;
use crate::infra::{GatewayError, Result};

/// Upper bound on the parent-pointer walk. The write path prevents cycles,
/// so hitting this means the catalog is corrupt.
const MAX_ANCESTOR_DEPTH: usize = 32;

#[derive(Clone)]
pub struct FeatureRegistry {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct FeatureRow {
    id: i64,
    slug: String,
    name: String,
    parent_id: Option<i64>,
    admin_only: bool,
    created_at: DateTime<Utc>,
}

impl FeatureRow {
    fn into_feature(self) -> Feature {
        Feature {
            id: self.id,
            slug: self.slug,
            name: self.name,
            parent_id: self.parent_id,
            admin_only: self.admin_only,
            created_at: self.created_at,
        }
    }
}

const FEATURE_SELECT: &str =
    "SELECT id, slug, name, parent_id, admin_only, created_at FROM features";

impl FeatureRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn by_slug(&self, slug: &str) -> Result<Option<Feature>> {
        let row = sqlx::query_as::<_, FeatureRow>(&format!("{FEATURE_SELECT} WHERE slug = ?"))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(FeatureRow::into_feature))
    }

    pub async fn by_id(&self, id: i64) -> Result<Option<Feature>> {
        let row = sqlx::query_as::<_, FeatureRow>(&format!("{FEATURE_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(FeatureRow::into_feature))
    }

    pub async fn all(&self) -> Result<Vec<Feature>> {
        let rows = sqlx::query_as::<_, FeatureRow>(&format!("{FEATURE_SELECT} ORDER BY slug"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(FeatureRow::into_feature).collect())
    }

    /// Features users may put on their own tokens.
    pub async fn assignable_to_users(&self) -> Result<Vec<Feature>> {
        let rows = sqlx::query_as::<_, FeatureRow>(&format!(
            "{FEATURE_SELECT} WHERE admin_only = 0 ORDER BY slug"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeatureRow::into_feature).collect())
    }

    pub async fn by_ids(&self, ids: &[i64]) -> Result<Vec<Feature>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let query = format!("{FEATURE_SELECT} WHERE id IN ({placeholders}) ORDER BY slug");
        let mut q = sqlx::query_as::<_, FeatureRow>(&query);
        for id in ids {
            q = q.bind(*id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FeatureRow::into_feature).collect())
    }

    pub async fn by_slugs(&self, slugs: &[String]) -> Result<Vec<Feature>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; slugs.len()].join(",");
        let query = format!("{FEATURE_SELECT} WHERE slug IN ({placeholders}) ORDER BY slug");
        let mut q = sqlx::query_as::<_, FeatureRow>(&query);
        for slug in slugs {
            q = q.bind(slug.as_str());
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FeatureRow::into_feature).collect())
    }

    pub async fn is_admin_only(&self, id: i64) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT admin_only FROM features WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((admin_only,)) => Ok(admin_only),
            None => Err(GatewayError::NotFound("feature")),
        }
    }

    /// True if any of the given ids is an admin-only feature. Used to keep
    /// elevated scopes off user-issued tokens.
    pub async fn has_admin_only(&self, ids: &[i64]) -> Result<bool> {
        if ids.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let query =
            format!("SELECT COUNT(*) FROM features WHERE admin_only = 1 AND id IN ({placeholders})");
        let mut q = sqlx::query_as::<_, (i64,)>(&query);
        for id in ids {
            q = q.bind(*id);
        }
        let (count,) = q.fetch_one(&self.pool).await?;
        Ok(count > 0)
    }

    /// Returns the feature followed by its ancestors up to the root, most
    /// specific first. Quota inheritance walks this list in order.
    pub async fn ancestors(&self, feature_id: i64) -> Result<Vec<Feature>> {
        let mut chain = Vec::new();
        let mut current = Some(feature_id);

        while let Some(id) = current {
            if chain.len() >= MAX_ANCESTOR_DEPTH {
                return Err(GatewayError::Internal(format!(
                    "feature ancestry deeper than {MAX_ANCESTOR_DEPTH} at id {id}"
                )));
            }
            let Some(feature) = self.by_id(id).await? else {
                break;
            };
            current = feature.parent_id;
            chain.push(feature);
        }

        Ok(chain)
    }

    /// Ancestor-grant rule: a token scoped to `maps` reaches `maps.tiles`.
    pub async fn token_has_feature_access(
        &self,
        token_feature_ids: &[i64],
        target_slug: &str,
    ) -> Result<bool> {
        let Some(target) = self.by_slug(target_slug).await? else {
            return Ok(false);
        };

        if token_feature_ids.contains(&target.id) {
            return Ok(true);
        }

        let ancestors = self.ancestors(target.id).await?;
        Ok(ancestors
            .iter()
            .any(|ancestor| token_feature_ids.contains(&ancestor.id)))
    }

    pub async fn create(
        &self,
        slug: &str,
        name: &str,
        parent_id: Option<i64>,
        admin_only: bool,
    ) -> Result<Feature> {
        if let Some(parent_id) = parent_id {
            let parent = self
                .by_id(parent_id)
                .await?
                .ok_or(GatewayError::NotFound("parent feature"))?;
            // Dotted slugs must sit under their parent's slug.
            if let Some((prefix, _)) = slug.rsplit_once('.') {
                if prefix != parent.slug {
                    return Err(GatewayError::BadInput(format!(
                        "slug '{slug}' does not extend parent slug '{}'",
                        parent.slug
                    )));
                }
            }
        }

        let result =
            sqlx::query("INSERT INTO features (slug, name, parent_id, admin_only) VALUES (?, ?, ?, ?)")
                .bind(slug)
                .bind(name)
                .bind(parent_id)
                .bind(admin_only)
                .execute(&self.pool)
                .await?;

        self.by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| GatewayError::Internal("feature vanished after insert".to_string()))
    }

    pub async fn update(
        &self,
        id: i64,
        name: Option<&str>,
        parent_id: Option<i64>,
        admin_only: Option<bool>,
    ) -> Result<()> {
        if let Some(parent_id) = parent_id {
            // Re-parenting must not close a cycle through this feature.
            let chain = self.ancestors(parent_id).await?;
            if parent_id == id || chain.iter().any(|f| f.id == id) {
                return Err(GatewayError::BadInput(
                    "feature cannot be its own ancestor".to_string(),
                ));
            }
            sqlx::query("UPDATE features SET parent_id = ? WHERE id = ?")
                .bind(parent_id)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(name) = name {
            sqlx::query("UPDATE features SET name = ? WHERE id = ?")
                .bind(name)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(admin_only) = admin_only {
            sqlx::query("UPDATE features SET admin_only = ? WHERE id = ?")
                .bind(admin_only)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM features WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
