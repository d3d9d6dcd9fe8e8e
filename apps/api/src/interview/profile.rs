use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::debug;

use super::store::StoreError;
use crate::models::profile::ProfileRow;

/// Structured candidate profile produced by resume parsing elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Profile {
    pub user_id: String,
    pub name: Option<String>,
    pub target_role: Option<String>,
    pub skills: Vec<String>,
    pub experience_summary: Option<String>,
}

impl Profile {
    /// Stand-in used when a resumed session's profile can no longer be read.
    pub fn bare(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            name: row.name,
            target_role: row.target_role,
            skills: row.skills.0,
            experience_summary: row.experience_summary,
        }
    }
}

#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;
}

pub struct PgProfileResolver {
    db: PgPool,
}

impl PgProfileResolver {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileResolver for PgProfileResolver {
    async fn resolve(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT user_id, name, target_role, skills, experience_summary \
             FROM user_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        debug!(user_id, found = row.is_some(), "profile lookup");
        Ok(row.map(Profile::from))
    }
}
