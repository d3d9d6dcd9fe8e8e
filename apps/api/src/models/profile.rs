use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub user_id: String,
    pub name: Option<String>,
    pub target_role: Option<String>,
    pub skills: Json<Vec<String>>,
    pub experience_summary: Option<String>,
}
