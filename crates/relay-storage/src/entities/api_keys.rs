use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique_key = "api_key_hash")]
    pub key_hash: String,
    pub key_prefix: String,
    pub label: Option<String>,
    pub status: String,
    pub rate_limit_per_minute: Option<i32>,
    pub price_rate: f64,
    pub allowed_platforms: Option<Json>,
    pub allowed_models: Option<Json>,
    pub allowed_clients: Option<Json>,
    pub package_id: Option<i64>,
    pub total_requests: i64,
    pub total_cost: f64,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
    #[sea_orm(belongs_to, from = "package_id", to = "id", on_delete = "SetNull")]
    pub package: HasOne<super::packages::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
