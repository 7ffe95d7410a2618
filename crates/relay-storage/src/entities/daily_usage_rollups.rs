use sea_orm::entity::prelude::*;
use time::Date;

/// Per-(user, day, model) usage counters, upserted with an atomic
/// increment on every completed request rather than read-modify-write.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "daily_usage_rollups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "rollup_key")]
    pub user_id: i64,
    #[sea_orm(unique_key = "rollup_key")]
    pub usage_date: Date,
    #[sea_orm(unique_key = "rollup_key")]
    pub model: String,
    pub request_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
