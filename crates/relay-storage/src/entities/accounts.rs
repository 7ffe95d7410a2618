use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One upstream account: a single pair of (account kind, credential) the
/// scheduler can dispatch traffic to. `config_json` and `secret_json` are
/// the serialized `ProviderConfig`/`Credential` union members for `kind`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "account_name")]
    pub name: String,
    pub kind: String,
    pub platform: String,
    pub config_json: Json,
    pub secret_json: Json,
    pub enabled: bool,
    pub priority: i32,
    pub weight: i32,
    pub max_concurrency: i32,
    pub status: String,
    pub base_url: Option<String>,
    pub model_mapping: Option<Json>,
    pub allowed_models: Option<Json>,
    pub proxy_url: Option<String>,
    pub next_check_at: Option<OffsetDateTime>,
    pub check_interval_secs: Option<i32>,
    pub consecutive_error_count: i32,
    pub suspended_count: i32,
    pub total_cost: f64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
