use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// A single proxied request, persisted asynchronously after the response
/// (or stream) completes. Request/response bodies are truncated before
/// they reach here: non-streaming bodies up to 64KiB in full, streaming
/// bodies to a `[stream tail]`-prefixed 2KiB tail.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub trace_id: Option<String>,
    pub user_id: Option<i64>,
    pub api_key_id: Option<i64>,
    pub account_id: Option<i64>,
    pub platform: String,
    pub operation: String,
    pub model: Option<String>,
    pub is_stream: bool,
    pub upstream_status: Option<i32>,
    pub duration_ms: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_creation_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cost: Option<f64>,
    pub request_headers: String,
    pub request_body: String,
    pub response_headers: String,
    pub response_body: String,
    pub error: Option<String>,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "SetNull")]
    pub user: HasOne<super::users::Entity>,
    #[sea_orm(belongs_to, from = "api_key_id", to = "id", on_delete = "SetNull")]
    pub api_key: HasOne<super::api_keys::Entity>,
    #[sea_orm(belongs_to, from = "account_id", to = "id", on_delete = "SetNull")]
    pub account: HasOne<super::accounts::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
