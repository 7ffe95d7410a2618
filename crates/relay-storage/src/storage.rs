use async_trait::async_trait;
use serde_json::Value as JsonValue;
use time::{Date, OffsetDateTime};

use relay_common::GlobalConfig;
use relay_provider_core::Event;

use crate::snapshot::{GlobalConfigRow, StorageSnapshot};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct UsageAggregateFilter {
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub user_id: Option<i64>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UsageAggregate {
    pub matched_rows: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct LogQueryFilter {
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub user_id: Option<i64>,
    pub account_id: Option<i64>,
    pub platform: Option<String>,
    pub trace_id: Option<String>,
    pub status_min: Option<i32>,
    pub status_max: Option<i32>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub id: i64,
    pub at: OffsetDateTime,
    pub trace_id: Option<String>,
    pub user_id: Option<i64>,
    pub api_key_id: Option<i64>,
    pub account_id: Option<i64>,
    pub platform: String,
    pub model: Option<String>,
    pub upstream_status: Option<i32>,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LogQueryResult {
    pub rows: Vec<LogRecord>,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct AccountUpsert {
    pub id: Option<i64>,
    pub name: String,
    pub kind: String,
    pub platform: String,
    pub config_json: JsonValue,
    pub secret_json: JsonValue,
    pub enabled: bool,
    pub priority: i32,
    pub weight: i32,
    pub max_concurrency: i32,
    pub base_url: Option<String>,
    pub model_mapping: Option<JsonValue>,
    pub allowed_models: Option<JsonValue>,
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRequestLog {
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
}

/// Storage is used for:
/// - bootstrap (load_snapshot)
/// - admin mutations (writes only)
/// - event / usage persistence (append_event, append_request_log, rollups)
///
/// Runtime reads must NOT hit DB; they read from in-memory snapshots.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0). Enabled by default at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>>;
    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    // Accounts
    async fn upsert_account(&self, input: AccountUpsert) -> StorageResult<i64>;
    async fn delete_account(&self, id: i64) -> StorageResult<()>;
    async fn set_account_enabled(&self, id: i64, enabled: bool) -> StorageResult<()>;
    async fn set_account_status(&self, id: i64, status: &str) -> StorageResult<()>;
    async fn record_account_cost(&self, id: i64, cost: f64) -> StorageResult<()>;

    // Users / API keys (auth)
    async fn upsert_user_by_id(&self, user_id: i64, name: &str, enabled: bool)
    -> StorageResult<()>;
    async fn set_user_enabled(&self, user_id: i64, enabled: bool) -> StorageResult<()>;
    async fn delete_user(&self, user_id: i64) -> StorageResult<()>;
    async fn upsert_api_key(
        &self,
        user_id: i64,
        key_hash: &str,
        key_prefix: &str,
        label: Option<&str>,
        price_rate: f64,
        package_id: Option<i64>,
    ) -> StorageResult<i64>;
    async fn set_api_key_status(&self, api_key_id: i64, status: &str) -> StorageResult<()>;
    async fn delete_api_key(&self, api_key_id: i64) -> StorageResult<()>;

    // Packages
    async fn upsert_package(
        &self,
        name: &str,
        quota_kind: &str,
        quota_limit: f64,
    ) -> StorageResult<i64>;

    async fn append_event(&self, event: &Event) -> StorageResult<()>;

    async fn append_request_log(&self, log: NewRequestLog) -> StorageResult<()>;
    async fn increment_daily_rollup(
        &self,
        user_id: i64,
        usage_date: Date,
        model: &str,
        request_count: i64,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) -> StorageResult<()>;
    async fn increment_api_key_usage(&self, api_key_id: i64, requests: i64, cost: f64)
    -> StorageResult<()>;
    async fn increment_package_usage(&self, package_id: i64, amount: f64) -> StorageResult<()>;

    async fn aggregate_usage_tokens(
        &self,
        filter: UsageAggregateFilter,
    ) -> StorageResult<UsageAggregate>;

    async fn query_logs(&self, filter: LogQueryFilter) -> StorageResult<LogQueryResult>;
}
