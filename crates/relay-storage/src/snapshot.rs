use relay_common::GlobalConfig;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct GlobalConfigRow {
    pub id: i64,
    pub config: GlobalConfig,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub platform: String,
    pub config_json: JsonValue,
    pub secret_json: JsonValue,
    pub enabled: bool,
    pub priority: i32,
    pub weight: i32,
    pub max_concurrency: i32,
    pub status: String,
    pub base_url: Option<String>,
    pub model_mapping: Option<JsonValue>,
    pub allowed_models: Option<JsonValue>,
    pub proxy_url: Option<String>,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ApiKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub key_hash: String,
    pub key_prefix: String,
    pub status: String,
    pub rate_limit_per_minute: Option<i32>,
    pub price_rate: f64,
    pub allowed_platforms: Option<JsonValue>,
    pub allowed_models: Option<JsonValue>,
    pub allowed_clients: Option<JsonValue>,
    pub package_id: Option<i64>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct PackageRow {
    pub id: i64,
    pub name: String,
    pub quota_kind: String,
    pub quota_limit: f64,
    pub quota_used: f64,
}

/// Immutable snapshot of config-plane state, swapped into `AppState` as a
/// whole. The request path never queries the database directly; it reads
/// through whichever snapshot is currently live.
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub global_config: Option<GlobalConfigRow>,
    pub accounts: Vec<AccountRow>,
    pub users: Vec<UserRow>,
    pub api_keys: Vec<ApiKeyRow>,
    pub packages: Vec<PackageRow>,
}

