use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    EntityTrait, ExprTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};
use time::{Date, OffsetDateTime};

use relay_common::GlobalConfig;
use relay_provider_core::Event;

use crate::entities;
use crate::snapshot::{
    AccountRow, ApiKeyRow, GlobalConfigRow, PackageRow, StorageSnapshot, UserRow,
};
use crate::storage::{
    AccountUpsert, LogQueryFilter, LogQueryResult, LogRecord, NewRequestLog, Storage,
    StorageError, StorageResult, UsageAggregate, UsageAggregateFilter,
};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn account_row_from_model(m: entities::accounts::Model) -> StorageResult<AccountRow> {
    Ok(AccountRow {
        id: m.id,
        name: m.name,
        kind: m.kind,
        platform: m.platform,
        config_json: m.config_json,
        secret_json: m.secret_json,
        enabled: m.enabled,
        priority: m.priority,
        weight: m.weight,
        max_concurrency: m.max_concurrency,
        status: m.status,
        base_url: m.base_url,
        model_mapping: m.model_mapping,
        allowed_models: m.allowed_models,
        proxy_url: m.proxy_url,
        updated_at: m.updated_at,
    })
}

#[async_trait::async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::Accounts)
            .register(entities::Users)
            .register(entities::ApiKeys)
            .register(entities::Packages)
            .register(entities::RequestLogs)
            .register(entities::DailyUsageRollups)
            .register(entities::InternalEvents)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>> {
        use entities::global_config::Column;
        let row = entities::GlobalConfig::find()
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        let Some(m) = row else { return Ok(None) };
        let config: GlobalConfig = serde_json::from_value(m.config_json)?;
        Ok(Some(GlobalConfigRow {
            id: m.id,
            config,
            updated_at: m.updated_at,
        }))
    }

    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()> {
        use entities::global_config::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::global_config::ActiveModel {
            id: ActiveValue::Set(0),
            config_json: ActiveValue::Set(serde_json::to_value(config)?),
            updated_at: ActiveValue::Set(now),
        };
        entities::GlobalConfig::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([Column::ConfigJson, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let global_config = self.load_global_config().await?;

        let accounts = entities::Accounts::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(account_row_from_model)
            .collect::<StorageResult<Vec<_>>>()?;

        let users = entities::Users::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| UserRow {
                id: m.id,
                name: m.name,
                enabled: m.enabled,
                created_at: m.created_at,
                updated_at: m.updated_at,
            })
            .collect();

        let api_keys = entities::ApiKeys::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ApiKeyRow {
                id: m.id,
                user_id: m.user_id,
                key_hash: m.key_hash,
                key_prefix: m.key_prefix,
                status: m.status,
                rate_limit_per_minute: m.rate_limit_per_minute,
                price_rate: m.price_rate,
                allowed_platforms: m.allowed_platforms,
                allowed_models: m.allowed_models,
                allowed_clients: m.allowed_clients,
                package_id: m.package_id,
                created_at: m.created_at,
            })
            .collect();

        let packages = entities::Packages::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| PackageRow {
                id: m.id,
                name: m.name,
                quota_kind: m.quota_kind,
                quota_limit: m.quota_limit,
                quota_used: m.quota_used,
            })
            .collect();

        Ok(StorageSnapshot {
            global_config,
            accounts,
            users,
            api_keys,
            packages,
        })
    }

    async fn upsert_account(&self, input: AccountUpsert) -> StorageResult<i64> {
        use entities::accounts::Column;
        let now = OffsetDateTime::now_utc();
        let id = input.id;
        let active = entities::accounts::ActiveModel {
            id: match id {
                Some(id) => ActiveValue::Set(id),
                None => ActiveValue::NotSet,
            },
            name: ActiveValue::Set(input.name),
            kind: ActiveValue::Set(input.kind),
            platform: ActiveValue::Set(input.platform),
            config_json: ActiveValue::Set(input.config_json),
            secret_json: ActiveValue::Set(input.secret_json),
            enabled: ActiveValue::Set(input.enabled),
            priority: ActiveValue::Set(input.priority),
            weight: ActiveValue::Set(input.weight),
            max_concurrency: ActiveValue::Set(input.max_concurrency),
            status: ActiveValue::Set("valid".to_string()),
            base_url: ActiveValue::Set(input.base_url),
            model_mapping: ActiveValue::Set(input.model_mapping),
            allowed_models: ActiveValue::Set(input.allowed_models),
            proxy_url: ActiveValue::Set(input.proxy_url),
            next_check_at: ActiveValue::Set(None),
            check_interval_secs: ActiveValue::Set(None),
            consecutive_error_count: ActiveValue::Set(0),
            suspended_count: ActiveValue::Set(0),
            total_cost: ActiveValue::Set(0.0),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };

        let result = entities::Accounts::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::Kind,
                        Column::Platform,
                        Column::ConfigJson,
                        Column::SecretJson,
                        Column::Enabled,
                        Column::Priority,
                        Column::Weight,
                        Column::MaxConcurrency,
                        Column::BaseUrl,
                        Column::ModelMapping,
                        Column::AllowedModels,
                        Column::ProxyUrl,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(id.unwrap_or(result.last_insert_id))
    }

    async fn delete_account(&self, id: i64) -> StorageResult<()> {
        entities::Accounts::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn set_account_enabled(&self, id: i64, enabled: bool) -> StorageResult<()> {
        let active = entities::accounts::ActiveModel {
            id: ActiveValue::Set(id),
            enabled: ActiveValue::Set(enabled),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Accounts::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn set_account_status(&self, id: i64, status: &str) -> StorageResult<()> {
        let active = entities::accounts::ActiveModel {
            id: ActiveValue::Set(id),
            status: ActiveValue::Set(status.to_string()),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Accounts::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn record_account_cost(&self, id: i64, cost: f64) -> StorageResult<()> {
        entities::Accounts::update_many()
            .col_expr(
                entities::accounts::Column::TotalCost,
                Expr::col(entities::accounts::Column::TotalCost).add(cost),
            )
            .filter(entities::accounts::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn upsert_user_by_id(&self, user_id: i64, name: &str, enabled: bool) -> StorageResult<()> {
        use entities::users::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::users::ActiveModel {
            id: ActiveValue::Set(user_id),
            name: ActiveValue::Set(name.to_string()),
            enabled: ActiveValue::Set(enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        entities::Users::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([Column::Name, Column::Enabled, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn set_user_enabled(&self, user_id: i64, enabled: bool) -> StorageResult<()> {
        let active = entities::users::ActiveModel {
            id: ActiveValue::Set(user_id),
            enabled: ActiveValue::Set(enabled),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Users::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: i64) -> StorageResult<()> {
        entities::Users::delete_by_id(user_id).exec(&self.db).await?;
        Ok(())
    }

    async fn upsert_api_key(
        &self,
        user_id: i64,
        key_hash: &str,
        key_prefix: &str,
        label: Option<&str>,
        price_rate: f64,
        package_id: Option<i64>,
    ) -> StorageResult<i64> {
        use entities::api_keys::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::api_keys::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            key_hash: ActiveValue::Set(key_hash.to_string()),
            key_prefix: ActiveValue::Set(key_prefix.to_string()),
            label: ActiveValue::Set(label.map(str::to_string)),
            status: ActiveValue::Set("active".to_string()),
            rate_limit_per_minute: ActiveValue::Set(None),
            price_rate: ActiveValue::Set(price_rate),
            allowed_platforms: ActiveValue::Set(None),
            allowed_models: ActiveValue::Set(None),
            allowed_clients: ActiveValue::Set(None),
            package_id: ActiveValue::Set(package_id),
            total_requests: ActiveValue::Set(0),
            total_cost: ActiveValue::Set(0.0),
            created_at: ActiveValue::Set(now),
            last_used_at: ActiveValue::Set(None),
        };
        let result = entities::ApiKeys::insert(active)
            .on_conflict(
                OnConflict::column(Column::KeyHash)
                    .update_columns([Column::Label, Column::PriceRate, Column::PackageId])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(result.last_insert_id)
    }

    async fn set_api_key_status(&self, api_key_id: i64, status: &str) -> StorageResult<()> {
        let active = entities::api_keys::ActiveModel {
            id: ActiveValue::Set(api_key_id),
            status: ActiveValue::Set(status.to_string()),
            ..Default::default()
        };
        entities::ApiKeys::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn delete_api_key(&self, api_key_id: i64) -> StorageResult<()> {
        entities::ApiKeys::delete_by_id(api_key_id).exec(&self.db).await?;
        Ok(())
    }

    async fn upsert_package(
        &self,
        name: &str,
        quota_kind: &str,
        quota_limit: f64,
    ) -> StorageResult<i64> {
        use entities::packages::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::packages::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(name.to_string()),
            quota_kind: ActiveValue::Set(quota_kind.to_string()),
            quota_limit: ActiveValue::Set(quota_limit),
            quota_used: ActiveValue::Set(0.0),
            period_started_at: ActiveValue::Set(Some(now)),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let result = entities::Packages::insert(active)
            .on_conflict(
                OnConflict::column(Column::Name)
                    .update_columns([Column::QuotaKind, Column::QuotaLimit, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(result.last_insert_id)
    }

    async fn append_event(&self, event: &Event) -> StorageResult<()> {
        let now = OffsetDateTime::now_utc();
        let active = entities::internal_events::ActiveModel {
            id: ActiveValue::NotSet,
            event_type: ActiveValue::Set(event_type_name(event).to_string()),
            payload_json: ActiveValue::Set(serde_json::to_value(event)?),
            at: ActiveValue::Set(now),
            created_at: ActiveValue::Set(now),
        };
        entities::InternalEvents::insert(active).exec(&self.db).await?;
        Ok(())
    }

    async fn append_request_log(&self, log: NewRequestLog) -> StorageResult<()> {
        let active = entities::request_logs::ActiveModel {
            id: ActiveValue::NotSet,
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            trace_id: ActiveValue::Set(log.trace_id),
            user_id: ActiveValue::Set(log.user_id),
            api_key_id: ActiveValue::Set(log.api_key_id),
            account_id: ActiveValue::Set(log.account_id),
            platform: ActiveValue::Set(log.platform),
            operation: ActiveValue::Set(log.operation),
            model: ActiveValue::Set(log.model),
            is_stream: ActiveValue::Set(log.is_stream),
            upstream_status: ActiveValue::Set(log.upstream_status),
            duration_ms: ActiveValue::Set(log.duration_ms),
            input_tokens: ActiveValue::Set(log.input_tokens),
            output_tokens: ActiveValue::Set(log.output_tokens),
            cache_creation_tokens: ActiveValue::Set(log.cache_creation_tokens),
            cache_read_tokens: ActiveValue::Set(log.cache_read_tokens),
            cost: ActiveValue::Set(log.cost),
            request_headers: ActiveValue::Set(log.request_headers),
            request_body: ActiveValue::Set(log.request_body),
            response_headers: ActiveValue::Set(log.response_headers),
            response_body: ActiveValue::Set(log.response_body),
            error: ActiveValue::Set(log.error),
        };
        entities::RequestLogs::insert(active).exec(&self.db).await?;
        Ok(())
    }

    async fn increment_daily_rollup(
        &self,
        user_id: i64,
        usage_date: Date,
        model: &str,
        request_count: i64,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) -> StorageResult<()> {
        use entities::daily_usage_rollups::Column;
        let active = entities::daily_usage_rollups::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            usage_date: ActiveValue::Set(usage_date),
            model: ActiveValue::Set(model.to_string()),
            request_count: ActiveValue::Set(request_count),
            input_tokens: ActiveValue::Set(input_tokens),
            output_tokens: ActiveValue::Set(output_tokens),
            cost: ActiveValue::Set(cost),
        };
        entities::DailyUsageRollups::insert(active)
            .on_conflict(
                OnConflict::columns([Column::UserId, Column::UsageDate, Column::Model])
                    .values([
                        (
                            Column::RequestCount,
                            Expr::col(Column::RequestCount).add(request_count),
                        ),
                        (
                            Column::InputTokens,
                            Expr::col(Column::InputTokens).add(input_tokens),
                        ),
                        (
                            Column::OutputTokens,
                            Expr::col(Column::OutputTokens).add(output_tokens),
                        ),
                        (Column::Cost, Expr::col(Column::Cost).add(cost)),
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn increment_api_key_usage(
        &self,
        api_key_id: i64,
        requests: i64,
        cost: f64,
    ) -> StorageResult<()> {
        entities::ApiKeys::update_many()
            .col_expr(
                entities::api_keys::Column::TotalRequests,
                Expr::col(entities::api_keys::Column::TotalRequests).add(requests),
            )
            .col_expr(
                entities::api_keys::Column::TotalCost,
                Expr::col(entities::api_keys::Column::TotalCost).add(cost),
            )
            .col_expr(
                entities::api_keys::Column::LastUsedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(entities::api_keys::Column::Id.eq(api_key_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn increment_package_usage(&self, package_id: i64, amount: f64) -> StorageResult<()> {
        entities::Packages::update_many()
            .col_expr(
                entities::packages::Column::QuotaUsed,
                Expr::col(entities::packages::Column::QuotaUsed).add(amount),
            )
            .filter(entities::packages::Column::Id.eq(package_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn aggregate_usage_tokens(
        &self,
        filter: UsageAggregateFilter,
    ) -> StorageResult<UsageAggregate> {
        use entities::request_logs::Column;
        let mut query = entities::RequestLogs::find()
            .filter(Column::CreatedAt.gte(filter.from))
            .filter(Column::CreatedAt.lte(filter.to));
        if let Some(user_id) = filter.user_id {
            query = query.filter(Column::UserId.eq(user_id));
        }
        if let Some(model) = &filter.model {
            query = query.filter(Column::Model.eq(model.clone()));
        }
        let rows = query.all(&self.db).await?;
        let mut agg = UsageAggregate::default();
        agg.matched_rows = rows.len() as i64;
        for row in &rows {
            agg.input_tokens += row.input_tokens.unwrap_or(0);
            agg.output_tokens += row.output_tokens.unwrap_or(0);
            agg.cost += row.cost.unwrap_or(0.0);
        }
        Ok(agg)
    }

    async fn query_logs(&self, filter: LogQueryFilter) -> StorageResult<LogQueryResult> {
        use entities::request_logs::Column;
        let mut query = entities::RequestLogs::find()
            .filter(Column::CreatedAt.gte(filter.from))
            .filter(Column::CreatedAt.lte(filter.to))
            .order_by_desc(Column::Id);
        if let Some(user_id) = filter.user_id {
            query = query.filter(Column::UserId.eq(user_id));
        }
        if let Some(account_id) = filter.account_id {
            query = query.filter(Column::AccountId.eq(account_id));
        }
        if let Some(platform) = &filter.platform {
            query = query.filter(Column::Platform.eq(platform.clone()));
        }
        if let Some(trace_id) = &filter.trace_id {
            query = query.filter(Column::TraceId.eq(trace_id.clone()));
        }
        if let Some(min) = filter.status_min {
            query = query.filter(Column::UpstreamStatus.gte(min));
        }
        if let Some(max) = filter.status_max {
            query = query.filter(Column::UpstreamStatus.lte(max));
        }

        let limit = filter.limit.max(1) as u64;
        let page = (filter.offset as u64) / limit;
        let paginator = query.paginate(&self.db, limit);
        let num_pages = paginator.num_pages().await?;
        let rows = if num_pages == 0 || page >= num_pages {
            Vec::new()
        } else {
            paginator.fetch_page(page).await?
        };
        let has_more = page + 1 < num_pages;

        Ok(LogQueryResult {
            rows: rows
                .into_iter()
                .map(|m| LogRecord {
                    id: m.id,
                    at: m.created_at,
                    trace_id: m.trace_id,
                    user_id: m.user_id,
                    api_key_id: m.api_key_id,
                    account_id: m.account_id,
                    platform: m.platform,
                    model: m.model,
                    upstream_status: m.upstream_status,
                    cost: m.cost,
                })
                .collect(),
            has_more,
        })
    }
}

fn event_type_name(event: &Event) -> &'static str {
    match event {
        Event::Downstream(_) => "downstream",
        Event::Upstream(_) => "upstream",
        Event::Operational(_) => "operational",
    }
}
