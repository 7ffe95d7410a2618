use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// A quota binding an API key can opt into: either a recurring subscription
/// allowance (daily/weekly/monthly) or a pay-as-you-go running total.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "packages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "package_name")]
    pub name: String,
    pub quota_kind: String,
    pub quota_limit: f64,
    pub quota_used: f64,
    pub period_started_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
