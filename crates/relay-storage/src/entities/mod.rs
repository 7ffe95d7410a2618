pub mod accounts;
pub mod api_keys;
pub mod daily_usage_rollups;
pub mod global_config;
pub mod internal_events;
pub mod packages;
pub mod request_logs;
pub mod users;

pub use accounts::Entity as Accounts;
pub use api_keys::Entity as ApiKeys;
pub use daily_usage_rollups::Entity as DailyUsageRollups;
pub use global_config::Entity as GlobalConfig;
pub use internal_events::Entity as InternalEvents;
pub use packages::Entity as Packages;
pub use request_logs::Entity as RequestLogs;
pub use users::Entity as Users;
