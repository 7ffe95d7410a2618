pub mod db;
pub mod entities;
pub mod seaorm;
pub mod sinks;
pub mod snapshot;
pub mod storage;

pub use seaorm::SeaOrmStorage;
pub use sinks::DbEventSink;
pub use snapshot::{
    AccountRow, ApiKeyRow, GlobalConfigRow, PackageRow, StorageSnapshot, UserRow,
};
pub use storage::{
    AccountUpsert, LogQueryFilter, LogQueryResult, LogRecord, NewRequestLog, Storage,
    StorageError, StorageResult, UsageAggregate, UsageAggregateFilter,
};
