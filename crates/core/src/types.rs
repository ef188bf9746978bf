/// Registry primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Tasks are keyed by service-assigned UUIDs.
pub type TaskId = uuid::Uuid;
