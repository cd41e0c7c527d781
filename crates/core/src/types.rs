/// UTC wall-clock timestamp used on every event and snapshot.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of one restart session.
pub type SessionId = uuid::Uuid;
