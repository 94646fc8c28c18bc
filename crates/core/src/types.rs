/// UTC timestamp used for job and build bookkeeping.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier assigned to a job at submission.
pub type JobId = uuid::Uuid;
