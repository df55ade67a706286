//! Deployment history: append-only audit trail of deploy runs.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteHistoryStore;
pub use store::{DeployHistoryStore, HistoryError};
pub use types::DeploySummary;
