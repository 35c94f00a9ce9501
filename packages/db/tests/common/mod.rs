use db::{Database, DbConfig, DbError};

/// Fresh in-memory database per test; each `mem://` connection owns its own
/// datastore, so tests never see each other's rows.
pub async fn setup_db() -> Result<Database, DbError> {
    let database = format!("test_{}", ulid::Ulid::new());
    db::init(&DbConfig::memory().with_database(database)).await
}
