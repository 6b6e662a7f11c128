use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub(crate) fn parse_stored_timestamp(
    raw: &str,
    field_name: &str,
) -> Result<chrono::DateTime<chrono::Utc>, InfraError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&chrono::Utc))
        .map_err(|error| {
            InfraError::InvalidConfig(format!("invalid {field_name} '{raw}': {error}"))
        })
}
