use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info};

use super::{RecordSink, SinkFactory};
use crate::error::SinkError;
use crate::record::{CleanRecord, RejectedRecord};

/// Writes clean and rejected records into two PostgreSQL tables.
///
/// Every session holds its own connection rather than borrowing from a pool, so each
/// worker writes independently.
#[derive(Debug, Clone)]
pub struct PgSinkFactory {
    database_url: String,
    clean_table: String,
    bad_table: String,
}

pub struct PgSink {
    conn: PgConnection,
    insert_clean: String,
    insert_bad: String,
}

impl PgSinkFactory {
    pub fn new(database_url: &str, clean_table: &str, bad_table: &str) -> Self {
        Self {
            database_url: database_url.to_owned(),
            clean_table: quote_identifier(clean_table),
            bad_table: quote_identifier(bad_table),
        }
    }

    async fn connect(&self) -> Result<PgConnection, SinkError> {
        PgConnection::connect(&self.database_url)
            .await
            .map_err(SinkError::Connection)
    }

    /// Create both tables if they don't exist yet and empty them.
    pub async fn prepare(&self) -> Result<(), SinkError> {
        let mut conn = self.connect().await?;

        let statements = [
            (
                "CREATE",
                format!(
                    r#"
CREATE TABLE IF NOT EXISTS {0} (
    id BIGINT PRIMARY KEY,
    value DOUBLE PRECISION NOT NULL,
    timestamp TIMESTAMP NOT NULL
)
            "#,
                    self.clean_table
                ),
            ),
            (
                "CREATE",
                format!(
                    r#"
CREATE TABLE IF NOT EXISTS {0} (
    id TEXT,
    value TEXT,
    timestamp TEXT,
    error TEXT NOT NULL
)
            "#,
                    self.bad_table
                ),
            ),
            (
                "TRUNCATE",
                format!("TRUNCATE TABLE {}, {}", self.clean_table, self.bad_table),
            ),
        ];

        for (command, statement) in statements {
            sqlx::query(&statement)
                .execute(&mut conn)
                .await
                .map_err(|error| SinkError::Query {
                    command: command.to_owned(),
                    error,
                })?;
        }

        info!(
            clean_table = %self.clean_table,
            bad_table = %self.bad_table,
            "Prepared empty destination tables"
        );

        conn.close().await.map_err(SinkError::Connection)
    }
}

#[async_trait]
impl SinkFactory for PgSinkFactory {
    async fn open(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        let conn = self.connect().await?;
        Ok(Box::new(PgSink {
            conn,
            insert_clean: format!(
                r#"
INSERT INTO {0} (id, value, timestamp)
SELECT * FROM UNNEST($1::bigint[], $2::double precision[], $3::timestamp[])
            "#,
                self.clean_table
            ),
            insert_bad: format!(
                r#"
INSERT INTO {0} (id, value, timestamp, error)
SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
            "#,
                self.bad_table
            ),
        }))
    }
}

#[async_trait]
impl RecordSink for PgSink {
    async fn write_clean(&mut self, records: &[CleanRecord]) -> Result<(), SinkError> {
        let mut ids: Vec<i64> = Vec::with_capacity(records.len());
        let mut values: Vec<f64> = Vec::with_capacity(records.len());
        let mut timestamps: Vec<NaiveDateTime> = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id);
            values.push(record.value);
            timestamps.push(record.timestamp);
        }

        let result = sqlx::query(&self.insert_clean)
            .bind(&ids)
            .bind(&values)
            .bind(&timestamps)
            .execute(&mut self.conn)
            .await
            .map_err(|error| SinkError::Query {
                command: "INSERT".to_owned(),
                error,
            })?;

        debug!(rows = result.rows_affected(), "Inserted clean records");
        Ok(())
    }

    async fn write_bad(&mut self, records: &[RejectedRecord]) -> Result<(), SinkError> {
        let mut ids: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut values: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut timestamps: Vec<Option<String>> = Vec::with_capacity(records.len());
        let mut errors: Vec<String> = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id.clone());
            values.push(record.value.clone());
            timestamps.push(record.timestamp.clone());
            errors.push(record.error.clone());
        }

        let result = sqlx::query(&self.insert_bad)
            .bind(&ids)
            .bind(&values)
            .bind(&timestamps)
            .bind(&errors)
            .execute(&mut self.conn)
            .await
            .map_err(|error| SinkError::Query {
                command: "INSERT".to_owned(),
                error,
            })?;

        debug!(rows = result.rows_affected(), "Inserted rejected records");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), SinkError> {
        self.conn.close().await.map_err(SinkError::Connection)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("clean_data"), "\"clean_data\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_open_fails_without_database() {
        let factory = PgSinkFactory::new("postgres://nobody@127.0.0.1:1/none", "c", "b");
        assert!(matches!(factory.open().await, Err(SinkError::Connection(_))));
    }
}
