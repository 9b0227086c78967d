use async_trait::async_trait;
use sqlform_core::connection::{
    ConnectionParams, DatabaseDriver, DriverError, DriverOutput, ResultSet,
};
use sqlform_core::statement_builder::Statement;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column as _, Connection as _, Executor as _, Row as _, Statement as _, ValueRef as _};

/// Embedded file database through `sqlx`. The file is created if missing.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver;

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    type Session = SqliteConnection;

    async fn connect(&self, params: &ConnectionParams) -> Result<SqliteConnection, DriverError> {
        let ConnectionParams::Embedded { path } = params else {
            return Err(DriverError::new(
                "SQLite needs a database file path, not a network host",
            ));
        };

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        SqliteConnection::connect_with(&options)
            .await
            .map_err(to_driver_error)
    }

    async fn begin(&self, session: &mut SqliteConnection) -> Result<(), DriverError> {
        execute_raw(session, "BEGIN").await
    }

    async fn run(
        &self,
        session: &mut SqliteConnection,
        statement: &Statement,
    ) -> Result<DriverOutput, DriverError> {
        let mut query = sqlx::query(statement.text());
        for param in statement.params() {
            query = query.bind(param.clone());
        }

        if !statement.operation().returns_rows() {
            let done = query.execute(&mut *session).await.map_err(to_driver_error)?;
            return Ok(DriverOutput::Affected(done.rows_affected()));
        }

        let rows = query.fetch_all(&mut *session).await.map_err(to_driver_error)?;
        let columns = match rows.first() {
            Some(first_row) => column_names(first_row),
            None => (&mut *session)
                .prepare(statement.text())
                .await
                .map_err(to_driver_error)?
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect(),
        };
        let rows = rows.iter().map(convert_row).collect();
        Ok(DriverOutput::Rows(ResultSet::new(columns, rows)))
    }

    async fn commit(&self, session: &mut SqliteConnection) -> Result<(), DriverError> {
        execute_raw(session, "COMMIT").await
    }

    async fn rollback(&self, session: &mut SqliteConnection) -> Result<(), DriverError> {
        execute_raw(session, "ROLLBACK").await
    }

    async fn close(&self, session: SqliteConnection) -> Result<(), DriverError> {
        session.close().await.map_err(to_driver_error)
    }
}

async fn execute_raw(session: &mut SqliteConnection, sql: &str) -> Result<(), DriverError> {
    sqlx::query(sql)
        .execute(&mut *session)
        .await
        .map(|_| ())
        .map_err(to_driver_error)
}

fn column_names(row: &SqliteRow) -> Vec<String> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

fn convert_row(row: &SqliteRow) -> Vec<Option<String>> {
    (0..row.len()).map(|index| convert_value(row, index)).collect()
}

/// SQLite values are dynamically typed, so every non-NULL cell is read as
/// text and BLOBs that are not UTF-8 are decoded lossily.
fn convert_value(row: &SqliteRow, index: usize) -> Option<String> {
    let raw = row.try_get_raw(index).ok()?;
    if raw.is_null() {
        return None;
    }

    match row.try_get_unchecked::<String, _>(index) {
        Ok(text) => Some(text),
        Err(_) => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn to_driver_error(error: sqlx::Error) -> DriverError {
    match error {
        sqlx::Error::Database(database_error) => DriverError::new(database_error.message()),
        other => DriverError::new(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use sqlform_core::connection::{ConnectionParams, DatabaseDriver};

    use super::SqliteDriver;

    #[tokio::test]
    async fn network_params_are_rejected() {
        let params = ConnectionParams::Network {
            host: "localhost".to_string(),
            port: 3306,
            database: None,
            user: "root".to_string(),
            password: None,
        };
        let err = SqliteDriver
            .connect(&params)
            .await
            .expect_err("host is not a SQLite target");
        assert!(err.message().contains("file path"));
    }
}
