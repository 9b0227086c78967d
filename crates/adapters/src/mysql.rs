use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Row, Value};
use sqlform_core::connection::{
    ConnectionParams, DatabaseDriver, DriverError, DriverOutput, ResultSet,
};
use sqlform_core::statement_builder::Statement;

#[derive(Debug, Clone, Default)]
pub struct MysqlDriver;

#[async_trait]
impl DatabaseDriver for MysqlDriver {
    type Session = Conn;

    async fn connect(&self, params: &ConnectionParams) -> Result<Conn, DriverError> {
        let opts = opts_from_params(params)?;
        Conn::new(opts).await.map_err(to_driver_error)
    }

    async fn begin(&self, session: &mut Conn) -> Result<(), DriverError> {
        session
            .query_drop("START TRANSACTION")
            .await
            .map_err(to_driver_error)
    }

    async fn run(
        &self,
        session: &mut Conn,
        statement: &Statement,
    ) -> Result<DriverOutput, DriverError> {
        if statement.operation().returns_rows() {
            return fetch_rows(session, statement.text())
                .await
                .map(DriverOutput::Rows)
                .map_err(to_driver_error);
        }

        let outcome = if statement.params().is_empty() {
            session.query_drop(statement.text()).await
        } else {
            let params = statement
                .params()
                .iter()
                .map(|param| param.clone().map_or(Value::NULL, Value::from))
                .collect::<Vec<_>>();
            session.exec_drop(statement.text(), params).await
        };
        outcome.map_err(to_driver_error)?;
        Ok(DriverOutput::Affected(session.affected_rows()))
    }

    async fn commit(&self, session: &mut Conn) -> Result<(), DriverError> {
        session.query_drop("COMMIT").await.map_err(to_driver_error)
    }

    async fn rollback(&self, session: &mut Conn) -> Result<(), DriverError> {
        session.query_drop("ROLLBACK").await.map_err(to_driver_error)
    }

    async fn close(&self, session: Conn) -> Result<(), DriverError> {
        session.disconnect().await.map_err(to_driver_error)
    }
}

async fn fetch_rows(session: &mut Conn, sql: &str) -> Result<ResultSet, mysql_async::Error> {
    let mut result = session.query_iter(sql).await?;
    let columns = result
        .columns_ref()
        .iter()
        .map(|column| column.name_str().into_owned())
        .collect::<Vec<_>>();
    let rows = result
        .collect::<Row>()
        .await?
        .into_iter()
        .map(row_to_cells)
        .collect();
    Ok(ResultSet::new(columns, rows))
}

fn opts_from_params(params: &ConnectionParams) -> Result<OptsBuilder, DriverError> {
    let ConnectionParams::Network {
        host,
        port,
        database,
        user,
        password,
    } = params
    else {
        return Err(DriverError::new(
            "MySQL needs a host and user, not a database file",
        ));
    };

    let mut builder = OptsBuilder::default()
        .ip_or_hostname(host.clone())
        .tcp_port(*port)
        .user(Some(user.clone()));

    if let Some(password) = password.as_deref().filter(|password| !password.is_empty()) {
        builder = builder.pass(Some(password.to_string()));
    }

    if let Some(database) = database {
        builder = builder.db_name(Some(database.clone()));
    }

    Ok(builder)
}

fn row_to_cells(row: Row) -> Vec<Option<String>> {
    row.unwrap_raw()
        .into_iter()
        .map(|value| value.and_then(mysql_value_to_cell))
        .collect()
}

fn mysql_value_to_cell(value: Value) -> Option<String> {
    let rendered = match value {
        Value::NULL => return None,
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            if hour == 0 && minute == 0 && second == 0 && micros == 0 {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                )
            }
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    };
    Some(rendered)
}

fn to_driver_error(error: mysql_async::Error) -> DriverError {
    DriverError::new(error.to_string())
}
