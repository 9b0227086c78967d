use async_trait::async_trait;
use mysql_async::Conn;
use sqlform_core::connection::{ConnectionParams, DatabaseDriver, DriverError, DriverOutput};
use sqlform_core::connection_profile::DriverKind;
use sqlform_core::statement_builder::Statement;
use sqlx::sqlite::SqliteConnection;

use crate::mysql::MysqlDriver;
use crate::sqlite::SqliteDriver;

/// Driver chosen at runtime from the connection form.
#[derive(Debug, Clone)]
pub enum AnyDriver {
    Mysql(MysqlDriver),
    Sqlite(SqliteDriver),
}

#[derive(Debug)]
pub enum AnySession {
    Mysql(Conn),
    Sqlite(SqliteConnection),
}

impl AnyDriver {
    #[must_use]
    pub fn for_kind(kind: DriverKind) -> Self {
        match kind {
            DriverKind::Mysql => Self::Mysql(MysqlDriver),
            DriverKind::Sqlite => Self::Sqlite(SqliteDriver),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DriverKind {
        match self {
            Self::Mysql(_) => DriverKind::Mysql,
            Self::Sqlite(_) => DriverKind::Sqlite,
        }
    }
}

fn mismatched() -> DriverError {
    DriverError::new("session was opened by a different driver")
}

#[async_trait]
impl DatabaseDriver for AnyDriver {
    type Session = AnySession;

    async fn connect(&self, params: &ConnectionParams) -> Result<AnySession, DriverError> {
        match self {
            Self::Mysql(driver) => driver.connect(params).await.map(AnySession::Mysql),
            Self::Sqlite(driver) => driver.connect(params).await.map(AnySession::Sqlite),
        }
    }

    async fn begin(&self, session: &mut AnySession) -> Result<(), DriverError> {
        match (self, session) {
            (Self::Mysql(driver), AnySession::Mysql(conn)) => driver.begin(conn).await,
            (Self::Sqlite(driver), AnySession::Sqlite(conn)) => driver.begin(conn).await,
            _ => Err(mismatched()),
        }
    }

    async fn run(
        &self,
        session: &mut AnySession,
        statement: &Statement,
    ) -> Result<DriverOutput, DriverError> {
        match (self, session) {
            (Self::Mysql(driver), AnySession::Mysql(conn)) => driver.run(conn, statement).await,
            (Self::Sqlite(driver), AnySession::Sqlite(conn)) => driver.run(conn, statement).await,
            _ => Err(mismatched()),
        }
    }

    async fn commit(&self, session: &mut AnySession) -> Result<(), DriverError> {
        match (self, session) {
            (Self::Mysql(driver), AnySession::Mysql(conn)) => driver.commit(conn).await,
            (Self::Sqlite(driver), AnySession::Sqlite(conn)) => driver.commit(conn).await,
            _ => Err(mismatched()),
        }
    }

    async fn rollback(&self, session: &mut AnySession) -> Result<(), DriverError> {
        match (self, session) {
            (Self::Mysql(driver), AnySession::Mysql(conn)) => driver.rollback(conn).await,
            (Self::Sqlite(driver), AnySession::Sqlite(conn)) => driver.rollback(conn).await,
            _ => Err(mismatched()),
        }
    }

    async fn close(&self, session: AnySession) -> Result<(), DriverError> {
        match (self, session) {
            (Self::Mysql(driver), AnySession::Mysql(conn)) => driver.close(conn).await,
            (Self::Sqlite(driver), AnySession::Sqlite(conn)) => driver.close(conn).await,
            _ => Err(mismatched()),
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlform_core::connection_profile::DriverKind;

    use super::AnyDriver;

    #[test]
    fn driver_follows_selected_kind() {
        assert_eq!(AnyDriver::for_kind(DriverKind::Mysql).kind(), DriverKind::Mysql);
        assert_eq!(AnyDriver::for_kind(DriverKind::Sqlite).kind(), DriverKind::Sqlite);
    }
}
