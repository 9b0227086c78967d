use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::statement_builder::Statement;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Driver-specific session parameters.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionParams {
    Network {
        host: String,
        port: u16,
        database: Option<String>,
        user: String,
        password: Option<String>,
    },
    Embedded {
        path: PathBuf,
    },
}

impl ConnectionParams {
    /// Human-readable target, never including credentials.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Network {
                host,
                port,
                database,
                user,
                ..
            } => match database {
                Some(database) => format!("{user}@{host}:{port}/{database}"),
                None => format!("{user}@{host}:{port}"),
            },
            Self::Embedded { path } => path.display().to_string(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network {
                host,
                port,
                database,
                user,
                password,
            } => f
                .debug_struct("Network")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("user", user)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Embedded { path } => f.debug_struct("Embedded").field("path", path).finish(),
        }
    }
}

/// Column names plus rows, cells as text (`None` is SQL NULL).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutput {
    Rows(ResultSet),
    Affected(u64),
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    type Session: Send + fmt::Debug;

    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Session, DriverError>;
    async fn begin(&self, session: &mut Self::Session) -> Result<(), DriverError>;
    async fn run(
        &self,
        session: &mut Self::Session,
        statement: &Statement,
    ) -> Result<DriverOutput, DriverError>;
    async fn commit(&self, session: &mut Self::Session) -> Result<(), DriverError>;
    async fn rollback(&self, session: &mut Self::Session) -> Result<(), DriverError>;
    async fn close(&self, session: Self::Session) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub target: Option<String>,
    pub is_connected: bool,
    pub last_latency: Option<Duration>,
    pub connected_at: Option<SystemTime>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            target: None,
            is_connected: false,
            last_latency: None,
            connected_at: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("already connected to `{target}`")]
    AlreadyConnected { target: String },
    #[error("failed to connect: {0}")]
    Driver(#[source] DriverError),
    #[error("failed to close connection: {0}")]
    Close(#[source] DriverError),
}

#[derive(Debug)]
struct OpenSession<S> {
    target: String,
    handle: S,
}

/// The program's single database session, owned and passed explicitly.
#[derive(Debug)]
pub struct Connection<D: DatabaseDriver> {
    driver: D,
    session: Option<OpenSession<D::Session>>,
    last_latency: Option<Duration>,
    connected_at: Option<SystemTime>,
}

impl<D: DatabaseDriver> Connection<D> {
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            session: None,
            last_latency: None,
            connected_at: None,
        }
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            target: self.session.as_ref().map(|open| open.target.clone()),
            is_connected: self.session.is_some(),
            last_latency: self.last_latency,
            connected_at: self.connected_at,
        }
    }

    pub async fn connect(&mut self, params: &ConnectionParams) -> Result<Duration, ConnectionError> {
        if let Some(open) = &self.session {
            return Err(ConnectionError::AlreadyConnected {
                target: open.target.clone(),
            });
        }

        let target = params.label();
        let started_at = Instant::now();
        let handle = self
            .driver
            .connect(params)
            .await
            .map_err(ConnectionError::Driver)?;

        let latency = started_at.elapsed();
        self.last_latency = Some(latency);
        self.connected_at = Some(SystemTime::now());
        info!(connection = %target, latency_ms = latency.as_millis(), "connected");
        self.session = Some(OpenSession { target, handle });

        Ok(latency)
    }

    /// Closes the session if one is open. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(open) = self.session.take() else {
            return Ok(());
        };
        self.last_latency = None;
        self.connected_at = None;

        self.driver
            .close(open.handle)
            .await
            .map_err(ConnectionError::Close)?;
        info!(connection = %open.target, "connection closed");
        Ok(())
    }

    /// Drops the session without a graceful close, for sessions whose state is
    /// unknown after an interrupted statement.
    pub(crate) fn discard(&mut self) {
        if let Some(open) = self.session.take() {
            warn!(connection = %open.target, "discarding interrupted session");
        }
        self.last_latency = None;
        self.connected_at = None;
    }

    pub(crate) fn parts_mut(&mut self) -> Option<(&D, &mut D::Session)> {
        let open = self.session.as_mut()?;
        Some((&self.driver, &mut open.handle))
    }
}
