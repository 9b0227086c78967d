use mysql_async::prelude::Queryable;
use sqlform_adapters::any_driver::AnyDriver;
use sqlform_adapters::export::SpreadsheetExporter;
use sqlform_core::confirmation::{ConfirmationPrompt, Decision, StatementReview};
use sqlform_core::connection::{Connection, ConnectionParams};
use sqlform_core::connection_profile::{DefaultConnection, DriverKind};
use sqlform_core::executor::ExecutionOptions;
use sqlform_core::pipeline::{RequestOutcome, RequestPipeline, StatementRunner};
use sqlform_core::query_spec::{JoinSlots, JoinType, Operation, QuerySpec};
use sqlform_core::result_pane::ResultPane;
use sqlform_core::statement_builder::ValueMode;
use tokio_util::sync::CancellationToken;

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("SQLFORM_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_params(database: &str) -> ConnectionParams {
    let host = std::env::var("SQLFORM_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("SQLFORM_TEST_DB_USER").unwrap_or_else(|_| "root".to_string());
    let port = std::env::var("SQLFORM_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(3306);
    let password = std::env::var("SQLFORM_DB_PASSWORD").ok();

    let mut profile = DefaultConnection::mysql(host, user);
    profile.port = port;
    profile.database = Some(database.to_string());
    profile
        .to_params(password)
        .expect("integration profile should be complete")
}

struct Proceed;

impl ConfirmationPrompt for Proceed {
    fn ask(&mut self, _review: &StatementReview) -> Decision {
        Decision::Proceed
    }
}

async fn prepare_schema(params: &ConnectionParams, database: &str) {
    let ConnectionParams::Network {
        host,
        port,
        user,
        password,
        ..
    } = params
    else {
        panic!("mysql params expected");
    };
    let opts = mysql_async::OptsBuilder::default()
        .ip_or_hostname(host.clone())
        .tcp_port(*port)
        .user(Some(user.clone()))
        .pass(password.clone());
    let mut conn = mysql_async::Conn::new(opts)
        .await
        .expect("admin connection should open");
    for sql in [
        format!("CREATE DATABASE IF NOT EXISTS `{database}`"),
        format!("DROP TABLE IF EXISTS `{database}`.departments"),
        format!("DROP TABLE IF EXISTS `{database}`.employees"),
        format!(
            "CREATE TABLE `{database}`.departments (id INT PRIMARY KEY, title VARCHAR(32) NOT NULL)"
        ),
        format!(
            "CREATE TABLE `{database}`.employees (\
             id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(64) NOT NULL, age INT NULL, dept_id INT)"
        ),
        format!("INSERT INTO `{database}`.departments VALUES (1, 'Research')"),
    ] {
        conn.query_drop(sql).await.expect("schema statement should run");
    }
    conn.disconnect().await.expect("admin disconnect should succeed");
}

#[tokio::test(flavor = "current_thread")]
async fn mysql_driver_runs_form_requests() {
    if !mysql_integration_enabled() {
        return;
    }

    let database = "sqlform_adapters_cov";
    let params = integration_params(database);
    prepare_schema(&params, database).await;

    let mut connection = Connection::new(AnyDriver::for_kind(DriverKind::Mysql));
    connection
        .connect(&params)
        .await
        .expect("connect should succeed");

    let mut pipeline = RequestPipeline::new(
        ValueMode::Bound,
        StatementRunner::new(ExecutionOptions::default(), None),
    );
    let mut pane = ResultPane::new();
    let cancel = CancellationToken::new();

    let insert = QuerySpec::new(Operation::Insert, "employees")
        .with_columns(["name", "age", "dept_id"])
        .with_value("name", "'O''Brien'")
        .with_value("age", "41")
        .with_value("dept_id", "1");
    let outcome = pipeline
        .run(
            &insert,
            &mut Proceed,
            &mut connection,
            &mut pane,
            None::<&SpreadsheetExporter>,
            &cancel,
        )
        .await
        .expect("insert should succeed");
    assert!(matches!(outcome, RequestOutcome::Completed(ref delivery) if delivery.status.rows == 1));

    let mut joined = JoinSlots::new();
    joined.add("departments").expect("first join slot");
    let select = QuerySpec::new(Operation::Select, "employees")
        .with_columns(["name", "title", "age"])
        .with_joins(JoinType::Left, joined, "employees.dept_id=departments.id");
    pipeline
        .run(
            &select,
            &mut Proceed,
            &mut connection,
            &mut pane,
            None::<&SpreadsheetExporter>,
            &cancel,
        )
        .await
        .expect("select should succeed");

    assert_eq!(pane.columns(), ["name", "title", "age"]);
    assert_eq!(
        pane.visible_rows(0, 5),
        [vec![
            Some("O'Brien".to_string()),
            Some("Research".to_string()),
            Some("41".to_string())
        ]]
    );

    connection.close().await.expect("close should succeed");
}
