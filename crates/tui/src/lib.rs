mod form;

use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use sqlform_adapters::any_driver::AnyDriver;
use sqlform_adapters::export::SpreadsheetExporter;
use sqlform_adapters::secrets::{import_legacy_connection, resolve_password, store_password};
use sqlform_core::audit_trail::FileAuditTrail;
use sqlform_core::confirmation::StatementReview;
use sqlform_core::connection::{Connection, ConnectionError};
use sqlform_core::connection_profile::{
    DefaultConnection, DefaultConnectionStore, DriverKind, PasswordSource, LEGACY_CONNECTION_FILE,
};
use sqlform_core::executor::{ExecutionError, ExecutionResult};
use sqlform_core::pipeline::{RequestPipeline, StatementRunner};
use sqlform_core::query_spec::MAX_JOINED_TABLES;
use sqlform_core::result_pane::{deliver, display_cell, ResultPane};
use sqlform_core::settings::{config_dir, Settings};
use sqlform_core::statement_builder::{BoundValue, ValueMode};
use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::form::{ConnectionForm, QueryField, QueryForm, QUERY_FIELDS};

const TICK_RATE: Duration = Duration::from_millis(120);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Connection,
    Query,
    Results,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Self::Connection => Self::Query,
            Self::Query => Self::Results,
            Self::Results => Self::Connection,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Connection => "Connection",
            Self::Query => "Query",
            Self::Results => "Results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    NextField,
    PreviousField,
    Submit,
    Cancel,
    Disconnect,
    AddJoin,
    RemoveJoin,
    ToggleExport,
    Navigate(DirectionKey),
    Input(char),
    Erase,
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkKind {
    Connecting,
    Executing,
    Closing,
}

impl WorkKind {
    fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Executing => "running",
            Self::Closing => "disconnecting",
        }
    }
}

/// Results handed back from the runtime. The connection always comes back
/// with the reply so the event loop owns it between requests.
enum WorkerReply {
    Connected {
        connection: Connection<AnyDriver>,
        profile: DefaultConnection,
        typed_password: Option<String>,
        outcome: Result<Duration, ConnectionError>,
    },
    Executed {
        connection: Connection<AnyDriver>,
        outcome: Result<ExecutionResult, ExecutionError>,
    },
    Closed {
        outcome: Result<(), ConnectionError>,
    },
}

struct BackgroundWork {
    kind: WorkKind,
    replies: Receiver<WorkerReply>,
    cancellation: CancellationToken,
    started_at: Instant,
}

struct TuiApp {
    runtime: Handle,
    pipeline: RequestPipeline,
    settings: Settings,
    store: Option<DefaultConnectionStore>,
    pane: Pane,
    connection_form: ConnectionForm,
    query_form: QueryForm,
    results: ResultPane,
    connection: Option<Connection<AnyDriver>>,
    review: Option<StatementReview>,
    work: Option<BackgroundWork>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
    system_summary: String,
}

impl TuiApp {
    fn new(
        settings: Settings,
        runtime: Handle,
        store: Option<DefaultConnectionStore>,
        audit: Option<FileAuditTrail>,
    ) -> Self {
        let runner = StatementRunner::new(settings.execution_options(), audit);
        let pipeline = RequestPipeline::new(settings.value_mode, runner);

        let (connection_form, status_line) = match store.as_ref().map(DefaultConnectionStore::load)
        {
            Some(Ok(Some(profile))) => (
                ConnectionForm::from_profile(profile),
                "Loaded default connection; press Enter to connect".to_string(),
            ),
            Some(Err(error)) => {
                warn!(%error, "failed to load default connection");
                (
                    ConnectionForm::default(),
                    format!("Default connection ignored: {error}"),
                )
            }
            Some(Ok(None)) | None => (
                ConnectionForm::default(),
                "Fill connection details and press Enter to connect".to_string(),
            ),
        };

        Self {
            runtime,
            pipeline,
            settings,
            store,
            pane: Pane::Connection,
            connection_form,
            query_form: QueryForm::default(),
            results: ResultPane::new(),
            connection: None,
            review: None,
            work: None,
            show_help: false,
            should_quit: false,
            status_line,
            system_summary: system_summary(),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(Connection::is_connected)
    }

    fn connection_label(&self) -> Option<String> {
        self.connection
            .as_ref()
            .and_then(|connection| connection.status().target)
    }

    fn handle(&mut self, msg: Msg) {
        if self.review.is_some() {
            self.handle_review(msg);
            return;
        }

        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => {
                self.pane = self.pane.next();
                self.status_line = format!("Switched pane to {}", self.pane.name());
            }
            Msg::NextField => self.move_field(true),
            Msg::PreviousField => self.move_field(false),
            Msg::Submit => self.submit(),
            Msg::Cancel => self.cancel(),
            Msg::Disconnect => self.disconnect(),
            Msg::AddJoin => self.add_join(),
            Msg::RemoveJoin => self.remove_join(),
            Msg::ToggleExport => {
                self.settings.export_enabled = !self.settings.export_enabled;
                self.status_line = if self.settings.export_enabled {
                    format!(
                        "Export on: SELECT results go to {}",
                        self.settings.export_path.display()
                    )
                } else {
                    "Export off".to_string()
                };
            }
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Input(ch) => match self.pane {
                Pane::Connection => self.connection_form.input(ch),
                Pane::Query => self.query_form.input(ch),
                Pane::Results => {}
            },
            Msg::Erase => match self.pane {
                Pane::Connection => self.connection_form.erase(),
                Pane::Query => self.query_form.erase(),
                Pane::Results => {}
            },
            Msg::Tick => self.on_tick(),
        }
    }

    /// The confirm modal swallows every key except its own answers.
    fn handle_review(&mut self, msg: Msg) {
        match msg {
            Msg::Submit | Msg::Input('y' | 'Y') => self.confirm_review(),
            Msg::Cancel | Msg::Input('n' | 'N') => self.abort_review(),
            Msg::Quit => {
                self.abort_review();
                self.should_quit = true;
            }
            Msg::Tick => self.on_tick(),
            _ => {}
        }
    }

    fn on_tick(&mut self) {
        let Some(work) = &self.work else {
            return;
        };

        match work.replies.try_recv() {
            Ok(reply) => {
                self.work = None;
                self.apply_reply(reply);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                warn!(kind = work.kind.label(), "background task ended without a reply");
                self.work = None;
                self.status_line =
                    "Background task stopped unexpectedly; reconnect to continue".to_string();
            }
        }
    }

    fn move_field(&mut self, forward: bool) {
        match (self.pane, forward) {
            (Pane::Connection, true) => self.connection_form.next_field(),
            (Pane::Connection, false) => self.connection_form.previous_field(),
            (Pane::Query, true) => self.query_form.next_field(),
            (Pane::Query, false) => self.query_form.previous_field(),
            (Pane::Results, _) => {}
        }
    }

    fn navigate(&mut self, direction: DirectionKey) {
        match (self.pane, direction) {
            (Pane::Results, DirectionKey::Up) => self.results.move_cursor_up(),
            (Pane::Results, DirectionKey::Down) => self.results.move_cursor_down(),
            (Pane::Results, _) => {}
            (_, DirectionKey::Up) => self.move_field(false),
            (_, DirectionKey::Down) => self.move_field(true),
            (Pane::Connection, DirectionKey::Left | DirectionKey::Right) => {
                self.connection_form.cycle_choice();
            }
            (Pane::Query, DirectionKey::Left) => {
                self.query_form.cycle_choice(false);
            }
            (Pane::Query, DirectionKey::Right) => {
                self.query_form.cycle_choice(true);
            }
        }
    }

    fn add_join(&mut self) {
        if self.pane != Pane::Query {
            return;
        }
        self.status_line = match self.query_form.add_join() {
            Ok(count) => format!("Joined tables: {count}/{MAX_JOINED_TABLES}"),
            Err(error) => error.to_string(),
        };
    }

    fn remove_join(&mut self) {
        if self.pane != Pane::Query {
            return;
        }
        self.status_line = match self.query_form.remove_join() {
            Some(table) => format!("Removed join on `{table}`"),
            None => "No joined tables to remove".to_string(),
        };
    }

    fn submit(&mut self) {
        if let Some(work) = &self.work {
            self.status_line = format!("Still {}; press Esc to cancel", work.kind.label());
            return;
        }
        match self.pane {
            Pane::Connection => self.connect_from_form(),
            Pane::Query => self.review_query(),
            Pane::Results => self.status_line = "Nothing to submit in this view".to_string(),
        }
    }

    fn connect_from_form(&mut self) {
        let profile = match self.connection_form.to_profile() {
            Ok(profile) => profile,
            Err(error) => {
                self.status_line = format!("Invalid connection details: {error}");
                return;
            }
        };
        let typed_password = self.connection_form.typed_password();
        let password = match profile.driver {
            DriverKind::Mysql => typed_password.clone().or_else(|| resolve_password(&profile)),
            DriverKind::Sqlite => None,
        };
        let params = match profile.to_params(password) {
            Ok(params) => params,
            Err(error) => {
                self.status_line = format!("Invalid connection details: {error}");
                return;
            }
        };

        info!(driver = profile.driver.label(), target = %params.label(), "connecting");
        let previous = self.connection.take();
        let (sender, replies) = mpsc::channel();
        self.runtime.spawn(async move {
            if let Some(mut previous) = previous {
                if let Err(error) = previous.close().await {
                    warn!(%error, "failed to close previous connection");
                }
            }
            let mut connection = Connection::new(AnyDriver::for_kind(profile.driver));
            let outcome = connection.connect(&params).await;
            send_reply(
                &sender,
                WorkerReply::Connected {
                    connection,
                    profile,
                    typed_password,
                    outcome,
                },
            );
        });
        self.start_work(WorkKind::Connecting, replies, CancellationToken::new());
        self.status_line = "Connecting...".to_string();
    }

    fn review_query(&mut self) {
        if !self.is_connected() {
            self.status_line = "Connect to a database first".to_string();
            return;
        }
        let spec = match self.query_form.to_spec() {
            Ok(spec) => spec,
            Err(error) => {
                self.status_line = format!("Invalid query form: {error}");
                return;
            }
        };
        match self.pipeline.prepare(&spec) {
            Ok(review) => {
                debug!(operation = %review.operation, "statement ready for review");
                self.status_line = "Review the statement: y to run, n to abort".to_string();
                self.review = Some(review);
            }
            Err(error) => self.status_line = format!("Cannot build statement: {error}"),
        }
    }

    fn confirm_review(&mut self) {
        let Some(review) = self.review.take() else {
            return;
        };
        let Some(mut connection) = self.connection.take() else {
            self.pipeline.abort(&review);
            self.status_line = "Connection was lost; statement not run".to_string();
            return;
        };
        let approved = match self.pipeline.approve(&review) {
            Ok(approved) => approved,
            Err(error) => {
                self.connection = Some(connection);
                self.status_line = format!("Approval failed: {error}");
                return;
            }
        };

        let runner = self.pipeline.runner().clone();
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let (sender, replies) = mpsc::channel();
        self.runtime.spawn(async move {
            let outcome = runner.execute(&mut connection, &approved, &token).await;
            send_reply(&sender, WorkerReply::Executed { connection, outcome });
        });
        self.start_work(WorkKind::Executing, replies, cancellation);
        self.status_line = format!("Running {}... (Esc to cancel)", review.operation);
    }

    fn abort_review(&mut self) {
        if let Some(review) = self.review.take() {
            self.pipeline.abort(&review);
            self.status_line = "Statement aborted; nothing was run".to_string();
        }
    }

    fn cancel(&mut self) {
        match &self.work {
            Some(work) if work.kind == WorkKind::Executing => {
                work.cancellation.cancel();
                self.status_line = "Cancelling statement...".to_string();
            }
            Some(work) => {
                self.status_line = format!("Still {}; please wait", work.kind.label());
            }
            None => self.status_line = "Nothing to cancel".to_string(),
        }
    }

    fn disconnect(&mut self) {
        if self.work.is_some() {
            self.status_line = "Wait for the running task before disconnecting".to_string();
            return;
        }
        let Some(mut connection) = self.connection.take() else {
            self.status_line = "Not connected".to_string();
            return;
        };

        let (sender, replies) = mpsc::channel();
        self.runtime.spawn(async move {
            let outcome = connection.close().await;
            send_reply(&sender, WorkerReply::Closed { outcome });
        });
        self.start_work(WorkKind::Closing, replies, CancellationToken::new());
        self.status_line = "Disconnecting...".to_string();
    }

    fn start_work(
        &mut self,
        kind: WorkKind,
        replies: Receiver<WorkerReply>,
        cancellation: CancellationToken,
    ) {
        self.work = Some(BackgroundWork {
            kind,
            replies,
            cancellation,
            started_at: Instant::now(),
        });
    }

    fn apply_reply(&mut self, reply: WorkerReply) {
        match reply {
            WorkerReply::Connected {
                connection,
                profile,
                typed_password,
                outcome,
            } => {
                self.connection = Some(connection);
                match outcome {
                    Ok(latency) => {
                        self.remember_profile(&profile, typed_password.as_deref());
                        self.status_line = format!(
                            "Connected to {} in {} ms",
                            self.connection_label().unwrap_or_default(),
                            latency.as_millis()
                        );
                        self.pane = Pane::Query;
                    }
                    Err(error) => self.status_line = format!("Connection failed: {error}"),
                }
            }
            WorkerReply::Executed {
                connection,
                outcome,
            } => {
                self.connection = Some(connection);
                match outcome {
                    Ok(result) => self.show_result(&result),
                    Err(error) => self.status_line = format!("Execution failed: {error}"),
                }
            }
            WorkerReply::Closed { outcome } => {
                self.status_line = match outcome {
                    Ok(()) => "Disconnected".to_string(),
                    Err(error) => format!("Disconnected with error: {error}"),
                };
            }
        }
    }

    fn show_result(&mut self, result: &ExecutionResult) {
        let exporter = self
            .settings
            .export_enabled
            .then(|| SpreadsheetExporter::from_settings(&self.settings));
        let delivery = deliver(result, &mut self.results, exporter.as_ref());

        let export_note = match &delivery.export {
            Some(Ok(report)) => format!(
                "; exported {} row(s) to {}",
                report.rows_written,
                report.path.display()
            ),
            Some(Err(error)) => format!("; {error}"),
            None => String::new(),
        };
        self.status_line = format!("{}{export_note}", delivery.status.message());
        if delivery.rows_displayed.is_some() {
            self.pane = Pane::Results;
        }
    }

    /// Saves the profile as the default and keeps a typed password in the
    /// keyring. Failures are logged and otherwise ignored.
    fn remember_profile(&mut self, profile: &DefaultConnection, typed_password: Option<&str>) {
        if let Some(store) = &self.store {
            if let Err(error) = store.save(profile) {
                warn!(%error, "failed to save default connection");
            }
        }
        if let (Some(password), PasswordSource::Keyring, DriverKind::Mysql) =
            (typed_password, profile.password_source, profile.driver)
        {
            if let Err(error) = store_password(profile, password) {
                warn!(%error, "failed to store password in the keyring");
            }
        }
        self.connection_form = ConnectionForm::from_profile(profile.clone());
    }

    fn shutdown(&mut self) {
        self.abort_review();
        if let Some(work) = self.work.take() {
            work.cancellation.cancel();
            match work.replies.recv_timeout(SHUTDOWN_GRACE) {
                Ok(reply) => self.apply_reply(reply),
                Err(error) => warn!(%error, "background task did not finish before exit"),
            }
        }
        if let Some(mut connection) = self.connection.take() {
            if let Err(error) = self.runtime.block_on(connection.close()) {
                warn!(%error, "failed to close connection on exit");
            }
        }
    }
}

fn send_reply(sender: &Sender<WorkerReply>, reply: WorkerReply) {
    if sender.send(reply).is_err() {
        debug!("interface closed before the background task replied");
    }
}

fn system_summary() -> String {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    format!(
        "{} on {} with {cpus} logical CPU(s)",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Places a legacy plaintext profile may sit: the working directory, then the
/// config directory.
fn legacy_connection_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(current) = std::env::current_dir() {
        candidates.push(current.join(LEGACY_CONNECTION_FILE));
    }
    if let Ok(dir) = config_dir() {
        candidates.push(dir.join(LEGACY_CONNECTION_FILE));
    }
    candidates
}

fn open_profile_store() -> Option<DefaultConnectionStore> {
    let store = match DefaultConnectionStore::load_default() {
        Ok(store) => store,
        Err(error) => {
            warn!(%error, "default connection store unavailable");
            return None;
        }
    };
    for legacy in legacy_connection_candidates() {
        match import_legacy_connection(&legacy, &store) {
            Ok(Some(_)) => break,
            Ok(None) => {}
            Err(error) => warn!(%error, path = %legacy.display(), "legacy connection not imported"),
        }
    }
    Some(store)
}

fn open_audit_trail(settings: &Settings) -> Option<FileAuditTrail> {
    if !settings.audit {
        return None;
    }
    match FileAuditTrail::load_default() {
        Ok(trail) => Some(trail),
        Err(error) => {
            warn!(%error, "audit trail disabled");
            None
        }
    }
}

#[must_use]
pub fn ui_name() -> &'static str {
    "sqlform-tui"
}

pub fn run(settings: Settings) -> Result<(), TuiError> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let store = open_profile_store();
    let audit = open_audit_trail(&settings);
    let mut app = TuiApp::new(settings, runtime.handle().clone(), store, audit);

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);
    app.shutdown();

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let work = match &app.work {
        Some(work) => format!(
            "{} {}s",
            work.kind.label(),
            work.started_at.elapsed().as_secs()
        ),
        None => "idle".to_string(),
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Pane: {} ", app.pane.name()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "DB: {}",
            app.connection_label()
                .unwrap_or_else(|| "not connected".to_string())
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "Values: {}",
            match app.pipeline.value_mode() {
                ValueMode::Bound => "bound",
                ValueMode::Inline => "inline",
            }
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "Export: {}",
            if app.settings.export_enabled { "on" } else { "off" }
        )),
        Span::raw(" | "),
        Span::raw(format!("Task: {work}")),
    ]))
    .block(Block::default().borders(Borders::ALL).title("sqlform"));
    frame.render_widget(header, chunks[0]);

    let body_text = match app.pane {
        Pane::Connection => connection_lines(app),
        Pane::Query => query_lines(app),
        Pane::Results => result_lines(app, usize::from(chunks[1].height.saturating_sub(4))),
    };
    let body = Paragraph::new(body_text)
        .block(Block::default().borders(Borders::ALL).title(app.pane.name()))
        .alignment(Alignment::Left);
    frame.render_widget(body, chunks[1]);

    let footer = Paragraph::new(vec![
        Line::from(
            "Enter: submit | Tab/Up/Down: field | Left/Right: choice | Ctrl+N: pane | F1: help",
        ),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, chunks[2]);

    if let Some(review) = &app.review {
        render_review_popup(frame, review);
    } else if app.show_help {
        render_help_popup(frame);
    }
}

fn field_line(active: bool, label: &str, value: &str) -> Line<'static> {
    let marker = if active { ">" } else { " " };
    let line = Line::from(format!("{marker} {label:<10} {value}"));
    if active {
        line.style(Style::default().fg(Color::Cyan))
    } else {
        line
    }
}

fn connection_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let form = &app.connection_form;
    let mut lines = vec![
        Line::from("Enter: connect and save as default | Ctrl+D: disconnect"),
        Line::from(""),
    ];
    for field in form.fields() {
        lines.push(field_line(
            form.active_field == *field,
            field.label(),
            &form.value(*field),
        ));
    }
    lines
}

fn query_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let form = &app.query_form;
    let mut lines = vec![
        Line::from("Enter: review and run | F2/F3: add/remove join | Ctrl+E: export"),
        Line::from(""),
    ];
    for field in QUERY_FIELDS {
        lines.push(field_line(
            form.active_field == field,
            field.label(),
            &form.value(field),
        ));
        if field == QueryField::JoinTable {
            lines.push(Line::from(format!(
                "  {:<10} [{}] ({}/{MAX_JOINED_TABLES})",
                "Joined",
                form.joins.tables().join(", "),
                form.joins.len()
            )));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from("Values: column=value; column2=value2"));
    lines
}

fn result_lines(app: &TuiApp, visible_limit: usize) -> Vec<Line<'static>> {
    let pane = &app.results;
    if !pane.has_result() {
        let mut lines = vec![Line::from(format!("System: {}", app.system_summary))];
        if let Some(status) = pane.status() {
            lines.push(Line::from(status.message()));
        }
        return lines;
    }

    let visible_limit = visible_limit.max(1);
    let window_start = pane.cursor().saturating_sub(visible_limit / 2);
    let rows = pane.visible_rows(window_start, visible_limit);

    let mut widths: Vec<usize> = pane.columns().iter().map(|column| column.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_cell(cell.as_ref()).chars().count());
        }
    }
    let format_row = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut lines = vec![Line::from(format!(
        "       {}",
        format_row(pane.columns().iter().map(String::as_str).collect())
    ))
    .style(Style::default().add_modifier(Modifier::BOLD))];

    for (offset, row) in rows.iter().enumerate() {
        let absolute_index = window_start + offset;
        let cursor = if absolute_index == pane.cursor() { ">" } else { " " };
        let cells = (0..pane.columns().len())
            .map(|index| display_cell(row.get(index).and_then(Option::as_ref)))
            .collect();
        lines.push(Line::from(format!(
            "{cursor} {:04} {}",
            absolute_index + 1,
            format_row(cells)
        )));
    }

    if pane.is_empty() {
        lines.push(Line::from("No rows returned"));
    }
    lines
}

fn render_review_popup(frame: &mut Frame<'_>, review: &StatementReview) {
    let area = centered_rect(80, 60, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(review.text.clone()),
        Line::from(""),
    ];
    if !review.params.is_empty() {
        lines.push(Line::from(bound_values_line(&review.params)));
    }
    for note in &review.notes {
        lines.push(
            Line::from(format!("! {}", note.describe())).style(Style::default().fg(Color::Red)),
        );
    }
    lines.push(Line::from(""));
    lines.push(Line::from("y / Enter: run    n / Esc: abort"));

    let popup = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Run this {}?", review.operation)),
        );
    frame.render_widget(popup, area);
}

fn bound_values_line(params: &[BoundValue]) -> String {
    let values = params
        .iter()
        .map(|value| match value {
            Some(text) => format!("{text:?}"),
            None => "NULL".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("Bound values: {values}")
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("Ctrl+Q: quit"),
        Line::from("F1: toggle help"),
        Line::from("Ctrl+N: cycle panes"),
        Line::from("Tab / Shift+Tab, Up / Down: move between fields"),
        Line::from("Left / Right: change driver, operation or join type"),
        Line::from("Enter: connect or review statement (by pane)"),
        Line::from("Esc / Ctrl+C: cancel running statement"),
        Line::from("F2 / F3: add / remove joined table"),
        Line::from("Ctrl+E: toggle spreadsheet export"),
        Line::from("Ctrl+D: disconnect"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => Some(Msg::Cancel),
        (KeyModifiers::CONTROL, KeyCode::Char('n')) => Some(Msg::NextPane),
        (KeyModifiers::CONTROL, KeyCode::Char('d')) => Some(Msg::Disconnect),
        (KeyModifiers::CONTROL, KeyCode::Char('e')) => Some(Msg::ToggleExport),
        (_, KeyCode::F(1)) => Some(Msg::ToggleHelp),
        (_, KeyCode::F(2)) => Some(Msg::AddJoin),
        (_, KeyCode::F(3)) => Some(Msg::RemoveJoin),
        (_, KeyCode::Esc) => Some(Msg::Cancel),
        (_, KeyCode::Tab) => Some(Msg::NextField),
        (_, KeyCode::BackTab) => Some(Msg::PreviousField),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Backspace) => Some(Msg::Erase),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right) => Some(Msg::Navigate(DirectionKey::Right)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(ch)) => Some(Msg::Input(ch)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use sqlform_core::connection_profile::{DefaultConnection, DefaultConnectionStore, DriverKind};
    use sqlform_core::query_spec::Operation;
    use sqlform_core::settings::Settings;
    use tempfile::TempDir;
    use tokio::runtime::{Builder, Runtime};

    use super::{bound_values_line, map_key_event, ui_name, DirectionKey, Msg, Pane, TuiApp};

    fn runtime() -> Runtime {
        Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime should build")
    }

    fn app(runtime: &Runtime, store: Option<DefaultConnectionStore>) -> TuiApp {
        TuiApp::new(Settings::default(), runtime.handle().clone(), store, None)
    }

    fn settle(app: &mut TuiApp) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while app.work.is_some() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            app.handle(Msg::Tick);
        }
        assert!(app.work.is_none(), "background task did not finish");
    }

    #[test]
    fn bound_values_are_shown_unambiguously() {
        let params = [
            Some("'Ada'".to_string()),
            Some("it's".to_string()),
            Some("NULL".to_string()),
            None,
        ];
        assert_eq!(
            bound_values_line(&params),
            r#"Bound values: "'Ada'", "it's", "NULL", NULL"#
        );
    }

    fn connect_sqlite(app: &mut TuiApp, temp_dir: &TempDir) {
        app.connection_form.driver = DriverKind::Sqlite;
        app.connection_form.path = temp_dir.path().join("app.db").display().to_string();
        app.handle(Msg::Submit);
        settle(app);
        assert!(app.is_connected(), "status: {}", app.status_line);
        assert_eq!(app.pane, Pane::Query);
    }

    fn fill_catalog_select(app: &mut TuiApp) {
        app.query_form.table = "sqlite_master".to_string();
        app.query_form.columns = "name, type".to_string();
    }

    #[test]
    fn pane_cycles_in_expected_order() {
        assert_eq!(Pane::Connection.next(), Pane::Query);
        assert_eq!(Pane::Query.next(), Pane::Results);
        assert_eq!(Pane::Results.next(), Pane::Connection);
    }

    #[test]
    fn keymap_supports_required_global_keys() {
        assert!(matches!(
            map_key_event(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL)),
            Some(Msg::Quit)
        ));
        assert!(matches!(
            map_key_event(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)),
            Some(Msg::Cancel)
        ));
        assert!(matches!(
            map_key_event(KeyEvent::new(KeyCode::F(2), KeyModifiers::NONE)),
            Some(Msg::AddJoin)
        ));
        assert!(matches!(
            map_key_event(KeyEvent::new(KeyCode::Left, KeyModifiers::NONE)),
            Some(Msg::Navigate(DirectionKey::Left))
        ));
    }

    #[test]
    fn plain_letters_are_typed_not_commands() {
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(Msg::Input('q'))
        );
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::Char('E'), KeyModifiers::SHIFT)),
            Some(Msg::Input('E'))
        );
        assert_eq!(
            map_key_event(KeyEvent::new(KeyCode::Char('x'), KeyModifiers::ALT)),
            None
        );
    }

    #[test]
    fn saved_default_connection_prefills_the_form() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store = DefaultConnectionStore::from_path(temp_dir.path().join("default.toml"));
        let mut profile = DefaultConnection::mysql("db.internal", "report");
        profile.port = 3307;
        store.save(&profile).expect("save profile");

        let runtime = runtime();
        let app = app(&runtime, Some(store));
        assert_eq!(app.connection_form.host, "db.internal");
        assert_eq!(app.connection_form.port, "3307");
        assert!(app.status_line.contains("Loaded default connection"));
    }

    #[test]
    fn fourth_join_is_refused_with_a_status_message() {
        let runtime = runtime();
        let mut app = app(&runtime, None);
        app.pane = Pane::Query;
        for table in ["a", "b", "c", "d"] {
            app.query_form.join_table = table.to_string();
            app.handle(Msg::AddJoin);
        }
        assert_eq!(app.query_form.joins.len(), 3);
        assert!(app.status_line.contains("at most 3"));
    }

    #[test]
    fn query_needs_a_connection_before_review() {
        let runtime = runtime();
        let mut app = app(&runtime, None);
        app.pane = Pane::Query;
        fill_catalog_select(&mut app);
        app.handle(Msg::Submit);
        assert!(app.review.is_none());
        assert_eq!(app.status_line, "Connect to a database first");
    }

    #[test]
    fn declining_the_review_leaves_results_untouched() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let runtime = runtime();
        let mut app = app(&runtime, None);
        connect_sqlite(&mut app, &temp_dir);

        fill_catalog_select(&mut app);
        app.handle(Msg::Submit);
        assert!(app.review.is_some());

        app.handle(Msg::NextPane);
        assert_eq!(app.pane, Pane::Query, "modal swallows other keys");
        app.handle(Msg::Input('n'));

        assert!(app.review.is_none());
        assert!(app.work.is_none());
        assert!(!app.results.has_result());
        assert!(app.results.status().is_none());
        assert_eq!(app.status_line, "Statement aborted; nothing was run");
        app.shutdown();
    }

    #[test]
    fn approved_select_runs_in_the_background_and_fills_results() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let runtime = runtime();
        let mut app = app(&runtime, None);
        connect_sqlite(&mut app, &temp_dir);

        fill_catalog_select(&mut app);
        app.handle(Msg::Submit);
        let review = app.review.clone().expect("review should be shown");
        assert_eq!(review.text, "SELECT name, type FROM sqlite_master;");
        assert_eq!(review.operation, Operation::Select);

        app.handle(Msg::Input('y'));
        assert!(app.connection.is_none(), "connection travels with the task");
        settle(&mut app);

        assert!(app.is_connected());
        assert_eq!(app.pane, Pane::Results);
        assert_eq!(app.results.columns(), ["name", "type"]);
        assert!(app.results.is_empty());
        assert_eq!(app.status_line, "SELECT returned 0 row(s)");
        app.shutdown();
        assert!(app.connection.is_none());
    }

    #[test]
    fn invalid_spec_is_reported_without_a_review() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let runtime = runtime();
        let mut app = app(&runtime, None);
        connect_sqlite(&mut app, &temp_dir);

        app.query_form.table = "t".to_string();
        app.query_form.join_predicate = "a.id=b.id".to_string();
        app.handle(Msg::Submit);

        assert!(app.review.is_none());
        assert!(app.status_line.starts_with("Cannot build statement"));
        app.shutdown();
    }

    #[test]
    fn ui_name_is_stable() {
        assert_eq!(ui_name(), "sqlform-tui");
    }
}
