use std::fmt;
use std::path::PathBuf;

use sqlform_core::confirmation::split_outside_quotes;
use sqlform_core::connection_profile::{DefaultConnection, DriverKind, DEFAULT_MYSQL_PORT};
use sqlform_core::query_spec::{JoinLimitError, JoinSlots, JoinType, Operation, QuerySpec};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum FormError {
    #[error("port `{0}` must be a number between 1 and 65535")]
    InvalidPort(String),
    #[error("value entry `{0}` must look like column=value")]
    MalformedValue(String),
    #[error("type a table name before adding a join")]
    EmptyJoinTable,
    #[error(transparent)]
    JoinLimit(#[from] JoinLimitError),
}

fn step<T: Copy + PartialEq>(items: &[T], current: T, forward: bool) -> T {
    let len = items.len();
    let index = items.iter().position(|item| *item == current).unwrap_or(0);
    let next = if forward {
        (index + 1) % len
    } else {
        (index + len - 1) % len
    };
    items[next]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionField {
    Driver,
    Host,
    Port,
    Database,
    User,
    Password,
    Path,
}

const MYSQL_FIELDS: [ConnectionField; 6] = [
    ConnectionField::Driver,
    ConnectionField::Host,
    ConnectionField::Port,
    ConnectionField::Database,
    ConnectionField::User,
    ConnectionField::Password,
];

const SQLITE_FIELDS: [ConnectionField; 2] = [ConnectionField::Driver, ConnectionField::Path];

impl ConnectionField {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Driver => "Driver",
            Self::Host => "Host",
            Self::Port => "Port",
            Self::Database => "Database",
            Self::User => "User",
            Self::Password => "Password",
            Self::Path => "File",
        }
    }
}

/// Connection pane inputs. Starts from the saved default profile so fields
/// the form does not show (password source, keyring names) survive a save.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct ConnectionForm {
    pub(crate) driver: DriverKind,
    pub(crate) host: String,
    pub(crate) port: String,
    pub(crate) database: String,
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) path: String,
    pub(crate) active_field: ConnectionField,
    base: DefaultConnection,
}

impl fmt::Debug for ConnectionForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionForm")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("path", &self.path)
            .field("active_field", &self.active_field)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionForm {
    fn default() -> Self {
        Self::from_profile(DefaultConnection::mysql("127.0.0.1", "root"))
    }
}

impl ConnectionForm {
    pub(crate) fn from_profile(profile: DefaultConnection) -> Self {
        Self {
            driver: profile.driver,
            host: profile.host.clone(),
            port: profile.port.to_string(),
            database: profile.database.clone().unwrap_or_default(),
            user: profile.user.clone(),
            password: String::new(),
            path: profile
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
            active_field: ConnectionField::Driver,
            base: profile,
        }
    }

    pub(crate) fn fields(&self) -> &'static [ConnectionField] {
        match self.driver {
            DriverKind::Mysql => &MYSQL_FIELDS,
            DriverKind::Sqlite => &SQLITE_FIELDS,
        }
    }

    pub(crate) fn next_field(&mut self) {
        self.active_field = step(self.fields(), self.active_field, true);
    }

    pub(crate) fn previous_field(&mut self) {
        self.active_field = step(self.fields(), self.active_field, false);
    }

    /// Left/right on the driver row switches between MySQL and SQLite.
    pub(crate) fn cycle_choice(&mut self) -> bool {
        if self.active_field != ConnectionField::Driver {
            return false;
        }
        self.driver = self.driver.toggled();
        true
    }

    fn active_text_mut(&mut self) -> Option<&mut String> {
        match self.active_field {
            ConnectionField::Driver => None,
            ConnectionField::Host => Some(&mut self.host),
            ConnectionField::Port => Some(&mut self.port),
            ConnectionField::Database => Some(&mut self.database),
            ConnectionField::User => Some(&mut self.user),
            ConnectionField::Password => Some(&mut self.password),
            ConnectionField::Path => Some(&mut self.path),
        }
    }

    pub(crate) fn input(&mut self, ch: char) {
        if let Some(text) = self.active_text_mut() {
            text.push(ch);
        }
    }

    pub(crate) fn erase(&mut self) {
        if let Some(text) = self.active_text_mut() {
            text.pop();
        }
    }

    pub(crate) fn value(&self, field: ConnectionField) -> String {
        match field {
            ConnectionField::Driver => self.driver.label().to_string(),
            ConnectionField::Host => self.host.clone(),
            ConnectionField::Port => self.port.clone(),
            ConnectionField::Database => self.database.clone(),
            ConnectionField::User => self.user.clone(),
            ConnectionField::Password => "*".repeat(self.password.chars().count()),
            ConnectionField::Path => self.path.clone(),
        }
    }

    /// Password typed into the form, if any. Empty means "use the keyring or
    /// environment".
    pub(crate) fn typed_password(&self) -> Option<String> {
        (!self.password.is_empty()).then(|| self.password.clone())
    }

    pub(crate) fn to_profile(&self) -> Result<DefaultConnection, FormError> {
        let mut profile = self.base.clone();
        profile.driver = self.driver;
        profile.host = self.host.trim().to_string();
        profile.user = self.user.trim().to_string();
        profile.database = optional(&self.database);
        profile.path = optional(&self.path).map(PathBuf::from);
        if self.driver == DriverKind::Mysql {
            profile.port = parse_port(&self.port)?;
        }
        Ok(profile)
    }
}

fn parse_port(raw: &str) -> Result<u16, FormError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_MYSQL_PORT);
    }
    trimmed
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| FormError::InvalidPort(trimmed.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryField {
    Operation,
    Table,
    Columns,
    JoinType,
    JoinTable,
    JoinPredicate,
    Where,
    GroupBy,
    OrderBy,
    Values,
}

pub(crate) const QUERY_FIELDS: [QueryField; 10] = [
    QueryField::Operation,
    QueryField::Table,
    QueryField::Columns,
    QueryField::JoinType,
    QueryField::JoinTable,
    QueryField::JoinPredicate,
    QueryField::Where,
    QueryField::GroupBy,
    QueryField::OrderBy,
    QueryField::Values,
];

impl QueryField {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Operation => "Operation",
            Self::Table => "Table",
            Self::Columns => "Columns",
            Self::JoinType => "Join type",
            Self::JoinTable => "Join table",
            Self::JoinPredicate => "Join on",
            Self::Where => "Where",
            Self::GroupBy => "Group by",
            Self::OrderBy => "Order by",
            Self::Values => "Values",
        }
    }
}

/// Query pane inputs, turned into a [`QuerySpec`] on submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryForm {
    pub(crate) operation: Operation,
    pub(crate) table: String,
    pub(crate) columns: String,
    pub(crate) join_type: JoinType,
    pub(crate) joins: JoinSlots,
    pub(crate) join_table: String,
    pub(crate) join_predicate: String,
    pub(crate) where_clause: String,
    pub(crate) group_by: String,
    pub(crate) order_by: String,
    pub(crate) values: String,
    pub(crate) active_field: QueryField,
}

impl Default for QueryForm {
    fn default() -> Self {
        Self {
            operation: Operation::Select,
            table: String::new(),
            columns: "*".to_string(),
            join_type: JoinType::Inner,
            joins: JoinSlots::new(),
            join_table: String::new(),
            join_predicate: String::new(),
            where_clause: String::new(),
            group_by: String::new(),
            order_by: String::new(),
            values: String::new(),
            active_field: QueryField::Operation,
        }
    }
}

impl QueryForm {
    pub(crate) fn next_field(&mut self) {
        self.active_field = step(&QUERY_FIELDS, self.active_field, true);
    }

    pub(crate) fn previous_field(&mut self) {
        self.active_field = step(&QUERY_FIELDS, self.active_field, false);
    }

    pub(crate) fn cycle_choice(&mut self, forward: bool) -> bool {
        match self.active_field {
            QueryField::Operation => {
                self.operation = step(&Operation::ALL, self.operation, forward);
                true
            }
            QueryField::JoinType => {
                self.join_type = step(&JoinType::ALL, self.join_type, forward);
                true
            }
            _ => false,
        }
    }

    fn active_text_mut(&mut self) -> Option<&mut String> {
        match self.active_field {
            QueryField::Operation | QueryField::JoinType => None,
            QueryField::Table => Some(&mut self.table),
            QueryField::Columns => Some(&mut self.columns),
            QueryField::JoinTable => Some(&mut self.join_table),
            QueryField::JoinPredicate => Some(&mut self.join_predicate),
            QueryField::Where => Some(&mut self.where_clause),
            QueryField::GroupBy => Some(&mut self.group_by),
            QueryField::OrderBy => Some(&mut self.order_by),
            QueryField::Values => Some(&mut self.values),
        }
    }

    pub(crate) fn input(&mut self, ch: char) {
        if let Some(text) = self.active_text_mut() {
            text.push(ch);
        }
    }

    pub(crate) fn erase(&mut self) {
        if let Some(text) = self.active_text_mut() {
            text.pop();
        }
    }

    pub(crate) fn value(&self, field: QueryField) -> String {
        match field {
            QueryField::Operation => self.operation.keyword().to_string(),
            QueryField::Table => self.table.clone(),
            QueryField::Columns => self.columns.clone(),
            QueryField::JoinType => self.join_type.keyword().to_string(),
            QueryField::JoinTable => self.join_table.clone(),
            QueryField::JoinPredicate => self.join_predicate.clone(),
            QueryField::Where => self.where_clause.clone(),
            QueryField::GroupBy => self.group_by.clone(),
            QueryField::OrderBy => self.order_by.clone(),
            QueryField::Values => self.values.clone(),
        }
    }

    /// Moves the typed join table into the next free slot.
    pub(crate) fn add_join(&mut self) -> Result<usize, FormError> {
        let table = self.join_table.trim();
        if table.is_empty() {
            return Err(FormError::EmptyJoinTable);
        }
        let count = self.joins.add(table)?;
        self.join_table.clear();
        Ok(count)
    }

    pub(crate) fn remove_join(&mut self) -> Option<String> {
        self.joins.remove_last()
    }

    pub(crate) fn to_spec(&self) -> Result<QuerySpec, FormError> {
        let assignments = parse_assignments(&self.values)?;

        let mut spec = QuerySpec::new(self.operation, self.table.trim());
        spec.columns = split_list(&self.columns);
        if self.operation == Operation::Insert && spec.columns.is_empty() {
            spec.columns = assignments.iter().map(|(column, _)| column.clone()).collect();
        }
        spec.join_type = self.join_type;
        spec.joined_tables = self.joins.tables().to_vec();
        spec.join_predicate = optional(&self.join_predicate);
        spec.where_clause = optional(&self.where_clause);
        spec.group_by_clause = optional(&self.group_by);
        spec.order_by_clause = optional(&self.order_by);
        spec.values_by_column = assignments.into_iter().collect();
        Ok(spec)
    }
}

fn optional(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|item| item.trim().to_string()).collect()
}

/// `col=value; col2=value2`, in typed order.
fn parse_assignments(raw: &str) -> Result<Vec<(String, String)>, FormError> {
    split_outside_quotes(raw, ';')
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            Some((column, value)) if !column.trim().is_empty() => {
                Ok((column.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(FormError::MalformedValue(entry)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sqlform_core::connection_profile::{DefaultConnection, DriverKind, PasswordSource};
    use sqlform_core::query_spec::{JoinType, Operation};

    use super::{ConnectionField, ConnectionForm, FormError, QueryField, QueryForm};

    fn type_text(form: &mut QueryForm, field: QueryField, text: &str) {
        form.active_field = field;
        for ch in text.chars() {
            form.input(ch);
        }
    }

    #[test]
    fn select_form_becomes_a_join_spec() {
        let mut form = QueryForm::default();
        form.columns.clear();
        type_text(&mut form, QueryField::Table, "Employees");
        type_text(&mut form, QueryField::Columns, "Name, Title");
        type_text(&mut form, QueryField::JoinTable, "Departments");
        form.add_join().expect("first join fits");
        type_text(
            &mut form,
            QueryField::JoinPredicate,
            "Employees.DeptId=Departments.Id",
        );
        form.active_field = QueryField::JoinType;
        assert!(form.cycle_choice(true));

        let spec = form.to_spec().expect("form should convert");
        assert_eq!(spec.operation, Operation::Select);
        assert_eq!(spec.primary_table, "Employees");
        assert_eq!(spec.columns, ["Name", "Title"]);
        assert_eq!(spec.joined_tables, ["Departments"]);
        assert_eq!(spec.join_type, JoinType::Left);
        assert_eq!(
            spec.join_predicate.as_deref(),
            Some("Employees.DeptId=Departments.Id")
        );
        assert_eq!(spec.where_clause, None);
        assert!(form.join_table.is_empty());
    }

    #[test]
    fn fourth_join_is_refused_and_keeps_the_typed_name() {
        let mut form = QueryForm::default();
        for table in ["a", "b", "c"] {
            form.join_table = table.to_string();
            form.add_join().expect("slot available");
        }
        form.join_table = "d".to_string();

        let err = form.add_join().expect_err("fourth join must be refused");
        assert!(matches!(err, FormError::JoinLimit(_)));
        assert_eq!(form.joins.tables(), ["a", "b", "c"]);
        assert_eq!(form.join_table, "d");
    }

    #[test]
    fn blank_join_table_is_not_added() {
        let mut form = QueryForm::default();
        form.join_table = "   ".to_string();
        assert_eq!(form.add_join(), Err(FormError::EmptyJoinTable));
        assert!(form.joins.is_empty());
    }

    #[test]
    fn insert_columns_default_to_the_value_order() {
        let mut form = QueryForm {
            operation: Operation::Insert,
            table: "Employees".to_string(),
            columns: String::new(),
            values: "Name='Ada'; Age = 36;".to_string(),
            ..QueryForm::default()
        };
        let spec = form.to_spec().expect("form should convert");
        assert_eq!(spec.columns, ["Name", "Age"]);
        assert_eq!(spec.values_by_column.get("Age").map(String::as_str), Some("36"));

        form.values = "Name".to_string();
        assert_eq!(
            form.to_spec(),
            Err(FormError::MalformedValue("Name".to_string()))
        );
    }

    #[test]
    fn values_keep_equals_signs_after_the_first() {
        let form = QueryForm {
            operation: Operation::Update,
            table: "t".to_string(),
            columns: String::new(),
            values: "expr=a=b".to_string(),
            ..QueryForm::default()
        };
        let spec = form.to_spec().expect("form should convert");
        assert!(spec.columns.is_empty());
        assert_eq!(spec.values_by_column.get("expr").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn semicolons_inside_quoted_values_stay_in_the_value() {
        let form = QueryForm {
            operation: Operation::Update,
            table: "notes".to_string(),
            columns: String::new(),
            values: "note='a;b'; tag='x'".to_string(),
            ..QueryForm::default()
        };
        let spec = form.to_spec().expect("form should convert");
        assert_eq!(spec.values_by_column.get("note").map(String::as_str), Some("'a;b'"));
        assert_eq!(spec.values_by_column.get("tag").map(String::as_str), Some("'x'"));

        let unbalanced = QueryForm {
            values: "note=a;b".to_string(),
            ..form
        };
        assert_eq!(
            unbalanced.to_spec().expect_err("b has no column"),
            FormError::MalformedValue("b".to_string())
        );
    }

    #[test]
    fn operation_cycles_through_every_choice() {
        let mut form = QueryForm::default();
        form.active_field = QueryField::Operation;
        let mut seen = vec![form.operation];
        for _ in 0..3 {
            form.cycle_choice(true);
            seen.push(form.operation);
        }
        assert_eq!(seen, Operation::ALL);
        form.cycle_choice(true);
        assert_eq!(form.operation, Operation::Select);
        form.cycle_choice(false);
        assert_eq!(form.operation, Operation::Delete);
    }

    #[test]
    fn connection_fields_follow_the_driver() {
        let mut form = ConnectionForm::default();
        assert_eq!(form.fields().len(), 6);
        assert!(form.cycle_choice());
        assert_eq!(form.driver, DriverKind::Sqlite);
        form.next_field();
        assert_eq!(form.active_field, ConnectionField::Path);
        form.next_field();
        assert_eq!(form.active_field, ConnectionField::Driver);
        form.previous_field();
        assert_eq!(form.active_field, ConnectionField::Path);
    }

    #[test]
    fn invalid_port_is_reported() {
        let mut form = ConnectionForm::default();
        form.port = "70000".to_string();
        assert_eq!(
            form.to_profile(),
            Err(FormError::InvalidPort("70000".to_string()))
        );
        form.port = "  ".to_string();
        assert_eq!(form.to_profile().map(|profile| profile.port), Ok(3306));
    }

    #[test]
    fn profile_keeps_fields_the_form_does_not_show() {
        let mut saved = DefaultConnection::sqlite("/tmp/app.db");
        saved.password_source = PasswordSource::EnvVar;
        saved.keyring_account = Some("ops".to_string());
        let mut form = ConnectionForm::from_profile(saved);
        form.path = " /tmp/other.db ".to_string();
        form.port = "not-used".to_string();

        let profile = form.to_profile().expect("sqlite ignores the port field");
        assert_eq!(profile.driver, DriverKind::Sqlite);
        assert_eq!(profile.path, Some(PathBuf::from("/tmp/other.db")));
        assert_eq!(profile.password_source, PasswordSource::EnvVar);
        assert_eq!(profile.keyring_account.as_deref(), Some("ops"));
    }

    #[test]
    fn password_is_masked_and_redacted() {
        let mut form = ConnectionForm::default();
        form.active_field = ConnectionField::Password;
        for ch in "s3cret".chars() {
            form.input(ch);
        }
        assert_eq!(form.value(ConnectionField::Password), "******");
        assert_eq!(form.typed_password().as_deref(), Some("s3cret"));
        assert!(!format!("{form:?}").contains("s3cret"));
    }
}
