//! Shared fixtures for sqlbulk integration tests.
//!
//! `MockConnection` records every statement and answers from a script:
//! queued rows for queries, affected-row counts and failures keyed by SQL
//! substrings for executes.

#![allow(dead_code)]

use asupersync::Outcome;
use sqlbulk::prelude::*;
use sqlbulk_core::QueryError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub query: bool,
}

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<Statement>,
    results: VecDeque<Vec<Row>>,
    affected: Vec<(String, u64)>,
    failures: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    dialect: Dialect,
}

impl MockConnection {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            dialect,
        }
    }

    /// Queue the result of the next query.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .results
            .push_back(rows);
    }

    /// Executes containing `pattern` report `rows` affected.
    pub fn affect(&self, pattern: &str, rows: u64) {
        self.state
            .lock()
            .expect("lock poisoned")
            .affected
            .push((pattern.to_string(), rows));
    }

    /// Statements containing `pattern` fail with a query error.
    pub fn fail_on(&self, pattern: &str) {
        self.state
            .lock()
            .expect("lock poisoned")
            .failures
            .push(pattern.to_string());
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().expect("lock poisoned").statements.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Recorded statements containing `pattern`.
    pub fn matching(&self, pattern: &str) -> Vec<Statement> {
        self.statements()
            .into_iter()
            .filter(|s| s.sql.contains(pattern))
            .collect()
    }

    fn record(&self, sql: &str, params: &[Value], query: bool) -> Option<Error> {
        let mut guard = self.state.lock().expect("lock poisoned");
        guard.statements.push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
            query,
        });
        guard
            .failures
            .iter()
            .any(|p| sql.contains(p.as_str()))
            .then(|| Error::Query(QueryError::new("scripted failure", Some(sql.to_string()))))
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
        _timeout: Option<Duration>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let failure = self.record(sql, params, true);
        let state = Arc::clone(&self.state);
        async move {
            if let Some(e) = failure {
                return Outcome::Err(e);
            }
            let mut guard = state.lock().expect("lock poisoned");
            Outcome::Ok(guard.results.pop_front().unwrap_or_default())
        }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
        _timeout: Option<Duration>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let failure = self.record(sql, params, false);
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        async move {
            if let Some(e) = failure {
                return Outcome::Err(e);
            }
            let guard = state.lock().expect("lock poisoned");
            let affected = guard
                .affected
                .iter()
                .find(|(p, _)| sql.contains(p.as_str()))
                .map_or(0, |(_, n)| *n);
            Outcome::Ok(affected)
        }
    }
}

/// A merge output row: action tag, correlation id, then generated values.
pub fn output_row(action: &str, correlation: Option<i32>, generated: &[(&str, Value)]) -> Row {
    let mut names = vec!["action".to_string(), "sqlbulk_row_id".to_string()];
    let mut values = vec![Value::Text(action.to_string()), Value::from(correlation)];
    for (name, value) in generated {
        names.push((*name).to_string());
        values.push(value.clone());
    }
    Row::new(names, values)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: Option<i64>,
    pub name: String,
}

impl Person {
    pub fn new(id: Option<i64>, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

impl BulkEntity for Person {
    const ENTITY_NAME: &'static str = "Person";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::from(self.name.as_str())),
        ]
    }

    fn set_value(&mut self, property: &str, value: Value) -> Result<()> {
        match property {
            "id" => self.id = value.try_into()?,
            "name" => self.name = value.try_into()?,
            _ => {}
        }
        Ok(())
    }
}

pub fn person_mapping() -> TableMapping {
    TableMapping::new("Person").level(
        EntityTypeLevel::new("Person", Some("dbo"), "People")
            .column(
                ColumnMapping::new("id", "Id")
                    .primary_key()
                    .identity()
                    .store_type("int"),
            )
            .column(ColumnMapping::new("name", "Name")),
    )
}

/// Person stored in two tables: `People` (root) and `Students`.
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: Option<i64>,
    pub name: String,
    pub school: String,
}

impl Student {
    pub fn new(id: Option<i64>, name: &str, school: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            school: school.to_string(),
        }
    }
}

impl BulkEntity for Student {
    const ENTITY_NAME: &'static str = "Student";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::from(self.name.as_str())),
            ("school", Value::from(self.school.as_str())),
        ]
    }

    fn set_value(&mut self, property: &str, value: Value) -> Result<()> {
        match property {
            "id" => self.id = value.try_into()?,
            "name" => self.name = value.try_into()?,
            "school" => self.school = value.try_into()?,
            _ => {}
        }
        Ok(())
    }
}

pub fn student_mapping() -> TableMapping {
    TableMapping::new("Student")
        .level(
            EntityTypeLevel::new("Person", Some("dbo"), "People")
                .column(
                    ColumnMapping::new("id", "Id")
                        .primary_key()
                        .identity()
                        .store_type("int"),
                )
                .column(ColumnMapping::new("name", "Name")),
        )
        .level(
            EntityTypeLevel::new("Student", Some("dbo"), "Students")
                .column(ColumnMapping::new("id", "Id").primary_key())
                .column(ColumnMapping::new("school", "School")),
        )
}

/// Rows with no key.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub message: String,
}

impl BulkEntity for LogLine {
    const ENTITY_NAME: &'static str = "LogLine";

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("message", Value::from(self.message.as_str()))]
    }

    fn set_value(&mut self, _property: &str, _value: Value) -> Result<()> {
        Ok(())
    }
}

pub fn log_mapping() -> TableMapping {
    TableMapping::new("LogLine").level(
        EntityTypeLevel::new("LogLine", None, "log_lines")
            .column(ColumnMapping::new("message", "message")),
    )
}

pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with(person_mapping())
        .and_then(|c| c.with(student_mapping()))
        .and_then(|c| c.with(log_mapping()))
        .expect("valid mappings")
}
