use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

const REQUEST_COLUMNS: [&str; 5] = ["name", "email", "check_in", "check_out", "notes"];
const BLOCKED_COLUMNS: [&str; 2] = ["start", "end"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `INSERT INTO requests ...`
    SubmitRequest(StayRequest),
    /// `APPROVE '<id>'`
    Approve { id: Ulid },
    /// `DELETE FROM requests WHERE id = ...`
    Reject { id: Ulid },
    /// `DELETE FROM bookings WHERE id = ...`
    DeleteBooking { id: Ulid },
    /// `INSERT INTO blocked (start, "end") ...`
    Block { start: Day, end: Day },
    /// `DELETE FROM blocked WHERE id = ...`
    Unblock { id: Ulid },
    SelectCalendar,
    SelectCalendarFeed,
    SelectBlocked,
    SelectRequests,
    SelectBookings,
}

impl Command {
    /// Whether the session must hold an admin token to run this.
    pub fn needs_admin(&self) -> bool {
        !matches!(
            self,
            Command::SubmitRequest(_)
                | Command::SelectCalendar
                | Command::SelectCalendarFeed
                | Command::SelectBlocked
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(rest) = strip_keyword(trimmed, "APPROVE") {
        let raw = rest.trim().trim_matches('\'');
        let id = Ulid::from_string(raw).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?;
        return Ok(Command::Approve { id });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// `rest` if `sql` starts with `keyword` (any case) followed by whitespace.
fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    let rest = &sql[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace)).then_some(rest)
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "requests" => {
            let row = arrange_columns(insert, &values, &REQUEST_COLUMNS, 4, "requests")?;
            Ok(Command::SubmitRequest(StayRequest {
                name: parse_string(row[0])?,
                email: parse_string(row[1])?,
                check_in: parse_date(row[2], "check_in")?,
                check_out: parse_date(row[3], "check_out")?,
                notes: row[4].map(parse_string_or_null).transpose()?.flatten(),
            }))
        }
        "blocked" => {
            let row = arrange_columns(insert, &values, &BLOCKED_COLUMNS, 2, "blocked")?;
            Ok(Command::Block {
                start: parse_date(row[0], "start")?,
                end: parse_date(row[1], "end")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Order the single VALUES row by `expected` column names.
///
/// Without a column list values are positional. Returns one slot per
/// expected column; the first `required` slots are always filled.
fn arrange_columns<'a>(
    insert: &ast::Insert,
    values: &'a [Expr],
    expected: &[&'static str],
    required: usize,
    table: &'static str,
) -> Result<Vec<Option<&'a Expr>>, SqlError> {
    let mut slots: Vec<Option<&Expr>> = vec![None; expected.len()];
    if insert.columns.is_empty() {
        if values.len() < required || values.len() > expected.len() {
            return Err(SqlError::WrongArity(table, required, values.len()));
        }
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = Some(value);
        }
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        for (column, value) in insert.columns.iter().zip(values) {
            let name = column.value.to_lowercase();
            let idx = expected
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| SqlError::UnknownColumn(name.clone()))?;
            slots[idx] = Some(value);
        }
    }
    if let Some(missing) = expected[..required]
        .iter()
        .zip(&slots)
        .find_map(|(name, slot)| slot.is_none().then_some(*name))
    {
        return Err(SqlError::MissingColumn(missing));
    }
    Ok(slots)
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "requests" => Ok(Command::Reject { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        "blocked" => Ok(Command::Unblock { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    if select.selection.is_some() {
        return Err(SqlError::Unsupported(format!("WHERE on {table}")));
    }

    match table.as_str() {
        "calendar" => Ok(Command::SelectCalendar),
        "calendar_feed" => Ok(Command::SelectCalendarFeed),
        "blocked" => Ok(Command::SelectBlocked),
        "requests" => Ok(Command::SelectRequests),
        "bookings" => Ok(Command::SelectBookings),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(slot: Option<&Expr>) -> Result<String, SqlError> {
    slot.map(parse_string_or_null)
        .transpose()?
        .flatten()
        .ok_or_else(|| SqlError::Parse("expected string, got NULL".into()))
}

fn parse_date(slot: Option<&Expr>, column: &'static str) -> Result<Day, SqlError> {
    let raw = parse_string(slot)?;
    parse_day(column, &raw).map_err(|e| SqlError::Parse(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
