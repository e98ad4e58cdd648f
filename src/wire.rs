use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{session_token, AdminToken, AuthError, Role, StaydeskAuthSource};
use crate::engine::Engine;
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};

pub struct StaydeskHandler {
    engine: Arc<Engine>,
    query_parser: Arc<StaydeskQueryParser>,
}

impl StaydeskHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(StaydeskQueryParser),
        }
    }

    async fn run(&self, role: Role, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = match authorize(role, &cmd) {
            Ok(token) => self.execute_command(token, cmd).await,
            Err(e) => Err(e),
        };
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        token: Option<AdminToken>,
        cmd: Command,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SubmitRequest(request) => {
                engine.submit_request(request).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::Approve { id } => {
                engine.approve(&require(token)?, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("APPROVE").with_rows(1)))
            }
            Command::Reject { id } => {
                engine.reject(&require(token)?, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine.delete_confirmed(&require(token)?, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::Block { start, end } => {
                engine.block_range(&require(token)?, start, end).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::Unblock { id } => {
                engine.unblock_range(&require(token)?, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectCalendar => {
                let events = engine.calendar().await.map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<_>> = events
                    .iter()
                    .map(|event| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&event.source_id.to_string())?;
                        encoder.encode_field(&event.label.title().to_string())?;
                        encoder.encode_field(&format_day(event.start_date))?;
                        encoder.encode_field(&format_day(event.end_date_exclusive))?;
                        encoder.encode_field(&event.label.color().to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectCalendarFeed => {
                let events = engine.calendar().await.map_err(engine_err)?;
                let schema = Arc::new(feed_schema());
                let rows: Vec<PgWireResult<_>> = events
                    .iter()
                    .map(|event| {
                        let json = serde_json::to_string(&event.feed_entry())
                            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&json)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectBlocked => {
                let blocked = engine.list_blocked().await.map_err(engine_err)?;
                let schema = Arc::new(blocked_schema());
                let rows: Vec<PgWireResult<_>> = blocked
                    .iter()
                    .map(|range| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&range.id.to_string())?;
                        encoder.encode_field(&range.start.map(format_day))?;
                        encoder.encode_field(&range.end.map(format_day))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectRequests => {
                let stays = engine.list_pending(&require(token)?).await.map_err(engine_err)?;
                Ok(stays_response(&stays))
            }
            Command::SelectBookings => {
                let stays = engine.list_confirmed(&require(token)?).await.map_err(engine_err)?;
                Ok(stays_response(&stays))
            }
        }
    }
}

fn session_role<C: ClientInfo>(client: &C) -> Role {
    client
        .metadata()
        .get("user")
        .and_then(|user| Role::from_user(user))
        .unwrap_or(Role::Guest)
}

/// Admin commands get a token up front; a guest session fails here before
/// the store is touched.
fn authorize(role: Role, cmd: &Command) -> PgWireResult<Option<AdminToken>> {
    if !cmd.needs_admin() {
        return Ok(None);
    }
    session_token(role).map(Some).map_err(auth_err)
}

fn require(token: Option<AdminToken>) -> PgWireResult<AdminToken> {
    token.ok_or_else(|| auth_err(AuthError::AdminRequired))
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn stays_response(stays: &[Stay]) -> Response {
    let schema = Arc::new(stay_schema());
    let rows: Vec<PgWireResult<_>> = stays
        .iter()
        .map(|stay| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&stay.id.to_string())?;
            encoder.encode_field(&stay.name)?;
            encoder.encode_field(&stay.email)?;
            encoder.encode_field(&stay.check_in.map(format_day))?;
            encoder.encode_field(&stay.check_out.map(format_day))?;
            encoder.encode_field(&stay.notes)?;
            encoder.encode_field(&stay.status.as_str().to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

fn text_columns(names: &[&str]) -> Vec<FieldInfo> {
    names
        .iter()
        .map(|name| FieldInfo::new((*name).into(), None, None, Type::VARCHAR, FieldFormat::Text))
        .collect()
}

fn calendar_schema() -> Vec<FieldInfo> {
    text_columns(&["source_id", "label", "start_date", "end_date_exclusive", "color"])
}

fn feed_schema() -> Vec<FieldInfo> {
    text_columns(&["event"])
}

fn blocked_schema() -> Vec<FieldInfo> {
    text_columns(&["id", "start", "end"])
}

fn stay_schema() -> Vec<FieldInfo> {
    text_columns(&["id", "name", "email", "check_in", "check_out", "notes", "status"])
}

/// Row description for a statement, empty for anything but a SELECT.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(sql) {
        Ok(Command::SelectCalendar) => calendar_schema(),
        Ok(Command::SelectCalendarFeed) => feed_schema(),
        Ok(Command::SelectBlocked) => blocked_schema(),
        Ok(Command::SelectRequests | Command::SelectBookings) => stay_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for StaydeskHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let role = session_role(client);
        Ok(vec![self.run(role, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StaydeskQueryParser;

#[async_trait]
impl QueryParser for StaydeskQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StaydeskHandler {
    type Statement = String;
    type QueryParser = StaydeskQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let role = session_role(client);
        let sql = substitute_params(portal);
        self.run(role, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals, highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// Inlines bound values in one left-to-right pass over the template.
/// Quoted literals in the template are copied untouched, and inserted values
/// are never scanned again, so a `$1` inside a value stays literal text.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;
    while let Some(c) = chars.next() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_literal = true;
                out.push(c);
            }
            '$' if chars.peek().is_some_and(|d| d.is_ascii_digit()) => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(|d| d.is_ascii_digit()) {
                    digits.push(d);
                    chars.next();
                }
                let bound = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| params.get(i));
                match bound {
                    Some(Some(bytes)) => {
                        out.push('\'');
                        out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                        out.push('\'');
                    }
                    Some(None) => out.push_str("NULL"),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

/// Passwords for the two wire users.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub admin_password: String,
    pub guest_password: String,
}

pub struct StaydeskFactory {
    handler: Arc<StaydeskHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StaydeskAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StaydeskFactory {
    pub fn new(engine: Arc<Engine>, credentials: Credentials) -> Self {
        let auth_source =
            StaydeskAuthSource::new(credentials.admin_password, credentials.guest_password);
        Self {
            handler: Arc::new(StaydeskHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StaydeskFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    credentials: Credentials,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = StaydeskFactory::new(engine, credentials);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn auth_err(e: AuthError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42501".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
