use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use ulid::Ulid;

use crate::auth::TablebookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::ReservationEvent;
use crate::sql::{self, Command};
use crate::time::{minutes_to_time, now_local, parse_date};

/// Per-connection state: who is calling and what they listen to.
#[derive(Default)]
struct Session {
    email: String,
    is_owner: bool,
    listeners: HashMap<Ulid, broadcast::Receiver<ReservationEvent>>,
}

pub struct TablebookHandler {
    engine: Arc<Engine>,
    session: Mutex<Session>,
    query_parser: Arc<TablebookQueryParser>,
}

impl TablebookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            session: Mutex::new(Session::default()),
            query_parser: Arc::new(TablebookQueryParser),
        }
    }

    /// The login user is the principal id; `SET email` / `SET role` fill in
    /// the rest.
    async fn principal<C: ClientInfo>(&self, client: &C) -> PgWireResult<Principal> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        let id = Ulid::from_string(&user).map_err(|_| {
            user_error("28000", format!("user must be a principal ULID, got {user:?}"))
        })?;
        let session = self.session.lock().await;
        Ok(Principal {
            id,
            email: session.email.clone(),
            is_owner: session.is_owner,
        })
    }

    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let principal = self.principal(client).await?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = crate::observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(&principal, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);

        self.deliver_notifications(client).await?;
        result
    }

    /// Flush queued events to the client as NotificationResponse messages.
    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let mut pending = Vec::new();
        {
            let mut session = self.session.lock().await;
            for (restaurant_id, rx) in session.listeners.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(event) => pending.push((*restaurant_id, event)),
                        Err(broadcast::error::TryRecvError::Lagged(n)) => {
                            tracing::warn!("listener on {restaurant_id} dropped {n} events");
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        let pid = client.pid_and_secret_key().0;
        for (restaurant_id, event) in pending {
            let payload = serde_json::to_string(&event)
                .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
            client
                .send(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    pid,
                    sql::channel_name(restaurant_id),
                    payload,
                )))
                .await?;
        }
        Ok(())
    }

    async fn execute_command(&self, p: &Principal, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRestaurant(input) => {
                engine
                    .create_restaurant(p, input.into())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRestaurant { id, changes } => {
                engine
                    .update_restaurant(p, id, changes.into())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectRestaurants { id } => {
                let restaurants = match id {
                    Some(id) => vec![engine.get_restaurant(id).await.map_err(engine_err)?],
                    None => engine.list_restaurants().await,
                };
                Ok(vec![restaurant_rows(restaurants)])
            }
            Command::SelectAvailability {
                restaurant_id,
                date,
                time,
                exclude_id,
            } => {
                let date = parse_date(&date).map_err(|e| engine_err(e.into()))?;
                let availability = engine
                    .check_availability(restaurant_id, date, &time, exclude_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![availability_rows(&availability)])
            }
            Command::InsertReservation {
                id,
                restaurant_id,
                date,
                time,
                tables,
            } => {
                let date = parse_date(&date).map_err(|e| engine_err(e.into()))?;
                engine
                    .create_reservation(p, id, restaurant_id, date, &time, tables)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateReservation {
                id,
                date,
                time,
                tables,
            } => {
                let date = date
                    .as_deref()
                    .map(parse_date)
                    .transpose()
                    .map_err(|e| engine_err(e.into()))?;
                let patch = ReservationPatch { date, time, tables };
                engine
                    .update_reservation(p, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::MarkViewed { restaurant_id } => {
                let changed = engine
                    .mark_viewed(p, restaurant_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(changed))])
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(p, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservation { id } => {
                let r = engine.get_reservation(p, id).await.map_err(engine_err)?;
                Ok(vec![reservation_rows(vec![r])])
            }
            Command::SelectRestaurantReservations { restaurant_id, from } => {
                let from = match from {
                    Some(s) => parse_date(&s).map_err(|e| engine_err(e.into()))?,
                    None => now_local().date(),
                };
                let list = engine
                    .list_restaurant_reservations(p, restaurant_id, from)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![reservation_rows(list)])
            }
            Command::SelectDinerReservations => {
                Ok(vec![reservation_rows(engine.list_diner_reservations(p).await)])
            }
            Command::SelectUnviewed { restaurant_id } => {
                let count = engine
                    .count_unviewed(p, restaurant_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![unviewed_rows(restaurant_id, count)])
            }
            Command::Set { name, value } => {
                let mut session = self.session.lock().await;
                match name.as_str() {
                    "email" => session.email = value,
                    "role" => match value.to_ascii_lowercase().as_str() {
                        "owner" => session.is_owner = true,
                        "diner" => session.is_owner = false,
                        _ => {
                            return Err(user_error(
                                "22023",
                                format!("role must be 'owner' or 'diner', got {value:?}"),
                            ));
                        }
                    },
                    _ => {
                        return Err(user_error(
                            "42704",
                            format!("unrecognized configuration parameter \"{name}\""),
                        ));
                    }
                }
                Ok(vec![Response::Execution(Tag::new("SET"))])
            }
            Command::Listen { restaurant_id } => {
                let restaurant = engine.get_restaurant(restaurant_id).await.map_err(engine_err)?;
                if !p.is_owner || restaurant.owner_id != p.id {
                    return Err(engine_err(EngineError::Unauthorized(
                        "Unauthorized access to restaurant".into(),
                    )));
                }
                let mut session = self.session.lock().await;
                if !session.listeners.contains_key(&restaurant_id) {
                    let rx = engine.dispatch.hub().subscribe(restaurant_id);
                    session.listeners.insert(restaurant_id, rx);
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { restaurant_id } => {
                self.session.lock().await.listeners.remove(&restaurant_id);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => {
                self.session.lock().await.listeners.clear();
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn table_fields() -> impl Iterator<Item = FieldInfo> {
    TableSize::ALL.into_iter().map(|s| int_field(s.column()))
}

fn restaurant_schema() -> Vec<FieldInfo> {
    let mut fields = vec![
        text_field("id"),
        text_field("owner_id"),
        text_field("name"),
        text_field("location"),
        text_field("contact"),
        text_field("cuisines"),
        text_field("opening"),
        text_field("closing"),
    ];
    fields.extend(table_fields());
    fields
}

fn reservation_schema() -> Vec<FieldInfo> {
    let mut fields = vec![
        text_field("id"),
        text_field("restaurant_id"),
        text_field("user_id"),
        text_field("date"),
        text_field("time"),
    ];
    fields.extend(table_fields());
    fields.extend([
        text_field("entry_code"),
        text_field("status"),
        FieldInfo::new("viewed".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]);
    fields
}

fn availability_schema() -> Vec<FieldInfo> {
    let mut fields = vec![text_field("slot"), text_field("time")];
    fields.extend(table_fields());
    fields
}

fn unviewed_schema() -> Vec<FieldInfo> {
    vec![
        text_field("restaurant_id"),
        FieldInfo::new("count".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn encode_tables(encoder: &mut DataRowEncoder, tables: &TableCounts) -> PgWireResult<()> {
    for size in TableSize::ALL {
        encoder.encode_field(&(tables.get(size) as i32))?;
    }
    Ok(())
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<_> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn restaurant_rows(restaurants: Vec<Restaurant>) -> Response {
    query_response(restaurant_schema(), restaurants, |enc, r| {
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.owner_id.to_string())?;
        enc.encode_field(&r.name)?;
        enc.encode_field(&r.location)?;
        enc.encode_field(&r.contact)?;
        enc.encode_field(&r.cuisines.join(","))?;
        enc.encode_field(&minutes_to_time(r.opening))?;
        enc.encode_field(&minutes_to_time(r.closing))?;
        encode_tables(enc, &r.capacity)
    })
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    query_response(reservation_schema(), reservations, |enc, r| {
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.restaurant_id.to_string())?;
        enc.encode_field(&r.user_id.to_string())?;
        enc.encode_field(&r.date.to_string())?;
        enc.encode_field(&minutes_to_time(r.time))?;
        encode_tables(enc, &r.tables)?;
        enc.encode_field(&r.entry_code)?;
        enc.encode_field(&r.status.as_str().to_string())?;
        enc.encode_field(&r.viewed)
    })
}

fn availability_rows(availability: &Availability) -> Response {
    query_response(availability_schema(), availability.slots().to_vec(), |enc, (name, slot)| {
        enc.encode_field(&name.to_string())?;
        enc.encode_field(&slot.time)?;
        encode_tables(enc, &slot.tables)
    })
}

fn unviewed_rows(restaurant_id: Ulid, count: usize) -> Response {
    query_response(unviewed_schema(), vec![(restaurant_id, count)], |enc, (id, n)| {
        enc.encode_field(&id.to_string())?;
        enc.encode_field(&(*n as i64))
    })
}

/// Row shape of a SELECT, judged from its FROM target so it works before
/// parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_ascii_lowercase();
    if !lower.starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_once(" from ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|t| t.trim_matches(|c| c == '"' || c == ';'));
    match table {
        Some("restaurants") => restaurant_schema(),
        Some("reservations") => reservation_schema(),
        Some("availability") => availability_schema(),
        Some("unviewed") => unviewed_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for TablebookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TablebookQueryParser;

#[async_trait]
impl QueryParser for TablebookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
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
impl ExtendedQueryHandler for TablebookHandler {
    type Statement = String;
    type QueryParser = TablebookQueryParser;

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
        let sql = substitute_params(portal);
        let responses = self.run(client, &sql).await?;
        Ok(responses.into_iter().next().unwrap_or(Response::EmptyQuery))
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

/// `$N` placeholders outside quoted literals and identifiers, as
/// `(byte range, N)`.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in one pass. Inserted
/// values are never scanned again, so a `$1` inside a value stays literal.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

/// One per connection, so the handler's session is private to it.
pub struct TablebookFactory {
    handler: Arc<TablebookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<TablebookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl TablebookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(TablebookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                TablebookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TablebookFactory {
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

/// Serve one client until it disconnects, then drop its LISTEN channels.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(TablebookFactory::new(engine.clone(), password));
    let result = pgwire::tokio::process_socket(socket, tls, factory).await;
    engine.dispatch.hub().prune();
    result
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Unauthorized(_) => "42501",
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "40001",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
