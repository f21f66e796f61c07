use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::VenueAuthSource;
use crate::calendar::{self, Day};
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Shape, SqlError};
use crate::store::MemoryStore;

pub type SharedEngine = Arc<Engine<MemoryStore>>;

pub struct VenueHandler {
    engine: SharedEngine,
    query_parser: Arc<VenueQueryParser>,
}

impl VenueHandler {
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            engine,
            query_parser: Arc::new(VenueQueryParser),
        }
    }

    async fn execute(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectCities => {
                let cities = engine.list_cities().await.map_err(engine_err)?;
                rows(Shape::Cities, cities, |enc, city| {
                    enc.encode_field(&city.id)?;
                    enc.encode_field(&city.name)
                })
            }
            Command::SelectVenues {
                city_id,
                favourites_only,
                date,
                page,
                limit,
            } => {
                let query = VenueQuery {
                    city_id,
                    favourites_only,
                    date: date.map(|d| calendar::start_of(d).fixed_offset()),
                    page,
                    limit,
                };
                let VenuePage { venues, pagination } =
                    engine.list_venues(&query).await.map_err(engine_err)?;
                rows(Shape::Venues, venues, |enc, listing| {
                    let VenueListing { venue, city, gallery } = listing;
                    enc.encode_field(&venue.id)?;
                    enc.encode_field(&venue.city_id)?;
                    enc.encode_field(&city.map(|c| c.name))?;
                    enc.encode_field(&venue.name)?;
                    enc.encode_field(&venue.min_price)?;
                    enc.encode_field(&venue.max_price)?;
                    enc.encode_field(&i64::from(venue.capacity))?;
                    enc.encode_field(&venue.star)?;
                    enc.encode_field(&i64::from(venue.review_count))?;
                    enc.encode_field(&venue.thumbnail_url)?;
                    enc.encode_field(&venue.description)?;
                    enc.encode_field(&venue.is_favourite)?;
                    enc.encode_field(&to_json(&gallery)?)?;
                    enc.encode_field(&i64::from(pagination.page))?;
                    enc.encode_field(&i64::from(pagination.total_pages))?;
                    enc.encode_field(&i64::from(pagination.current_items))?;
                    enc.encode_field(&i64::from(pagination.total_items))
                })
            }
            Command::SelectVenue { id } => {
                let detail = engine.venue_detail(id).await.map_err(engine_err)?;
                let categories = to_json(&detail.categories)?;
                rows(Shape::VenueDetail, [detail], |enc, d| {
                    enc.encode_field(&d.id)?;
                    enc.encode_field(&d.name)?;
                    enc.encode_field(&d.description)?;
                    enc.encode_field(&d.website)?;
                    enc.encode_field(&d.phone)?;
                    enc.encode_field(&d.email)?;
                    enc.encode_field(&d.instagram)?;
                    enc.encode_field(&d.address)?;
                    enc.encode_field(&d.logo)?;
                    enc.encode_field(&categories)
                })
            }
            Command::SelectPackage { id } => {
                let detail = engine.package_detail(id).await.map_err(engine_err)?;
                let gallery = to_json(&detail.gallery)?;
                rows(Shape::PackageDetail, [detail], |enc, d| {
                    enc.encode_field(&d.id)?;
                    enc.encode_field(&d.name)?;
                    enc.encode_field(&d.thumbnail_url)?;
                    enc.encode_field(&d.price)?;
                    enc.encode_field(&i64::from(d.capacity))?;
                    enc.encode_field(&d.description)?;
                    enc.encode_field(&d.venue_name)?;
                    enc.encode_field(&d.venue_phone)?;
                    enc.encode_field(&gallery)
                })
            }
            Command::SelectNearby => {
                let nearby = engine.nearby().await.map_err(engine_err)?;
                rows(Shape::Nearby, nearby, |enc, n| {
                    enc.encode_field(&n.city_id)?;
                    enc.encode_field(&n.city_name)?;
                    enc.encode_field(&i64::from(n.total_venues))?;
                    enc.encode_field(&n.thumbnail_url)
                })
            }
            Command::Login { email, password } => {
                let session = engine.login(&email, &password).await.map_err(engine_err)?;
                rows(Shape::Session, [session], |enc, s| {
                    enc.encode_field(&s.user_id)?;
                    enc.encode_field(&s.email)?;
                    enc.encode_field(&s.fullname)?;
                    enc.encode_field(&s.access_token)
                })
            }
            Command::InsertUser {
                email,
                fullname,
                password,
            } => {
                engine
                    .register(&email, &fullname, &password)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertOrder {
                package_id,
                date,
                access_token,
            } => {
                let order_id = engine
                    .place_order_as(&access_token, package_id, &calendar::start_of(date))
                    .await
                    .map_err(engine_err)?;
                let day = Day::from_date(date).to_string();
                rows(Shape::OrderReceipt, [order_id], |enc, id| {
                    enc.encode_field(&id.to_string())?;
                    enc.encode_field(&package_id)?;
                    enc.encode_field(&day)
                })
            }
            Command::InsertCity(city) => {
                engine.add_city(city).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertVenue(venue) => {
                engine.add_venue(venue).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertCategory(category) => {
                engine.add_category(category).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertPackage(package) => {
                engine.add_package(package).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertGalleryImage(image) => {
                engine.add_gallery_image(image).await.map_err(engine_err)?;
                Ok(inserted())
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

/// Encode every item of `items` as one row of `shape`.
fn rows<T>(
    shape: Shape,
    items: impl IntoIterator<Item = T>,
    mut encode: impl FnMut(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema(shape));
    let encoded: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(encoded))))
}

fn to_json<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value)
        .map_err(|e| user_error("XX000", format!("failed to encode result: {e}")))
}

fn column(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

pub fn schema(shape: Shape) -> Vec<FieldInfo> {
    match shape {
        Shape::Cities => vec![column("id", Type::INT8), column("name", Type::VARCHAR)],
        Shape::Venues => vec![
            column("id", Type::INT8),
            column("city_id", Type::INT8),
            column("city_name", Type::VARCHAR),
            column("name", Type::VARCHAR),
            column("min_price", Type::FLOAT8),
            column("max_price", Type::FLOAT8),
            column("capacity", Type::INT8),
            column("star", Type::FLOAT8),
            column("review_count", Type::INT8),
            column("thumbnail_url", Type::VARCHAR),
            column("description", Type::VARCHAR),
            column("is_favourite", Type::BOOL),
            column("gallery", Type::VARCHAR),
            column("page", Type::INT8),
            column("total_pages", Type::INT8),
            column("current_items", Type::INT8),
            column("total_items", Type::INT8),
        ],
        Shape::VenueDetail => vec![
            column("id", Type::INT8),
            column("name", Type::VARCHAR),
            column("description", Type::VARCHAR),
            column("website", Type::VARCHAR),
            column("phone", Type::VARCHAR),
            column("email", Type::VARCHAR),
            column("instagram", Type::VARCHAR),
            column("address", Type::VARCHAR),
            column("logo", Type::VARCHAR),
            column("categories", Type::VARCHAR),
        ],
        Shape::PackageDetail => vec![
            column("id", Type::INT8),
            column("name", Type::VARCHAR),
            column("thumbnail_url", Type::VARCHAR),
            column("price", Type::FLOAT8),
            column("capacity", Type::INT8),
            column("description", Type::VARCHAR),
            column("venue_name", Type::VARCHAR),
            column("venue_phone", Type::VARCHAR),
            column("gallery", Type::VARCHAR),
        ],
        Shape::Nearby => vec![
            column("city_id", Type::INT8),
            column("city_name", Type::VARCHAR),
            column("total_venues", Type::INT8),
            column("thumbnail_url", Type::VARCHAR),
        ],
        Shape::Session => vec![
            column("user_id", Type::INT8),
            column("email", Type::VARCHAR),
            column("fullname", Type::VARCHAR),
            column("access_token", Type::VARCHAR),
        ],
        Shape::OrderReceipt => vec![
            column("order_id", Type::VARCHAR),
            column("package_id", Type::INT8),
            column("date", Type::VARCHAR),
        ],
    }
}

fn describe(sql: &str) -> Vec<FieldInfo> {
    sql::result_shape(sql).map(schema).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for VenueHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.execute(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct VenueQueryParser;

#[async_trait]
impl QueryParser for VenueQueryParser {
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
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for VenueHandler {
    type Statement = String;
    type QueryParser = VenueQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        self.execute(&sql).await
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
            describe(&target.statement),
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
        Ok(DescribePortalResponse::new(describe(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as
/// (byte range, N). Doubled quotes inside a quoted run are escapes.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
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

/// Highest `$N` placeholder in `sql`.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Bind text parameters as quoted literals in one pass over the
/// statement text. Bound values are never rescanned, and placeholders
/// with no matching parameter are left as written.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
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

// ── Factory ──────────────────────────────────────────────────────

pub struct VenueFactory {
    handler: Arc<VenueHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<VenueAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl VenueFactory {
    pub fn new(engine: SharedEngine, password: String) -> Self {
        Self {
            handler: Arc::new(VenueHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                VenueAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for VenueFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: SharedEngine,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(VenueFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "P0002",
        ErrorKind::Conflict => "23505",
        ErrorKind::Validation => "22023",
        ErrorKind::Unauthorized => "28000",
        ErrorKind::Infrastructure => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.kind() == ErrorKind::Infrastructure {
        tracing::error!("{e}");
    }
    user_error(sqlstate(e.kind()), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::InvalidDate(_) => "22007",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
