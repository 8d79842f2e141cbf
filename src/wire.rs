use std::fmt::Debug;
use std::io;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::ParkbookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ResultShape};
use crate::tenant::TenantManager;

pub struct ParkbookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ParkbookQueryParser>,
}

/// Authenticated connection user. Empty when the client sent none, which the
/// engine refuses.
fn caller<C: ClientInfo>(client: &C) -> UserId {
    UserId::new(client.metadata().get("user").cloned().unwrap_or_default())
}

impl ParkbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ParkbookQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let caller = caller(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(&engine, &caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }
}

fn executed(tag: &str) -> Response {
    Response::Execution(Tag::new(tag).with_rows(1))
}

async fn execute_command(
    engine: &Engine,
    caller: &UserId,
    cmd: Command,
) -> PgWireResult<Response> {
    match cmd {
        Command::InsertLocation {
            id,
            name,
            daily_rate,
            monthly_rate,
        } => {
            let tariff = Tariff {
                daily_rate,
                monthly_rate,
            };
            engine
                .create_location(caller, id, name, tariff)
                .await
                .map_err(engine_err)?;
            Ok(executed("INSERT"))
        }
        Command::UpdateLocation {
            id,
            daily_rate,
            monthly_rate,
        } => {
            engine
                .update_tariff(caller, id, daily_rate, monthly_rate)
                .await
                .map_err(engine_err)?;
            Ok(executed("UPDATE"))
        }
        Command::DeleteLocation { id } => {
            engine.delete_location(caller, id).await.map_err(engine_err)?;
            Ok(executed("DELETE"))
        }
        Command::InsertSpot {
            id,
            location_id,
            number,
        } => {
            engine
                .create_spot(caller, id, location_id, number)
                .await
                .map_err(engine_err)?;
            Ok(executed("INSERT"))
        }
        Command::DeleteSpot { id } => {
            engine.delete_spot(caller, id).await.map_err(engine_err)?;
            Ok(executed("DELETE"))
        }
        Command::InsertPricingException {
            id,
            location_id,
            start_date,
            end_date,
            percentage_change,
            description,
        } => {
            engine
                .add_pricing_exception(
                    caller,
                    id,
                    location_id,
                    start_date,
                    end_date,
                    percentage_change,
                    description,
                )
                .await
                .map_err(engine_err)?;
            Ok(executed("INSERT"))
        }
        Command::DeletePricingException { id } => {
            engine
                .remove_pricing_exception(caller, id)
                .await
                .map_err(engine_err)?;
            Ok(executed("DELETE"))
        }
        Command::InsertBooking(new) => {
            engine.create_booking(caller, new).await.map_err(engine_err)?;
            Ok(executed("INSERT"))
        }
        Command::UpdateBooking { id, patch } => {
            engine
                .update_booking(caller, id, patch)
                .await
                .map_err(engine_err)?;
            Ok(executed("UPDATE"))
        }
        Command::DeleteBooking { id } => {
            engine.delete_booking(caller, id).await.map_err(engine_err)?;
            Ok(executed("DELETE"))
        }
        Command::SelectPreview(request) => {
            let result = engine.preview(caller, &request).await.map_err(engine_err)?;
            let details = serde_json::to_string(&result.details)
                .map_err(|e| user_error("XX000", format!("encoding details: {e}")))?;
            rows(ResultShape::Preview, &[result], |enc, r| {
                enc.encode_field(&r.available)?;
                enc.encode_field(&r.total_cost.to_string())?;
                enc.encode_field(&details)
            })
        }
        Command::SelectAvailability {
            spot_id,
            start_date,
            end_date,
            exclude_booking_id,
        } => {
            let available = engine
                .is_available(caller, spot_id, start_date, end_date, exclude_booking_id)
                .await
                .map_err(engine_err)?;
            rows(ResultShape::Availability, &[available], |enc, available| {
                enc.encode_field(&spot_id.to_string())?;
                enc.encode_field(available)
            })
        }
        Command::SelectBookings {
            location_id,
            start_date,
            end_date,
        } => {
            let bookings = engine
                .list_bookings(caller, location_id, start_date, end_date)
                .await
                .map_err(engine_err)?;
            rows(ResultShape::Calendar, &bookings, |enc, b| {
                enc.encode_field(&b.id.to_string())?;
                enc.encode_field(&b.spot_id.to_string())?;
                enc.encode_field(&b.spot_number)?;
                enc.encode_field(&b.client_id.to_string())?;
                enc.encode_field(&b.span.start.to_string())?;
                enc.encode_field(&b.span.end.map(|d| d.to_string()))?;
                enc.encode_field(&b.kind.as_str())?;
                enc.encode_field(&b.status.as_str())?;
                enc.encode_field(&b.payment_status.as_str())
            })
        }
        Command::SelectBooking { id } => {
            let booking = engine.get_booking(caller, id).await.map_err(engine_err)?;
            rows(ResultShape::Booking, &[booking], |enc, b| {
                enc.encode_field(&b.id.to_string())?;
                enc.encode_field(&b.location_id.to_string())?;
                enc.encode_field(&b.spot_id.to_string())?;
                enc.encode_field(&b.client_id.to_string())?;
                enc.encode_field(&b.span.start.to_string())?;
                enc.encode_field(&b.span.end.map(|d| d.to_string()))?;
                enc.encode_field(&b.kind.as_str())?;
                enc.encode_field(&b.status.as_str())?;
                enc.encode_field(&b.payment_status.as_str())?;
                enc.encode_field(&b.cost.map(|c| c.to_string()))?;
                enc.encode_field(&b.created_at)?;
                enc.encode_field(&b.updated_at)
            })
        }
        Command::SelectPaymentHistory { booking_id } => {
            let entries = engine
                .payment_history(caller, booking_id)
                .await
                .map_err(engine_err)?;
            rows(ResultShape::PaymentHistory, &entries, |enc, e| {
                enc.encode_field(&e.id.to_string())?;
                enc.encode_field(&e.booking_id.to_string())?;
                enc.encode_field(&e.previous_status.as_str())?;
                enc.encode_field(&e.new_status.as_str())?;
                enc.encode_field(&e.changed_by.to_string())?;
                enc.encode_field(&e.changed_at)
            })
        }
        Command::SelectLocations => {
            let locations = engine.list_locations(caller);
            rows(ResultShape::Locations, &locations, |enc, l| {
                enc.encode_field(&l.id.to_string())?;
                enc.encode_field(&l.name)?;
                enc.encode_field(&l.tariff.daily_rate.to_string())?;
                enc.encode_field(&l.tariff.monthly_rate.to_string())
            })
        }
        Command::SelectPricingExceptions { location_id } => {
            let exceptions = engine
                .list_pricing_exceptions(caller, location_id)
                .map_err(engine_err)?;
            rows(ResultShape::PricingExceptions, &exceptions, |enc, e| {
                enc.encode_field(&e.id.to_string())?;
                enc.encode_field(&e.location_id.to_string())?;
                enc.encode_field(&e.span.start.to_string())?;
                enc.encode_field(&e.span.end.map(|d| d.to_string()))?;
                enc.encode_field(&e.percentage_change)?;
                enc.encode_field(&e.description)
            })
        }
    }
}

/// Encode `items` as data rows of `shape`.
fn rows<T>(
    shape: ResultShape,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema(shape));
    let data: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(data))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn schema(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::Preview => vec![
            field("available", Type::BOOL),
            field("total_cost", Type::NUMERIC),
            field("details", Type::JSON),
        ],
        ResultShape::Availability => vec![
            field("spot_id", Type::VARCHAR),
            field("available", Type::BOOL),
        ],
        ResultShape::Calendar => vec![
            field("id", Type::VARCHAR),
            field("spot_id", Type::VARCHAR),
            field("spot_number", Type::VARCHAR),
            field("client_id", Type::VARCHAR),
            field("start_date", Type::DATE),
            field("end_date", Type::DATE),
            field("booking_type", Type::VARCHAR),
            field("status", Type::VARCHAR),
            field("payment_status", Type::VARCHAR),
        ],
        ResultShape::Booking => vec![
            field("id", Type::VARCHAR),
            field("location_id", Type::VARCHAR),
            field("spot_id", Type::VARCHAR),
            field("client_id", Type::VARCHAR),
            field("start_date", Type::DATE),
            field("end_date", Type::DATE),
            field("booking_type", Type::VARCHAR),
            field("status", Type::VARCHAR),
            field("payment_status", Type::VARCHAR),
            field("cost", Type::NUMERIC),
            field("created_at", Type::INT8),
            field("updated_at", Type::INT8),
        ],
        ResultShape::PaymentHistory => vec![
            field("id", Type::VARCHAR),
            field("booking_id", Type::VARCHAR),
            field("previous_status", Type::VARCHAR),
            field("new_status", Type::VARCHAR),
            field("changed_by", Type::VARCHAR),
            field("changed_at", Type::INT8),
        ],
        ResultShape::Locations => vec![
            field("id", Type::VARCHAR),
            field("name", Type::VARCHAR),
            field("daily_rate", Type::NUMERIC),
            field("monthly_rate", Type::NUMERIC),
        ],
        ResultShape::PricingExceptions => vec![
            field("id", Type::VARCHAR),
            field("location_id", Type::VARCHAR),
            field("start_date", Type::DATE),
            field("end_date", Type::DATE),
            field("percentage_change", Type::INT4),
            field("description", Type::VARCHAR),
        ],
    }
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::result_shape(sql).map(schema).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for ParkbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkbookQueryParser;

#[async_trait]
impl QueryParser for ParkbookQueryParser {
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
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ParkbookHandler {
    type Statement = String;
    type QueryParser = ParkbookQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(client, &sql).await
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
            statement_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
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

/// Inline text-format parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ParkbookFactory {
    handler: Arc<ParkbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ParkbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ParkbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(ParkbookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                ParkbookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkbookFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(ParkbookFactory::new(tenant_manager, password));
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

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation { .. } => "22023",
        EngineError::InvalidRange { .. } => "22008",
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::HasDependents(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let message = match &e {
        EngineError::WalError(detail) => {
            tracing::error!("storage failure: {detail}");
            "internal storage error".to_string()
        }
        other if other.is_recoverable() => {
            tracing::debug!("request refused: {other}");
            other.to_string()
        }
        other => other.to_string(),
    };
    user_error(sqlstate(&e), message)
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
