use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::PpdbAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, ResultShape, SqlError};

pub struct PpdbHandler {
    engine: Arc<Engine>,
    query_parser: Arc<PpdbQueryParser>,
}

impl PpdbHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(PpdbQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let engine = &self.engine;
        let shape = cmd.shape();
        match cmd {
            // ── Periods ──
            Command::InsertPeriod { name, start, end } => {
                let period = engine
                    .create_period(PeriodFields::new(name, Span::new(start, end)))
                    .await
                    .map_err(engine_err)?;
                respond(shape, format, &[period], encode_period)
            }
            Command::UpdatePeriod {
                id,
                name,
                start,
                end,
            } => {
                let period = engine
                    .update_period(id, PeriodFields::new(name, Span::new(start, end)))
                    .await
                    .map_err(engine_err)?;
                respond(shape, format, &[period], encode_period)
            }
            Command::DeletePeriod { id } => {
                let id = engine.delete_period(id).await.map_err(engine_err)?;
                respond(shape, format, &[id], encode_deleted)
            }
            Command::SelectPeriods { page, page_size } => {
                let page = engine.list_periods(page, page_size).map_err(engine_err)?;
                // An empty page still answers with one row of pagination metadata.
                let mut rows: Vec<_> = page.items.iter().map(|p| (Some(p), &page)).collect();
                if rows.is_empty() {
                    rows.push((None, &page));
                }
                respond(shape, format, &rows, |enc, (period, page)| {
                    match period {
                        Some(period) => encode_period(enc, period)?,
                        None => encode_missing_period(enc)?,
                    }
                    enc.encode_field(&(page.total as i64))?;
                    enc.encode_field(&(page.page as i64))?;
                    enc.encode_field(&(page.limit as i64))
                })
            }
            Command::SelectPeriod { id } => {
                let period = engine.get_period(id).map_err(engine_err)?;
                respond(shape, format, &[period], encode_period)
            }

            // ── Lanes ──
            Command::InsertLane { name } => {
                let lane = engine.create_lane(name).await.map_err(engine_err)?;
                respond(shape, format, &[(lane.id, lane.name)], encode_named)
            }
            Command::UpdateLane { id, name } => {
                let lane = engine.update_lane(id, name).await.map_err(engine_err)?;
                respond(shape, format, &[(lane.id, lane.name)], encode_named)
            }
            Command::DeleteLane { id } => {
                let id = engine.delete_lane(id).await.map_err(engine_err)?;
                respond(shape, format, &[id], encode_deleted)
            }
            Command::SelectLanes => {
                let rows: Vec<_> = engine
                    .list_lanes()
                    .into_iter()
                    .map(|l| (l.id, l.name))
                    .collect();
                respond(shape, format, &rows, encode_named)
            }
            Command::SelectLane { id } => {
                let lane = engine.get_lane(id).map_err(engine_err)?;
                respond(shape, format, &[(lane.id, lane.name)], encode_named)
            }

            // ── Stages ──
            Command::InsertStage { name } => {
                let stage = engine.create_stage(name).await.map_err(engine_err)?;
                respond(shape, format, &[(stage.id, stage.name)], encode_named)
            }
            Command::UpdateStage { id, name } => {
                let stage = engine.update_stage(id, name).await.map_err(engine_err)?;
                respond(shape, format, &[(stage.id, stage.name)], encode_named)
            }
            Command::DeleteStage { id } => {
                let id = engine.delete_stage(id).await.map_err(engine_err)?;
                respond(shape, format, &[id], encode_deleted)
            }
            Command::SelectStages => {
                let rows: Vec<_> = engine
                    .list_stages()
                    .into_iter()
                    .map(|s| (s.id, s.name))
                    .collect();
                respond(shape, format, &rows, encode_named)
            }
            Command::SelectStage { id } => {
                let stage = engine.get_stage(id).map_err(engine_err)?;
                respond(shape, format, &[(stage.id, stage.name)], encode_named)
            }

            // ── Period lanes ──
            Command::InsertPeriodLane {
                period_id,
                lane_id,
                start,
                end,
                ranking_method,
            } => {
                let lane = engine
                    .create_period_lane(PeriodLaneFields {
                        period_id,
                        lane_id,
                        start: Some(start),
                        end: Some(end),
                        ranking_method,
                    })
                    .await
                    .map_err(engine_err)?;
                respond(shape, format, &[lane], encode_period_lane)
            }
            Command::UpdatePeriodLane {
                id,
                lane_id,
                start,
                end,
                ranking_method,
            } => {
                let lane = engine
                    .update_period_lane(
                        id,
                        PeriodLanePatch {
                            lane_id,
                            start: Some(start),
                            end: Some(end),
                            ranking_method,
                        },
                    )
                    .await
                    .map_err(engine_err)?;
                respond(shape, format, &[lane], encode_period_lane)
            }
            Command::DeletePeriodLane { id } => {
                let id = engine.delete_period_lane(id).await.map_err(engine_err)?;
                respond(shape, format, &[id], encode_deleted)
            }
            Command::SelectPeriodLanes { period_id } => {
                let lanes = engine.list_period_lanes(period_id);
                respond(shape, format, &lanes, encode_period_lane)
            }
            Command::SelectPeriodLane { id } => {
                let detail = engine.get_period_lane(id).map_err(engine_err)?;
                respond(shape, format, &[detail], encode_period_lane_detail)
            }

            // ── Schedules ──
            Command::InsertSchedule {
                period_lane_id,
                stage_id,
                start,
                end,
            } => {
                let schedule = engine
                    .create_schedule(ScheduleFields {
                        period_lane_id,
                        stage_id,
                        start: Some(start),
                        end: Some(end),
                    })
                    .await
                    .map_err(engine_err)?;
                respond(shape, format, &[schedule], encode_schedule)
            }
            Command::UpdateSchedule {
                id,
                period_lane_id,
                stage_id,
                start,
                end,
            } => {
                let schedule = engine
                    .update_schedule(
                        id,
                        SchedulePatch {
                            period_lane_id,
                            stage_id,
                            span: Span::new(start, end),
                        },
                    )
                    .await
                    .map_err(engine_err)?;
                respond(shape, format, &[schedule], encode_schedule)
            }
            Command::SetScheduleClosed { id, is_closed } => {
                let schedule = engine
                    .set_schedule_closed(id, is_closed)
                    .await
                    .map_err(engine_err)?;
                respond(shape, format, &[schedule], encode_schedule)
            }
            Command::DeleteSchedule { id } => {
                let id = engine.delete_schedule(id).await.map_err(engine_err)?;
                respond(shape, format, &[id], encode_deleted)
            }
            Command::SelectSchedules { period_lane_id } => {
                let schedules = engine.list_schedules(period_lane_id);
                respond(shape, format, &schedules, encode_schedule)
            }
            Command::SelectSchedule { id } => {
                let schedule = engine.get_schedule(id).map_err(engine_err)?;
                respond(shape, format, &[schedule], encode_schedule)
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────
//
// Ids and counts are INT8, timestamps are ISO-8601 text with millisecond
// precision, a missing value is NULL.

const PERIOD_COLUMNS: &[(&str, Type)] = &[
    ("id", Type::INT8),
    ("name", Type::VARCHAR),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
];

const PERIOD_PAGE_COLUMNS: &[(&str, Type)] = &[
    ("id", Type::INT8),
    ("name", Type::VARCHAR),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
    ("total", Type::INT8),
    ("page", Type::INT8),
    ("page_size", Type::INT8),
];

const NAMED_COLUMNS: &[(&str, Type)] = &[("id", Type::INT8), ("name", Type::VARCHAR)];

const PERIOD_LANE_COLUMNS: &[(&str, Type)] = &[
    ("id", Type::INT8),
    ("period_id", Type::INT8),
    ("lane_id", Type::INT8),
    ("lane_name", Type::VARCHAR),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
    ("ranking_method", Type::VARCHAR),
];

const PERIOD_LANE_DETAIL_COLUMNS: &[(&str, Type)] = &[
    ("id", Type::INT8),
    ("lane_id", Type::INT8),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
    ("ranking_method", Type::VARCHAR),
    ("period_id", Type::INT8),
    ("period_name", Type::VARCHAR),
    ("period_start", Type::VARCHAR),
    ("period_end", Type::VARCHAR),
];

const SCHEDULE_COLUMNS: &[(&str, Type)] = &[
    ("id", Type::INT8),
    ("period_lane_id", Type::INT8),
    ("stage_id", Type::INT8),
    ("stage_name", Type::VARCHAR),
    ("is_closed", Type::BOOL),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
];

const DELETED_COLUMNS: &[(&str, Type)] = &[("id", Type::INT8)];

fn columns(shape: ResultShape) -> &'static [(&'static str, Type)] {
    match shape {
        ResultShape::Period => PERIOD_COLUMNS,
        ResultShape::PeriodPage => PERIOD_PAGE_COLUMNS,
        ResultShape::Lane | ResultShape::Stage => NAMED_COLUMNS,
        ResultShape::PeriodLane => PERIOD_LANE_COLUMNS,
        ResultShape::PeriodLaneDetail => PERIOD_LANE_DETAIL_COLUMNS,
        ResultShape::Schedule => SCHEDULE_COLUMNS,
        ResultShape::Deleted => DELETED_COLUMNS,
    }
}

fn result_schema(shape: ResultShape, format: &Format) -> Vec<FieldInfo> {
    columns(shape)
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new(
                name.to_string(),
                None,
                None,
                ty.clone(),
                format.format_for(i),
            )
        })
        .collect()
}

fn respond<T>(
    shape: ResultShape,
    format: &Format,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(result_schema(shape, format));
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    )))
}

fn instant_text(t: &Option<Instant>) -> Option<String> {
    t.as_ref().map(format_instant)
}

fn ranking_text(r: &Option<RankingMethod>) -> Option<String> {
    r.map(|r| r.as_str().to_string())
}

fn encode_period(enc: &mut DataRowEncoder, p: &PeriodInfo) -> PgWireResult<()> {
    enc.encode_field(&(p.id as i64))?;
    enc.encode_field(&p.name)?;
    enc.encode_field(&instant_text(&p.start))?;
    enc.encode_field(&instant_text(&p.end))
}

fn encode_missing_period(enc: &mut DataRowEncoder) -> PgWireResult<()> {
    enc.encode_field(&None::<i64>)?;
    enc.encode_field(&None::<String>)?;
    enc.encode_field(&None::<String>)?;
    enc.encode_field(&None::<String>)
}

fn encode_named(enc: &mut DataRowEncoder, (id, name): &(Id, String)) -> PgWireResult<()> {
    enc.encode_field(&(*id as i64))?;
    enc.encode_field(name)
}

fn encode_period_lane(enc: &mut DataRowEncoder, l: &PeriodLaneInfo) -> PgWireResult<()> {
    enc.encode_field(&(l.id as i64))?;
    enc.encode_field(&(l.period_id as i64))?;
    enc.encode_field(&(l.lane_id as i64))?;
    enc.encode_field(&l.lane_name)?;
    enc.encode_field(&instant_text(&l.start))?;
    enc.encode_field(&instant_text(&l.end))?;
    enc.encode_field(&ranking_text(&l.ranking_method))
}

fn encode_period_lane_detail(enc: &mut DataRowEncoder, d: &PeriodLaneDetail) -> PgWireResult<()> {
    enc.encode_field(&(d.id as i64))?;
    enc.encode_field(&(d.lane_id as i64))?;
    enc.encode_field(&instant_text(&d.start))?;
    enc.encode_field(&instant_text(&d.end))?;
    enc.encode_field(&ranking_text(&d.ranking_method))?;
    enc.encode_field(&(d.period.id as i64))?;
    enc.encode_field(&d.period.name)?;
    enc.encode_field(&instant_text(&d.period.start))?;
    enc.encode_field(&instant_text(&d.period.end))
}

fn encode_schedule(enc: &mut DataRowEncoder, s: &ScheduleInfo) -> PgWireResult<()> {
    enc.encode_field(&(s.id as i64))?;
    enc.encode_field(&(s.period_lane_id as i64))?;
    enc.encode_field(&(s.stage_id as i64))?;
    enc.encode_field(&s.stage_name)?;
    enc.encode_field(&s.is_closed)?;
    enc.encode_field(&instant_text(&s.start))?;
    enc.encode_field(&instant_text(&s.end))
}

fn encode_deleted(enc: &mut DataRowEncoder, id: &Id) -> PgWireResult<()> {
    enc.encode_field(&(*id as i64))
}

#[async_trait]
impl SimpleQueryHandler for PpdbHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct PpdbQueryParser;

#[async_trait]
impl QueryParser for PpdbQueryParser {
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
        sql::describe(sql).map_err(sql_err)?;
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let shape = sql::describe(stmt).map_err(sql_err)?;
        Ok(result_schema(
            shape,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for PpdbHandler {
    type Statement = String;
    type QueryParser = PpdbQueryParser;

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
        let sql = substitute_params(portal);
        self.run(&sql, &portal.result_column_format).await
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
        let shape = sql::describe(&target.statement).map_err(sql_err)?;
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(shape, &Format::UnifiedText),
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
        let shape = sql::describe(&target.statement.statement).map_err(sql_err)?;
        Ok(DescribePortalResponse::new(result_schema(
            shape,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never eats the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();

    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct PpdbFactory {
    handler: Arc<PpdbHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PpdbAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl PpdbFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = PpdbAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(PpdbHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for PpdbFactory {
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
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = PpdbFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.kind().sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}
