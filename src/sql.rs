use chrono::{DateTime, Utc};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::*;
use crate::model::*;

/// Parsed command from SQL input. Values are already shape-checked: ids are
/// positive, timestamps are UTC with `start <= end`, names match their pattern.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertPeriod {
        name: String,
        start: Instant,
        end: Instant,
    },
    UpdatePeriod {
        id: Id,
        name: String,
        start: Instant,
        end: Instant,
    },
    DeletePeriod {
        id: Id,
    },
    SelectPeriods {
        page: usize,
        page_size: usize,
    },
    SelectPeriod {
        id: Id,
    },
    InsertLane {
        name: String,
    },
    UpdateLane {
        id: Id,
        name: String,
    },
    DeleteLane {
        id: Id,
    },
    SelectLanes,
    SelectLane {
        id: Id,
    },
    InsertStage {
        name: String,
    },
    UpdateStage {
        id: Id,
        name: String,
    },
    DeleteStage {
        id: Id,
    },
    SelectStages,
    SelectStage {
        id: Id,
    },
    InsertPeriodLane {
        period_id: Id,
        lane_id: Id,
        start: Instant,
        end: Instant,
        ranking_method: Option<RankingMethod>,
    },
    UpdatePeriodLane {
        id: Id,
        lane_id: Id,
        start: Instant,
        end: Instant,
        /// `None` when the column is not assigned.
        ranking_method: Option<Option<RankingMethod>>,
    },
    DeletePeriodLane {
        id: Id,
    },
    SelectPeriodLanes {
        period_id: Id,
    },
    SelectPeriodLane {
        id: Id,
    },
    InsertSchedule {
        period_lane_id: Id,
        stage_id: Id,
        start: Instant,
        end: Instant,
    },
    UpdateSchedule {
        id: Id,
        period_lane_id: Id,
        stage_id: Id,
        start: Instant,
        end: Instant,
    },
    SetScheduleClosed {
        id: Id,
        is_closed: bool,
    },
    DeleteSchedule {
        id: Id,
    },
    SelectSchedules {
        period_lane_id: Id,
    },
    SelectSchedule {
        id: Id,
    },
}

/// Row layout a command answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Period,
    PeriodPage,
    Lane,
    Stage,
    PeriodLane,
    PeriodLaneDetail,
    Schedule,
    Deleted,
}

impl Command {
    pub fn shape(&self) -> ResultShape {
        match self {
            Command::InsertPeriod { .. }
            | Command::UpdatePeriod { .. }
            | Command::SelectPeriod { .. } => ResultShape::Period,
            Command::SelectPeriods { .. } => ResultShape::PeriodPage,
            Command::InsertLane { .. }
            | Command::UpdateLane { .. }
            | Command::SelectLanes
            | Command::SelectLane { .. } => ResultShape::Lane,
            Command::InsertStage { .. }
            | Command::UpdateStage { .. }
            | Command::SelectStages
            | Command::SelectStage { .. } => ResultShape::Stage,
            Command::InsertPeriodLane { .. }
            | Command::UpdatePeriodLane { .. }
            | Command::SelectPeriodLanes { .. } => ResultShape::PeriodLane,
            Command::SelectPeriodLane { .. } => ResultShape::PeriodLaneDetail,
            Command::InsertSchedule { .. }
            | Command::UpdateSchedule { .. }
            | Command::SetScheduleClosed { .. }
            | Command::SelectSchedules { .. }
            | Command::SelectSchedule { .. } => ResultShape::Schedule,
            Command::DeletePeriod { .. }
            | Command::DeleteLane { .. }
            | Command::DeleteStage { .. }
            | Command::DeletePeriodLane { .. }
            | Command::DeleteSchedule { .. } => ResultShape::Deleted,
        }
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::TooLong);
    }
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table, &assignments, &selection),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result layout of a statement without checking its values, so `$N`
/// placeholders are fine. Used to answer Describe in the extended protocol.
pub fn describe(sql: &str) -> Result<ResultShape, SqlError> {
    match parse_statement(sql)? {
        Statement::Delete(delete) => {
            delete_table_name(&delete)?;
            Ok(ResultShape::Deleted)
        }
        Statement::Insert(insert) => table_shape(&insert_table_name(&insert)?),
        Statement::Update { table, .. } => table_shape(&table_factor_name(&table.relation)?),
        Statement::Query(query) => {
            let (table, filters) = select_parts(&query)?;
            let by_id = filters.iter().any(|(col, _)| col == "id");
            match table.as_str() {
                "periods" if !by_id => Ok(ResultShape::PeriodPage),
                "period_lanes" if by_id => Ok(ResultShape::PeriodLaneDetail),
                other => table_shape(other),
            }
        }
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn table_shape(table: &str) -> Result<ResultShape, SqlError> {
    match table {
        "periods" => Ok(ResultShape::Period),
        "lanes" => Ok(ResultShape::Lane),
        "stages" => Ok(ResultShape::Stage),
        "period_lanes" => Ok(ResultShape::PeriodLane),
        "schedules" => Ok(ResultShape::Schedule),
        other => Err(SqlError::UnknownTable(other.to_string())),
    }
}

// ── Column bags ───────────────────────────────────────────────
//
// INSERT column lists and UPDATE SET lists both become a list of
// (column, value) pairs; each table then takes what it needs by name.

struct Columns<'a> {
    table: &'static str,
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> Columns<'a> {
    fn new(table: &'static str, pairs: Vec<(String, &'a Expr)>) -> Result<Self, SqlError> {
        for (i, (col, _)) in pairs.iter().enumerate() {
            if pairs[..i].iter().any(|(c, _)| c == col) {
                return Err(SqlError::Parse(format!("{table}: column {col} given twice")));
            }
        }
        Ok(Self { table, pairs })
    }

    /// Reject anything not in `allowed`.
    fn only(self, allowed: &[&str]) -> Result<Self, SqlError> {
        if let Some((col, _)) = self.pairs.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(self.table, col.clone()));
        }
        Ok(self)
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.pairs.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn has(&self, col: &str) -> bool {
        self.get(col).is_some()
    }
}

fn interval(start: &Expr, end: &Expr) -> Result<(Instant, Instant), SqlError> {
    let (start, end) = (parse_timestamp(start)?, parse_timestamp(end)?);
    if start > end {
        return Err(SqlError::InvalidValue("start must not be after end".into()));
    }
    Ok((start, end))
}

// ── INSERT ────────────────────────────────────────────────────

const PERIOD_COLUMNS: &[&str] = &["name", "start", "end"];
const NAME_COLUMNS: &[&str] = &["name"];
const PERIOD_LANE_COLUMNS: &[&str] = &["period_id", "lane_id", "start", "end", "ranking_method"];
const SCHEDULE_COLUMNS: &[&str] = &["period_lane_id", "stage_id", "start", "end"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let names: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();

    match table.as_str() {
        "periods" => {
            let cols = bind_columns("periods", PERIOD_COLUMNS, &names, values)?;
            let name = parse_name(cols.require("name")?, NamePattern::Words)?;
            let (start, end) = interval(cols.require("start")?, cols.require("end")?)?;
            Ok(Command::InsertPeriod { name, start, end })
        }
        "lanes" => {
            let cols = bind_columns("lanes", NAME_COLUMNS, &names, values)?;
            let name = parse_name(cols.require("name")?, NamePattern::Alphanumeric)?;
            Ok(Command::InsertLane { name })
        }
        "stages" => {
            let cols = bind_columns("stages", NAME_COLUMNS, &names, values)?;
            let name = parse_name(cols.require("name")?, NamePattern::Words)?;
            Ok(Command::InsertStage { name })
        }
        "period_lanes" => {
            let cols = bind_columns("period_lanes", PERIOD_LANE_COLUMNS, &names, values)?;
            let (start, end) = interval(cols.require("start")?, cols.require("end")?)?;
            Ok(Command::InsertPeriodLane {
                period_id: parse_id(cols.require("period_id")?)?,
                lane_id: parse_id(cols.require("lane_id")?)?,
                start,
                end,
                ranking_method: match cols.get("ranking_method") {
                    Some(e) => parse_ranking_method(e)?,
                    None => None,
                },
            })
        }
        "schedules" => {
            let cols = bind_columns("schedules", SCHEDULE_COLUMNS, &names, values)?;
            let (start, end) = interval(cols.require("start")?, cols.require("end")?)?;
            Ok(Command::InsertSchedule {
                period_lane_id: parse_id(cols.require("period_lane_id")?)?,
                stage_id: parse_id(cols.require("stage_id")?)?,
                start,
                end,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Pair INSERT values with their columns. Without a column list, values are
/// taken positionally in table order and trailing optional columns may be left off.
fn bind_columns<'a>(
    table: &'static str,
    order: &[&str],
    names: &[String],
    values: &'a [Expr],
) -> Result<Columns<'a>, SqlError> {
    let cols: Vec<String> = if names.is_empty() {
        order.iter().map(|c| c.to_string()).collect()
    } else {
        names.to_vec()
    };
    if values.len() != cols.len() && (!names.is_empty() || values.len() > order.len()) {
        return Err(SqlError::WrongArity(table, cols.len(), values.len()));
    }
    Columns::new(table, cols.into_iter().zip(values.iter()).collect())?.only(order)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let mut pairs = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        pairs.push((col, &a.value));
    }

    match table.as_str() {
        "periods" => {
            let cols = Columns::new("periods", pairs)?.only(PERIOD_COLUMNS)?;
            let name = parse_name(cols.require("name")?, NamePattern::Words)?;
            let (start, end) = interval(cols.require("start")?, cols.require("end")?)?;
            Ok(Command::UpdatePeriod {
                id,
                name,
                start,
                end,
            })
        }
        "lanes" => {
            let cols = Columns::new("lanes", pairs)?.only(NAME_COLUMNS)?;
            let name = parse_name(cols.require("name")?, NamePattern::Alphanumeric)?;
            Ok(Command::UpdateLane { id, name })
        }
        "stages" => {
            let cols = Columns::new("stages", pairs)?.only(NAME_COLUMNS)?;
            let name = parse_name(cols.require("name")?, NamePattern::Words)?;
            Ok(Command::UpdateStage { id, name })
        }
        "period_lanes" => {
            let cols = Columns::new("period_lanes", pairs)?
                .only(&["lane_id", "start", "end", "ranking_method"])?;
            let (start, end) = interval(cols.require("start")?, cols.require("end")?)?;
            Ok(Command::UpdatePeriodLane {
                id,
                lane_id: parse_id(cols.require("lane_id")?)?,
                start,
                end,
                ranking_method: cols.get("ranking_method").map(parse_ranking_method).transpose()?,
            })
        }
        "schedules" => {
            let cols = Columns::new("schedules", pairs)?;
            if cols.has("is_closed") {
                let cols = cols.only(&["is_closed"])?;
                return Ok(Command::SetScheduleClosed {
                    id,
                    is_closed: parse_flag(cols.require("is_closed")?)?,
                });
            }
            let cols = cols.only(SCHEDULE_COLUMNS)?;
            let period_lane_id = parse_id(cols.require("period_lane_id")?)?;
            let stage_id = parse_id(cols.require("stage_id")?)?;
            let (start, end) = interval(cols.require("start")?, cols.require("end")?)?;
            Ok(Command::UpdateSchedule {
                id,
                period_lane_id,
                stage_id,
                start,
                end,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "periods" => Ok(Command::DeletePeriod { id }),
        "lanes" => Ok(Command::DeleteLane { id }),
        "stages" => Ok(Command::DeleteStage { id }),
        "period_lanes" => Ok(Command::DeletePeriodLane { id }),
        "schedules" => Ok(Command::DeleteSchedule { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn select_parts(query: &ast::Query) -> Result<(String, Vec<(String, &Expr)>), SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    Ok((table, filters))
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let (table, filters) = select_parts(query)?;
    let table: &'static str = match table.as_str() {
        "periods" => "periods",
        "lanes" => "lanes",
        "stages" => "stages",
        "period_lanes" => "period_lanes",
        "schedules" => "schedules",
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let filters = Columns::new(table, filters)?;

    match table {
        "periods" => {
            if let Some(id) = filters.get("id") {
                filters.only(&["id"])?;
                return Ok(Command::SelectPeriod { id: parse_id(id)? });
            }
            let filters = filters.only(&["page", "page_size"])?;
            Ok(Command::SelectPeriods {
                page: filters.get("page").map(parse_count).transpose()?.unwrap_or(1),
                page_size: filters
                    .get("page_size")
                    .map(parse_count)
                    .transpose()?
                    .unwrap_or(DEFAULT_PAGE_SIZE),
            })
        }
        "lanes" | "stages" => {
            let filters = filters.only(&["id"])?;
            let id = filters.get("id").map(parse_id).transpose()?;
            Ok(match (table, id) {
                ("lanes", Some(id)) => Command::SelectLane { id },
                ("lanes", None) => Command::SelectLanes,
                (_, Some(id)) => Command::SelectStage { id },
                (_, None) => Command::SelectStages,
            })
        }
        "period_lanes" => {
            let filters = filters.only(&["id", "period_id"])?;
            if let Some(id) = filters.get("id") {
                Ok(Command::SelectPeriodLane { id: parse_id(id)? })
            } else {
                Ok(Command::SelectPeriodLanes {
                    period_id: parse_id(filters.require("period_id")?)?,
                })
            }
        }
        _ => {
            let filters = filters.only(&["id", "period_lane_id"])?;
            if let Some(id) = filters.get("id") {
                Ok(Command::SelectSchedule { id: parse_id(id)? })
            } else {
                Ok(Command::SelectSchedules {
                    period_lane_id: parse_id(filters.require("period_lane_id")?)?,
                })
            }
        }
    }
}

/// Flatten `a = x AND b = y AND ...` into (column, value) pairs.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Id, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_id(right),
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

/// Numbers arrive bare from simple queries and quoted from bound parameters.
fn integer_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => Ok(s),
        Some(other) => Err(SqlError::InvalidValue(format!("expected integer, got {other}"))),
        None => Err(SqlError::InvalidValue(format!("expected integer, got {expr}"))),
    }
}

fn parse_id(expr: &Expr) -> Result<Id, SqlError> {
    let s = integer_text(expr)?;
    match s.parse::<Id>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(SqlError::InvalidValue(format!("id must be a positive integer, got {s}"))),
    }
}

fn parse_count(expr: &Expr) -> Result<usize, SqlError> {
    let s = integer_text(expr)?;
    s.parse::<usize>()
        .map_err(|_| SqlError::InvalidValue(format!("expected non-negative integer, got {s}")))
}

fn parse_flag(expr: &Expr) -> Result<bool, SqlError> {
    match integer_text(expr)? {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(SqlError::InvalidValue(format!("is_closed must be 0 or 1, got {other}"))),
    }
}

fn parse_ranking_method(expr: &Expr) -> Result<Option<RankingMethod>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => RankingMethod::parse(s)
            .map(Some)
            .ok_or_else(|| SqlError::InvalidValue(format!("unknown ranking method: {s}"))),
        _ => Err(SqlError::InvalidValue(format!(
            "ranking_method must be a string or NULL, got {expr}"
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
enum NamePattern {
    /// Letters, digits and whitespace.
    Words,
    /// Letters and digits only.
    Alphanumeric,
}

fn parse_name(expr: &Expr, pattern: NamePattern) -> Result<String, SqlError> {
    let s = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s,
        _ => return Err(SqlError::InvalidValue(format!("expected name string, got {expr}"))),
    };
    if s.len() > MAX_NAME_LEN {
        return Err(SqlError::InvalidValue("name too long".into()));
    }
    let ok = !s.is_empty()
        && s.chars().all(|c| match pattern {
            NamePattern::Words => c.is_ascii_alphanumeric() || c.is_whitespace(),
            NamePattern::Alphanumeric => c.is_ascii_alphanumeric(),
        });
    if !ok {
        let rule = match pattern {
            NamePattern::Words => "alphanumeric characters and spaces",
            NamePattern::Alphanumeric => "alphanumeric characters",
        };
        return Err(SqlError::InvalidValue(format!("name must contain only {rule}")));
    }
    Ok(s.clone())
}

/// `YYYY-MM-DDTHH:MM:SS[.f+]Z`, nothing else.
fn has_timestamp_shape(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() < 20 || b[b.len() - 1] != b'Z' {
        return false;
    }
    let digits = |from: usize, to: usize| b[from..to].iter().all(u8::is_ascii_digit);
    let head = digits(0, 4)
        && b[4] == b'-'
        && digits(5, 7)
        && b[7] == b'-'
        && digits(8, 10)
        && b[10] == b'T'
        && digits(11, 13)
        && b[13] == b':'
        && digits(14, 16)
        && b[16] == b':'
        && digits(17, 19);
    let frac = &b[19..b.len() - 1];
    head && (frac.is_empty() || (frac.len() >= 2 && frac[0] == b'.' && digits(20, b.len() - 1)))
}

fn parse_timestamp(expr: &Expr) -> Result<Instant, SqlError> {
    let s = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s,
        _ => {
            return Err(SqlError::InvalidValue(format!(
                "expected timestamp string, got {expr}"
            )));
        }
    };
    if !has_timestamp_shape(s) {
        return Err(SqlError::InvalidValue(format!(
            "timestamp must look like YYYY-MM-DDTHH:MM:SS[.fff]Z, got {s}"
        )));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SqlError::InvalidValue(format!("bad timestamp {s}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    TooLong,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    InvalidValue(String),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::InvalidValue(_) => "22023",
            _ => "42601",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::TooLong => write!(f, "query longer than {MAX_SQL_LEN} bytes"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
