use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertLocation {
        id: Ulid,
        name: String,
        daily_rate: Decimal,
        monthly_rate: Decimal,
    },
    UpdateLocation {
        id: Ulid,
        daily_rate: Option<Decimal>,
        monthly_rate: Option<Decimal>,
    },
    DeleteLocation {
        id: Ulid,
    },
    InsertSpot {
        id: Ulid,
        location_id: Ulid,
        number: String,
    },
    DeleteSpot {
        id: Ulid,
    },
    InsertPricingException {
        id: Ulid,
        location_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        percentage_change: i32,
        description: Option<String>,
    },
    DeletePricingException {
        id: Ulid,
    },
    InsertBooking(NewBooking),
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectPreview(PreviewRequest),
    SelectAvailability {
        spot_id: Ulid,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        exclude_booking_id: Option<Ulid>,
    },
    /// Calendar: bookings of a location overlapping `[start_date, end_date]`.
    SelectBookings {
        location_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectPaymentHistory {
        booking_id: Ulid,
    },
    SelectLocations,
    SelectPricingExceptions {
        location_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn arity(table: &'static str, values: &[Expr], min: usize, max: usize) -> Result<(), SqlError> {
    if values.len() < min || values.len() > max {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "locations" => {
            arity("locations", &values, 4, 4)?;
            Ok(Command::InsertLocation {
                id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                daily_rate: parse_decimal(&values[2])?,
                monthly_rate: parse_decimal(&values[3])?,
            })
        }
        "spots" => {
            arity("spots", &values, 3, 3)?;
            Ok(Command::InsertSpot {
                id: parse_ulid(&values[0])?,
                location_id: parse_ulid(&values[1])?,
                number: parse_text(&values[2])?,
            })
        }
        "pricing_exceptions" => {
            arity("pricing_exceptions", &values, 5, 6)?;
            let description = match values.get(5) {
                Some(expr) => parse_text_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertPricingException {
                id: parse_ulid(&values[0])?,
                location_id: parse_ulid(&values[1])?,
                start_date: parse_date(&values[2])?,
                end_date: parse_date(&values[3])?,
                percentage_change: parse_i32(&values[4])?,
                description,
            })
        }
        "bookings" => {
            arity("bookings", &values, 7, 7)?;
            Ok(Command::InsertBooking(NewBooking {
                id: parse_ulid(&values[0])?,
                location_id: parse_ulid(&values[1])?,
                spot_id: parse_ulid(&values[2])?,
                client_id: parse_ulid(&values[3])?,
                start_date: parse_date(&values[4])?,
                end_date: parse_date_or_null(&values[5])?,
                kind: parse_enum(&values[6])?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut columns = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        columns.push((column, &assignment.value));
    }

    match table.as_str() {
        "locations" => {
            let (mut daily_rate, mut monthly_rate) = (None, None);
            for (column, value) in columns {
                match column.as_str() {
                    "daily_rate" => daily_rate = Some(parse_decimal(value)?),
                    "monthly_rate" => monthly_rate = Some(parse_decimal(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateLocation {
                id,
                daily_rate,
                monthly_rate,
            })
        }
        "bookings" => {
            let mut patch = BookingPatch::default();
            for (column, value) in columns {
                match column.as_str() {
                    "start_date" => patch.start_date = Some(parse_date(value)?),
                    "end_date" => patch.end_date = Some(parse_date(value)?),
                    "status" => patch.status = Some(parse_enum(value)?),
                    "payment_status" => patch.payment_status = Some(parse_enum(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateBooking { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(delete.selection.as_ref())?;

    match table.as_str() {
        "locations" => Ok(Command::DeleteLocation { id }),
        "spots" => Ok(Command::DeleteSpot { id }),
        "pricing_exceptions" => Ok(Command::DeletePricingException { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "preview" => Ok(Command::SelectPreview(PreviewRequest {
            location_id: parse_ulid(filters.require("location_id")?)?,
            spot_id: parse_ulid(filters.require("spot_id")?)?,
            start_date: parse_date(filters.require("start_date")?)?,
            end_date: filters.eq("end_date").map(parse_date_or_null).transpose()?.flatten(),
            kind: parse_enum(filters.require("booking_type")?)?,
            exclude_booking_id: filters
                .eq("exclude_booking_id")
                .map(parse_ulid_or_null)
                .transpose()?
                .flatten(),
        })),
        "availability" => Ok(Command::SelectAvailability {
            spot_id: parse_ulid(filters.require("spot_id")?)?,
            start_date: parse_date(filters.require("start_date")?)?,
            end_date: filters.eq("end_date").map(parse_date_or_null).transpose()?.flatten(),
            exclude_booking_id: filters
                .eq("exclude_booking_id")
                .map(parse_ulid_or_null)
                .transpose()?
                .flatten(),
        }),
        "bookings" => {
            if let Some(id) = filters.eq("id") {
                return Ok(Command::SelectBooking {
                    id: parse_ulid(id)?,
                });
            }
            let start = filters
                .with_op("start_date", &BinaryOperator::GtEq)
                .ok_or(SqlError::MissingFilter("start_date"))?;
            let end = filters
                .with_op("end_date", &BinaryOperator::LtEq)
                .ok_or(SqlError::MissingFilter("end_date"))?;
            Ok(Command::SelectBookings {
                location_id: parse_ulid(filters.require("location_id")?)?,
                start_date: parse_date(start)?,
                end_date: parse_date(end)?,
            })
        }
        "payment_history" => Ok(Command::SelectPaymentHistory {
            booking_id: parse_ulid(filters.require("booking_id")?)?,
        }),
        "locations" => Ok(Command::SelectLocations),
        "pricing_exceptions" => Ok(Command::SelectPricingExceptions {
            location_id: parse_ulid(filters.require("location_id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Row shape a statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Preview,
    Availability,
    Calendar,
    Booking,
    PaymentHistory,
    Locations,
    PricingExceptions,
}

impl Command {
    pub fn result_shape(&self) -> Option<ResultShape> {
        match self {
            Command::SelectPreview(_) => Some(ResultShape::Preview),
            Command::SelectAvailability { .. } => Some(ResultShape::Availability),
            Command::SelectBookings { .. } => Some(ResultShape::Calendar),
            Command::SelectBooking { .. } => Some(ResultShape::Booking),
            Command::SelectPaymentHistory { .. } => Some(ResultShape::PaymentHistory),
            Command::SelectLocations => Some(ResultShape::Locations),
            Command::SelectPricingExceptions { .. } => Some(ResultShape::PricingExceptions),
            _ => None,
        }
    }
}

/// Result shape of a statement without decoding its literals, so `$n`
/// placeholders are fine. `None` for statements that return no rows.
pub fn result_shape(sql: &str) -> Option<ResultShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let table = table_factor_name(&select.from.first()?.relation).ok()?;
    match table.as_str() {
        "preview" => Some(ResultShape::Preview),
        "availability" => Some(ResultShape::Availability),
        "bookings" => {
            let filters = Filters::collect(select.selection.as_ref()).ok()?;
            if filters.eq("id").is_some() {
                Some(ResultShape::Booking)
            } else {
                Some(ResultShape::Calendar)
            }
        }
        "payment_history" => Some(ResultShape::PaymentHistory),
        "locations" => Some(ResultShape::Locations),
        "pricing_exceptions" => Some(ResultShape::PricingExceptions),
        _ => None,
    }
}

// ── WHERE clause ──────────────────────────────────────────────

/// A WHERE clause flattened into `column op value` terms joined by AND.
struct Filters<'a> {
    terms: Vec<(String, &'a BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters { terms: Vec::new() };
        if let Some(expr) = selection {
            filters.walk(expr)?;
        }
        Ok(filters)
    }

    fn walk(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.walk(inner),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.walk(left)?;
                self.walk(right)
            }
            Expr::BinaryOp { left, op, right } => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                self.terms.push((column, op, right));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn with_op(&self, column: &str, op: &BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, value)| *value)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.with_op(column, &BinaryOperator::Eq)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn extract_where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let filters = Filters::collect(selection)?;
    parse_ulid(filters.require("id")?)
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// Literal behind an expression, looking through parentheses and casts
/// (`'2024-01-01'::date`).
fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => extract_value(inner),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Text of a string or number literal.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => literal_text(expr).map(str::to_string),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal(expr)?);
    }
    let s = literal_text(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad amount {s}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_enum<T>(expr: &Expr) -> Result<T, SqlError>
where
    T: FromStr<Err = ParseEnumError>,
{
    literal_text(expr)?
        .parse()
        .map_err(|e: ParseEnumError| SqlError::Parse(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";
    const D: &str = "01BX5ZZKBKACTAV9WEVGEMMVS1";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn insert_location() {
        let sql = format!("INSERT INTO locations VALUES ('{A}', 'Central', 50.00, '1000.50')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertLocation {
                id: ulid(A),
                name: "Central".into(),
                daily_rate: Decimal::new(5000, 2),
                monthly_rate: Decimal::new(100050, 2),
            }
        );
    }

    #[test]
    fn insert_location_wrong_arity() {
        let sql = format!("INSERT INTO locations VALUES ('{A}', 'Central', 50)");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("locations", 4, 3))
        ));
    }

    #[test]
    fn insert_spot_and_exception() {
        let sql = format!("INSERT INTO spots (id, location_id, number) VALUES ('{B}', '{A}', 'A-12')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertSpot { id: ulid(B), location_id: ulid(A), number: "A-12".into() }
        );

        let sql = format!(
            "INSERT INTO pricing_exceptions VALUES ('{C}', '{A}', '2024-12-24', '2024-12-26', -15, NULL)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertPricingException {
                id: ulid(C),
                location_id: ulid(A),
                start_date: d("2024-12-24"),
                end_date: d("2024-12-26"),
                percentage_change: -15,
                description: None,
            }
        );

        let sql = format!(
            "INSERT INTO pricing_exceptions VALUES ('{C}', '{A}', '2024-12-24', '2024-12-26', 20)"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertPricingException { percentage_change: 20, description: None, .. }
        ));
    }

    #[test]
    fn insert_periodic_and_permanent_booking() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{D}', '{A}', '{B}', '{C}', '2024-02-01', '2024-02-10', 'periodic')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking(NewBooking {
                id: ulid(D),
                location_id: ulid(A),
                spot_id: ulid(B),
                client_id: ulid(C),
                start_date: d("2024-02-01"),
                end_date: Some(d("2024-02-10")),
                kind: BookingType::Periodic,
            })
        );

        let sql = format!(
            "INSERT INTO bookings VALUES ('{D}', '{A}', '{B}', '{C}', '2024-03-01'::date, NULL, 'permanent')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(new) => {
                assert_eq!(new.start_date, d("2024-03-01"));
                assert_eq!(new.end_date, None);
                assert_eq!(new.kind, BookingType::Permanent);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn bad_values_are_parse_errors() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{D}', '{A}', '{B}', '{C}', '2024-02-30', NULL, 'periodic')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));

        let sql = format!(
            "INSERT INTO bookings VALUES ('{D}', '{A}', '{B}', '{C}', '2024-02-01', NULL, 'weekly')"
        );
        match parse_sql(&sql) {
            Err(SqlError::Parse(msg)) => assert!(msg.contains("weekly")),
            other => panic!("expected Parse error, got {other:?}"),
        }

        let sql = "INSERT INTO spots VALUES ('not-a-ulid', 'x', '1')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn update_booking_patch() {
        let sql = format!(
            "UPDATE bookings SET end_date = '2024-02-12', payment_status = 'oplacone' WHERE id = '{D}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateBooking {
                id: ulid(D),
                patch: BookingPatch {
                    end_date: Some(d("2024-02-12")),
                    payment_status: Some(PaymentStatus::Paid),
                    ..Default::default()
                },
            }
        );

        let sql = format!("UPDATE bookings SET status = 'zakonczona' WHERE id = '{D}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { patch, .. } => {
                assert_eq!(patch.status, Some(BookingStatus::Completed));
                assert!(!patch.touches_dates());
            }
            other => panic!("expected UpdateBooking, got {other:?}"),
        }
    }

    #[test]
    fn update_rejects_unknown_column_and_missing_id() {
        let sql = format!("UPDATE bookings SET cost = 10 WHERE id = '{D}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "cost"));

        let sql = "UPDATE bookings SET status = 'aktywna'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn update_location_rates() {
        let sql = format!("UPDATE locations SET monthly_rate = 1200 WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateLocation {
                id: ulid(A),
                daily_rate: None,
                monthly_rate: Some(Decimal::new(1200, 0)),
            }
        );
    }

    #[test]
    fn deletes() {
        for (table, expected) in [
            ("locations", Command::DeleteLocation { id: ulid(A) }),
            ("spots", Command::DeleteSpot { id: ulid(A) }),
            ("pricing_exceptions", Command::DeletePricingException { id: ulid(A) }),
            ("bookings", Command::DeleteBooking { id: ulid(A) }),
        ] {
            let sql = format!("DELETE FROM {table} WHERE id = '{A}'");
            assert_eq!(parse_sql(&sql).unwrap(), expected);
        }
        assert!(matches!(
            parse_sql(&format!("DELETE FROM clients WHERE id = '{A}'")),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn select_preview() {
        let sql = format!(
            "SELECT * FROM preview WHERE location_id = '{A}' AND spot_id = '{B}' \
             AND start_date = '2024-01-01' AND end_date = '2024-01-03' AND booking_type = 'periodic'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectPreview(PreviewRequest {
                location_id: ulid(A),
                spot_id: ulid(B),
                start_date: d("2024-01-01"),
                end_date: Some(d("2024-01-03")),
                kind: BookingType::Periodic,
                exclude_booking_id: None,
            })
        );
    }

    #[test]
    fn select_preview_for_edit_excludes_booking() {
        let sql = format!(
            "SELECT * FROM preview WHERE (location_id = '{A}' AND spot_id = '{B}') \
             AND start_date = '2024-01-01' AND booking_type = 'permanent' AND exclude_booking_id = '{D}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectPreview(req) => {
                assert_eq!(req.end_date, None);
                assert_eq!(req.exclude_booking_id, Some(ulid(D)));
            }
            other => panic!("expected SelectPreview, got {other:?}"),
        }
    }

    #[test]
    fn select_preview_missing_filter() {
        let sql = format!("SELECT * FROM preview WHERE location_id = '{A}' AND spot_id = '{B}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("start_date"))));
    }

    #[test]
    fn select_availability() {
        let sql = format!("SELECT * FROM availability WHERE spot_id = '{B}' AND start_date = '2024-05-01'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                spot_id: ulid(B),
                start_date: d("2024-05-01"),
                end_date: None,
                exclude_booking_id: None,
            }
        );
    }

    #[test]
    fn select_calendar_and_single_booking() {
        let sql = format!(
            "SELECT * FROM bookings WHERE location_id = '{A}' AND start_date >= '2024-02-01' AND end_date <= '2024-02-29'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings {
                location_id: ulid(A),
                start_date: d("2024-02-01"),
                end_date: d("2024-02-29"),
            }
        );

        let sql = format!("SELECT * FROM bookings WHERE id = '{D}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectBooking { id: ulid(D) });

        let sql = format!("SELECT * FROM bookings WHERE location_id = '{A}' AND start_date >= '2024-02-01'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("end_date"))));
    }

    #[test]
    fn select_catalog_tables() {
        assert_eq!(parse_sql("SELECT * FROM locations").unwrap(), Command::SelectLocations);
        let sql = format!("SELECT * FROM pricing_exceptions WHERE location_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectPricingExceptions { location_id: ulid(A) }
        );
        let sql = format!("SELECT * FROM payment_history WHERE booking_id = '{D}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectPaymentHistory { booking_id: ulid(D) }
        );
    }

    #[test]
    fn or_filters_unsupported() {
        let sql = format!("SELECT * FROM bookings WHERE id = '{A}' OR id = '{B}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn shapes_of_prepared_statements() {
        assert_eq!(
            result_shape("SELECT * FROM preview WHERE location_id = $1 AND spot_id = $2"),
            Some(ResultShape::Preview)
        );
        assert_eq!(
            result_shape("SELECT * FROM bookings WHERE id = $1"),
            Some(ResultShape::Booking)
        );
        assert_eq!(
            result_shape("SELECT * FROM bookings WHERE location_id = $1 AND start_date >= $2 AND end_date <= $3"),
            Some(ResultShape::Calendar)
        );
        assert_eq!(result_shape("DELETE FROM bookings WHERE id = $1"), None);

        let cmd = parse_sql(&format!("SELECT * FROM payment_history WHERE booking_id = '{D}'")).unwrap();
        assert_eq!(cmd.result_shape(), Some(ResultShape::PaymentHistory));
    }

    #[test]
    fn empty_and_garbage() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_sql("SELEKT nonsense"), Err(SqlError::Parse(_))));
        assert!(matches!(parse_sql("CREATE TABLE t (a int)"), Err(SqlError::Unsupported(_))));
    }
}
