use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input. Tables are virtual — positional VALUES,
/// column lists ignored, exactly like the rest of the surface is shaped by
/// what the dashboard needs rather than by a general SQL engine.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        room: Room,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertTemplate {
        template: Template,
    },
    DeleteTemplate {
        id: Ulid,
    },
    InsertException {
        exception: ExceptionRule,
    },
    DeleteException {
        id: Ulid,
    },
    InsertHoliday {
        date: NaiveDate,
    },
    DeleteHoliday {
        date: NaiveDate,
    },
    /// `INSERT INTO bookings` is the atomic reserve operation.
    InsertBooking {
        id: Ulid,
        room_id: Ulid,
        date: NaiveDate,
        start: Minute,
        players: u32,
        customer: Customer,
        tax_cents: Cents,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
        reason: Option<String>,
    },
    UpdateBookingPayment {
        id: Ulid,
        payment_status: PaymentStatus,
    },
    UpdateBookingGameMaster {
        id: Ulid,
        game_master: Option<String>,
    },
    InsertReview {
        id: Ulid,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    },
    SetUtcOffset {
        minutes: i32,
    },
    SelectRooms,
    SelectBookings {
        room_id: Option<Ulid>,
        date: Option<NaiveDate>,
        status: Option<BookingStatus>,
    },
    SelectAvailability {
        room_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Minute>,
    },
    SelectSlotCheck {
        room_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
        exclude: Option<Ulid>,
    },
    SelectQuote {
        room_id: Ulid,
        date: NaiveDate,
        players: u32,
    },
    SelectStats {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    SelectRecommendations {
        room_id: Ulid,
        date: NaiveDate,
        players: u32,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN") {
        let rest = trimmed[8..].trim().trim_matches(';').trim();
        let channel = match rest {
            "" | "*" => None,
            chan => Some(chan.to_string()),
        };
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "rooms" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("rooms", 6, values.len()));
            }
            let room = Room {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                min_players: parse_u32(&values[2])?,
                max_players: parse_u32(&values[3])?,
                duration_minutes: parse_minute(&values[4])?,
                base_price_cents: parse_i64(&values[5])?,
                weekend_price_cents: opt_value(&values, 6, parse_i64_or_null)?.flatten(),
                holiday_price_cents: opt_value(&values, 7, parse_i64_or_null)?.flatten(),
                group_discount_threshold: opt_value(&values, 8, parse_u32_or_null)?.flatten(),
                group_discount_percent: opt_value(&values, 9, parse_u32)?.unwrap_or(0),
                advance_booking_days: opt_value(&values, 10, parse_u32)?.unwrap_or(30),
                min_advance_hours: opt_value(&values, 11, parse_u32)?.unwrap_or(2),
                status: RoomStatus::Active,
                is_bookable: true,
            };
            Ok(Command::InsertRoom { room })
        }
        "templates" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("templates", 5, values.len()));
            }
            let template = Template {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                day_of_week: parse_u32_or_null(&values[2])?.map(|d| d as DayOfWeek),
                window: Slot::new(parse_minute(&values[3])?, parse_minute(&values[4])?),
                max_concurrent: opt_value(&values, 5, parse_u32)?.unwrap_or(1),
                active: opt_value(&values, 6, parse_bool)?.unwrap_or(true),
            };
            Ok(Command::InsertTemplate { template })
        }
        "exceptions" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("exceptions", 4, values.len()));
            }
            let start = opt_value(&values, 4, parse_minute_or_null)?.flatten();
            let end = opt_value(&values, 5, parse_minute_or_null)?.flatten();
            let window = match (start, end) {
                (Some(s), Some(e)) => Some(Slot::new(s, e)),
                (None, None) => None,
                _ => {
                    return Err(SqlError::Parse(
                        "custom hours need both start and end".into(),
                    ));
                }
            };
            let exception = ExceptionRule {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                closed: parse_bool(&values[3])?,
                window,
                price_cents: opt_value(&values, 6, parse_i64_or_null)?.flatten(),
                reason: opt_value(&values, 7, parse_string_or_null)?.flatten(),
            };
            Ok(Command::InsertException { exception })
        }
        "holidays" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("holidays", 1, 0));
            }
            Ok(Command::InsertHoliday {
                date: parse_date(&values[0])?,
            })
        }
        "reviews" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("reviews", 3, values.len()));
            }
            let rating = parse_i64(&values[2])?;
            let rating = u8::try_from(rating)
                .map_err(|_| SqlError::Parse(format!("{rating} out of rating range")))?;
            Ok(Command::InsertReview {
                id: parse_ulid(&values[0])?,
                booking_id: parse_ulid(&values[1])?,
                rating,
                comment: opt_value(&values, 3, parse_string_or_null)?.flatten(),
            })
        }
        "bookings" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("bookings", 7, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_minute(&values[3])?,
                players: parse_u32(&values[4])?,
                customer: Customer {
                    name: parse_string(&values[5])?,
                    email: parse_string(&values[6])?,
                    phone: opt_value(&values, 7, parse_string_or_null)?.flatten(),
                },
                tax_cents: opt_value(&values, 8, parse_i64)?.unwrap_or(0),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: extract_where_id(&delete.selection)?,
        }),
        "templates" => Ok(Command::DeleteTemplate {
            id: extract_where_id(&delete.selection)?,
        }),
        "exceptions" => Ok(Command::DeleteException {
            id: extract_where_id(&delete.selection)?,
        }),
        "holidays" => {
            let mut filters = Filters::default();
            if let Some(sel) = &delete.selection {
                collect_filters(sel, &mut filters)?;
            }
            Ok(Command::DeleteHoliday {
                date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            })
        }
        // Cancellation is a status transition, never a row removal.
        "bookings" => Err(SqlError::Unsupported(
            "bookings are cancelled via UPDATE, not deleted".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;

    match table.as_str() {
        "organization" => {
            for a in assignments {
                if assignment_column(a).as_deref() == Some("utc_offset_minutes") {
                    let minutes = parse_i64_expr(&a.value)?;
                    let minutes = i32::try_from(minutes)
                        .map_err(|_| SqlError::Parse(format!("{minutes} out of i32 range")))?;
                    return Ok(Command::SetUtcOffset { minutes });
                }
            }
            Err(SqlError::MissingFilter("utc_offset_minutes"))
        }
        "rooms" => {
            let id = extract_where_id(selection)?;
            let patch = room_patch_from_assignments(assignments)?;
            Ok(Command::UpdateRoom { id, patch })
        }
        "bookings" => {
            let id = extract_where_id(selection)?;
            let mut status: Option<BookingStatus> = None;
            let mut payment: Option<PaymentStatus> = None;
            let mut reason: Option<String> = None;
            let mut game_master: Option<Option<String>> = None;

            for a in assignments {
                match assignment_column(a).as_deref() {
                    Some("status") => {
                        let s = parse_string_expr(&a.value)?;
                        status = Some(
                            BookingStatus::parse(&s)
                                .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                        );
                    }
                    Some("payment_status") => {
                        let s = parse_string_expr(&a.value)?;
                        payment = Some(
                            PaymentStatus::parse(&s)
                                .ok_or_else(|| SqlError::Parse(format!("bad payment status: {s}")))?,
                        );
                    }
                    Some("cancellation_reason") => {
                        reason = parse_string_or_null_expr(&a.value)?;
                    }
                    Some("game_master") => {
                        game_master = Some(parse_string_or_null_expr(&a.value)?);
                    }
                    Some(col) => {
                        return Err(SqlError::Parse(format!("cannot update bookings.{col}")));
                    }
                    None => return Err(SqlError::Parse("bad assignment target".into())),
                }
            }

            if let Some(status) = status {
                Ok(Command::UpdateBookingStatus { id, status, reason })
            } else if let Some(payment_status) = payment {
                Ok(Command::UpdateBookingPayment { id, payment_status })
            } else if let Some(game_master) = game_master {
                Ok(Command::UpdateBookingGameMaster { id, game_master })
            } else {
                Err(SqlError::MissingFilter("status"))
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn room_patch_from_assignments(assignments: &[ast::Assignment]) -> Result<RoomPatch, SqlError> {
    let mut patch = RoomPatch::default();
    for a in assignments {
        match assignment_column(a).as_deref() {
            Some("name") => patch.name = Some(parse_string_expr(&a.value)?),
            Some("status") => {
                let s = parse_string_expr(&a.value)?;
                patch.status = Some(
                    RoomStatus::parse(&s)
                        .ok_or_else(|| SqlError::Parse(format!("bad room status: {s}")))?,
                );
            }
            Some("is_bookable") => patch.is_bookable = Some(parse_bool_expr(&a.value)?),
            Some("base_price_cents") => {
                patch.base_price_cents = Some(parse_i64_expr(&a.value)?);
            }
            Some("weekend_price_cents") => {
                patch.weekend_price_cents = Some(parse_i64_or_null_expr(&a.value)?);
            }
            Some("holiday_price_cents") => {
                patch.holiday_price_cents = Some(parse_i64_or_null_expr(&a.value)?);
            }
            Some("group_discount_threshold") => {
                patch.group_discount_threshold = Some(parse_u32_or_null_expr(&a.value)?);
            }
            Some("group_discount_percent") => {
                patch.group_discount_percent = Some(parse_u32_expr(&a.value)?);
            }
            Some("advance_booking_days") => {
                patch.advance_booking_days = Some(parse_u32_expr(&a.value)?);
            }
            Some("min_advance_hours") => {
                patch.min_advance_hours = Some(parse_u32_expr(&a.value)?);
            }
            Some(col) => return Err(SqlError::Parse(format!("cannot update rooms.{col}"))),
            None => return Err(SqlError::Parse("bad assignment target".into())),
        }
    }
    if patch.is_noop() {
        return Err(SqlError::Parse("empty UPDATE".into()));
    }
    Ok(patch)
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "bookings" => {
            let status = match filters.status {
                Some(ref s) => Some(
                    BookingStatus::parse(s)
                        .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                ),
                None => None,
            };
            Ok(Command::SelectBookings {
                room_id: filters.room_id,
                date: filters.date,
                status,
            })
        }
        "availability" => Ok(Command::SelectAvailability {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            min_duration: filters.min_duration,
        }),
        "slot_check" => Ok(Command::SelectSlotCheck {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
            exclude: filters.exclude,
        }),
        "quote" => Ok(Command::SelectQuote {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            players: filters.players.ok_or(SqlError::MissingFilter("players"))?,
        }),
        "stats" => Ok(Command::SelectStats {
            from: filters.date_from,
            to: filters.date_to,
        }),
        "recommendations" => Ok(Command::SelectRecommendations {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            players: filters.players.ok_or(SqlError::MissingFilter("players"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// WHERE-clause values the virtual tables understand.
#[derive(Debug, Default)]
struct Filters {
    id: Option<Ulid>,
    room_id: Option<Ulid>,
    exclude: Option<Ulid>,
    date: Option<NaiveDate>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    status: Option<String>,
    start: Option<Minute>,
    end: Option<Minute>,
    min_duration: Option<Minute>,
    players: Option<u32>,
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filters.id = Some(parse_ulid_expr(right)?),
                Some("room_id") => filters.room_id = Some(parse_ulid_expr(right)?),
                Some("exclude") => filters.exclude = Some(parse_ulid_expr(right)?),
                Some("date") => filters.date = Some(parse_date_expr(right)?),
                Some("status") => filters.status = Some(parse_string_expr(right)?),
                Some("start") => filters.start = Some(parse_minute_expr(right)?),
                Some("end") => filters.end = Some(parse_minute_expr(right)?),
                Some("min_duration") => filters.min_duration = Some(parse_minute_expr(right)?),
                Some("players") => filters.players = Some(parse_u32_expr(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filters.date_from = Some(parse_date_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filters.date_to = Some(parse_date_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let mut filters = Filters::default();
    if let Some(sel) = selection {
        collect_filters(sel, &mut filters)?;
    }
    filters.id.ok_or(SqlError::MissingFilter("id"))
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
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null_expr(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_i64_expr(expr)?))
    }
}

fn parse_u32_expr(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null_expr(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_u32_expr(expr)?))
    }
}

fn parse_minute_expr(expr: &Expr) -> Result<Minute, SqlError> {
    let v = parse_i64_expr(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of minute range")))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null_expr(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_string_expr(expr)?))
    }
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

// Positional-value wrappers over the expr parsers.

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    parse_i64_or_null_expr(expr)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    parse_u32_expr(expr)
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    parse_u32_or_null_expr(expr)
}

fn parse_minute(expr: &Expr) -> Result<Minute, SqlError> {
    parse_minute_expr(expr)
}

fn parse_minute_or_null(expr: &Expr) -> Result<Option<Minute>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_minute_expr(expr)?))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_expr(expr)
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    parse_string_or_null_expr(expr)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    parse_bool_expr(expr)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date_expr(expr)
}

/// Parse an optional positional value; `None` when the row is too short.
fn opt_value<T>(
    values: &[Expr],
    idx: usize,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    values.get(idx).map(&parse).transpose()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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

    const U: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_room_minimal() {
        let sql = format!(
            "INSERT INTO rooms (id, name, min_players, max_players, duration_minutes, base_price_cents) VALUES ('{U}', 'The Vault', 2, 8, 60, 10000)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertRoom { room } => {
                assert_eq!(room.id.to_string(), U);
                assert_eq!(room.name, "The Vault");
                assert_eq!(room.min_players, 2);
                assert_eq!(room.max_players, 8);
                assert_eq!(room.duration_minutes, 60);
                assert_eq!(room.base_price_cents, 10_000);
                assert_eq!(room.weekend_price_cents, None);
                assert_eq!(room.group_discount_percent, 0);
                assert_eq!(room.advance_booking_days, 30);
                assert_eq!(room.min_advance_hours, 2);
                assert_eq!(room.status, RoomStatus::Active);
                assert!(room.is_bookable);
            }
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_full() {
        let sql = format!(
            "INSERT INTO rooms VALUES ('{U}', 'Cursed Cellar', 2, 6, 90, 12000, 15000, NULL, 6, 10, 60, 4)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertRoom { room } => {
                assert_eq!(room.weekend_price_cents, Some(15_000));
                assert_eq!(room.holiday_price_cents, None);
                assert_eq!(room.group_discount_threshold, Some(6));
                assert_eq!(room.group_discount_percent, 10);
                assert_eq!(room.advance_booking_days, 60);
                assert_eq!(room.min_advance_hours, 4);
            }
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_room_patch() {
        let sql = format!(
            "UPDATE rooms SET status = 'maintenance', is_bookable = false, weekend_price_cents = NULL WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateRoom { id, patch } => {
                assert_eq!(id.to_string(), U);
                assert_eq!(patch.status, Some(RoomStatus::Maintenance));
                assert_eq!(patch.is_bookable, Some(false));
                assert_eq!(patch.weekend_price_cents, Some(None));
                assert_eq!(patch.name, None);
            }
            _ => panic!("expected UpdateRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_room_unknown_column() {
        let sql = format!("UPDATE rooms SET slug = 'x' WHERE id = '{U}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_template() {
        let sql = format!(
            "INSERT INTO templates (id, room_id, day_of_week, start_minute, end_minute) VALUES ('{U}', '{U}', 6, 540, 1320)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertTemplate { template } => {
                assert_eq!(template.day_of_week, Some(6));
                assert_eq!(template.window, Slot::new(540, 1320));
                assert_eq!(template.max_concurrent, 1);
                assert!(template.active);
            }
            _ => panic!("expected InsertTemplate, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_template_every_day_with_capacity() {
        let sql = format!(
            "INSERT INTO templates VALUES ('{U}', '{U}', NULL, 540, 1320, 3, true)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertTemplate { template } => {
                assert_eq!(template.day_of_week, None);
                assert_eq!(template.max_concurrent, 3);
            }
            _ => panic!("expected InsertTemplate, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_exception_closed() {
        let sql = format!(
            "INSERT INTO exceptions (id, room_id, exception_date, closed) VALUES ('{U}', '{U}', '2026-12-25', true)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertException { exception } => {
                assert!(exception.closed);
                assert_eq!(exception.window, None);
                assert_eq!(
                    exception.date,
                    NaiveDate::from_ymd_opt(2026, 12, 25).unwrap()
                );
            }
            _ => panic!("expected InsertException, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_exception_custom_hours_and_price() {
        let sql = format!(
            "INSERT INTO exceptions VALUES ('{U}', '{U}', '2026-12-31', false, 600, 900, 25000, 'New Year''s Eve')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertException { exception } => {
                assert_eq!(exception.window, Some(Slot::new(600, 900)));
                assert_eq!(exception.price_cents, Some(25_000));
                assert_eq!(exception.reason.as_deref(), Some("New Year's Eve"));
            }
            _ => panic!("expected InsertException, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_exception_half_window_rejected() {
        let sql = format!(
            "INSERT INTO exceptions VALUES ('{U}', '{U}', '2026-12-31', false, 600, NULL)"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, room_id, booking_date, start_minute, players, customer_name, customer_email) VALUES ('{U}', '{U}', '2026-08-20', 600, 4, 'Ada', 'ada@example.com')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking {
                date,
                start,
                players,
                customer,
                tax_cents,
                ..
            } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 8, 20).unwrap());
                assert_eq!(start, 600);
                assert_eq!(players, 4);
                assert_eq!(customer.name, "Ada");
                assert_eq!(customer.phone, None);
                assert_eq!(tax_cents, 0);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_phone_and_tax() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{U}', '{U}', '2026-08-20', 600, 4, 'Ada', 'ada@example.com', '+49 151 000', 1900)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { customer, tax_cents, .. } => {
                assert_eq!(customer.phone.as_deref(), Some("+49 151 000"));
                assert_eq!(tax_cents, 1_900);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_review() {
        let sql = format!("INSERT INTO reviews VALUES ('{U}', '{U}', 5, 'loved it')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertReview { rating, comment, .. } => {
                assert_eq!(rating, 5);
                assert_eq!(comment.as_deref(), Some("loved it"));
            }
            _ => panic!("expected InsertReview, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO reviews VALUES ('{U}', '{U}', 4)");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(
            cmd,
            Command::InsertReview {
                rating: 4,
                comment: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_delete_booking_rejected() {
        let sql = format!("DELETE FROM bookings WHERE id = '{U}'");
        let err = parse_sql(&sql).unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)));
    }

    #[test]
    fn parse_update_booking_status_with_reason() {
        let sql = format!(
            "UPDATE bookings SET status = 'cancelled', cancellation_reason = 'customer sick' WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBookingStatus { status, reason, .. } => {
                assert_eq!(status, BookingStatus::Cancelled);
                assert_eq!(reason.as_deref(), Some("customer sick"));
            }
            _ => panic!("expected UpdateBookingStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_payment() {
        let sql = format!("UPDATE bookings SET payment_status = 'paid' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(
            cmd,
            Command::UpdateBookingPayment {
                payment_status: PaymentStatus::Paid,
                ..
            }
        ));
    }

    #[test]
    fn parse_update_booking_game_master() {
        let sql = format!("UPDATE bookings SET game_master = 'Jo' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBookingGameMaster { game_master, .. } => {
                assert_eq!(game_master.as_deref(), Some("Jo"));
            }
            _ => panic!("expected UpdateBookingGameMaster, got {cmd:?}"),
        }

        let sql = format!("UPDATE bookings SET game_master = NULL WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(
            cmd,
            Command::UpdateBookingGameMaster { game_master: None, .. }
        ));
    }

    #[test]
    fn parse_update_booking_bad_status() {
        let sql = format!("UPDATE bookings SET status = 'vanished' WHERE id = '{U}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_organization_offset() {
        let cmd = parse_sql("UPDATE organization SET utc_offset_minutes = 120").unwrap();
        assert_eq!(cmd, Command::SetUtcOffset { minutes: 120 });
        let cmd = parse_sql("UPDATE organization SET utc_offset_minutes = -300").unwrap();
        assert_eq!(cmd, Command::SetUtcOffset { minutes: -300 });
    }

    #[test]
    fn parse_holidays() {
        let cmd = parse_sql("INSERT INTO holidays VALUES ('2026-12-25')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertHoliday {
                date: NaiveDate::from_ymd_opt(2026, 12, 25).unwrap()
            }
        );
        let cmd = parse_sql("DELETE FROM holidays WHERE date = '2026-12-25'").unwrap();
        assert!(matches!(cmd, Command::DeleteHoliday { .. }));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_id = '{U}' AND date = '2026-08-20' AND min_duration = 60"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability {
                room_id,
                date,
                min_duration,
            } => {
                assert_eq!(room_id.to_string(), U);
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 8, 20).unwrap());
                assert_eq!(min_duration, Some(60));
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_slot_check() {
        let sql = format!(
            "SELECT * FROM slot_check WHERE room_id = '{U}' AND date = '2026-08-20' AND start = 600 AND \"end\" = 660"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectSlotCheck {
                start, end, exclude, ..
            } => {
                assert_eq!((start, end), (600, 660));
                assert_eq!(exclude, None);
            }
            _ => panic!("expected SelectSlotCheck, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_slot_check_with_exclude() {
        let sql = format!(
            "SELECT * FROM slot_check WHERE room_id = '{U}' AND date = '2026-08-20' AND start = 600 AND \"end\" = 660 AND exclude = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectSlotCheck { exclude, .. } => {
                assert_eq!(exclude.unwrap().to_string(), U);
            }
            _ => panic!("expected SelectSlotCheck, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_quote() {
        let sql = format!(
            "SELECT * FROM quote WHERE room_id = '{U}' AND date = '2026-08-22' AND players = 6"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SelectQuote { players: 6, .. }));
    }

    #[test]
    fn parse_select_quote_missing_players() {
        let sql = format!("SELECT * FROM quote WHERE room_id = '{U}' AND date = '2026-08-22'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("players"))
        ));
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = format!(
            "SELECT * FROM bookings WHERE room_id = '{U}' AND date = '2026-08-20' AND status = 'confirmed'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectBookings {
                room_id,
                date,
                status,
            } => {
                assert!(room_id.is_some());
                assert!(date.is_some());
                assert_eq!(status, Some(BookingStatus::Confirmed));
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }

        let cmd = parse_sql("SELECT * FROM bookings").unwrap();
        assert_eq!(
            cmd,
            Command::SelectBookings {
                room_id: None,
                date: None,
                status: None
            }
        );
    }

    #[test]
    fn parse_select_stats_range() {
        let cmd =
            parse_sql("SELECT * FROM stats WHERE date >= '2026-08-01' AND date <= '2026-08-31'")
                .unwrap();
        match cmd {
            Command::SelectStats { from, to } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2026, 8, 1));
                assert_eq!(to, NaiveDate::from_ymd_opt(2026, 8, 31));
            }
            _ => panic!("expected SelectStats, got {cmd:?}"),
        }
        let cmd = parse_sql("SELECT * FROM stats").unwrap();
        assert_eq!(cmd, Command::SelectStats { from: None, to: None });
    }

    #[test]
    fn parse_select_recommendations() {
        let sql = format!(
            "SELECT * FROM recommendations WHERE room_id = '{U}' AND date = '2026-08-20' AND players = 4"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SelectRecommendations { players: 4, .. }));
    }

    #[test]
    fn parse_listen_unlisten() {
        let cmd = parse_sql(&format!("LISTEN room_{U}")).unwrap();
        assert_eq!(
            cmd,
            Command::Listen {
                channel: format!("room_{U}")
            }
        );
        let cmd = parse_sql("UNLISTEN *").unwrap();
        assert_eq!(cmd, Command::Unlisten { channel: None });
        let cmd = parse_sql(&format!("UNLISTEN room_{U};")).unwrap();
        assert_eq!(
            cmd,
            Command::Unlisten {
                channel: Some(format!("room_{U}"))
            }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO reviews (id) VALUES ('{U}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_bad_date_errors() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_id = '{U}' AND date = 'tomorrow'"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
