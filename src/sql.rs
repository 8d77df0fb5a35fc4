use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::money::{Bps, Money};

/// Parsed command from SQL input.
///
/// Lifecycle transitions are INSERTs into command tables (`check_ins`,
/// `payments`, ...); undo-style transitions are DELETEs; reads are SELECTs
/// over virtual tables.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUnit {
        id: Ulid,
        kind: UnitKind,
        name: String,
        base_price: Money,
        max_guests: u32,
        number: Option<String>,
    },
    SetPrice {
        unit_id: Ulid,
        price: Money,
        expected_version: Option<u64>,
    },
    LockUnit {
        unit_id: Ulid,
        expected_version: Option<u64>,
    },
    UnlockUnit {
        unit_id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        unit_id: Ulid,
        range: StayRange,
        guest: Guest,
        guest_count: u32,
    },
    ConfirmReservation {
        id: Ulid,
    },
    CheckIn {
        id: Ulid,
    },
    CheckOut {
        id: Ulid,
    },
    CancelReservation {
        id: Ulid,
    },
    AdvanceHousekeeping {
        unit_id: Ulid,
        to: HousekeepingStatus,
    },
    ForceClean {
        unit_id: Ulid,
    },
    InsertTask {
        id: Ulid,
        unit_id: Ulid,
        kind: TaskKind,
        priority: TaskPriority,
    },
    StartTask {
        id: Ulid,
    },
    CompleteTask {
        id: Ulid,
    },
    InsertOffer {
        id: Ulid,
        unit_id: Ulid,
        discount: Discount,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    ApplyOffer {
        id: Ulid,
    },
    RevertOffer {
        id: Ulid,
    },
    /// `None` sweeps as of the engine clock's today.
    SweepOffers {
        today: Option<NaiveDate>,
    },
    InsertRateModifier {
        modifier: RateModifier,
    },
    DeleteRateModifier {
        id: Ulid,
    },
    InsertInvoice {
        id: Ulid,
        reservation_id: Ulid,
        discount: Money,
        extras: Vec<LineItemDraft>,
        draft: bool,
    },
    IssueInvoice {
        id: Ulid,
    },
    RecordPayment {
        invoice_id: Ulid,
        amount: Money,
    },
    CancelInvoice {
        id: Ulid,
    },
    SelectUnits {
        id: Option<Ulid>,
    },
    SelectAvailability {
        query: SearchQuery,
    },
    SelectCalendar {
        unit_id: Ulid,
        window: StayRange,
    },
    SelectReservations {
        id: Option<Ulid>,
        unit_id: Option<Ulid>,
    },
    SelectInvoices {
        id: Option<Ulid>,
        unit_id: Option<Ulid>,
        reservation_id: Option<Ulid>,
    },
    SelectInvoiceLines {
        invoice_id: Ulid,
    },
    SelectTasks {
        unit_id: Option<Ulid>,
    },
    SelectHousekeepingLog {
        unit_id: Ulid,
    },
    SelectOffers {
        unit_id: Option<Ulid>,
    },
    SelectRateModifiers,
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

impl Command {
    /// Whether the command mutates engine state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Command::SelectUnits { .. }
                | Command::SelectAvailability { .. }
                | Command::SelectCalendar { .. }
                | Command::SelectReservations { .. }
                | Command::SelectInvoices { .. }
                | Command::SelectInvoiceLines { .. }
                | Command::SelectTasks { .. }
                | Command::SelectHousekeepingLog { .. }
                | Command::SelectOffers { .. }
                | Command::SelectRateModifiers
                | Command::Listen { .. }
                | Command::Unlisten { .. }
                | Command::UnlistenAll
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().to_string();
        return Ok(Command::Unlisten { channel });
    }
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("one statement per query".into()));
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn require(table: &'static str, values: &[Expr], n: usize) -> Result<(), SqlError> {
    if values.len() < n {
        return Err(SqlError::WrongArity(table, n, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = ordered_insert_values(&table, insert)?;
    let v = values.as_slice();

    match table.as_str() {
        "units" => {
            require("units", v, 5)?;
            Ok(Command::InsertUnit {
                id: parse_ulid(&v[0])?,
                kind: parse_label(&v[1], UnitKind::parse)?,
                name: parse_string(&v[2])?,
                base_price: parse_money(&v[3])?,
                max_guests: parse_u32(&v[4])?,
                number: optional(v, 5, parse_string_or_null)?.flatten(),
            })
        }
        "unit_prices" => {
            require("unit_prices", v, 2)?;
            Ok(Command::SetPrice {
                unit_id: parse_ulid(&v[0])?,
                price: parse_money(&v[1])?,
                expected_version: optional(v, 2, parse_version)?.flatten(),
            })
        }
        "unit_locks" => {
            require("unit_locks", v, 1)?;
            Ok(Command::LockUnit {
                unit_id: parse_ulid(&v[0])?,
                expected_version: optional(v, 1, parse_version)?.flatten(),
            })
        }
        "reservations" => {
            require("reservations", v, 5)?;
            let guest = Guest {
                name: parse_string(&v[4])?,
                email: optional(v, 5, parse_string_or_null)?.flatten(),
                phone: optional(v, 6, parse_string_or_null)?.flatten(),
            };
            Ok(Command::InsertReservation {
                id: parse_ulid(&v[0])?,
                unit_id: parse_ulid(&v[1])?,
                range: StayRange::new(parse_date(&v[2])?, parse_date(&v[3])?),
                guest,
                guest_count: optional(v, 7, parse_u32)?.unwrap_or(1),
            })
        }
        "confirmations" => Ok(Command::ConfirmReservation { id: single_id("confirmations", v)? }),
        "check_ins" => Ok(Command::CheckIn { id: single_id("check_ins", v)? }),
        "check_outs" => Ok(Command::CheckOut { id: single_id("check_outs", v)? }),
        "housekeeping" => {
            require("housekeeping", v, 2)?;
            Ok(Command::AdvanceHousekeeping {
                unit_id: parse_ulid(&v[0])?,
                to: parse_label(&v[1], HousekeepingStatus::parse)?,
            })
        }
        "force_cleans" => Ok(Command::ForceClean { unit_id: single_id("force_cleans", v)? }),
        "housekeeping_tasks" => {
            require("housekeeping_tasks", v, 3)?;
            Ok(Command::InsertTask {
                id: parse_ulid(&v[0])?,
                unit_id: parse_ulid(&v[1])?,
                kind: parse_label(&v[2], TaskKind::parse)?,
                priority: optional(v, 3, |e| parse_label(e, TaskPriority::parse))?
                    .unwrap_or(TaskPriority::Normal),
            })
        }
        "task_starts" => Ok(Command::StartTask { id: single_id("task_starts", v)? }),
        "task_completions" => Ok(Command::CompleteTask { id: single_id("task_completions", v)? }),
        "offers" => {
            require("offers", v, 6)?;
            Ok(Command::InsertOffer {
                id: parse_ulid(&v[0])?,
                unit_id: parse_ulid(&v[1])?,
                discount: parse_discount(&v[2], &v[3])?,
                start_date: parse_date(&v[4])?,
                end_date: parse_date(&v[5])?,
            })
        }
        "offer_applications" => Ok(Command::ApplyOffer { id: single_id("offer_applications", v)? }),
        "offer_sweeps" => Ok(Command::SweepOffers {
            today: optional(v, 0, parse_date_or_null)?.flatten(),
        }),
        "rate_modifiers" => parse_rate_modifier(v),
        "invoices" => {
            require("invoices", v, 2)?;
            Ok(Command::InsertInvoice {
                id: parse_ulid(&v[0])?,
                reservation_id: parse_ulid(&v[1])?,
                discount: optional(v, 2, parse_money)?.unwrap_or_default(),
                extras: optional(v, 3, parse_extras)?.unwrap_or_default(),
                draft: optional(v, 4, parse_bool)?.unwrap_or(false),
            })
        }
        "invoice_issues" => Ok(Command::IssueInvoice { id: single_id("invoice_issues", v)? }),
        "payments" => {
            require("payments", v, 2)?;
            Ok(Command::RecordPayment {
                invoice_id: parse_ulid(&v[0])?,
                amount: parse_money(&v[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(id, name, unit_kind, adjustment, amount, starts, ends, weekdays)`:
/// a season when both dates are set, otherwise a weekday list.
fn parse_rate_modifier(v: &[Expr]) -> Result<Command, SqlError> {
    require("rate_modifiers", v, 5)?;
    let amount = parse_i64(&v[4])?;
    let adjustment = match parse_string(&v[3])?.to_ascii_lowercase().as_str() {
        "percent" => Adjustment::Percent(
            i32::try_from(amount).map_err(|_| SqlError::Parse(format!("{amount} out of range")))?,
        ),
        "fixed" => Adjustment::Fixed(Money::from_minor(amount)),
        other => return Err(SqlError::Parse(format!("bad adjustment: {other}"))),
    };

    let starts = optional(v, 5, parse_date_or_null)?.flatten();
    let ends = optional(v, 6, parse_date_or_null)?.flatten();
    let weekdays = optional(v, 7, parse_string_or_null)?.flatten();
    let trigger = match (starts, ends, weekdays) {
        (Some(start), Some(end), None) => RateTrigger::Season { start, end },
        (None, None, Some(days)) => RateTrigger::Weekdays(parse_weekdays(&days)?),
        _ => {
            return Err(SqlError::Parse(
                "rate modifier needs either starts and ends, or weekdays".into(),
            ));
        }
    };

    Ok(Command::InsertRateModifier {
        modifier: RateModifier {
            id: parse_ulid(&v[0])?,
            name: parse_string(&v[1])?,
            unit_kind: match parse_string_or_null(&v[2])? {
                Some(s) => Some(UnitKind::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad unit kind: {s}")))?),
                None => None,
            },
            trigger,
            adjustment,
        },
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "reservations" => Ok(Command::CancelReservation { id: required_ulid(&filters, "id")? }),
        "unit_locks" => Ok(Command::UnlockUnit { unit_id: required_ulid(&filters, "unit_id")? }),
        "offer_applications" => Ok(Command::RevertOffer { id: required_ulid(&filters, "offer_id")? }),
        "rate_modifiers" => Ok(Command::DeleteRateModifier { id: required_ulid(&filters, "id")? }),
        "invoices" => Ok(Command::CancelInvoice { id: required_ulid(&filters, "id")? }),
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
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "units" => Ok(Command::SelectUnits { id: filter_ulid(&filters, "id")? }),
        "availability" => {
            let check_in = filter(&filters, "check_in").ok_or(SqlError::MissingFilter("check_in"))?;
            let check_out = filter(&filters, "check_out").ok_or(SqlError::MissingFilter("check_out"))?;
            let mut query = SearchQuery::new(StayRange::new(parse_date(check_in)?, parse_date(check_out)?));
            if let Some(kind) = filter(&filters, "kind") {
                query.kind = Some(parse_label(kind, UnitKind::parse)?);
            }
            if let Some(guests) = filter(&filters, "guests") {
                query.guest_count = parse_u32(guests)?;
            }
            query.price_min = filter(&filters, "price_min").map(parse_money).transpose()?;
            query.price_max = filter(&filters, "price_max").map(parse_money).transpose()?;
            query.text = filter(&filters, "text").map(parse_string).transpose()?;
            Ok(Command::SelectAvailability { query })
        }
        "calendar" => {
            let start = filter(&filters, "start").ok_or(SqlError::MissingFilter("start"))?;
            let end = filter(&filters, "end").ok_or(SqlError::MissingFilter("end"))?;
            Ok(Command::SelectCalendar {
                unit_id: required_ulid(&filters, "unit_id")?,
                window: StayRange::new(parse_date(start)?, parse_date(end)?),
            })
        }
        "reservations" => Ok(Command::SelectReservations {
            id: filter_ulid(&filters, "id")?,
            unit_id: filter_ulid(&filters, "unit_id")?,
        }),
        "invoices" => Ok(Command::SelectInvoices {
            id: filter_ulid(&filters, "id")?,
            unit_id: filter_ulid(&filters, "unit_id")?,
            reservation_id: filter_ulid(&filters, "reservation_id")?,
        }),
        "invoice_lines" => Ok(Command::SelectInvoiceLines {
            invoice_id: required_ulid(&filters, "invoice_id")?,
        }),
        "housekeeping_tasks" => Ok(Command::SelectTasks { unit_id: filter_ulid(&filters, "unit_id")? }),
        "housekeeping_log" => Ok(Command::SelectHousekeepingLog {
            unit_id: required_ulid(&filters, "unit_id")?,
        }),
        "offers" => Ok(Command::SelectOffers { unit_id: filter_ulid(&filters, "unit_id")? }),
        "rate_modifiers" => Ok(Command::SelectRateModifiers),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Filters ───────────────────────────────────────────────────

/// `col = v`, `col >= v` and `col <= v` terms joined by AND. The operator
/// is not kept: each virtual table gives a column exactly one meaning.
fn collect_filters(selection: Option<&Expr>) -> Result<Vec<(String, Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk_filters(expr, &mut out)?;
    }
    Ok(out)
}

fn walk_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => walk_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                walk_filters(left, out)?;
                walk_filters(right, out)
            }
            ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, (**right).clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn filter<'a>(filters: &'a [(String, Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == col).map(|(_, e)| e)
}

fn filter_ulid(filters: &[(String, Expr)], col: &str) -> Result<Option<Ulid>, SqlError> {
    filter(filters, col).map(parse_ulid).transpose()
}

fn required_ulid(filters: &[(String, Expr)], col: &'static str) -> Result<Ulid, SqlError> {
    filter_ulid(filters, col)?.ok_or(SqlError::MissingFilter(col))
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

/// Column order of each command table and how many leading columns are
/// required.
fn insert_columns(table: &str) -> Option<(&'static [&'static str], usize)> {
    let columns: (&'static [&'static str], usize) = match table {
        "units" => (&["id", "kind", "name", "base_price", "max_guests", "number"], 5),
        "unit_prices" => (&["unit_id", "price", "expected_version"], 2),
        "unit_locks" => (&["unit_id", "expected_version"], 1),
        "reservations" => (
            &["id", "unit_id", "check_in", "check_out", "guest_name", "guest_email", "guest_phone", "guest_count"],
            5,
        ),
        "confirmations" | "check_ins" | "check_outs" => (&["reservation_id"], 1),
        "housekeeping" => (&["unit_id", "status"], 2),
        "force_cleans" => (&["unit_id"], 1),
        "housekeeping_tasks" => (&["id", "unit_id", "kind", "priority"], 3),
        "task_starts" | "task_completions" => (&["task_id"], 1),
        "offers" => (&["id", "unit_id", "discount_kind", "amount", "start_date", "end_date"], 6),
        "offer_applications" => (&["offer_id"], 1),
        "offer_sweeps" => (&["today"], 0),
        "rate_modifiers" => (
            &["id", "name", "unit_kind", "adjustment", "amount", "starts", "ends", "weekdays"],
            5,
        ),
        "invoices" => (&["id", "reservation_id", "discount", "extras", "draft"], 2),
        "invoice_issues" => (&["invoice_id"], 1),
        "payments" => (&["invoice_id", "amount"], 2),
        _ => return None,
    };
    Some(columns)
}

/// Row values in the table's column order. A named column list may reorder
/// columns or leave optional ones out; gaps become NULL.
fn ordered_insert_values(table: &str, insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let values = extract_insert_values(insert)?;
    if insert.columns.is_empty() {
        return Ok(values);
    }
    let (columns, required) = insert_columns(table).ok_or_else(|| SqlError::UnknownTable(table.to_string()))?;
    if insert.columns.len() != values.len() {
        return Err(SqlError::Parse(format!(
            "{table}: {} columns but {} values",
            insert.columns.len(),
            values.len()
        )));
    }

    let mut slots: Vec<Option<Expr>> = vec![None; columns.len()];
    for (ident, value) in insert.columns.iter().zip(values) {
        let name = ident.value.to_ascii_lowercase();
        let idx = columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| SqlError::Parse(format!("{table}: unknown column {name}")))?;
        if slots[idx].replace(value).is_some() {
            return Err(SqlError::Parse(format!("{table}: column {name} given twice")));
        }
    }
    if let Some(missing) = columns[..required].iter().zip(&slots).find(|(_, slot)| slot.is_none()) {
        return Err(SqlError::Parse(format!("{table}: missing column {}", missing.0)));
    }

    let len = slots.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
    Ok(slots
        .into_iter()
        .take(len)
        .map(|slot| slot.unwrap_or_else(|| Expr::Value(Value::Null.with_empty_span())))
        .collect())
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Value at `idx` if the row has one that is not NULL.
fn optional<T>(
    values: &[Expr],
    idx: usize,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    values.get(idx).filter(|e| !is_null(e)).map(parse).transpose()
}

fn single_id(table: &'static str, values: &[Expr]) -> Result<Ulid, SqlError> {
    require(table, values, 1)?;
    parse_ulid(&values[0])
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_label<T>(expr: &Expr, parse: fn(&str) -> Option<T>) -> Result<T, SqlError> {
    let s = parse_string(expr)?;
    parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown value: {s}")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_version(expr: &Expr) -> Result<Option<u64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let v = parse_i64(expr)?;
    u64::try_from(v)
        .map(Some)
        .map_err(|_| SqlError::Parse(format!("bad version: {v}")))
}

/// Integer minor units.
fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    parse_i64(expr).map(Money::from_minor)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
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

/// `'percent'` takes basis points, `'fixed'` takes minor units.
fn parse_discount(kind: &Expr, amount: &Expr) -> Result<Discount, SqlError> {
    let amount = parse_i64(amount)?;
    match parse_string(kind)?.to_ascii_lowercase().as_str() {
        "percent" => u32::try_from(amount)
            .map(|bps| Discount::Percent(Bps::from_bps(bps)))
            .map_err(|_| SqlError::Parse(format!("bad percent: {amount}"))),
        "fixed" => Ok(Discount::Fixed(Money::from_minor(amount))),
        other => Err(SqlError::Parse(format!("bad discount kind: {other}"))),
    }
}

fn parse_weekdays(s: &str) -> Result<Vec<Weekday>, SqlError> {
    s.split(',')
        .map(|day| {
            day.trim()
                .parse::<Weekday>()
                .map_err(|_| SqlError::Parse(format!("bad weekday: {day}")))
        })
        .collect()
}

/// Extra charges as a JSON array of `{kind, description, quantity, unit_price}`.
fn parse_extras(expr: &Expr) -> Result<Vec<LineItemDraft>, SqlError> {
    if is_null(expr) {
        return Ok(Vec::new());
    }
    let json = parse_string(expr)?;
    serde_json::from_str(&json).map_err(|e| SqlError::Parse(format!("bad extras: {e}")))
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
