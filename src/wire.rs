use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::debug;
use ulid::Ulid;

use crate::auth::{InnkeepAuthSource, StaffRoster};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::money::Money;
use crate::observability;
use crate::sql::{self, Command};

/// Channel carrying every committed event.
pub const ALL_CHANNEL: &str = "innkeep";

const UNIT_COLUMNS: &[&str] = &[
    "id", "kind", "name", "number", "base_price", "live_price", "max_guests", "occupancy",
    "housekeeping", "version",
];
const AVAILABILITY_COLUMNS: &[&str] = &[
    "unit_id", "kind", "name", "number", "max_guests", "nightly_price", "stay_total",
];
const CALENDAR_COLUMNS: &[&str] = &["unit_id", "start", "end"];
const RESERVATION_COLUMNS: &[&str] = &[
    "id", "unit_id", "check_in", "check_out", "nights", "guest_name", "guest_email", "guest_phone",
    "guest_count", "price_at_booking", "status", "booked_at", "confirmed_at", "actual_check_in",
    "actual_check_out", "cancelled_at",
];
const INVOICE_COLUMNS: &[&str] = &[
    "id", "reservation_id", "unit_id", "subtotal", "discount", "tax_rate_bps", "tax", "total",
    "amount_paid", "balance", "status", "created_at",
];
const INVOICE_LINE_COLUMNS: &[&str] = &[
    "invoice_id", "line", "kind", "description", "quantity", "unit_price", "line_total",
];
const TASK_COLUMNS: &[&str] = &[
    "id", "unit_id", "kind", "status", "priority", "created_at", "started_at", "completed_at",
    "completed_by",
];
const HOUSEKEEPING_LOG_COLUMNS: &[&str] = &["unit_id", "at", "from", "to", "cause", "by"];
const OFFER_COLUMNS: &[&str] = &[
    "id", "unit_id", "discount_kind", "amount", "start_date", "end_date", "status", "applied",
    "recorded_original_price",
];
const RATE_MODIFIER_COLUMNS: &[&str] = &[
    "id", "name", "unit_kind", "adjustment", "amount", "starts", "ends", "weekdays",
];

type Row = Vec<Option<String>>;

/// Per-connection query handler. The operator is the connection's user name
/// as resolved by the staff roster.
pub struct InnkeepHandler {
    engine: Arc<Engine>,
    roster: Arc<StaffRoster>,
    query_parser: Arc<InnkeepQueryParser>,
    listening: Mutex<Vec<(String, broadcast::Receiver<Event>)>>,
}

impl Drop for InnkeepHandler {
    fn drop(&mut self) {
        if let Ok(listening) = self.listening.get_mut() {
            listening.clear();
        }
        self.engine.notify.prune();
    }
}

impl InnkeepHandler {
    pub fn new(engine: Arc<Engine>, roster: Arc<StaffRoster>) -> Self {
        Self {
            engine,
            roster,
            query_parser: Arc::new(InnkeepQueryParser),
            listening: Mutex::new(Vec::new()),
        }
    }

    fn actor<C: ClientInfo>(&self, client: &C) -> Actor {
        let user = client.metadata().get("user").map(String::as_str).unwrap_or("anonymous");
        self.roster.actor_for(user)
    }

    fn subscribe(&self, channel: String) -> PgWireResult<()> {
        let rx = if channel == ALL_CHANNEL {
            self.engine.notify.subscribe_all()
        } else {
            let unit_id = channel
                .strip_prefix("unit_")
                .and_then(|id| Ulid::from_string(id).ok())
                .ok_or_else(|| {
                    user_error(
                        "42000",
                        format!("invalid channel: {channel} (expected unit_{{id}} or {ALL_CHANNEL})"),
                    )
                })?;
            if self.engine.get_unit_state(&unit_id).is_none() {
                return Err(user_error("P0002", format!("unit not found: {unit_id}")));
            }
            self.engine.notify.subscribe(unit_id)
        };
        let mut listening = self.listening.lock().map_err(|_| poisoned())?;
        listening.retain(|(c, _)| *c != channel);
        listening.push((channel, rx));
        Ok(())
    }

    fn unsubscribe(&self, channel: Option<&str>) -> PgWireResult<()> {
        let mut listening = self.listening.lock().map_err(|_| poisoned())?;
        match channel {
            Some(channel) => listening.retain(|(c, _)| c != channel),
            None => listening.clear(),
        }
        drop(listening);
        self.engine.notify.prune();
        Ok(())
    }

    /// Events queued on this connection's channels, as (channel, JSON payload).
    fn drain_pending(&self) -> PgWireResult<Vec<(String, String)>> {
        let mut listening = self.listening.lock().map_err(|_| poisoned())?;
        let mut out = Vec::new();
        for (channel, rx) in listening.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        let payload = serde_json::to_string(&event)
                            .map_err(|e| user_error("XX000", format!("encode notification: {e}")))?;
                        out.push((channel.clone(), payload));
                    }
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        debug!("listener on {channel} lagged, {n} event(s) dropped");
                    }
                    Err(_) => break,
                }
            }
        }
        Ok(out)
    }

    /// Notifications go out ahead of the next query's result.
    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        for (channel, payload) in self.drain_pending()? {
            let message = NotificationResponse::new(0, channel, payload);
            client
                .send(PgWireBackendMessage::NotificationResponse(message))
                .await?;
        }
        Ok(())
    }

    async fn run(&self, actor: &Actor, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let kind = if cmd.is_write() { "write" } else { "read" };
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "kind" => kind, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUnit {
                id,
                kind,
                name,
                base_price,
                max_guests,
                number,
            } => {
                engine
                    .create_unit(id, kind, name, number, base_price, max_guests)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SetPrice {
                unit_id,
                price,
                expected_version,
            } => {
                engine
                    .set_price(unit_id, price, expected_version)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::LockUnit {
                unit_id,
                expected_version,
            } => {
                engine
                    .lock_unit(unit_id, actor, expected_version)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::UnlockUnit { unit_id } => {
                engine.unlock_unit(unit_id, actor).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertReservation {
                id,
                unit_id,
                range,
                guest,
                guest_count,
            } => {
                engine
                    .create_reservation(id, unit_id, range, guest, guest_count)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::ConfirmReservation { id } => {
                engine.confirm_reservation(id).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::CheckIn { id } => {
                engine.check_in(id).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::CheckOut { id } => {
                engine.check_out(id).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::AdvanceHousekeeping { unit_id, to } => {
                engine
                    .advance_housekeeping(unit_id, to, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::ForceClean { unit_id } => {
                engine.force_clean(unit_id, actor).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertTask {
                id,
                unit_id,
                kind,
                priority,
            } => {
                engine
                    .create_task(id, unit_id, kind, priority, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::StartTask { id } => {
                engine.start_task(id, actor).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::CompleteTask { id } => {
                engine.complete_task(id, actor).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertOffer {
                id,
                unit_id,
                discount,
                start_date,
                end_date,
            } => {
                engine
                    .create_offer(id, unit_id, discount, start_date, end_date)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::ApplyOffer { id } => {
                engine.apply_offer(id).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::RevertOffer { id } => {
                engine.revert_offer(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::SweepOffers { today } => {
                let today = today.unwrap_or_else(|| engine.clock().today());
                let expired = engine.expire_offers(today).await.map_err(engine_err)?;
                Ok(inserted(expired.len()))
            }
            Command::InsertRateModifier { modifier } => {
                engine.add_rate_modifier(modifier).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::DeleteRateModifier { id } => {
                engine.remove_rate_modifier(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::InsertInvoice {
                id,
                reservation_id,
                discount,
                extras,
                draft,
            } => {
                engine
                    .create_invoice(id, reservation_id, extras, discount, draft)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::IssueInvoice { id } => {
                engine.issue_invoice(id).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::RecordPayment { invoice_id, amount } => {
                engine
                    .record_payment(invoice_id, amount)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::CancelInvoice { id } => {
                engine.cancel_invoice(id).await.map_err(engine_err)?;
                Ok(deleted(1))
            }
            Command::SelectUnits { id } => {
                let units = match id {
                    Some(id) => vec![engine.get_unit(id).await.map_err(engine_err)?],
                    None => engine.list_units().await,
                };
                let mut rows = Vec::with_capacity(units.len());
                for unit in units {
                    let live = engine.live_price(unit.id).await.map_err(engine_err)?;
                    rows.push(unit_row(&unit, live));
                }
                rows_response(UNIT_COLUMNS, rows)
            }
            Command::SelectAvailability { query } => {
                let listings = engine.search(&query).await.map_err(engine_err)?;
                rows_response(AVAILABILITY_COLUMNS, listings.iter().map(listing_row).collect())
            }
            Command::SelectCalendar { unit_id, window } => {
                let free = engine
                    .free_calendar(unit_id, window)
                    .await
                    .map_err(engine_err)?;
                let rows = free
                    .iter()
                    .map(|r| vec![text(unit_id), text(r.check_in), text(r.check_out)])
                    .collect();
                rows_response(CALENDAR_COLUMNS, rows)
            }
            Command::SelectReservations { id, unit_id } => {
                let reservations = match id {
                    Some(id) => vec![engine.get_reservation(id).await.map_err(engine_err)?],
                    None => engine.list_reservations(unit_id).await.map_err(engine_err)?,
                };
                rows_response(RESERVATION_COLUMNS, reservations.iter().map(reservation_row).collect())
            }
            Command::SelectInvoices {
                id,
                unit_id,
                reservation_id,
            } => {
                let invoices = match (id, reservation_id) {
                    (Some(id), _) => vec![engine.get_invoice(id).await.map_err(engine_err)?],
                    (None, Some(rid)) => engine
                        .invoices_for_reservation(rid)
                        .await
                        .map_err(engine_err)?,
                    (None, None) => engine.list_invoices(unit_id).await.map_err(engine_err)?,
                };
                rows_response(INVOICE_COLUMNS, invoices.iter().map(invoice_row).collect())
            }
            Command::SelectInvoiceLines { invoice_id } => {
                let invoice = engine.get_invoice(invoice_id).await.map_err(engine_err)?;
                let rows = invoice
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| {
                        vec![
                            text(invoice_id),
                            text(i + 1),
                            text(line.kind),
                            Some(line.description.clone()),
                            text(line.quantity),
                            money(line.unit_price),
                            money(line.line_total),
                        ]
                    })
                    .collect();
                rows_response(INVOICE_LINE_COLUMNS, rows)
            }
            Command::SelectTasks { unit_id } => {
                let tasks = engine.list_tasks(unit_id).await.map_err(engine_err)?;
                rows_response(TASK_COLUMNS, tasks.iter().map(task_row).collect())
            }
            Command::SelectHousekeepingLog { unit_id } => {
                let log = engine.housekeeping_log(unit_id).await.map_err(engine_err)?;
                let rows = log
                    .iter()
                    .map(|entry| {
                        vec![
                            text(unit_id),
                            text(entry.at),
                            text(entry.from),
                            text(entry.to),
                            Some(entry.cause.label()),
                            entry.by.clone(),
                        ]
                    })
                    .collect();
                rows_response(HOUSEKEEPING_LOG_COLUMNS, rows)
            }
            Command::SelectOffers { unit_id } => {
                let offers = engine.list_offers(unit_id).await.map_err(engine_err)?;
                rows_response(OFFER_COLUMNS, offers.iter().map(offer_row).collect())
            }
            Command::SelectRateModifiers => {
                let modifiers = engine.list_rate_modifiers().await;
                rows_response(RATE_MODIFIER_COLUMNS, modifiers.iter().map(modifier_row).collect())
            }
            Command::Listen { channel } => {
                self.subscribe(channel)?;
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.unsubscribe(Some(&channel))?;
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.unsubscribe(None)?;
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn text(v: impl ToString) -> Option<String> {
    Some(v.to_string())
}

fn money(m: Money) -> Option<String> {
    Some(m.minor().to_string())
}

fn unit_row(unit: &Unit, live_price: Money) -> Row {
    vec![
        text(unit.id),
        text(unit.kind),
        Some(unit.name.clone()),
        unit.number.clone(),
        money(unit.base_price),
        money(live_price),
        text(unit.max_guests),
        text(unit.occupancy),
        text(unit.housekeeping),
        text(unit.version),
    ]
}

fn listing_row(listing: &UnitListing) -> Row {
    let unit = &listing.unit;
    vec![
        text(unit.id),
        text(unit.kind),
        Some(unit.name.clone()),
        unit.number.clone(),
        text(unit.max_guests),
        money(listing.nightly_price),
        money(listing.stay_total),
    ]
}

fn reservation_row(r: &Reservation) -> Row {
    vec![
        text(r.id),
        text(r.unit_id),
        text(r.range.check_in),
        text(r.range.check_out),
        text(r.range.nights()),
        Some(r.guest.name.clone()),
        r.guest.email.clone(),
        r.guest.phone.clone(),
        text(r.guest_count),
        money(r.price_at_booking),
        text(r.status),
        text(r.booked_at),
        r.confirmed_at.map(|t| t.to_string()),
        r.actual_check_in.map(|t| t.to_string()),
        r.actual_check_out.map(|t| t.to_string()),
        r.cancelled_at.map(|t| t.to_string()),
    ]
}

fn invoice_row(inv: &Invoice) -> Row {
    vec![
        text(inv.id),
        text(inv.reservation_id),
        text(inv.unit_id),
        money(inv.subtotal),
        money(inv.discount),
        text(inv.tax_rate.bps()),
        money(inv.tax),
        money(inv.total),
        money(inv.amount_paid),
        money(inv.balance()),
        text(inv.status),
        text(inv.created_at),
    ]
}

fn task_row(task: &HousekeepingTask) -> Row {
    vec![
        text(task.id),
        text(task.unit_id),
        text(task.kind),
        text(task.status),
        text(task.priority),
        text(task.created_at),
        task.started_at.map(|t| t.to_string()),
        task.completed_at.map(|t| t.to_string()),
        task.completed_by.clone(),
    ]
}

fn offer_row(offer: &Offer) -> Row {
    let amount = match offer.discount {
        Discount::Percent(bps) => bps.bps() as i64,
        Discount::Fixed(m) => m.minor(),
    };
    vec![
        text(offer.id),
        text(offer.unit_id),
        text(offer.discount.kind_str()),
        text(amount),
        text(offer.start_date),
        text(offer.end_date),
        text(offer.status),
        text(offer.is_applied()),
        offer.recorded_original_price.and_then(money),
    ]
}

fn modifier_row(m: &RateModifier) -> Row {
    let (adjustment, amount) = match m.adjustment {
        Adjustment::Percent(bps) => ("percent", bps as i64),
        Adjustment::Fixed(fixed) => ("fixed", fixed.minor()),
    };
    let (starts, ends, weekdays) = match &m.trigger {
        RateTrigger::Season { start, end } => (text(start), text(end), None),
        RateTrigger::Weekdays(days) => (
            None,
            None,
            Some(days.iter().map(|d| d.to_string().to_lowercase()).collect::<Vec<_>>().join(",")),
        ),
    };
    vec![
        text(m.id),
        Some(m.name.clone()),
        m.unit_kind.map(|k| k.to_string()),
        text(adjustment),
        text(amount),
        starts,
        ends,
        weekdays,
    ]
}

fn schema(columns: &[&str]) -> Vec<FieldInfo> {
    columns
        .iter()
        .map(|name| FieldInfo::new(name.to_string(), None, None, Type::VARCHAR, FieldFormat::Text))
        .collect()
}

fn rows_response(columns: &[&str], rows: Vec<Row>) -> PgWireResult<Response> {
    let schema = Arc::new(schema(columns));
    let rows: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            for field in &row {
                encoder.encode_field(field)?;
            }
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn deleted(rows: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(rows))
}

/// Columns a statement will return, judged from its `FROM` table.
fn result_columns(sql: &str) -> Vec<FieldInfo> {
    let mut tokens = sql.split_whitespace();
    if !tokens.next().is_some_and(|t| t.eq_ignore_ascii_case("SELECT")) {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| !t.eq_ignore_ascii_case("FROM"))
        .nth(1)
        .map(|t| t.trim_matches(|c| c == '"' || c == ';').to_lowercase());
    let columns: &[&str] = match table.as_deref() {
        Some("units") => UNIT_COLUMNS,
        Some("availability") => AVAILABILITY_COLUMNS,
        Some("calendar") => CALENDAR_COLUMNS,
        Some("reservations") => RESERVATION_COLUMNS,
        Some("invoices") => INVOICE_COLUMNS,
        Some("invoice_lines") => INVOICE_LINE_COLUMNS,
        Some("housekeeping_tasks") => TASK_COLUMNS,
        Some("housekeeping_log") => HOUSEKEEPING_LOG_COLUMNS,
        Some("offers") => OFFER_COLUMNS,
        Some("rate_modifiers") => RATE_MODIFIER_COLUMNS,
        _ => &[],
    };
    schema(columns)
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
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
        let actor = self.actor(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let response = self.run(&actor, cmd).await?;
        self.deliver_notifications(client).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
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
        Ok(result_columns(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

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
        let actor = self.actor(client);
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let response = self.run(&actor, cmd).await?;
        self.deliver_notifications(client).await?;
        Ok(response)
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
            result_columns(&target.statement),
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
        Ok(DescribePortalResponse::new(result_columns(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted text, as (byte range, N).
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote inside a literal is an escaped quote and reopens it.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if let Ok(n) = sql[start + 1..j].parse::<usize>() {
                    out.push((start..j, n));
                    i = j;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    out
}

/// Highest $N placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace each $N placeholder with its bound text value, quoted, in a single
/// pass. Bound values are never rescanned.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[last..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        last = range.end;
    }
    out.push_str(&sql[last..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(engine: Arc<Engine>, roster: Arc<StaffRoster>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(engine, roster)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
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

/// Serve one client connection until it closes. Each connection gets its own
/// handler, so LISTEN subscriptions are per connection.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    roster: Arc<StaffRoster>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(InnkeepFactory::new(engine, roster, password));
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

fn poisoned() -> PgWireError {
    user_error("XX000", "listener state poisoned".into())
}

/// SQLSTATE for each engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "40001",
        EngineError::UnitUnavailable { .. } => "23P01",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidRange { .. } | EngineError::Validation(_) => "22023",
        EngineError::Forbidden { .. } => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM units"), 0);
        assert_eq!(count_params("INSERT INTO payments VALUES ($1, $2)"), 2);
        assert_eq!(count_params("SELECT * FROM calendar WHERE unit_id = $1 AND start >= $3 AND \"end\" <= $2"), 3);
    }

    #[test]
    fn placeholders_inside_literals_are_not_counted() {
        assert_eq!(count_params("SELECT * FROM units WHERE id = '$4' AND kind = $1"), 1);
        assert_eq!(count_params("SELECT * FROM offers WHERE id = 'it''s $3'"), 0);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO reservations VALUES ($1, $2, $3)";
        let bound = bind_params(sql, &[Some("pay$2@example.com"), Some("O'Neil $1"), None]);
        assert_eq!(
            bound,
            "INSERT INTO reservations VALUES ('pay$2@example.com', 'O''Neil $1', NULL)"
        );
    }

    #[test]
    fn binding_distinguishes_one_from_ten() {
        let sql = "SELECT $10, $1, '$1'";
        let params: Vec<Option<String>> = (1..=10).map(|n| Some(format!("v{n}"))).collect();
        assert_eq!(bind_params(sql, &params), "SELECT 'v10', 'v1', '$1'");
    }

    #[test]
    fn result_columns_follow_from_table() {
        let cols = result_columns("SELECT * FROM invoice_lines WHERE invoice_id = $1");
        assert_eq!(cols.len(), INVOICE_LINE_COLUMNS.len());
        assert!(result_columns("INSERT INTO units VALUES ($1)").is_empty());
        assert!(result_columns("select * from \"offers\";").len() == OFFER_COLUMNS.len());
    }

    #[test]
    fn engine_errors_map_to_sqlstates() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::Conflict(id)), "40001");
        assert_eq!(sqlstate(&EngineError::NotFound(id)), "P0002");
        assert_eq!(
            sqlstate(&EngineError::UnitUnavailable {
                unit_id: id,
                reason: crate::engine::Unavailability::Locked,
            }),
            "23P01"
        );
        assert_eq!(
            sqlstate(&EngineError::Forbidden {
                actor: "jun".into(),
                action: "lock",
            }),
            "42501"
        );
    }

    #[test]
    fn modifier_rows_list_weekdays() {
        let m = RateModifier {
            id: Ulid::new(),
            name: "Weekend".into(),
            unit_kind: None,
            trigger: RateTrigger::Weekdays(vec![chrono::Weekday::Fri, chrono::Weekday::Sat]),
            adjustment: Adjustment::Percent(1000),
        };
        let row = modifier_row(&m);
        assert_eq!(row[2], None);
        assert_eq!(row[3].as_deref(), Some("percent"));
        assert_eq!(row[7].as_deref(), Some("fri,sat"));
    }
}
