use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::money::{Bps, Money, TaxRate};

/// Unix milliseconds, used for real-world instants (arrivals, payments, audit).
pub type Ms = i64;

/// Half-open stay `[check_in, check_out)`. The check-out day is free for the
/// next arrival, so same-day turnover never overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    /// Unchecked; the engine rejects degenerate ranges with `InvalidRange`.
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    pub fn is_valid(&self) -> bool {
        self.check_in < self.check_out
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_night(&self, night: NaiveDate) -> bool {
        self.check_in <= night && night < self.check_out
    }

    pub fn each_night(&self) -> impl Iterator<Item = NaiveDate> {
        self.check_in
            .iter_days()
            .take(self.nights().max(0) as usize)
    }
}

impl std::fmt::Display for StayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

/// Lowercase wire labels for closed status enums.
macro_rules! labels {
    ($name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Room,
    Villa,
}

labels!(UnitKind { Room => "room", Villa => "villa" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupancyStatus {
    Available,
    Reserved,
    Confirmed,
    CheckedIn,
    /// Never entered by the engine: checkout frees the unit immediately.
    Departed,
    Locked,
}

labels!(OccupancyStatus {
    Available => "available",
    Reserved => "reserved",
    Confirmed => "confirmed",
    CheckedIn => "checked_in",
    Departed => "departed",
    Locked => "locked",
});

impl OccupancyStatus {
    pub fn can_lock(self) -> bool {
        matches!(self, OccupancyStatus::Available | OccupancyStatus::Reserved)
    }

    pub fn awaits_arrival(self) -> bool {
        matches!(self, OccupancyStatus::Reserved | OccupancyStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HousekeepingStatus {
    Clean,
    Dirty,
    Cleaning,
    Inspection,
    Maintenance,
}

labels!(HousekeepingStatus {
    Clean => "clean",
    Dirty => "dirty",
    Cleaning => "cleaning",
    Inspection => "inspection",
    Maintenance => "maintenance",
});

/// Who may perform a housekeeping edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    Staff,
    Manager,
}

impl HousekeepingStatus {
    /// Transition table for manual moves. `None` means the edge does not exist;
    /// `Clean -> Dirty` is reserved for checkout and arbitrary jumps for force-clean.
    pub fn clearance_to(self, to: HousekeepingStatus) -> Option<Clearance> {
        use HousekeepingStatus::*;
        match (self, to) {
            (Dirty, Cleaning) | (Cleaning, Inspection) | (Inspection, Clean) => Some(Clearance::Staff),
            (Maintenance, Clean) => Some(Clearance::Manager),
            (from, Maintenance) if from != Maintenance => Some(Clearance::Manager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    New,
    CheckedIn,
    Departed,
    Cancelled,
}

labels!(ReservationStatus {
    New => "new",
    CheckedIn => "checked_in",
    Departed => "departed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationAction {
    Confirm,
    Arrive,
    Depart,
    Cancel,
}

labels!(ReservationAction {
    Confirm => "confirm",
    Arrive => "check in",
    Depart => "check out",
    Cancel => "cancel",
});

impl ReservationStatus {
    /// Single transition table for the stay lifecycle.
    pub fn next(self, action: ReservationAction) -> Option<ReservationStatus> {
        use ReservationAction as A;
        use ReservationStatus as S;
        match (self, action) {
            (S::New, A::Confirm) => Some(S::New),
            (S::New, A::Arrive) => Some(S::CheckedIn),
            (S::CheckedIn, A::Depart) => Some(S::Departed),
            (S::New, A::Cancel) => Some(S::Cancelled),
            _ => None,
        }
    }

    /// Cancelled and departed stays never block availability.
    pub fn blocks_availability(self) -> bool {
        matches!(self, ReservationStatus::New | ReservationStatus::CheckedIn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Ulid,
    pub kind: UnitKind,
    pub name: String,
    pub number: Option<String>,
    pub base_price: Money,
    pub max_guests: u32,
    pub occupancy: OccupancyStatus,
    pub housekeeping: HousekeepingStatus,
    /// Bumped by every committed change to the unit's entity set.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub range: StayRange,
    pub guest: Guest,
    pub guest_count: u32,
    pub price_at_booking: Money,
    /// Resolved price of each night, captured when the stay was booked.
    pub nightly_rates: Vec<Money>,
    pub status: ReservationStatus,
    pub booked_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub actual_check_in: Option<Ms>,
    pub actual_check_out: Option<Ms>,
    pub cancelled_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discount {
    Percent(Bps),
    Fixed(Money),
}

impl Discount {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Discount::Percent(_) => "percent",
            Discount::Fixed(_) => "fixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Active,
    Expired,
}

labels!(OfferStatus { Active => "active", Expired => "expired" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub discount: Discount,
    /// Inclusive on both ends.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: OfferStatus,
    /// Set once when first applied, cleared on revert. Applied iff `Some`.
    pub recorded_original_price: Option<Money>,
}

impl Offer {
    pub fn is_applied(&self) -> bool {
        self.recorded_original_price.is_some()
    }

    pub fn covers(&self, night: NaiveDate) -> bool {
        self.start_date <= night && night <= self.end_date
    }

    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.end_date < today
    }
}

/// Signed adjustment applied by a rate modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adjustment {
    /// Signed basis points: 2000 is +20%, -1000 is -10%.
    Percent(i32),
    Fixed(Money),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateTrigger {
    /// Inclusive date window.
    Season { start: NaiveDate, end: NaiveDate },
    Weekdays(Vec<Weekday>),
}

/// Seasonal or weekend rate rule, applied before any offer discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateModifier {
    pub id: Ulid,
    pub name: String,
    /// `None` applies to every unit kind.
    pub unit_kind: Option<UnitKind>,
    pub trigger: RateTrigger,
    pub adjustment: Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Accommodation,
    Food,
    Service,
    Other,
}

labels!(LineItemKind {
    Accommodation => "accommodation",
    Food => "food",
    Service => "service",
    Other => "other",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl LineItem {
    /// `None` when `unit_price * quantity` does not fit in i64 minor units.
    pub fn new(kind: LineItemKind, description: String, quantity: u32, unit_price: Money) -> Option<Self> {
        let line_total = unit_price.checked_mul(quantity as i64)?;
        Some(Self {
            kind,
            description,
            quantity,
            unit_price,
            line_total,
        })
    }
}

/// Caller-supplied extra charge (minibar, dinner, transfer...).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LineItemDraft {
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

labels!(InvoiceStatus {
    Draft => "draft",
    Issued => "issued",
    PartiallyPaid => "partially_paid",
    Paid => "paid",
    Cancelled => "cancelled",
});

impl InvoiceStatus {
    pub fn accepts_payment(self) -> bool {
        matches!(self, InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid)
    }

    /// Status implied by the amounts; never set independently.
    pub fn from_amounts(amount_paid: Money, total: Money) -> InvoiceStatus {
        if !(total - amount_paid).is_positive() {
            InvoiceStatus::Paid
        } else if amount_paid.is_positive() {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Issued
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub amount: Money,
    pub at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub unit_id: Ulid,
    pub lines: Vec<LineItem>,
    pub subtotal: Money,
    pub discount: Money,
    pub tax_rate: TaxRate,
    pub tax: Money,
    pub total: Money,
    pub amount_paid: Money,
    pub payments: Vec<Payment>,
    pub status: InvoiceStatus,
    pub created_at: Ms,
}

impl Invoice {
    pub fn balance(&self) -> Money {
        self.total - self.amount_paid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Clean,
    DeepClean,
    Maintenance,
    Inspection,
}

labels!(TaskKind {
    Clean => "clean",
    DeepClean => "deep_clean",
    Maintenance => "maintenance",
    Inspection => "inspection",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
}

labels!(TaskStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Done => "done",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

labels!(TaskPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeepingTask {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_at: Ms,
    pub started_at: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub completed_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HousekeepingCause {
    Advance,
    Checkout,
    ForcedClean,
    TaskCreated(Ulid),
    TaskStarted(Ulid),
    TaskCompleted(Ulid),
}

impl HousekeepingCause {
    pub fn label(&self) -> String {
        match self {
            HousekeepingCause::Advance => "advance".into(),
            HousekeepingCause::Checkout => "checkout".into(),
            HousekeepingCause::ForcedClean => "forced_clean".into(),
            HousekeepingCause::TaskCreated(id) => format!("task_created:{id}"),
            HousekeepingCause::TaskStarted(id) => format!("task_started:{id}"),
            HousekeepingCause::TaskCompleted(id) => format!("task_completed:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeepingLogEntry {
    pub at: Ms,
    pub from: HousekeepingStatus,
    pub to: HousekeepingStatus,
    pub cause: HousekeepingCause,
    pub by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    Manager,
}

/// Operator identity supplied by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn staff(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Staff,
        }
    }

    pub fn manager(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Manager,
        }
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }

    pub fn has(&self, clearance: Clearance) -> bool {
        match clearance {
            Clearance::Staff => true,
            Clearance::Manager => self.is_manager(),
        }
    }
}

/// A unit and every entity that hangs off it. One lock guards the whole set,
/// so each command is serialisable per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub unit: Unit,
    /// Sorted by `range.check_in`.
    pub reservations: Vec<Reservation>,
    pub offers: Vec<Offer>,
    pub tasks: Vec<HousekeepingTask>,
    pub invoices: Vec<Invoice>,
    pub housekeeping_log: Vec<HousekeepingLogEntry>,
}

impl UnitState {
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            reservations: Vec::new(),
            offers: Vec::new(),
            tasks: Vec::new(),
            invoices: Vec::new(),
            housekeeping_log: Vec::new(),
        }
    }

    /// Insert maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.range.check_in, |r| r.range.check_in)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Reservations (any status) whose range overlaps `query`.
    /// Everything at or past `right_bound` checks in on or after `query.check_out`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.check_in < query.check_out);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.check_out > query.check_in)
    }

    /// First reservation that still holds the unit during `query`.
    pub fn blocking(&self, query: &StayRange) -> Option<&Reservation> {
        self.overlapping(query)
            .find(|r| r.status.blocks_availability())
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    pub fn offer(&self, id: &Ulid) -> Option<&Offer> {
        self.offers.iter().find(|o| o.id == *id)
    }

    pub fn offer_mut(&mut self, id: &Ulid) -> Option<&mut Offer> {
        self.offers.iter_mut().find(|o| o.id == *id)
    }

    /// The single discount currently affecting the live price, if any.
    pub fn applied_offer(&self) -> Option<&Offer> {
        self.offers
            .iter()
            .find(|o| o.status == OfferStatus::Active && o.is_applied())
    }

    pub fn task(&self, id: &Ulid) -> Option<&HousekeepingTask> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    pub fn task_mut(&mut self, id: &Ulid) -> Option<&mut HousekeepingTask> {
        self.tasks.iter_mut().find(|t| t.id == *id)
    }

    pub fn invoice(&self, id: &Ulid) -> Option<&Invoice> {
        self.invoices.iter().find(|i| i.id == *id)
    }

    pub fn invoice_mut(&mut self, id: &Ulid) -> Option<&mut Invoice> {
        self.invoices.iter_mut().find(|i| i.id == *id)
    }

    /// The live (non-cancelled) invoice for a stay.
    pub fn invoice_for(&self, reservation_id: &Ulid) -> Option<&Invoice> {
        self.invoices
            .iter()
            .find(|i| i.reservation_id == *reservation_id && i.status != InvoiceStatus::Cancelled)
    }

    /// Re-derive occupancy from the reservation set. Locked units stay locked.
    pub fn settle_occupancy(&mut self) {
        if self.unit.occupancy == OccupancyStatus::Locked {
            return;
        }
        let seated = self
            .reservations
            .iter()
            .any(|r| r.status == ReservationStatus::CheckedIn);
        self.unit.occupancy = if seated {
            OccupancyStatus::CheckedIn
        } else {
            match self
                .reservations
                .iter()
                .find(|r| r.status == ReservationStatus::New)
            {
                Some(r) if r.confirmed_at.is_some() => OccupancyStatus::Confirmed,
                Some(_) => OccupancyStatus::Reserved,
                None => OccupancyStatus::Available,
            }
        };
    }

    pub fn set_housekeeping(
        &mut self,
        to: HousekeepingStatus,
        cause: HousekeepingCause,
        by: Option<String>,
        at: Ms,
    ) {
        let from = self.unit.housekeeping;
        self.unit.housekeeping = to;
        self.housekeeping_log.push(HousekeepingLogEntry { at, from, to, cause, by });
    }
}

/// Journal record. One record per command, so multi-entity changes commit
/// or fail together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UnitCreated {
        unit: Unit,
    },
    UnitPriceSet {
        unit_id: Ulid,
        price: Money,
    },
    UnitLocked {
        unit_id: Ulid,
        by: String,
        at: Ms,
    },
    UnitUnlocked {
        unit_id: Ulid,
        by: String,
        at: Ms,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationConfirmed {
        id: Ulid,
        unit_id: Ulid,
        at: Ms,
    },
    GuestArrived {
        id: Ulid,
        unit_id: Ulid,
        at: Ms,
    },
    /// Departure fan-out: stay closed, unit freed, marked dirty, cleaning queued.
    GuestDeparted {
        id: Ulid,
        unit_id: Ulid,
        task_id: Ulid,
        at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        unit_id: Ulid,
        at: Ms,
    },
    HousekeepingChanged {
        unit_id: Ulid,
        to: HousekeepingStatus,
        cause: HousekeepingCause,
        by: Option<String>,
        at: Ms,
    },
    TaskCreated {
        task: HousekeepingTask,
        by: Option<String>,
    },
    TaskStarted {
        id: Ulid,
        unit_id: Ulid,
        by: String,
        at: Ms,
    },
    TaskCompleted {
        id: Ulid,
        unit_id: Ulid,
        by: String,
        at: Ms,
    },
    OfferCreated {
        offer: Offer,
    },
    OfferApplied {
        id: Ulid,
        unit_id: Ulid,
        recorded_original_price: Money,
    },
    OfferReverted {
        id: Ulid,
        unit_id: Ulid,
    },
    OfferExpired {
        id: Ulid,
        unit_id: Ulid,
    },
    RateModifierAdded {
        modifier: RateModifier,
    },
    RateModifierRemoved {
        id: Ulid,
    },
    InvoiceCreated {
        invoice: Invoice,
    },
    InvoiceIssued {
        id: Ulid,
        unit_id: Ulid,
    },
    PaymentRecorded {
        invoice_id: Ulid,
        unit_id: Ulid,
        amount: Money,
        at: Ms,
    },
    InvoiceCancelled {
        id: Ulid,
        unit_id: Ulid,
    },
    /// Written by compaction: the complete state of one unit.
    UnitSnapshot {
        state: UnitState,
    },
}

impl Event {
    /// The unit whose lock guards this record. `None` for registry-level
    /// records handled outside any single unit.
    pub fn unit_id(&self) -> Option<Ulid> {
        match self {
            Event::UnitPriceSet { unit_id, .. }
            | Event::UnitLocked { unit_id, .. }
            | Event::UnitUnlocked { unit_id, .. }
            | Event::ReservationConfirmed { unit_id, .. }
            | Event::GuestArrived { unit_id, .. }
            | Event::GuestDeparted { unit_id, .. }
            | Event::ReservationCancelled { unit_id, .. }
            | Event::HousekeepingChanged { unit_id, .. }
            | Event::TaskStarted { unit_id, .. }
            | Event::TaskCompleted { unit_id, .. }
            | Event::OfferApplied { unit_id, .. }
            | Event::OfferReverted { unit_id, .. }
            | Event::OfferExpired { unit_id, .. }
            | Event::InvoiceIssued { unit_id, .. }
            | Event::PaymentRecorded { unit_id, .. }
            | Event::InvoiceCancelled { unit_id, .. } => Some(*unit_id),
            Event::ReservationCreated { reservation } => Some(reservation.unit_id),
            Event::TaskCreated { task, .. } => Some(task.unit_id),
            Event::OfferCreated { offer } => Some(offer.unit_id),
            Event::InvoiceCreated { invoice } => Some(invoice.unit_id),
            Event::UnitCreated { unit } => Some(unit.id),
            Event::UnitSnapshot { state } => Some(state.unit.id),
            Event::RateModifierAdded { .. } | Event::RateModifierRemoved { .. } => None,
        }
    }
}

// ── Query inputs and results ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub range: StayRange,
    pub kind: Option<UnitKind>,
    pub guest_count: u32,
    pub price_min: Option<Money>,
    pub price_max: Option<Money>,
    pub text: Option<String>,
}

impl SearchQuery {
    pub fn new(range: StayRange) -> Self {
        Self {
            range,
            kind: None,
            guest_count: 1,
            price_min: None,
            price_max: None,
            text: None,
        }
    }
}

/// A unit as the catalog shows it for a given stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitListing {
    pub unit: Unit,
    /// Average resolved nightly rate over the stay.
    pub nightly_price: Money,
    pub stay_total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub reservation: Reservation,
    pub cleaning_task: HousekeepingTask,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn range(a: &str, b: &str) -> StayRange {
        StayRange::new(d(a), d(b))
    }

    fn unit() -> Unit {
        Unit {
            id: Ulid::new(),
            kind: UnitKind::Room,
            name: "Deluxe".into(),
            number: Some("101".into()),
            base_price: Money::from_major(500),
            max_guests: 2,
            occupancy: OccupancyStatus::Available,
            housekeeping: HousekeepingStatus::Clean,
            version: 0,
        }
    }

    fn reservation(unit_id: Ulid, r: StayRange, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            unit_id,
            range: r,
            guest: Guest {
                name: "Ada".into(),
                email: Some("ada@example.com".into()),
                phone: None,
            },
            guest_count: 2,
            price_at_booking: Money::from_major(500),
            nightly_rates: vec![],
            status,
            booked_at: 0,
            confirmed_at: None,
            actual_check_in: None,
            actual_check_out: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn stay_range_basics() {
        let r = range("2025-03-01", "2025-03-04");
        assert!(r.is_valid());
        assert_eq!(r.nights(), 3);
        assert!(r.contains_night(d("2025-03-01")));
        assert!(r.contains_night(d("2025-03-03")));
        assert!(!r.contains_night(d("2025-03-04"))); // half-open
        let nights: Vec<_> = r.each_night().collect();
        assert_eq!(nights, vec![d("2025-03-01"), d("2025-03-02"), d("2025-03-03")]);
    }

    #[test]
    fn degenerate_ranges_are_invalid() {
        assert!(!range("2025-03-01", "2025-03-01").is_valid());
        assert!(!range("2025-03-05", "2025-03-01").is_valid());
        assert_eq!(range("2025-03-05", "2025-03-01").each_night().count(), 0);
    }

    #[test]
    fn same_day_turnover_does_not_overlap() {
        let a = range("2025-01-01", "2025-01-05");
        let b = range("2025-01-05", "2025-01-10");
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        let c = range("2025-01-04", "2025-01-06");
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut st = UnitState::new(unit());
        let uid = st.unit.id;
        st.insert_reservation(reservation(uid, range("2025-02-01", "2025-02-03"), ReservationStatus::New));
        st.insert_reservation(reservation(uid, range("2025-01-01", "2025-01-03"), ReservationStatus::New));
        st.insert_reservation(reservation(uid, range("2025-01-10", "2025-01-15"), ReservationStatus::New));
        assert_eq!(st.reservations[0].range.check_in, d("2025-01-01"));
        assert_eq!(st.reservations[2].range.check_in, d("2025-02-01"));

        let hits: Vec<_> = st.overlapping(&range("2025-01-12", "2025-01-20")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range, range("2025-01-10", "2025-01-15"));
    }

    #[test]
    fn blocking_ignores_cancelled_and_departed() {
        let mut st = UnitState::new(unit());
        let uid = st.unit.id;
        st.insert_reservation(reservation(uid, range("2025-01-01", "2025-01-05"), ReservationStatus::Cancelled));
        st.insert_reservation(reservation(uid, range("2025-01-02", "2025-01-04"), ReservationStatus::Departed));
        assert!(st.blocking(&range("2025-01-01", "2025-01-05")).is_none());
        st.insert_reservation(reservation(uid, range("2025-01-03", "2025-01-04"), ReservationStatus::CheckedIn));
        assert!(st.blocking(&range("2025-01-01", "2025-01-05")).is_some());
    }

    #[test]
    fn settle_occupancy_follows_reservations() {
        let mut st = UnitState::new(unit());
        let uid = st.unit.id;
        st.settle_occupancy();
        assert_eq!(st.unit.occupancy, OccupancyStatus::Available);

        let mut r = reservation(uid, range("2025-01-01", "2025-01-05"), ReservationStatus::New);
        st.insert_reservation(r.clone());
        st.settle_occupancy();
        assert_eq!(st.unit.occupancy, OccupancyStatus::Reserved);

        r.confirmed_at = Some(1);
        *st.reservation_mut(&r.id).unwrap() = r.clone();
        st.settle_occupancy();
        assert_eq!(st.unit.occupancy, OccupancyStatus::Confirmed);

        st.reservation_mut(&r.id).unwrap().status = ReservationStatus::CheckedIn;
        st.settle_occupancy();
        assert_eq!(st.unit.occupancy, OccupancyStatus::CheckedIn);

        st.reservation_mut(&r.id).unwrap().status = ReservationStatus::Departed;
        st.settle_occupancy();
        assert_eq!(st.unit.occupancy, OccupancyStatus::Available);
    }

    #[test]
    fn settle_occupancy_keeps_lock() {
        let mut st = UnitState::new(unit());
        st.unit.occupancy = OccupancyStatus::Locked;
        st.settle_occupancy();
        assert_eq!(st.unit.occupancy, OccupancyStatus::Locked);
    }

    #[test]
    fn reservation_transition_table() {
        use ReservationAction as A;
        use ReservationStatus as S;
        assert_eq!(S::New.next(A::Arrive), Some(S::CheckedIn));
        assert_eq!(S::CheckedIn.next(A::Depart), Some(S::Departed));
        assert_eq!(S::New.next(A::Cancel), Some(S::Cancelled));
        assert_eq!(S::CheckedIn.next(A::Cancel), None);
        assert_eq!(S::New.next(A::Depart), None);
        assert_eq!(S::Departed.next(A::Arrive), None);
        assert_eq!(S::Cancelled.next(A::Confirm), None);
    }

    #[test]
    fn housekeeping_transition_table() {
        use HousekeepingStatus::*;
        assert_eq!(Dirty.clearance_to(Cleaning), Some(Clearance::Staff));
        assert_eq!(Cleaning.clearance_to(Inspection), Some(Clearance::Staff));
        assert_eq!(Inspection.clearance_to(Clean), Some(Clearance::Staff));
        assert_eq!(Clean.clearance_to(Maintenance), Some(Clearance::Manager));
        assert_eq!(Dirty.clearance_to(Maintenance), Some(Clearance::Manager));
        assert_eq!(Maintenance.clearance_to(Clean), Some(Clearance::Manager));
        assert_eq!(Dirty.clearance_to(Clean), None);
        assert_eq!(Clean.clearance_to(Dirty), None);
        assert_eq!(Maintenance.clearance_to(Maintenance), None);
        assert_eq!(Maintenance.clearance_to(Dirty), None);
    }

    #[test]
    fn invoice_status_from_amounts() {
        let total = Money::from_major(1725);
        assert_eq!(InvoiceStatus::from_amounts(Money::zero(), total), InvoiceStatus::Issued);
        assert_eq!(InvoiceStatus::from_amounts(Money::from_major(100), total), InvoiceStatus::PartiallyPaid);
        assert_eq!(InvoiceStatus::from_amounts(total, total), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::from_amounts(total + Money::from_major(1), total), InvoiceStatus::Paid);
    }

    #[test]
    fn labels_roundtrip_through_parse() {
        for s in [OccupancyStatus::Available, OccupancyStatus::CheckedIn, OccupancyStatus::Locked] {
            assert_eq!(OccupancyStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskKind::parse("Deep_Clean"), Some(TaskKind::DeepClean));
        assert_eq!(UnitKind::parse("villa"), Some(UnitKind::Villa));
        assert_eq!(UnitKind::parse("cabin"), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation(Ulid::new(), range("2025-03-01", "2025-03-04"), ReservationStatus::New),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
