use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record stamps only. Booking intervals are calendar days.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Closed interval of calendar days `[start, end]`. `end = None` extends to +∞.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        debug_assert!(end.is_none_or(|e| start <= e), "DateSpan end must not precede start");
        Self { start, end }
    }

    pub fn closed(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(start, Some(end))
    }

    pub fn open_ended(start: NaiveDate) -> Self {
        Self::new(start, None)
    }

    pub fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    /// Inclusive on both ends: a span ending on day D overlaps one starting on D.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        let self_reaches = self.end.is_none_or(|e| e >= other.start);
        let other_reaches = other.end.is_none_or(|e| e >= self.start);
        self_reaches && other_reaches
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && self.end.is_none_or(|e| day <= e)
    }

    /// Number of covered days, `None` when open-ended.
    pub fn day_count(&self) -> Option<i64> {
        self.end
            .map(|e| e.signed_duration_since(self.start).num_days() + 1)
    }

    /// Every day of a closed span in order. Yields nothing for an open-ended span.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start
            .iter_days()
            .take_while(move |d| end.is_some_and(|e| *d <= e))
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {}]", self.start, end),
            None => write!(f, "[{}, ∞)", self.start),
        }
    }
}

// ── Enumerations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingType {
    /// Definite start and end, priced per day.
    Periodic,
    /// No end date, priced as the flat monthly fee.
    Permanent,
}

impl BookingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::Periodic => "periodic",
            BookingType::Permanent => "permanent",
        }
    }
}

impl FromStr for BookingType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "periodic" => Ok(BookingType::Periodic),
            "permanent" => Ok(BookingType::Permanent),
            _ => Err(ParseEnumError { kind: "booking type", value: s.to_string() }),
        }
    }
}

/// Stored and displayed as the Polish codes (`aktywna`, `zakonczona`, `zalegla`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Completed,
    Overdue,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Active => "aktywna",
            BookingStatus::Completed => "zakonczona",
            BookingStatus::Overdue => "zalegla",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aktywna" | "active" => Ok(BookingStatus::Active),
            "zakonczona" | "completed" => Ok(BookingStatus::Completed),
            "zalegla" | "overdue" => Ok(BookingStatus::Overdue),
            _ => Err(ParseEnumError { kind: "booking status", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "oplacone",
            PaymentStatus::Unpaid => "nieoplacone",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "oplacone" | "paid" => Ok(PaymentStatus::Paid),
            "nieoplacone" | "unpaid" => Ok(PaymentStatus::Unpaid),
            _ => Err(ParseEnumError { kind: "payment status", value: s.to_string() }),
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

/// Authenticated identity on whose behalf an operation runs. There is no default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
    pub daily_rate: Decimal,
    pub monthly_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: Ulid,
    pub owner: UserId,
    pub name: String,
    pub tariff: Tariff,
}

/// Percentage override of a location's daily rate over a closed range of days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingException {
    pub id: Ulid,
    pub location_id: Ulid,
    pub span: DateSpan,
    pub percentage_change: i32,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub owner: UserId,
    pub location_id: Ulid,
    pub spot_id: Ulid,
    pub client_id: Ulid,
    pub span: DateSpan,
    pub kind: BookingType,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub cost: Option<Decimal>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentHistoryEntry {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub previous_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub changed_by: UserId,
    pub changed_at: Ms,
}

// ── Requests ─────────────────────────────────────────────────────

/// Candidate interval for a preview, also the pricing half of a create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRequest {
    pub location_id: Ulid,
    pub spot_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub kind: BookingType,
    pub exclude_booking_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub location_id: Ulid,
    pub spot_id: Ulid,
    pub client_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub kind: BookingType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl BookingPatch {
    pub fn touches_dates(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_dates() && self.status.is_none() && self.payment_status.is_none()
    }
}

// ── Per-spot state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpotState {
    pub id: Ulid,
    pub location_id: Ulid,
    pub number: String,
    /// All bookings on the spot regardless of status, sorted by `span.start`.
    pub bookings: Vec<Booking>,
    /// Payment audit trail, owned by the booking it is keyed on.
    pub payment_history: HashMap<Ulid, Vec<PaymentHistoryEntry>>,
}

impl SpotState {
    pub fn new(id: Ulid, location_id: Ulid, number: String) -> Self {
        Self {
            id,
            location_id,
            number,
            bookings: Vec::new(),
            payment_history: HashMap::new(),
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps `query`, any status.
    /// Binary search skips everything starting after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Booking> {
        let right_bound = match query.end {
            Some(end) => self.bookings.partition_point(|b| b.span.start <= end),
            None => self.bookings.len(),
        };
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.overlaps(query))
    }

    /// Exclusion constraint: the id of an active booking that `candidate` would
    /// overlap, ignoring `candidate` itself. Non-active candidates never collide.
    pub fn exclusion_conflict(&self, candidate: &Booking) -> Option<Ulid> {
        if !candidate.is_active() {
            return None;
        }
        self.overlapping(&candidate.span)
            .find(|b| b.is_active() && b.id != candidate.id)
            .map(|b| b.id)
    }

    /// Insert keeping start order. Refuses a booking that breaks exclusivity.
    pub fn insert_booking(&mut self, booking: Booking) -> Result<(), Ulid> {
        if let Some(conflict) = self.exclusion_conflict(&booking) {
            return Err(conflict);
        }
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
        Ok(())
    }

    /// Swap in a new version of an existing booking, subject to the same constraint.
    pub fn replace_booking(&mut self, booking: Booking) -> Result<(), Ulid> {
        if let Some(conflict) = self.exclusion_conflict(&booking) {
            return Err(conflict);
        }
        if let Some(pos) = self.bookings.iter().position(|b| b.id == booking.id) {
            self.bookings.remove(pos);
        }
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
        Ok(())
    }

    /// Remove a booking together with its payment history.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        self.payment_history.remove(&id);
        Some(self.bookings.remove(pos))
    }

    pub fn record_payment_change(&mut self, entry: PaymentHistoryEntry) {
        self.payment_history
            .entry(entry.booking_id)
            .or_default()
            .push(entry);
    }

    pub fn history(&self, booking_id: Ulid) -> &[PaymentHistoryEntry] {
        self.payment_history
            .get(&booking_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationCreated {
        id: Ulid,
        owner: UserId,
        name: String,
        tariff: Tariff,
    },
    TariffUpdated {
        id: Ulid,
        tariff: Tariff,
    },
    LocationDeleted {
        id: Ulid,
    },
    SpotCreated {
        id: Ulid,
        location_id: Ulid,
        number: String,
    },
    SpotDeleted {
        id: Ulid,
        location_id: Ulid,
    },
    ExceptionAdded {
        exception: PricingException,
    },
    ExceptionRemoved {
        id: Ulid,
        location_id: Ulid,
    },
    /// `history` is empty for fresh bookings and populated by compaction.
    BookingCreated {
        booking: Booking,
        history: Vec<PaymentHistoryEntry>,
    },
    BookingUpdated {
        booking: Booking,
        payment_change: Option<PaymentHistoryEntry>,
    },
    BookingDeleted {
        id: Ulid,
        spot_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayRate {
    pub date: NaiveDate,
    pub rate: Decimal,
    pub exception_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricingResult {
    pub available: bool,
    pub total_cost: Decimal,
    pub details: Vec<DayRate>,
}

impl PricingResult {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            total_cost: Decimal::new(0, 2),
            details: Vec::new(),
        }
    }
}

/// Calendar row for one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSummary {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub spot_number: String,
    pub client_id: Ulid,
    pub span: DateSpan,
    pub kind: BookingType,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn booking(start: &str, end: Option<&str>, status: BookingStatus) -> Booking {
        let kind = if end.is_some() {
            BookingType::Periodic
        } else {
            BookingType::Permanent
        };
        Booking {
            id: Ulid::new(),
            owner: UserId::new("owner"),
            location_id: Ulid::new(),
            spot_id: Ulid::new(),
            client_id: Ulid::new(),
            span: DateSpan::new(d(start), end.map(d)),
            kind,
            status,
            payment_status: PaymentStatus::Unpaid,
            cost: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn spot() -> SpotState {
        SpotState::new(Ulid::new(), Ulid::new(), "A1".into())
    }

    #[test]
    fn span_basics() {
        let s = DateSpan::closed(d("2024-01-01"), d("2024-01-03"));
        assert_eq!(s.day_count(), Some(3));
        assert!(s.contains_day(d("2024-01-01")));
        assert!(s.contains_day(d("2024-01-03"))); // closed
        assert!(!s.contains_day(d("2024-01-04")));
        assert_eq!(s.to_string(), "[2024-01-01, 2024-01-03]");
    }

    #[test]
    fn span_overlap_is_inclusive() {
        let a = DateSpan::closed(d("2024-02-01"), d("2024-02-10"));
        let touching = DateSpan::closed(d("2024-02-10"), d("2024-02-15"));
        let after = DateSpan::closed(d("2024-02-11"), d("2024-02-15"));
        assert!(a.overlaps(&touching));
        assert!(touching.overlaps(&a));
        assert!(!a.overlaps(&after));
        assert!(!after.overlaps(&a));
    }

    #[test]
    fn open_ended_span_reaches_forever() {
        let open = DateSpan::open_ended(d("2024-03-01"));
        let far = DateSpan::closed(d("2090-01-01"), d("2090-01-02"));
        let before = DateSpan::closed(d("2024-01-01"), d("2024-02-29"));
        assert!(open.is_open_ended());
        assert_eq!(open.day_count(), None);
        assert!(open.overlaps(&far));
        assert!(far.overlaps(&open));
        assert!(!open.overlaps(&before));
        assert!(open.overlaps(&DateSpan::open_ended(d("2000-01-01"))));
    }

    #[test]
    fn days_iterates_closed_span_only() {
        let s = DateSpan::closed(d("2024-02-28"), d("2024-03-01"));
        let days: Vec<_> = s.days().collect();
        assert_eq!(days, vec![d("2024-02-28"), d("2024-02-29"), d("2024-03-01")]);

        let single = DateSpan::closed(d("2024-01-01"), d("2024-01-01"));
        assert_eq!(single.days().count(), 1);

        assert_eq!(DateSpan::open_ended(d("2024-01-01")).days().count(), 0);
    }

    #[test]
    fn booking_ordering() {
        let mut st = spot();
        st.insert_booking(booking("2024-03-01", Some("2024-03-02"), BookingStatus::Active)).unwrap();
        st.insert_booking(booking("2024-01-01", Some("2024-01-02"), BookingStatus::Active)).unwrap();
        st.insert_booking(booking("2024-02-01", Some("2024-02-02"), BookingStatus::Active)).unwrap();
        assert_eq!(st.bookings[0].span.start, d("2024-01-01"));
        assert_eq!(st.bookings[1].span.start, d("2024-02-01"));
        assert_eq!(st.bookings[2].span.start, d("2024-03-01"));
    }

    #[test]
    fn insert_refuses_overlapping_active_booking() {
        let mut st = spot();
        let first = booking("2024-02-01", Some("2024-02-10"), BookingStatus::Active);
        let first_id = first.id;
        st.insert_booking(first).unwrap();

        let clash = booking("2024-02-10", Some("2024-02-15"), BookingStatus::Active);
        assert_eq!(st.insert_booking(clash), Err(first_id));
        assert_eq!(st.bookings.len(), 1);
    }

    #[test]
    fn inactive_bookings_do_not_collide() {
        let mut st = spot();
        st.insert_booking(booking("2024-02-01", Some("2024-02-10"), BookingStatus::Completed)).unwrap();
        st.insert_booking(booking("2024-02-05", Some("2024-02-06"), BookingStatus::Active)).unwrap();
        // An overdue record may sit on top of an active one.
        st.insert_booking(booking("2024-02-05", Some("2024-02-06"), BookingStatus::Overdue)).unwrap();
        assert_eq!(st.bookings.len(), 3);
    }

    #[test]
    fn replace_booking_ignores_itself() {
        let mut st = spot();
        let mut b = booking("2024-02-01", Some("2024-02-10"), BookingStatus::Active);
        st.insert_booking(b.clone()).unwrap();
        b.span = DateSpan::closed(d("2024-02-03"), d("2024-02-12"));
        st.replace_booking(b.clone()).unwrap();
        assert_eq!(st.bookings.len(), 1);
        assert_eq!(st.bookings[0].span, b.span);
    }

    #[test]
    fn remove_booking_cascades_history() {
        let mut st = spot();
        let b = booking("2024-02-01", Some("2024-02-10"), BookingStatus::Active);
        let id = b.id;
        st.insert_booking(b).unwrap();
        st.record_payment_change(PaymentHistoryEntry {
            id: Ulid::new(),
            booking_id: id,
            previous_status: PaymentStatus::Unpaid,
            new_status: PaymentStatus::Paid,
            changed_by: UserId::new("owner"),
            changed_at: 1,
        });
        assert_eq!(st.history(id).len(), 1);

        assert!(st.remove_booking(id).is_some());
        assert!(st.history(id).is_empty());
        assert!(st.remove_booking(id).is_none());
    }

    #[test]
    fn overlapping_skips_future_and_past() {
        let mut st = spot();
        st.insert_booking(booking("2024-01-01", Some("2024-01-05"), BookingStatus::Active)).unwrap();
        st.insert_booking(booking("2024-01-10", Some("2024-01-20"), BookingStatus::Active)).unwrap();
        st.insert_booking(booking("2024-03-01", Some("2024-03-05"), BookingStatus::Active)).unwrap();

        let query = DateSpan::closed(d("2024-01-15"), d("2024-02-01"));
        let hits: Vec<_> = st.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span.start, d("2024-01-10"));
    }

    #[test]
    fn overlapping_open_query_sees_everything_after_start() {
        let mut st = spot();
        st.insert_booking(booking("2024-01-01", Some("2024-01-05"), BookingStatus::Active)).unwrap();
        st.insert_booking(booking("2030-01-01", Some("2030-01-05"), BookingStatus::Active)).unwrap();
        let query = DateSpan::open_ended(d("2024-01-05"));
        assert_eq!(st.overlapping(&query).count(), 2);
    }

    #[test]
    fn enum_codes_parse_both_languages() {
        assert_eq!("aktywna".parse::<BookingStatus>().unwrap(), BookingStatus::Active);
        assert_eq!("COMPLETED".parse::<BookingStatus>().unwrap(), BookingStatus::Completed);
        assert_eq!("oplacone".parse::<PaymentStatus>().unwrap(), PaymentStatus::Paid);
        assert_eq!("permanent".parse::<BookingType>().unwrap(), BookingType::Permanent);
        let err = "weekly".parse::<BookingType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown booking type: weekly");
        assert_eq!(BookingStatus::Overdue.as_str(), "zalegla");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let mut b = booking("2024-01-01", None, BookingStatus::Active);
        b.cost = Some(Decimal::new(49999, 2));
        let event = Event::BookingCreated { booking: b, history: Vec::new() };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
