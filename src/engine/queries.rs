use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{self, find_conflict};
use super::pricing::quote;
use super::validation::{booking_span, query_window, validate_caller};
use super::{Engine, EngineError};

impl Engine {
    /// Availability first, then cost from the location's current tariff.
    /// A taken spot is `Conflict` with the blocking booking.
    pub(super) fn price_on_spot(
        &self,
        location_id: Ulid,
        spot: &SpotState,
        span: &DateSpan,
        kind: BookingType,
        exclude: Option<Ulid>,
    ) -> Result<PricingResult, EngineError> {
        let tariff = self
            .catalog
            .tariff(&location_id)
            .ok_or(EngineError::NotFound(location_id))?;
        if let Some(existing) = find_conflict(spot, span, exclude) {
            return Err(EngineError::Conflict(existing));
        }
        let exceptions = match kind {
            BookingType::Periodic => self.catalog.exceptions_in_range(&location_id, span),
            BookingType::Permanent => Vec::new(),
        };
        Ok(quote(&tariff, &exceptions, span, kind))
    }

    /// Quote a candidate booking without storing anything. A taken spot is
    /// reported as `available = false`, not as an error.
    pub async fn preview(
        &self,
        caller: &UserId,
        request: &PreviewRequest,
    ) -> Result<PricingResult, EngineError> {
        validate_caller(caller)?;
        let span = booking_span(request.start_date, request.end_date, request.kind)?;
        let (location, spot) = self.resolve_spot(caller, request.location_id, request.spot_id)?;
        let guard = spot.read().await;
        let priced = self.price_on_spot(
            location.id,
            &guard,
            &span,
            request.kind,
            request.exclude_booking_id,
        );
        match priced {
            Err(EngineError::Conflict(_)) => Ok(PricingResult::unavailable()),
            other => other,
        }
    }

    /// Whether `[start, end]` (or `[start, ∞)`) is free of active bookings on a spot.
    pub async fn is_available(
        &self,
        caller: &UserId,
        spot_id: Ulid,
        start: NaiveDate,
        end: Option<NaiveDate>,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        validate_caller(caller)?;
        if let Some(end) = end
            && end < start
        {
            return Err(EngineError::validation(
                "end_date",
                "end_date must not be before start_date",
            ));
        }
        let location_id = self
            .catalog
            .spot_location(&spot_id)
            .ok_or(EngineError::NotFound(spot_id))?;
        self.owned_location(caller, location_id)
            .map_err(|_| EngineError::NotFound(spot_id))?;
        let spot = self.get_spot(&spot_id).ok_or(EngineError::NotFound(spot_id))?;
        let guard = spot.read().await;
        Ok(availability::is_available(
            &guard,
            &DateSpan::new(start, end),
            exclude,
        ))
    }

    /// Calendar view: every booking of a location, any status, overlapping
    /// `[range_start, range_end]`. Ordered by start date, then spot number.
    pub async fn list_bookings(
        &self,
        caller: &UserId,
        location_id: Ulid,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<Vec<BookingSummary>, EngineError> {
        validate_caller(caller)?;
        let window = query_window(range_start, range_end)?;
        self.owned_location(caller, location_id)?;

        let mut rows = Vec::new();
        for spot_id in self.catalog.spot_ids(&location_id) {
            let Some(spot) = self.get_spot(&spot_id) else {
                continue;
            };
            let guard = spot.read().await;
            rows.extend(guard.overlapping(&window).map(|b| BookingSummary {
                id: b.id,
                spot_id: guard.id,
                spot_number: guard.number.clone(),
                client_id: b.client_id,
                span: b.span,
                kind: b.kind,
                status: b.status,
                payment_status: b.payment_status,
            }));
        }
        rows.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then_with(|| a.spot_number.cmp(&b.spot_number))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    pub async fn get_booking(&self, caller: &UserId, id: Ulid) -> Result<Booking, EngineError> {
        validate_caller(caller)?;
        let guard = self.resolve_booking_read(caller, id).await?;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Payment status changes of a booking, newest first.
    pub async fn payment_history(
        &self,
        caller: &UserId,
        booking_id: Ulid,
    ) -> Result<Vec<PaymentHistoryEntry>, EngineError> {
        validate_caller(caller)?;
        let guard = self.resolve_booking_read(caller, booking_id).await?;
        let mut entries = guard.history(booking_id).to_vec();
        entries.sort_by(|a, b| b.changed_at.cmp(&a.changed_at).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }

    /// Locations owned by `caller`, by name.
    pub fn list_locations(&self, caller: &UserId) -> Vec<Location> {
        let mut locations: Vec<Location> = self
            .catalog
            .locations()
            .into_iter()
            .filter(|l| &l.owner == caller)
            .collect();
        locations.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        locations
    }

    /// Pricing exceptions of a location owned by `caller`, in creation order.
    pub fn list_pricing_exceptions(
        &self,
        caller: &UserId,
        location_id: Ulid,
    ) -> Result<Vec<PricingException>, EngineError> {
        self.owned_location(caller, location_id)?;
        Ok(self.catalog.exceptions(&location_id))
    }
}
