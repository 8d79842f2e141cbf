use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::find_conflict;
use super::validation::{
    booking_span, exception_span, validate_caller, validate_name, validate_tariff,
};
use super::{Engine, EngineError, WalControl};

/// Refusal because `existing` already holds the spot. Counted for the conflicts metric.
fn conflict(spot_id: Ulid, existing: Ulid) -> EngineError {
    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    debug!("spot {spot_id} taken by active booking {existing}");
    EngineError::Conflict(existing)
}

fn refused(spot_id: Ulid, err: EngineError) -> EngineError {
    match err {
        EngineError::Conflict(existing) => conflict(spot_id, existing),
        other => other,
    }
}

impl Engine {
    // ── Locations ────────────────────────────────────────────

    pub async fn create_location(
        &self,
        caller: &UserId,
        id: Ulid,
        name: String,
        tariff: Tariff,
    ) -> Result<(), EngineError> {
        validate_caller(caller)?;
        validate_name("name", &name)?;
        validate_tariff(&tariff)?;
        let _gate = self.write_gate.read().await;
        if self.catalog.location_count() >= MAX_LOCATIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        if self.catalog.contains_location(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::LocationCreated {
            id,
            owner: caller.clone(),
            name,
            tariff,
        };
        self.persist_catalog(&event).await?;
        info!("location {id} created by {caller}");
        Ok(())
    }

    /// Change the rates. Costs already stored on bookings are not recomputed.
    pub async fn update_tariff(
        &self,
        caller: &UserId,
        id: Ulid,
        daily_rate: Option<Decimal>,
        monthly_rate: Option<Decimal>,
    ) -> Result<Tariff, EngineError> {
        validate_caller(caller)?;
        let _gate = self.write_gate.read().await;
        let location = self.owned_location(caller, id)?;
        let tariff = Tariff {
            daily_rate: daily_rate.unwrap_or(location.tariff.daily_rate),
            monthly_rate: monthly_rate.unwrap_or(location.tariff.monthly_rate),
        };
        validate_tariff(&tariff)?;
        if tariff == location.tariff {
            return Ok(tariff);
        }

        self.persist_catalog(&Event::TariffUpdated { id, tariff }).await?;
        Ok(tariff)
    }

    /// Refused while spots remain. Pricing exceptions go with the location.
    /// Runs alone so no spot or exception can be added to it meanwhile.
    pub async fn delete_location(&self, caller: &UserId, id: Ulid) -> Result<(), EngineError> {
        validate_caller(caller)?;
        let _gate = self.write_gate.write().await;
        self.owned_location(caller, id)?;
        if self.catalog.spot_count(&id) > 0 {
            return Err(EngineError::HasDependents(id));
        }

        self.persist_catalog(&Event::LocationDeleted { id }).await?;
        info!("location {id} deleted by {caller}");
        Ok(())
    }

    // ── Spots ────────────────────────────────────────────────

    pub async fn create_spot(
        &self,
        caller: &UserId,
        id: Ulid,
        location_id: Ulid,
        number: String,
    ) -> Result<(), EngineError> {
        validate_caller(caller)?;
        validate_name("number", &number)?;
        let _gate = self.write_gate.read().await;
        self.owned_location(caller, location_id)?;
        if self.catalog.spot_count(&location_id) >= MAX_SPOTS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many spots in location"));
        }
        if self.spots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SpotCreated {
            id,
            location_id,
            number,
        };
        self.persist_catalog(&event).await
    }

    /// Refused while any booking, in any status, references the spot.
    /// Runs alone so no booking can be created on it meanwhile.
    pub async fn delete_spot(&self, caller: &UserId, id: Ulid) -> Result<(), EngineError> {
        validate_caller(caller)?;
        let _gate = self.write_gate.write().await;
        let location_id = self
            .catalog
            .spot_location(&id)
            .ok_or(EngineError::NotFound(id))?;
        self.owned_location(caller, location_id)
            .map_err(|_| EngineError::NotFound(id))?;
        let spot = self.get_spot(&id).ok_or(EngineError::NotFound(id))?;
        let guard = spot.write().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasDependents(id));
        }

        self.persist_catalog(&Event::SpotDeleted { id, location_id })
            .await
    }

    // ── Pricing exceptions ───────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn add_pricing_exception(
        &self,
        caller: &UserId,
        id: Ulid,
        location_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        percentage_change: i32,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        validate_caller(caller)?;
        let span = exception_span(start_date, end_date, percentage_change, description.as_deref())?;
        let _gate = self.write_gate.read().await;
        self.owned_location(caller, location_id)?;
        if self.catalog.exception_count(&location_id) >= MAX_EXCEPTIONS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many pricing exceptions"));
        }
        if self.catalog.exception_location(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let exception = PricingException {
            id,
            location_id,
            span,
            percentage_change,
            description,
        };
        self.persist_catalog(&Event::ExceptionAdded { exception })
            .await?;
        info!("pricing exception {id} ({percentage_change:+}%) on location {location_id} for {span}");
        Ok(())
    }

    pub async fn remove_pricing_exception(
        &self,
        caller: &UserId,
        id: Ulid,
    ) -> Result<(), EngineError> {
        validate_caller(caller)?;
        let _gate = self.write_gate.read().await;
        let location_id = self
            .catalog
            .exception_location(&id)
            .ok_or(EngineError::NotFound(id))?;
        self.owned_location(caller, location_id)
            .map_err(|_| EngineError::NotFound(id))?;

        self.persist_catalog(&Event::ExceptionRemoved { id, location_id })
            .await
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Check, price and store a booking under the spot's write lock, so two
    /// concurrent requests for overlapping days cannot both succeed.
    pub async fn create_booking(
        &self,
        caller: &UserId,
        new: NewBooking,
    ) -> Result<Ulid, EngineError> {
        validate_caller(caller)?;
        let span = booking_span(new.start_date, new.end_date, new.kind)?;
        let _gate = self.write_gate.read().await;
        let (_, spot) = self.resolve_spot(caller, new.location_id, new.spot_id)?;
        if self.booking_to_spot.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let mut guard = spot.write().await;
        if self.catalog.spot_location(&new.spot_id) != Some(new.location_id) {
            return Err(EngineError::NotFound(new.spot_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many bookings on spot"));
        }
        let pricing = self
            .price_on_spot(new.location_id, &guard, &span, new.kind, None)
            .map_err(|e| refused(new.spot_id, e))?;

        let now = now_ms();
        let booking = Booking {
            id: new.id,
            owner: caller.clone(),
            location_id: new.location_id,
            spot_id: new.spot_id,
            client_id: new.client_id,
            span,
            kind: new.kind,
            status: BookingStatus::Active,
            payment_status: PaymentStatus::Unpaid,
            cost: Some(pricing.total_cost),
            created_at: now,
            updated_at: now,
        };
        if let Some(existing) = guard.exclusion_conflict(&booking) {
            return Err(conflict(new.spot_id, existing));
        }

        let event = Event::BookingCreated {
            booking,
            history: Vec::new(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booking {} on spot {} for {span} costs {}",
            new.id, new.spot_id, pricing.total_cost
        );
        Ok(new.id)
    }

    /// Apply a partial update. Date changes re-check availability (ignoring
    /// this booking) and re-price; reactivating a booking re-checks its
    /// current interval. An empty patch returns the booking untouched.
    pub async fn update_booking(
        &self,
        caller: &UserId,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        validate_caller(caller)?;
        let _gate = self.write_gate.read().await;
        let (location, mut guard) = self.resolve_booking_write(caller, id).await?;
        let current = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut updated = current.clone();
        if patch.touches_dates() {
            if current.kind == BookingType::Permanent && patch.end_date.is_some() {
                return Err(EngineError::validation(
                    "end_date",
                    "permanent bookings have no end_date",
                ));
            }
            let start = patch.start_date.unwrap_or(current.span.start);
            let end = patch.end_date.or(current.span.end);
            if let Some(end) = end
                && end < start
            {
                return Err(EngineError::InvalidRange { start, end });
            }
            let span = booking_span(start, end, current.kind)?;
            let pricing = self
                .price_on_spot(location.id, &guard, &span, current.kind, Some(id))
                .map_err(|e| refused(current.spot_id, e))?;
            updated.span = span;
            updated.cost = Some(pricing.total_cost);
        } else if patch.status == Some(BookingStatus::Active) && !current.is_active() {
            if let Some(existing) = find_conflict(&guard, &current.span, Some(id)) {
                return Err(conflict(current.spot_id, existing));
            }
        }

        if let Some(status) = patch.status {
            updated.status = status;
        }
        let now = now_ms();
        let payment_change = match patch.payment_status {
            Some(new_status) if new_status != current.payment_status => {
                updated.payment_status = new_status;
                Some(PaymentHistoryEntry {
                    id: Ulid::new(),
                    booking_id: id,
                    previous_status: current.payment_status,
                    new_status,
                    changed_by: caller.clone(),
                    changed_at: now,
                })
            }
            _ => None,
        };
        updated.updated_at = now;
        if let Some(existing) = guard.exclusion_conflict(&updated) {
            return Err(conflict(current.spot_id, existing));
        }

        let event = Event::BookingUpdated {
            booking: updated.clone(),
            payment_change,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("booking {id} updated by {caller}");
        Ok(updated)
    }

    /// Remove a booking and its payment history.
    pub async fn delete_booking(&self, caller: &UserId, id: Ulid) -> Result<(), EngineError> {
        validate_caller(caller)?;
        let _gate = self.write_gate.read().await;
        let (_, mut guard) = self.resolve_booking_write(caller, id).await?;
        let event = Event::BookingDeleted {
            id,
            spot_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {id} deleted by {caller}");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation can append between the snapshot and the swap.
        let _gate = self.write_gate.write().await;
        let mut events = Vec::new();

        for location in self.catalog.locations() {
            let location_id = location.id;
            events.push(Event::LocationCreated {
                id: location.id,
                owner: location.owner,
                name: location.name,
                tariff: location.tariff,
            });
            for exception in self.catalog.exceptions(&location_id) {
                events.push(Event::ExceptionAdded { exception });
            }
            for spot_id in self.catalog.spot_ids(&location_id) {
                let Some(spot) = self.get_spot(&spot_id) else {
                    continue;
                };
                let guard = spot.read().await;
                events.push(Event::SpotCreated {
                    id: guard.id,
                    location_id,
                    number: guard.number.clone(),
                });
                for booking in &guard.bookings {
                    events.push(Event::BookingCreated {
                        booking: booking.clone(),
                        history: guard.history(booking.id).to_vec(),
                    });
                }
            }
        }

        let count = events.len();
        self.wal_control(|response| WalControl::Compact { events, response })
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal_control(|response| WalControl::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}
