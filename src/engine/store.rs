use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Locations, their spot lists and pricing exceptions. Bookings live in the
/// per-spot state, not here.
pub struct Catalog {
    locations: DashMap<Ulid, Location>,
    /// location id → spot ids
    spots: DashMap<Ulid, Vec<Ulid>>,
    spot_to_location: DashMap<Ulid, Ulid>,
    /// location id → exceptions in creation order
    exceptions: DashMap<Ulid, Vec<PricingException>>,
    exception_to_location: DashMap<Ulid, Ulid>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            locations: DashMap::new(),
            spots: DashMap::new(),
            spot_to_location: DashMap::new(),
            exceptions: DashMap::new(),
            exception_to_location: DashMap::new(),
        }
    }

    // ── Locations ────────────────────────────────────────────

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn contains_location(&self, id: &Ulid) -> bool {
        self.locations.contains_key(id)
    }

    pub fn location(&self, id: &Ulid) -> Option<Location> {
        self.locations.get(id).map(|e| e.value().clone())
    }

    pub fn tariff(&self, location_id: &Ulid) -> Option<Tariff> {
        self.locations.get(location_id).map(|e| e.tariff)
    }

    pub fn locations(&self) -> Vec<Location> {
        self.locations.iter().map(|e| e.value().clone()).collect()
    }

    // ── Spots index ──────────────────────────────────────────

    pub fn spot_location(&self, spot_id: &Ulid) -> Option<Ulid> {
        self.spot_to_location.get(spot_id).map(|e| *e.value())
    }

    pub fn spot_ids(&self, location_id: &Ulid) -> Vec<Ulid> {
        self.spots
            .get(location_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn spot_count(&self, location_id: &Ulid) -> usize {
        self.spots.get(location_id).map_or(0, |e| e.len())
    }

    // ── Pricing exceptions ───────────────────────────────────

    pub fn exception_location(&self, exception_id: &Ulid) -> Option<Ulid> {
        self.exception_to_location
            .get(exception_id)
            .map(|e| *e.value())
    }

    pub fn exception_count(&self, location_id: &Ulid) -> usize {
        self.exceptions.get(location_id).map_or(0, |e| e.len())
    }

    pub fn exceptions(&self, location_id: &Ulid) -> Vec<PricingException> {
        self.exceptions
            .get(location_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Exceptions of a location overlapping `range`.
    pub fn exceptions_in_range(&self, location_id: &Ulid, range: &DateSpan) -> Vec<PricingException> {
        self.exceptions
            .get(location_id)
            .map(|list| {
                list.iter()
                    .filter(|e| e.span.overlaps(range))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::LocationCreated {
                id,
                owner,
                name,
                tariff,
            } => {
                self.locations.insert(
                    *id,
                    Location {
                        id: *id,
                        owner: owner.clone(),
                        name: name.clone(),
                        tariff: *tariff,
                    },
                );
            }
            Event::TariffUpdated { id, tariff } => {
                if let Some(mut location) = self.locations.get_mut(id) {
                    location.tariff = *tariff;
                }
            }
            Event::LocationDeleted { id } => {
                self.locations.remove(id);
                if let Some((_, spot_ids)) = self.spots.remove(id) {
                    for spot_id in spot_ids {
                        self.spot_to_location.remove(&spot_id);
                    }
                }
                if let Some((_, list)) = self.exceptions.remove(id) {
                    for exception in list {
                        self.exception_to_location.remove(&exception.id);
                    }
                }
            }
            Event::SpotCreated {
                id, location_id, ..
            } => {
                self.spots.entry(*location_id).or_default().push(*id);
                self.spot_to_location.insert(*id, *location_id);
            }
            Event::SpotDeleted { id, location_id } => {
                if let Some(mut spot_ids) = self.spots.get_mut(location_id) {
                    spot_ids.retain(|s| s != id);
                }
                self.spot_to_location.remove(id);
            }
            Event::ExceptionAdded { exception } => {
                self.exceptions
                    .entry(exception.location_id)
                    .or_default()
                    .push(exception.clone());
                self.exception_to_location
                    .insert(exception.id, exception.location_id);
            }
            Event::ExceptionRemoved { id, location_id } => {
                if let Some(mut list) = self.exceptions.get_mut(location_id) {
                    list.retain(|e| e.id != *id);
                }
                self.exception_to_location.remove(id);
            }
            Event::BookingCreated { .. }
            | Event::BookingUpdated { .. }
            | Event::BookingDeleted { .. } => {}
        }
    }
}
