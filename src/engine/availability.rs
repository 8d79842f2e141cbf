use ulid::Ulid;

use crate::model::{DateSpan, SpotState};

/// Active bookings on `spot` sharing at least one day with `span`, as
/// `(id, span)` pairs in start order. `exclude` skips the booking being edited.
pub fn active_bookings_overlapping<'a>(
    spot: &'a SpotState,
    span: &'a DateSpan,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = (Ulid, DateSpan)> + 'a {
    spot.overlapping(span)
        .filter(move |b| b.is_active() && Some(b.id) != exclude)
        .map(|b| (b.id, b.span))
}

/// First active booking that blocks `span`.
pub fn find_conflict(spot: &SpotState, span: &DateSpan, exclude: Option<Ulid>) -> Option<Ulid> {
    active_bookings_overlapping(spot, span, exclude)
        .next()
        .map(|(id, _)| id)
}

pub fn is_available(spot: &SpotState, span: &DateSpan, exclude: Option<Ulid>) -> bool {
    find_conflict(spot, span, exclude).is_none()
}
