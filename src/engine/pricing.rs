use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::*;

/// Exception in force on `day`. Overlapping exceptions are resolved by
/// specificity: the one covering the fewest days wins, and among equally
/// narrow ones the most recently created (greatest ULID).
pub fn applicable_exception(
    exceptions: &[PricingException],
    day: NaiveDate,
) -> Option<&PricingException> {
    exceptions
        .iter()
        .filter(|e| e.span.contains_day(day))
        .min_by(|a, b| {
            let a_days = a.span.day_count().unwrap_or(i64::MAX);
            let b_days = b.span.day_count().unwrap_or(i64::MAX);
            a_days.cmp(&b_days).then_with(|| b.id.cmp(&a.id))
        })
}

/// `daily_rate × (100 + percentage_change) / 100`, unrounded.
pub fn day_rate(daily_rate: Decimal, exception: Option<&PricingException>) -> Decimal {
    match exception {
        Some(e) => {
            daily_rate * (Decimal::ONE_HUNDRED + Decimal::from(e.percentage_change))
                / Decimal::ONE_HUNDRED
        }
        None => daily_rate,
    }
}

/// Two decimal places, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Cost of a span already known to be free. Periodic spans are priced day by
/// day; permanent bookings are the flat monthly fee with no breakdown.
pub fn quote(
    tariff: &Tariff,
    exceptions: &[PricingException],
    span: &DateSpan,
    kind: BookingType,
) -> PricingResult {
    match kind {
        BookingType::Permanent => PricingResult {
            available: true,
            total_cost: tariff.monthly_rate,
            details: Vec::new(),
        },
        BookingType::Periodic => {
            let mut total = Decimal::ZERO;
            let mut details = Vec::with_capacity(span.day_count().unwrap_or(0) as usize);
            for date in span.days() {
                let exception = applicable_exception(exceptions, date);
                let rate = day_rate(tariff.daily_rate, exception);
                total += rate;
                details.push(DayRate {
                    date,
                    rate,
                    exception_label: exception.and_then(|e| e.description.clone()),
                });
            }
            PricingResult {
                available: true,
                total_cost: round_money(total),
                details,
            }
        }
    }
}
