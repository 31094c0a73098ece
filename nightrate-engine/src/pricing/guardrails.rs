//! Safety guardrails
//!
//! Applied per night in date order, in this sequence: bounds, sanity threshold
//! against the night's baseline, day-over-day smoothing, charm rounding.
//! Locked nights short-circuit everything and keep their stored price.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::pricing::baseline::EVENT_CEILING_FACTOR;

/// Maximum relative deviation from the baseline on non-event nights
pub const SANITY_THRESHOLD: f64 = 0.5;

/// Maximum relative day-over-day change between non-event nights
pub const SMOOTHING_THRESHOLD: f64 = 0.5;

/// Input for one night
#[derive(Debug, Clone, PartialEq)]
pub struct GuardInput {
    pub date: NaiveDate,
    /// Merged candidate price (unrounded)
    pub price: f64,
    /// Deterministic baseline of the night (sanity reference)
    pub baseline: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub event: bool,
    pub major_event: bool,
    /// Keep the plain rounded integer
    pub premium: bool,
    pub reason: String,
    /// Stored `(price, reason)` of a locked override
    pub locked: Option<(i64, String)>,
}

/// A rule that changed the price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    Floor,
    Ceiling,
    Sanity,
    Smoothing,
}

/// Output for one night
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedDay {
    pub date: NaiveDate,
    pub price: i64,
    pub reason: String,
    pub locked: bool,
    pub event: bool,
    pub adjustments: Vec<Adjustment>,
}

/// `ceiling`, or `1.5·ceiling` on a major-event night
pub fn effective_ceiling(ceiling: f64, major_event: bool) -> f64 {
    if major_event {
        ceiling * EVENT_CEILING_FACTOR
    } else {
        ceiling
    }
}

/// Pull `price` back inside `[0.5·baseline, 1.5·baseline]` unless the night
/// carries an event signal
pub fn apply_sanity(price: f64, baseline: f64, event: bool) -> f64 {
    if event || baseline <= 0.0 {
        return price;
    }
    if ((price - baseline) / baseline).abs() > SANITY_THRESHOLD {
        price.clamp(
            baseline * (1.0 - SANITY_THRESHOLD),
            baseline * (1.0 + SANITY_THRESHOLD),
        )
    } else {
        price
    }
}

/// Allowed range around the previous emitted price
pub fn smoothing_band(previous: f64) -> (f64, f64) {
    (
        previous * (1.0 - SMOOTHING_THRESHOLD),
        previous * (1.0 + SMOOTHING_THRESHOLD),
    )
}

/// Largest value `<= n` ending in 5 or 9
fn charm_at_or_below(n: i64) -> i64 {
    let r = n.rem_euclid(10);
    match r {
        9 => n,
        5..=8 => n - r + 5,
        _ => n - r - 1,
    }
}

/// Smallest value `>= n` ending in 5 or 9
fn charm_at_or_above(n: i64) -> i64 {
    let r = n.rem_euclid(10);
    if r <= 5 {
        n - r + 5
    } else {
        n - r + 9
    }
}

/// Snap to the nearest integer ending in 5 or 9 within `[lo, hi]`
///
/// Distance is measured from the unrounded price; ties go to the lower value.
/// Premium nights keep the plain rounded integer. When no charm value fits,
/// the nearest integer inside the interval is used.
pub fn charm_round(price: f64, lo: f64, hi: f64, premium: bool) -> i64 {
    let lo_int = lo.ceil() as i64;
    let hi_int = hi.floor() as i64;

    if lo_int > hi_int {
        // No integer inside: take the closer bound
        let nearer = if price - hi_int as f64 <= lo_int as f64 - price {
            hi_int
        } else {
            lo_int
        };
        return nearer.max(1);
    }
    let nearest_in_interval = (price.round() as i64).clamp(lo_int, hi_int).max(1);
    if premium {
        return nearest_in_interval;
    }

    // Nearest charm values on either side of the price, once pulled inside
    let anchor = price.clamp(lo_int as f64, hi_int as f64);
    let below = charm_at_or_below(anchor.floor() as i64);
    let above = charm_at_or_above(anchor.ceil() as i64);

    [below, above]
        .into_iter()
        .filter(|v| (lo_int.max(1)..=hi_int).contains(v))
        .min_by(|a, b| {
            let d_a = (*a as f64 - price).abs();
            let d_b = (*b as f64 - price).abs();
            d_a.total_cmp(&d_b).then(a.cmp(b))
        })
        .unwrap_or(nearest_in_interval)
}

/// Run the guardrails over nights in date order
///
/// `previous` seeds smoothing with the night before the first input, when
/// known (`(price, event)`).
pub fn apply_guardrails(days: &[GuardInput], previous: Option<(i64, bool)>) -> Vec<GuardedDay> {
    let mut out = Vec::with_capacity(days.len());
    let mut prev = previous;

    for day in days {
        if let Some((price, reason)) = &day.locked {
            out.push(GuardedDay {
                date: day.date,
                price: *price,
                reason: reason.clone(),
                locked: true,
                event: day.event,
                adjustments: Vec::new(),
            });
            prev = Some((*price, day.event));
            continue;
        }

        let mut adjustments = Vec::new();
        let ceiling = effective_ceiling(day.ceiling, day.major_event);

        // 1. Bounds
        let mut price = day.price;
        if !price.is_finite() {
            price = day.baseline;
        }
        if price < day.floor {
            price = day.floor;
            adjustments.push(Adjustment::Floor);
        } else if price > ceiling {
            price = ceiling;
            adjustments.push(Adjustment::Ceiling);
        }

        // 2. Sanity threshold
        let sane = apply_sanity(price, day.baseline, day.event).clamp(day.floor, ceiling);
        if sane != price {
            tracing::debug!(
                date = %day.date,
                from = price,
                to = sane,
                baseline = day.baseline,
                "Sanity threshold pulled price back"
            );
            adjustments.push(Adjustment::Sanity);
            price = sane;
        }

        // 3. Smoothing; bounds win when the band misses them
        let mut lo = day.floor;
        let mut hi = ceiling;
        if let Some((prev_price, prev_event)) = prev {
            if !day.event && !prev_event && prev_price > 0 {
                let (band_lo, band_hi) = smoothing_band(prev_price as f64);
                let (cand_lo, cand_hi) = (lo.max(band_lo), hi.min(band_hi));
                if cand_lo <= cand_hi {
                    lo = cand_lo;
                    hi = cand_hi;
                    let smoothed = price.clamp(lo, hi);
                    if smoothed != price {
                        tracing::debug!(
                            date = %day.date,
                            from = price,
                            to = smoothed,
                            previous = prev_price,
                            "Smoothing clamped day-over-day jump"
                        );
                        adjustments.push(Adjustment::Smoothing);
                        price = smoothed;
                    }
                }
            }
        }

        // 4. Charm rounding
        let final_price = charm_round(price, lo, hi, day.premium);

        out.push(GuardedDay {
            date: day.date,
            price: final_price,
            reason: day.reason.clone(),
            locked: false,
            event: day.event,
            adjustments,
        });
        prev = Some((final_price, day.event));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(date: &str, price: f64) -> GuardInput {
        GuardInput {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            price,
            baseline: price,
            floor: 60.0,
            ceiling: 300.0,
            event: false,
            major_event: false,
            premium: false,
            reason: "Base rate".into(),
            locked: None,
        }
    }

    #[test]
    fn test_charm_examples() {
        assert_eq!(charm_round(200.0, 60.0, 300.0, false), 199);
        assert_eq!(charm_round(416.0, 60.0, 450.0, false), 415);
        assert_eq!(charm_round(440.0, 60.0, 450.0, false), 439);
        assert_eq!(charm_round(77.142857, 70.0, 480.0, false), 79);
        assert_eq!(charm_round(78.0, 70.0, 480.0, false), 79);
    }

    #[test]
    fn test_charm_with_huge_ceiling() {
        assert_eq!(charm_round(10_000_003.0, 1.0, 1.0e12, false), 10_000_005);
        assert_eq!(charm_round(9_999_997.2, 1.0, 1.0e12, false), 9_999_999);
    }

    #[test]
    fn test_charm_neighbours() {
        assert_eq!(charm_at_or_below(200), 199);
        assert_eq!(charm_at_or_below(207), 205);
        assert_eq!(charm_at_or_below(195), 195);
        assert_eq!(charm_at_or_above(200), 205);
        assert_eq!(charm_at_or_above(206), 209);
        assert_eq!(charm_at_or_above(209), 209);
    }

    #[test]
    fn test_charm_tie_goes_down() {
        // 87 is 2 away from both 85 and 89
        assert_eq!(charm_round(87.0, 60.0, 300.0, false), 85);
    }

    #[test]
    fn test_charm_respects_interval() {
        // 299.6 would snap to 299 but the ceiling is 296
        assert_eq!(charm_round(296.0, 60.0, 296.0, false), 295);
        // Floor at 60: 59 is out, 65 is the nearest in range
        assert_eq!(charm_round(60.0, 60.0, 300.0, false), 65);
        // No charm value in [61, 63]
        assert_eq!(charm_round(62.4, 61.0, 63.0, false), 62);
        // No integer at all in [100.2, 100.6]
        assert_eq!(charm_round(100.4, 100.2, 100.6, false), 100);
        assert_eq!(charm_round(100.58, 100.55, 100.9, false), 101);
    }

    #[test]
    fn test_premium_keeps_round_number() {
        assert_eq!(charm_round(200.0, 60.0, 300.0, true), 200);
    }

    #[test]
    fn test_effective_ceiling() {
        assert_eq!(effective_ceiling(300.0, false), 300.0);
        assert_eq!(effective_ceiling(300.0, true), 450.0);
    }

    #[test]
    fn test_sanity_threshold() {
        assert_eq!(apply_sanity(200.0, 100.0, false), 150.0);
        assert_eq!(apply_sanity(40.0, 100.0, false), 50.0);
        assert_eq!(apply_sanity(200.0, 100.0, true), 200.0);
        assert_eq!(apply_sanity(140.0, 100.0, false), 140.0);
    }

    #[test]
    fn test_bounds_applied_first() {
        let mut day = input("2026-04-01", 1000.0);
        day.baseline = 250.0;
        let out = apply_guardrails(&[day], None);
        assert_eq!(out[0].price, 299);
        assert_eq!(out[0].adjustments, vec![Adjustment::Ceiling]);
    }

    #[test]
    fn test_smoothing_clamps_jumps_between_plain_days() {
        let days = vec![input("2026-04-01", 100.0), input("2026-04-02", 280.0)];
        let out = apply_guardrails(&days, None);
        assert_eq!(out[0].price, 99);
        // Band around 99 is [49.5, 148.5]
        assert!(out[1].price <= 148);
        assert!(out[1].adjustments.contains(&Adjustment::Smoothing));
        let change = (out[1].price - out[0].price) as f64 / out[0].price as f64;
        assert!(change.abs() <= SMOOTHING_THRESHOLD);
    }

    #[test]
    fn test_event_day_exempt_from_smoothing() {
        let mut peak = input("2026-04-02", 280.0);
        peak.event = true;
        let days = vec![input("2026-04-01", 100.0), peak, input("2026-04-03", 100.0)];
        let out = apply_guardrails(&days, None);
        assert_eq!(out[1].price, 279);
        // The night after the peak is exempt too: the previous night is tagged
        assert_eq!(out[2].price, 99);
    }

    #[test]
    fn test_locked_day_short_circuits() {
        let mut locked = input("2026-04-02", 180.0);
        locked.locked = Some((250, "Owner price".into()));
        let days = vec![input("2026-04-01", 100.0), locked, input("2026-04-03", 100.0)];
        let out = apply_guardrails(&days, None);
        assert_eq!(out[1].price, 250);
        assert_eq!(out[1].reason, "Owner price");
        assert!(out[1].locked);
        // Smoothing for the next night uses the stored locked price
        assert!(out[2].price as f64 >= 125.0);
    }

    #[test]
    fn test_previous_seed_smooths_first_day() {
        let out = apply_guardrails(&[input("2026-04-01", 280.0)], Some((100, false)));
        assert!(out[0].price <= 150);
    }
}
