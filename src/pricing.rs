//! Nightly price resolution.
//!
//! The stored base price is never rewritten by modifiers or offers. Every
//! nightly rate is computed on read, in a fixed order: base, seasonal
//! modifiers, weekday modifiers, then the applied offer, floored at zero.

use chrono::{Datelike, NaiveDate};

use crate::model::{Adjustment, Discount, RateModifier, RateTrigger, StayRange, UnitKind, UnitState};
use crate::money::Money;

impl Discount {
    /// Price after this discount, never below zero.
    pub fn apply(&self, price: Money) -> Money {
        match self {
            Discount::Percent(bps) => price.saturating_sub(price.portion(bps.bps() as i64)),
            Discount::Fixed(amount) => price.saturating_sub(*amount),
        }
        .floor_zero()
    }
}

impl Adjustment {
    pub fn apply(&self, price: Money) -> Money {
        match self {
            Adjustment::Percent(bps) => price.saturating_add(price.portion(*bps as i64)),
            Adjustment::Fixed(amount) => price.saturating_add(*amount),
        }
    }
}

impl RateModifier {
    pub fn matches(&self, kind: UnitKind, night: NaiveDate) -> bool {
        if self.unit_kind.is_some_and(|k| k != kind) {
            return false;
        }
        match &self.trigger {
            RateTrigger::Season { start, end } => *start <= night && night <= *end,
            RateTrigger::Weekdays(days) => days.contains(&night.weekday()),
        }
    }

    fn is_seasonal(&self) -> bool {
        matches!(self.trigger, RateTrigger::Season { .. })
    }
}

/// Resolve one night's price from its inputs. `modifiers` may be in any
/// order; seasonal rules always run before weekday rules.
pub fn resolve_price(
    base: Money,
    kind: UnitKind,
    night: NaiveDate,
    modifiers: &[RateModifier],
    discount: Option<&Discount>,
) -> Money {
    let matching = || modifiers.iter().filter(|m| m.matches(kind, night));
    let mut price = base;
    for m in matching().filter(|m| m.is_seasonal()) {
        price = m.adjustment.apply(price);
    }
    for m in matching().filter(|m| !m.is_seasonal()) {
        price = m.adjustment.apply(price);
    }
    match discount {
        Some(d) => d.apply(price),
        None => price.floor_zero(),
    }
}

/// Price of `night` for this unit. The applied offer only discounts nights
/// inside its own window.
pub fn nightly_rate(state: &UnitState, modifiers: &[RateModifier], night: NaiveDate) -> Money {
    let discount = state
        .applied_offer()
        .filter(|o| o.covers(night))
        .map(|o| &o.discount);
    resolve_price(state.unit.base_price, state.unit.kind, night, modifiers, discount)
}

/// Per-night rates for a whole stay, in night order.
pub fn quote_stay(state: &UnitState, modifiers: &[RateModifier], range: &StayRange) -> Vec<Money> {
    range
        .each_night()
        .map(|night| nightly_rate(state, modifiers, night))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HousekeepingStatus, OccupancyStatus, Offer, OfferStatus, Unit};
    use crate::money::Bps;
    use chrono::Weekday;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn state(base: i64) -> UnitState {
        UnitState::new(Unit {
            id: Ulid::new(),
            kind: UnitKind::Villa,
            name: "Sea View".into(),
            number: None,
            base_price: Money::from_major(base),
            max_guests: 4,
            occupancy: OccupancyStatus::Available,
            housekeeping: HousekeepingStatus::Clean,
            version: 0,
        })
    }

    fn season(pct: i32, start: &str, end: &str) -> RateModifier {
        RateModifier {
            id: Ulid::new(),
            name: "high season".into(),
            unit_kind: None,
            trigger: RateTrigger::Season {
                start: d(start),
                end: d(end),
            },
            adjustment: Adjustment::Percent(pct * 100),
        }
    }

    fn weekend(fixed: i64) -> RateModifier {
        RateModifier {
            id: Ulid::new(),
            name: "weekend".into(),
            unit_kind: None,
            trigger: RateTrigger::Weekdays(vec![Weekday::Fri, Weekday::Sat]),
            adjustment: Adjustment::Fixed(Money::from_major(fixed)),
        }
    }

    #[test]
    fn percent_discount() {
        let d = Discount::Percent(Bps::from_percent(20));
        assert_eq!(d.apply(Money::from_major(500)), Money::from_major(400));
    }

    #[test]
    fn fixed_discount_floors_at_zero() {
        let d = Discount::Fixed(Money::from_major(600));
        assert_eq!(d.apply(Money::from_major(500)), Money::zero());
    }

    #[test]
    fn no_modifiers_is_base_price() {
        let p = resolve_price(Money::from_major(500), UnitKind::Room, d("2025-03-03"), &[], None);
        assert_eq!(p, Money::from_major(500));
    }

    #[test]
    fn season_runs_before_weekday_regardless_of_order() {
        // 2025-07-04 is a Friday.
        let night = d("2025-07-04");
        let mods = vec![weekend(50), season(10, "2025-07-01", "2025-08-31")];
        // 500 * 1.10 = 550, + 50 = 600.
        let p = resolve_price(Money::from_major(500), UnitKind::Villa, night, &mods, None);
        assert_eq!(p, Money::from_major(600));
    }

    #[test]
    fn offer_applies_after_modifiers() {
        let night = d("2025-07-04");
        let mods = vec![season(10, "2025-07-01", "2025-08-31"), weekend(50)];
        let discount = Discount::Percent(Bps::from_percent(50));
        let p = resolve_price(Money::from_major(500), UnitKind::Villa, night, &mods, Some(&discount));
        assert_eq!(p, Money::from_major(300));
    }

    #[test]
    fn modifier_scoped_to_other_kind_is_ignored() {
        let mut m = season(10, "2025-07-01", "2025-08-31");
        m.unit_kind = Some(UnitKind::Room);
        let p = resolve_price(Money::from_major(500), UnitKind::Villa, d("2025-07-02"), &[m], None);
        assert_eq!(p, Money::from_major(500));
    }

    #[test]
    fn negative_modifier_floors_at_zero() {
        let m = RateModifier {
            adjustment: Adjustment::Fixed(Money::from_major(-900)),
            ..weekend(0)
        };
        let p = resolve_price(Money::from_major(500), UnitKind::Villa, d("2025-07-04"), &[m], None);
        assert_eq!(p, Money::zero());
    }

    #[test]
    fn applied_offer_only_discounts_its_window() {
        let mut st = state(500);
        st.offers.push(Offer {
            id: Ulid::new(),
            unit_id: st.unit.id,
            discount: Discount::Percent(Bps::from_percent(20)),
            start_date: d("2025-03-02"),
            end_date: d("2025-03-02"),
            status: OfferStatus::Active,
            recorded_original_price: Some(Money::from_major(500)),
        });
        let rates = quote_stay(&st, &[], &StayRange::new(d("2025-03-01"), d("2025-03-04")));
        assert_eq!(
            rates,
            vec![Money::from_major(500), Money::from_major(400), Money::from_major(500)]
        );
    }

    #[test]
    fn unapplied_offer_has_no_effect() {
        let mut st = state(500);
        st.offers.push(Offer {
            id: Ulid::new(),
            unit_id: st.unit.id,
            discount: Discount::Percent(Bps::from_percent(20)),
            start_date: d("2025-03-01"),
            end_date: d("2025-03-31"),
            status: OfferStatus::Active,
            recorded_original_price: None,
        });
        assert_eq!(nightly_rate(&st, &[], d("2025-03-10")), Money::from_major(500));
    }
}
