use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::money::Money;
use crate::observability;
use crate::pricing::nightly_rate;

use super::conflict::invalid_transition;
use super::{Engine, EngineError};

fn find_offer<'a>(st: &'a UnitState, id: &Ulid) -> Result<&'a Offer, EngineError> {
    st.offer(id).ok_or(EngineError::NotFound(*id))
}

fn validate_discount(discount: &Discount) -> Result<(), EngineError> {
    match discount {
        Discount::Percent(bps) if bps.is_zero() || bps.bps() > 10_000 => {
            Err(EngineError::validation("percent discount must be between 0% and 100%"))
        }
        Discount::Fixed(amount) if !amount.is_positive() => {
            Err(EngineError::validation("fixed discount must be positive"))
        }
        Discount::Fixed(amount) if *amount > MAX_PRICE => {
            Err(EngineError::LimitExceeded("fixed discount too large"))
        }
        _ => Ok(()),
    }
}

fn validate_modifier(m: &RateModifier) -> Result<(), EngineError> {
    if m.name.trim().is_empty() {
        return Err(EngineError::validation("rate modifier name is required"));
    }
    if m.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("rate modifier name too long"));
    }
    match &m.trigger {
        RateTrigger::Season { start, end } if start > end => {
            return Err(EngineError::InvalidRange {
                check_in: *start,
                check_out: *end,
            });
        }
        RateTrigger::Weekdays(days) if days.is_empty() => {
            return Err(EngineError::validation("weekday modifier needs at least one day"));
        }
        _ => {}
    }
    match m.adjustment {
        Adjustment::Percent(bps) if bps <= -10_000 => {
            Err(EngineError::validation("percent adjustment must stay above -100%"))
        }
        Adjustment::Percent(bps) if bps > MAX_ADJUSTMENT_BPS => {
            Err(EngineError::LimitExceeded("percent adjustment too large"))
        }
        Adjustment::Fixed(amount) if amount.minor().unsigned_abs() > MAX_PRICE.minor() as u64 => {
            Err(EngineError::LimitExceeded("fixed adjustment too large"))
        }
        _ => Ok(()),
    }
}

impl Engine {
    pub async fn create_offer(
        &self,
        id: Ulid,
        unit_id: Ulid,
        discount: Discount,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Offer, EngineError> {
        if end_date < start_date {
            return Err(EngineError::InvalidRange {
                check_in: start_date,
                check_out: end_date,
            });
        }
        validate_discount(&discount)?;
        let mut guard = self.write_unit(unit_id).await?;
        if self.entity_to_unit.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.offers.len() >= MAX_OFFERS_PER_UNIT {
            return Err(EngineError::LimitExceeded("too many offers on unit"));
        }
        let offer = Offer {
            id,
            unit_id,
            discount,
            start_date,
            end_date,
            status: OfferStatus::Active,
            recorded_original_price: None,
        };
        let event = Event::OfferCreated {
            offer: offer.clone(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(offer)
    }

    /// Put an offer's discount on the unit's live price. Idempotent: the
    /// recorded original price is captured once and never overwritten.
    pub async fn apply_offer(&self, id: Ulid) -> Result<Offer, EngineError> {
        let today = self.clock.today();
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        let offer = find_offer(&guard, &id)?;
        if offer.status == OfferStatus::Expired {
            return Err(invalid_transition("offer", id, "expired", "apply"));
        }
        if offer.is_past(today) {
            return Err(invalid_transition("offer", id, "ended", "apply"));
        }
        if offer.is_applied() {
            return Ok(offer.clone());
        }
        if let Some(other) = guard.applied_offer() {
            return Err(invalid_transition("offer", other.id, "applied", "stack another offer on"));
        }
        let event = Event::OfferApplied {
            id,
            unit_id,
            recorded_original_price: guard.unit.base_price,
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find_offer(&guard, &id)?.clone())
    }

    /// Take an offer's discount off the live price. Reverting an offer that
    /// is not applied changes nothing.
    pub async fn revert_offer(&self, id: Ulid) -> Result<Offer, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        let offer = find_offer(&guard, &id)?;
        if !offer.is_applied() {
            return Ok(offer.clone());
        }
        let event = Event::OfferReverted { id, unit_id };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find_offer(&guard, &id)?.clone())
    }

    /// Expire every Active offer whose window ended before `today`, reverting
    /// it in the same record. Each write re-checks its condition under the
    /// unit lock, so overlapping sweeps never expire an offer twice.
    pub async fn expire_offers(&self, today: NaiveDate) -> Result<Vec<Ulid>, EngineError> {
        let unit_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut expired = Vec::new();

        for unit_id in unit_ids {
            let Some(st) = self.get_unit_state(&unit_id) else { continue };
            let due = st
                .read()
                .await
                .offers
                .iter()
                .any(|o| o.status == OfferStatus::Active && o.is_past(today));
            if !due {
                continue;
            }

            let mut guard = match self.write_unit(unit_id).await {
                Ok(g) => g,
                Err(EngineError::Conflict(_)) => {
                    debug!("offer sweep skipped busy unit {unit_id}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let ids: Vec<Ulid> = guard
                .offers
                .iter()
                .filter(|o| o.status == OfferStatus::Active && o.is_past(today))
                .map(|o| o.id)
                .collect();
            for id in ids {
                let event = Event::OfferExpired { id, unit_id };
                self.persist_and_apply(unit_id, &mut guard, &event).await?;
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            metrics::counter!(observability::OFFERS_EXPIRED_TOTAL).increment(expired.len() as u64);
            info!("expired {} offer(s) ending before {today}", expired.len());
        }
        Ok(expired)
    }

    pub async fn add_rate_modifier(&self, modifier: RateModifier) -> Result<RateModifier, EngineError> {
        validate_modifier(&modifier)?;
        let _registry = self.registry_lock.lock().await;
        let mut modifiers = self.rate_modifiers.write().await;
        if modifiers.contains_key(&modifier.id) {
            return Err(EngineError::AlreadyExists(modifier.id));
        }
        if modifiers.len() >= MAX_RATE_MODIFIERS {
            return Err(EngineError::LimitExceeded("too many rate modifiers"));
        }
        let event = Event::RateModifierAdded {
            modifier: modifier.clone(),
        };
        self.wal_append(&event).await?;
        modifiers.insert(modifier.id, modifier.clone());
        self.notify.publish(&event);
        Ok(modifier)
    }

    pub async fn remove_rate_modifier(&self, id: Ulid) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        let mut modifiers = self.rate_modifiers.write().await;
        if !modifiers.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::RateModifierRemoved { id };
        self.wal_append(&event).await?;
        modifiers.remove(&id);
        self.notify.publish(&event);
        Ok(())
    }

    /// Tonight's resolved rate for a unit.
    pub async fn live_price(&self, unit_id: Ulid) -> Result<Money, EngineError> {
        let modifiers = self.rate_modifier_snapshot().await;
        let st = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let guard = st.read().await;
        Ok(nightly_rate(&guard, &modifiers, self.clock.today()))
    }
}
