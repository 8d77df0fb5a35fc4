use ulid::Ulid;

use crate::model::*;
use crate::money::Money;
use crate::pricing::quote_stay;

use super::availability::{free_ranges, matches_search};
use super::conflict::{validate_range, validate_window};
use super::{Engine, EngineError, SharedUnitState};

impl Engine {
    /// Units in creation order (ULIDs sort by time).
    fn units_sorted(&self) -> Vec<SharedUnitState> {
        let mut entries: Vec<(Ulid, SharedUnitState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, st)| st).collect()
    }

    fn unit_state(&self, unit_id: &Ulid) -> Result<SharedUnitState, EngineError> {
        self.get_unit_state(unit_id)
            .ok_or(EngineError::NotFound(*unit_id))
    }

    /// Gather rows from one unit, or from every unit when `unit_id` is `None`.
    async fn gather<T>(
        &self,
        unit_id: Option<Ulid>,
        rows: impl Fn(&UnitState) -> Vec<T>,
    ) -> Result<Vec<T>, EngineError> {
        let units = match unit_id {
            Some(id) => vec![self.unit_state(&id)?],
            None => self.units_sorted(),
        };
        let mut out = Vec::new();
        for st in units {
            out.extend(rows(&*st.read().await));
        }
        Ok(out)
    }

    pub async fn get_unit(&self, id: Ulid) -> Result<Unit, EngineError> {
        Ok(self.unit_state(&id)?.read().await.unit.clone())
    }

    pub async fn list_units(&self) -> Vec<Unit> {
        let mut out = Vec::new();
        for st in self.units_sorted() {
            out.push(st.read().await.unit.clone());
        }
        out
    }

    /// Catalog search: bookable units for a stay, in creation order.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<UnitListing>, EngineError> {
        validate_range(&query.range)?;
        let modifiers = self.rate_modifier_snapshot().await;
        let nights = query.range.nights();
        let mut out = Vec::new();

        for st in self.units_sorted() {
            let guard = st.read().await;
            if !matches_search(&guard, query) {
                continue;
            }
            let stay_total = quote_stay(&guard, &modifiers, &query.range)
                .into_iter()
                .fold(Money::zero(), Money::saturating_add);
            let nightly_price = Money::average(stay_total, nights);
            if query.price_min.is_some_and(|min| nightly_price < min)
                || query.price_max.is_some_and(|max| nightly_price > max)
            {
                continue;
            }
            out.push(UnitListing {
                unit: guard.unit.clone(),
                nightly_price,
                stay_total,
            });
        }
        Ok(out)
    }

    /// Free date ranges of one unit inside `window`.
    pub async fn free_calendar(&self, unit_id: Ulid, window: StayRange) -> Result<Vec<StayRange>, EngineError> {
        validate_window(&window)?;
        let st = self.unit_state(&unit_id)?;
        let guard = st.read().await;
        Ok(free_ranges(&guard, &window))
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let unit_id = self.get_unit_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let st = self.unit_state(&unit_id)?;
        let guard = st.read().await;
        guard.reservation(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn list_reservations(&self, unit_id: Option<Ulid>) -> Result<Vec<Reservation>, EngineError> {
        self.gather(unit_id, |st| st.reservations.clone()).await
    }

    pub async fn get_invoice(&self, id: Ulid) -> Result<Invoice, EngineError> {
        let unit_id = self.get_unit_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let st = self.unit_state(&unit_id)?;
        let guard = st.read().await;
        guard.invoice(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn list_invoices(&self, unit_id: Option<Ulid>) -> Result<Vec<Invoice>, EngineError> {
        self.gather(unit_id, |st| st.invoices.clone()).await
    }

    /// Every invoice ever raised for a stay, cancelled ones included.
    pub async fn invoices_for_reservation(&self, reservation_id: Ulid) -> Result<Vec<Invoice>, EngineError> {
        let unit_id = self
            .get_unit_for_entity(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        self.gather(Some(unit_id), |st| {
            st.invoices
                .iter()
                .filter(|i| i.reservation_id == reservation_id)
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn list_tasks(&self, unit_id: Option<Ulid>) -> Result<Vec<HousekeepingTask>, EngineError> {
        self.gather(unit_id, |st| st.tasks.clone()).await
    }

    pub async fn housekeeping_log(&self, unit_id: Ulid) -> Result<Vec<HousekeepingLogEntry>, EngineError> {
        self.gather(Some(unit_id), |st| st.housekeeping_log.clone()).await
    }

    pub async fn list_offers(&self, unit_id: Option<Ulid>) -> Result<Vec<Offer>, EngineError> {
        self.gather(unit_id, |st| st.offers.clone()).await
    }

    pub async fn list_rate_modifiers(&self) -> Vec<RateModifier> {
        self.rate_modifier_snapshot().await
    }
}
