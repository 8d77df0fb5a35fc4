use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing::quote_stay;

use super::conflict::{check_bookable, invalid_transition, validate_guest, validate_range};
use super::{Engine, EngineError};

/// Single-point check against the reservation transition table.
fn permit(r: &Reservation, action: ReservationAction) -> Result<ReservationStatus, EngineError> {
    r.status
        .next(action)
        .ok_or_else(|| invalid_transition("reservation", r.id, r.status.as_str(), action.as_str()))
}

fn find<'a>(st: &'a UnitState, id: &Ulid) -> Result<&'a Reservation, EngineError> {
    st.reservation(id).ok_or(EngineError::NotFound(*id))
}

impl Engine {
    /// Book `range` on a unit. Availability is re-checked under the unit's
    /// write lock, so of two overlapping concurrent requests exactly one wins.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        unit_id: Ulid,
        range: StayRange,
        guest: Guest,
        guest_count: u32,
    ) -> Result<Reservation, EngineError> {
        validate_range(&range)?;
        validate_guest(&guest)?;
        if guest_count == 0 {
            return Err(EngineError::validation("guest count must be at least 1"));
        }
        let modifiers = self.rate_modifier_snapshot().await;

        let mut guard = self.write_unit(unit_id).await?;
        if self.entity_to_unit.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_UNIT {
            return Err(EngineError::LimitExceeded("too many reservations on unit"));
        }
        if guest_count > guard.unit.max_guests {
            return Err(EngineError::Validation(format!(
                "unit {} sleeps at most {} guests",
                unit_id, guard.unit.max_guests
            )));
        }
        if let Err(e) = check_bookable(&guard, &range) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let nightly_rates = quote_stay(&guard, &modifiers, &range);
        let price_at_booking = nightly_rates.first().copied().unwrap_or(guard.unit.base_price);
        let reservation = Reservation {
            id,
            unit_id,
            range,
            guest,
            guest_count,
            price_at_booking,
            nightly_rates,
            status: ReservationStatus::New,
            booked_at: self.clock.now_ms(),
            confirmed_at: None,
            actual_check_in: None,
            actual_check_out: None,
            cancelled_at: None,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        let r = find(&guard, &id)?;
        permit(r, ReservationAction::Confirm)?;
        if r.confirmed_at.is_some() {
            return Err(invalid_transition("reservation", id, "confirmed", "confirm"));
        }
        let event = Event::ReservationConfirmed {
            id,
            unit_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find(&guard, &id)?.clone())
    }

    pub async fn check_in(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        permit(find(&guard, &id)?, ReservationAction::Arrive)?;
        let occupancy = guard.unit.occupancy;
        if !occupancy.awaits_arrival() {
            return Err(invalid_transition("unit", unit_id, occupancy.as_str(), "check in"));
        }
        let event = Event::GuestArrived {
            id,
            unit_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        info!("guest arrived: reservation {id} unit {unit_id}");
        Ok(find(&guard, &id)?.clone())
    }

    /// Close the stay, free the unit, mark it dirty and queue an urgent
    /// cleaning task. One journal record: either all of it happens or none.
    pub async fn check_out(&self, id: Ulid) -> Result<Departure, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        permit(find(&guard, &id)?, ReservationAction::Depart)?;
        let task_id = Ulid::new();
        let event = Event::GuestDeparted {
            id,
            unit_id,
            task_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        info!("guest departed: reservation {id} unit {unit_id}, cleaning task {task_id}");
        let reservation = find(&guard, &id)?.clone();
        let cleaning_task = guard
            .task(&task_id)
            .cloned()
            .ok_or(EngineError::NotFound(task_id))?;
        Ok(Departure {
            reservation,
            cleaning_task,
        })
    }

    /// Cancel a stay that has not started. A seated guest can only check out.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        permit(find(&guard, &id)?, ReservationAction::Cancel)?;
        let event = Event::ReservationCancelled {
            id,
            unit_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find(&guard, &id)?.clone())
    }
}
