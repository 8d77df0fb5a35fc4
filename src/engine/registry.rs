use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::money::Money;

use super::conflict::{check_version, invalid_transition, require_manager};
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_unit(
        &self,
        id: Ulid,
        kind: UnitKind,
        name: String,
        number: Option<String>,
        base_price: Money,
        max_guests: u32,
    ) -> Result<Unit, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::validation("unit name is required"));
        }
        if name.len() > MAX_NAME_LEN || number.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("unit name too long"));
        }
        if !base_price.is_positive() {
            return Err(EngineError::validation("base price must be positive"));
        }
        if base_price > MAX_PRICE {
            return Err(EngineError::LimitExceeded("base price too large"));
        }
        if max_guests == 0 {
            return Err(EngineError::validation("max guests must be at least 1"));
        }

        let _registry = self.registry_lock.lock().await;
        if self.state.len() >= MAX_UNITS {
            return Err(EngineError::LimitExceeded("too many units"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let unit = Unit {
            id,
            kind,
            name,
            number,
            base_price,
            max_guests,
            occupancy: OccupancyStatus::Available,
            housekeeping: HousekeepingStatus::Clean,
            version: 1,
        };
        let event = Event::UnitCreated { unit: unit.clone() };
        self.wal_append(&event).await?;
        self.state.insert(id, Arc::new(RwLock::new(UnitState::new(unit.clone()))));
        self.notify.send(id, &event);
        Ok(unit)
    }

    /// Change the stored base price. Offers and modifiers stay layered on top.
    pub async fn set_price(
        &self,
        unit_id: Ulid,
        price: Money,
        expected_version: Option<u64>,
    ) -> Result<Unit, EngineError> {
        if !price.is_positive() {
            return Err(EngineError::validation("price must be positive"));
        }
        if price > MAX_PRICE {
            return Err(EngineError::LimitExceeded("price too large"));
        }
        let mut guard = self.write_unit(unit_id).await?;
        check_version(&guard, expected_version)?;
        let event = Event::UnitPriceSet { unit_id, price };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(guard.unit.clone())
    }

    /// Take a unit out of service. Existing reservations are kept.
    pub async fn lock_unit(
        &self,
        unit_id: Ulid,
        actor: &Actor,
        expected_version: Option<u64>,
    ) -> Result<Unit, EngineError> {
        require_manager(actor, "lock units")?;
        let mut guard = self.write_unit(unit_id).await?;
        check_version(&guard, expected_version)?;
        if !guard.unit.occupancy.can_lock() {
            return Err(invalid_transition("unit", unit_id, guard.unit.occupancy.as_str(), "lock"));
        }
        let event = Event::UnitLocked {
            unit_id,
            by: actor.name.clone(),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(guard.unit.clone())
    }

    pub async fn unlock_unit(&self, unit_id: Ulid, actor: &Actor) -> Result<Unit, EngineError> {
        require_manager(actor, "unlock units")?;
        let mut guard = self.write_unit(unit_id).await?;
        if guard.unit.occupancy != OccupancyStatus::Locked {
            return Err(invalid_transition("unit", unit_id, guard.unit.occupancy.as_str(), "unlock"));
        }
        let event = Event::UnitUnlocked {
            unit_id,
            by: actor.name.clone(),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(guard.unit.clone())
    }
}
