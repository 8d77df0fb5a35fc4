use crate::limits::*;
use crate::model::*;

use super::error::Unavailability;
use super::EngineError;

pub(crate) fn validate_range(range: &StayRange) -> Result<(), EngineError> {
    if !range.is_valid() {
        return Err(EngineError::InvalidRange {
            check_in: range.check_in,
            check_out: range.check_out,
        });
    }
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(range: &StayRange) -> Result<(), EngineError> {
    if !range.is_valid() {
        return Err(EngineError::InvalidRange {
            check_in: range.check_in,
            check_out: range.check_out,
        });
    }
    if range.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Authoritative booking check, run under the unit's write lock.
pub(crate) fn check_bookable(st: &UnitState, range: &StayRange) -> Result<(), EngineError> {
    if st.unit.occupancy == OccupancyStatus::Locked {
        return Err(EngineError::UnitUnavailable {
            unit_id: st.unit.id,
            reason: Unavailability::Locked,
        });
    }
    if let Some(existing) = st.blocking(range) {
        return Err(EngineError::UnitUnavailable {
            unit_id: st.unit.id,
            reason: Unavailability::Overlaps {
                reservation_id: existing.id,
                range: existing.range,
            },
        });
    }
    Ok(())
}

pub(crate) fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    if guest.name.trim().is_empty() {
        return Err(EngineError::validation("guest name is required"));
    }
    if guest.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !present(&guest.email) && !present(&guest.phone) {
        return Err(EngineError::validation("guest email or phone is required"));
    }
    for contact in [&guest.email, &guest.phone].into_iter().flatten() {
        if contact.len() > MAX_CONTACT_LEN {
            return Err(EngineError::LimitExceeded("guest contact too long"));
        }
    }
    Ok(())
}

pub(crate) fn require_manager(actor: &Actor, action: &'static str) -> Result<(), EngineError> {
    if actor.is_manager() {
        Ok(())
    } else {
        Err(EngineError::Forbidden {
            actor: actor.name.clone(),
            action,
        })
    }
}

pub(crate) fn check_version(st: &UnitState, expected: Option<u64>) -> Result<(), EngineError> {
    match expected {
        Some(v) if v != st.unit.version => Err(EngineError::Conflict(st.unit.id)),
        _ => Ok(()),
    }
}

pub(crate) fn invalid_transition(
    entity: &'static str,
    id: ulid::Ulid,
    state: &'static str,
    action: &'static str,
) -> EngineError {
    EngineError::InvalidTransition {
        entity,
        id,
        state,
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> chrono::NaiveDate {
        s.parse().unwrap()
    }

    fn guest(email: Option<&str>, phone: Option<&str>) -> Guest {
        Guest {
            name: "Grace".into(),
            email: email.map(Into::into),
            phone: phone.map(Into::into),
        }
    }

    #[test]
    fn degenerate_range_rejected() {
        let same = StayRange::new(d("2025-01-05"), d("2025-01-05"));
        assert!(matches!(validate_range(&same), Err(EngineError::InvalidRange { .. })));
        let reversed = StayRange::new(d("2025-01-05"), d("2025-01-01"));
        assert!(matches!(validate_range(&reversed), Err(EngineError::InvalidRange { .. })));
        let ok = StayRange::new(d("2025-01-01"), d("2025-01-05"));
        assert!(validate_range(&ok).is_ok());
    }

    #[test]
    fn overlong_stay_rejected() {
        let r = StayRange::new(d("2025-01-01"), d("2026-06-01"));
        assert!(matches!(validate_range(&r), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn guest_needs_contact() {
        assert!(validate_guest(&guest(Some("g@example.com"), None)).is_ok());
        assert!(validate_guest(&guest(None, Some("+1 555 0100"))).is_ok());
        assert!(matches!(
            validate_guest(&guest(None, Some("  "))),
            Err(EngineError::Validation(_))
        ));
        let mut nameless = guest(Some("g@example.com"), None);
        nameless.name = " ".into();
        assert!(matches!(validate_guest(&nameless), Err(EngineError::Validation(_))));
    }

    #[test]
    fn manager_gate() {
        assert!(require_manager(&Actor::manager("m"), "lock units").is_ok());
        assert!(matches!(
            require_manager(&Actor::staff("s"), "lock units"),
            Err(EngineError::Forbidden { .. })
        ));
    }
}
