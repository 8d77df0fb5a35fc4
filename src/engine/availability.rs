use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Whether a unit passes the catalog filters for a stay, ignoring price.
/// Locked units never match, regardless of dates.
pub fn matches_search(st: &UnitState, query: &SearchQuery) -> bool {
    let unit = &st.unit;
    if unit.occupancy == OccupancyStatus::Locked {
        return false;
    }
    if query.kind.is_some_and(|k| k != unit.kind) {
        return false;
    }
    if query.guest_count > unit.max_guests {
        return false;
    }
    if let Some(text) = query.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let needle = text.to_lowercase();
        let in_name = unit.name.to_lowercase().contains(&needle);
        let in_number = unit
            .number
            .as_deref()
            .is_some_and(|n| n.to_lowercase().contains(&needle));
        if !in_name && !in_number {
            return false;
        }
    }
    st.blocking(&query.range).is_none()
}

/// Free date ranges for a unit inside `window`: the window minus every
/// reservation that still holds the unit.
pub fn free_ranges(st: &UnitState, window: &StayRange) -> Vec<StayRange> {
    if st.unit.occupancy == OccupancyStatus::Locked {
        return Vec::new();
    }
    let mut held: Vec<StayRange> = st
        .overlapping(window)
        .filter(|r| r.status.blocks_availability())
        .map(|r| r.range)
        .collect();
    held.sort_by_key(|r| r.check_in);
    let held = merge_overlapping(&held);
    subtract_ranges(&[*window], &held)
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[StayRange]) -> Vec<StayRange> {
    let mut merged: Vec<StayRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.check_in <= last.check_out {
                last.check_out = last.check_out.max(range.check_out);
                continue;
            }
        merged.push(range);
    }
    merged
}

pub fn subtract_ranges(base: &[StayRange], to_remove: &[StayRange]) -> Vec<StayRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.check_in;
        let current_end = b.check_out;

        while ri < to_remove.len() && to_remove[ri].check_out <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < current_end {
            let r = &to_remove[j];
            if r.check_in > current_start {
                result.push(StayRange::new(current_start, r.check_in));
            }
            current_start = current_start.max(r.check_out);
            j += 1;
        }

        if current_start < current_end {
            result.push(StayRange::new(current_start, current_end));
        }
    }

    result
}
