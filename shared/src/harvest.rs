//! Harvest accrual math. A resource-generating building accrues one unit of
//! production per completed 20-minute interval since its last harvest (or,
//! if never harvested, since construction finished). Only whole intervals
//! count; the fractional remainder stays on the clock for the next call.

use std::collections::HashMap;

use crate::catalog::stats_for;
use crate::model::{Building, ResourceKind};
use crate::HARVEST_INTERVAL_MS;

/// Result of collecting a building's accrued production.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestOutcome {
    /// Yield per resource kind, already capped by the building's storage.
    pub harvest: HashMap<ResourceKind, i64>,
    /// New harvest-clock origin: the old origin advanced by whole intervals.
    pub last_harvested: u64,
}

fn harvest_origin(building: &Building) -> u64 {
    building.last_harvest.unwrap_or(building.finished_at)
}

/// Computes the yield accrued by `building` at `now`, or `None` when no full
/// interval has elapsed. Per kind, the yield is
/// `min(rate * intervals, storage_cap)`; an idle building never accumulates
/// past its own storage.
pub fn harvest_amount_and_time(building: &Building, now: u64) -> Option<HarvestOutcome> {
    let origin = harvest_origin(building);
    let intervals = now.saturating_sub(origin) / HARVEST_INTERVAL_MS;
    if intervals == 0 {
        return None;
    }
    let stats = stats_for(building.kind, building.level, building.rotated);
    let harvest = stats
        .generated_per_interval
        .iter()
        .map(|(&kind, &rate)| {
            let cap = stats.max_storage.get(&kind).copied().unwrap_or(0);
            (kind, (rate * intervals as i64).min(cap))
        })
        .collect();
    Some(HarvestOutcome {
        harvest,
        last_harvested: origin + intervals * HARVEST_INTERVAL_MS,
    })
}

/// The instant the next full interval completes, or `None` for a building
/// type that generates nothing.
pub fn next_harvest_time(building: &Building, now: u64) -> Option<u64> {
    let stats = stats_for(building.kind, building.level, building.rotated);
    if stats.generated_per_interval.is_empty() {
        return None;
    }
    let origin = harvest_origin(building);
    let intervals = now.saturating_sub(origin) / HARVEST_INTERVAL_MS;
    Some(origin + (intervals + 1) * HARVEST_INTERVAL_MS)
}
